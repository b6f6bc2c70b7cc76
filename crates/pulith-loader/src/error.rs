//! Error types for pulith-loader.

use thiserror::Error;

/// Failures surfaced synchronously or through a producer's write future.
///
/// Network failures never reach callers as `Err`; they are rendered into the
/// request's `error` event. [`Error::Network`] exists so engines and upload
/// streams can carry a [`NetError`] through `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request options: {0}")]
    InvalidOptions(String),

    #[error("Expected an ArrayBufferView, got {0}")]
    NotABufferView(&'static str),

    #[error("Only one write can be pending at a time")]
    WritePending,

    #[error("Can't write after calling done()")]
    WriteAfterDone,

    #[error("upload pipe closed before the chunk was drained")]
    PipeClosed,

    #[error("upload size is no longer available")]
    SizeUnavailable,

    #[error("upload declared {expected} bytes but the producer wrote {actual}")]
    UploadSize { expected: u64, actual: u64 },

    #[error(transparent)]
    Network(#[from] NetError),

    #[cfg(feature = "reqwest")]
    #[error("failed to configure HTTP engine: {0}")]
    EngineSetup(#[source] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A network-level failure reported by an engine on completion.
///
/// The `Display` form is the stable description carried by the `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("net::ERR_FAILED")]
    Failed,

    #[error("net::ERR_ABORTED")]
    Aborted,

    #[error("net::ERR_INVALID_ARGUMENT")]
    InvalidArgument,

    #[error("net::ERR_CONNECTION_REFUSED")]
    ConnectionRefused,

    #[error("net::ERR_CONNECTION_RESET")]
    ConnectionReset,

    #[error("net::ERR_CONNECTION_FAILED")]
    ConnectionFailed,

    #[error("net::ERR_TIMED_OUT")]
    TimedOut,

    #[error("net::ERR_TOO_MANY_REDIRECTS")]
    TooManyRedirects,

    #[error("net::ERR_UNSAFE_REDIRECT")]
    UnsafeRedirect,

    #[error("net::ERR_UPLOAD_FAILED")]
    UploadFailed,

    #[error("net::ERR_INVALID_RESPONSE")]
    InvalidResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_errors_keep_script_facing_messages() {
        assert_eq!(
            Error::WritePending.to_string(),
            "Only one write can be pending at a time"
        );
        assert_eq!(Error::WriteAfterDone.to_string(), "Can't write after calling done()");
        assert_eq!(
            Error::NotABufferView("string").to_string(),
            "Expected an ArrayBufferView, got string"
        );
    }

    #[test]
    fn network_error_is_transparent() {
        let err = Error::from(NetError::ConnectionRefused);
        assert_eq!(err.to_string(), "net::ERR_CONNECTION_REFUSED");
    }

    #[test]
    fn upload_size_mismatch_reports_both_sides() {
        let err = Error::UploadSize { expected: 3, actual: 5 };
        assert_eq!(err.to_string(), "upload declared 3 bytes but the producer wrote 5");
    }
}

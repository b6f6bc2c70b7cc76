use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::effects::{BodyProducer, Session};
use crate::error::{Error, Result};

/// What the engine does when the server answers with a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Follow redirects up to the engine's limit.
    #[default]
    Follow,
    /// Fail the request on the first redirect.
    Error,
    /// Surface the 3xx response as-is.
    Manual,
}

impl fmt::Display for RedirectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectMode::Follow => write!(f, "follow"),
            RedirectMode::Error => write!(f, "error"),
            RedirectMode::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for RedirectMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "follow" => Ok(RedirectMode::Follow),
            "error" => Ok(RedirectMode::Error),
            "manual" => Ok(RedirectMode::Manual),
            other => Err(Error::InvalidOptions(format!("unknown redirect mode '{other}'"))),
        }
    }
}

/// Request body as supplied by the caller.
pub enum RequestBody {
    /// A complete buffer, copied into the request.
    Bytes(Bytes),
    /// A producer invoked when the engine starts reading the upload.
    Producer(BodyProducer),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Producer(_) => f.write_str("Producer { ... }"),
        }
    }
}

/// Options for issuing a streaming request.
///
/// # Examples
///
/// ```
/// use pulith_loader::{RedirectMode, RequestOptions};
///
/// let options = RequestOptions::default()
///     .method("POST")
///     .url("https://example.com/upload")
///     .header("X-Test", "v")
///     .redirect(RedirectMode::Manual)
///     .body_bytes(b"payload".to_vec());
/// ```
pub struct RequestOptions {
    /// HTTP method. Default: `GET`.
    pub method: String,

    /// Absolute URL. Required.
    pub url: Option<String>,

    /// Extra request headers, in the order given.
    ///
    /// Entries whose name is not a valid token or whose value is not a valid
    /// field value are dropped when the request is issued.
    pub extra_headers: Vec<(String, String)>,

    /// Default: [`RedirectMode::Follow`].
    pub redirect: RedirectMode,

    pub body: Option<RequestBody>,

    /// Explicit session; takes precedence over `partition`.
    pub session: Option<Rc<Session>>,

    /// Partition naming the session to use when `session` is unset. `None`
    /// selects the default session.
    pub partition: Option<String>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("extra_headers", &self.extra_headers)
            .field("redirect", &self.redirect)
            .field("body", &self.body)
            .field("session", &self.session.as_ref().map(|s| s.partition().to_owned()))
            .field("partition", &self.partition)
            .finish()
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_owned(),
            url: None,
            extra_headers: Vec::new(),
            redirect: RedirectMode::default(),
            body: None,
            session: None,
            partition: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarshalledOptions {
    method: Option<String>,
    url: Option<String>,
    extra_headers: Option<serde_json::Map<String, Value>>,
    redirect: Option<String>,
    partition: Option<String>,
}

impl RequestOptions {
    /// Read options from a marshalled script dictionary.
    ///
    /// Recognised keys: `method`, `url`, `extraHeaders`, `redirect`,
    /// `partition`. A body or session object cannot travel through JSON and
    /// is attached with [`body`](Self::body) / [`session`](Self::session).
    /// Header entries with non-string values are skipped like any other
    /// invalid header.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOptions`] if `value` is not a dictionary, a known key
    /// has the wrong type, or `redirect` is not a known mode.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidOptions("Expected a dictionary".to_owned()));
        }
        let raw: MarshalledOptions = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidOptions(e.to_string()))?;

        let mut options = RequestOptions::default();
        if let Some(method) = raw.method {
            options.method = method;
        }
        options.url = raw.url;
        if let Some(headers) = raw.extra_headers {
            options.extra_headers = headers
                .into_iter()
                .filter_map(|(name, value)| match value {
                    Value::String(value) => Some((name, value)),
                    _ => None,
                })
                .collect();
        }
        if let Some(redirect) = raw.redirect {
            options.redirect = redirect.parse()?;
        }
        options.partition = raw.partition;
        Ok(options)
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Add a single extra header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Replace all extra headers.
    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn body_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(RequestBody::Bytes(bytes.into()))
    }

    #[must_use]
    pub fn body_producer(self, producer: BodyProducer) -> Self {
        self.body(RequestBody::Producer(producer))
    }

    #[must_use]
    pub fn session(mut self, session: Rc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

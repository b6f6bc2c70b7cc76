use bytes::Bytes;
use url::Url;

use super::header::HeaderList;
use crate::effects::{AuthChallengeInfo, LoginCallback};

/// An event emitted by a streaming request, in emission order:
/// `login`* → `response-started`? → `data`* → (`complete` | `error`).
#[derive(Debug)]
pub enum LoaderEvent {
    /// The server asked for credentials. Answer through `callback`;
    /// dropping it declines.
    Login {
        url: Url,
        first_attempt: bool,
        auth_info: AuthChallengeInfo,
        callback: LoginCallback,
    },

    ResponseStarted {
        final_url: Url,
        status_code: u16,
        headers: HeaderList,
    },

    /// A body chunk, owned by the event.
    Data(Bytes),

    Complete,

    /// The request failed; carries a `net::ERR_*` description.
    Error(String),
}

impl LoaderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoaderEvent::Login { .. } => "login",
            LoaderEvent::ResponseStarted { .. } => "response-started",
            LoaderEvent::Data(_) => "data",
            LoaderEvent::Complete => "complete",
            LoaderEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoaderEvent::Complete | LoaderEvent::Error(_))
    }
}

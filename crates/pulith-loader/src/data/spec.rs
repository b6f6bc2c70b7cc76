use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use url::Url;

use super::header::HeaderList;
use super::options::RedirectMode;
use crate::effects::ChunkedDataSource;

/// Identifier of a live request, unique among the requests a coordinator
/// currently tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u32);

impl RequestId {
    pub(crate) fn new(raw: u32) -> Self { Self(raw) }

    pub fn get(self) -> u32 { self.0 }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Request body handed to an engine.
#[derive(Clone)]
pub enum UploadBody {
    /// A fixed buffer, replayable on retries.
    Bytes(Bytes),
    /// A body pulled from a producer; its length is known only once the
    /// producer calls `done()`.
    Chunked(Rc<dyn ChunkedDataSource>),
}

impl UploadBody {
    pub fn is_replayable(&self) -> bool { matches!(self, UploadBody::Bytes(_)) }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            UploadBody::Chunked(_) => f.write_str("Chunked"),
        }
    }
}

/// Everything an engine needs to issue one request.
///
/// Built once by the request wrapper and moved into the engine; nothing
/// mutates it afterwards.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: String,
    pub url: Url,
    pub headers: HeaderList,
    pub redirect: RedirectMode,
    pub body: Option<UploadBody>,
    /// Token for routing out-of-band callbacks (authentication challenges)
    /// back to the request through the coordinator's registry.
    pub correlation: RequestId,
}

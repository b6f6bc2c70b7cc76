//! Immutable data types for streaming requests.
//!
//! Options as supplied by the embedder, the request spec handed to an
//! engine, and the events emitted back out. Nothing here performs I/O.

pub mod event;
pub mod header;
pub mod options;
pub mod spec;
pub mod value;

pub use event::LoaderEvent;
pub use header::{Header, HeaderList};
pub use options::{RedirectMode, RequestBody, RequestOptions};
pub use spec::{RequestId, RequestSpec, UploadBody};
pub use value::ScriptValue;

//! Effectful side of the loader: the engine seam, the upload bridge and the
//! request wrapper.
//!
//! Everything in this module lives on the coordination thread. Types are
//! `Rc`-based and `!Send`; deferred work is spawned with
//! [`tokio::task::spawn_local`], so requests must be driven from inside a
//! [`tokio::task::LocalSet`].

mod auth;
mod coordinator;
mod engine;
mod http;
mod pipe;
mod registry;
mod request;
mod upload;

pub use auth::{AuthChallengeInfo, AuthResponder, AuthResponse, Credentials, LoginCallback};
pub use coordinator::{Coordinator, EngineFactory, Session};
pub use engine::{AuthRouter, Loader, LoaderClient, NetworkEngine, ResponseHead, ResumeSignal, Resumed};
pub use http::EngineOptions;
pub use pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
pub use request::{RequestEvents, RequestState, StreamingRequest};
pub use upload::{BodyProducer, ChunkedDataSource, ChunkedUploadSource, SizeRequest, UploadWriter, WritePromise};

#[cfg(feature = "reqwest")]
pub use http::ReqwestEngine;

//! Streaming HTTP requests with chunked uploads, for single-threaded script
//! embeddings.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable options, request specs and events
//! - [`core`] - Pure header validation and challenge parsing
//! - [`effects`] - The engine seam, upload bridge and request lifecycle
//!
//! # Key Features
//!
//! - **Chunked Uploads**: a producer pushes chunks one write at a time; the
//!   engine pulls them through a bounded pipe and learns the size on `done()`
//! - **Streamed Responses**: `response-started`, `data`, then exactly one of
//!   `complete` or `error`
//! - **Self-Pinning**: an in-flight request is kept alive by the
//!   coordinator's registry, not by the embedder's handle
//! - **Engine-Agnostic**: any [`NetworkEngine`] can carry the requests;
//!   [`ReqwestEngine`] is the default
//!
//! # Example
//!
//! ```no_run
//! use pulith_loader::{Coordinator, EngineOptions, LoaderEvent, RequestOptions, StreamingRequest};
//!
//! # async fn demo() -> pulith_loader::Result<()> {
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let coordinator = Coordinator::with_reqwest(EngineOptions::default());
//!         let options = RequestOptions::default().url("https://example.com/");
//!         let (_request, mut events) = StreamingRequest::issue(&coordinator, options)?;
//!         while let Some(event) = events.next().await {
//!             if let LoaderEvent::Data(chunk) = event {
//!                 println!("{} bytes", chunk.len());
//!             }
//!         }
//!         Ok(())
//!     })
//!     .await
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use data::{Header, HeaderList, LoaderEvent, RedirectMode, RequestBody, RequestId, RequestOptions, ScriptValue};
pub use effects::{
    AuthChallengeInfo, AuthRouter, BodyProducer, ChunkedDataSource, ChunkedUploadSource, Coordinator, Credentials,
    EngineOptions, Loader, LoaderClient, LoginCallback, NetworkEngine, RequestEvents, RequestState, ResponseHead,
    ResumeSignal, Session, StreamingRequest, UploadWriter,
};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestEngine;

pub use error::{Error, NetError, Result};

//! Chunked upload bridge.
//!
//! A [`ChunkedUploadSource`] turns a producer's `write(chunk)` / `done()`
//! calls into the pull-based [`ChunkedDataSource`] an engine reads from:
//!
//! 1. The engine registers interest in the final size
//!    ([`request_size`](ChunkedDataSource::request_size)) and hands over the
//!    writing end of a pipe ([`start_reading`](ChunkedDataSource::start_reading)).
//! 2. `start_reading` spawns the producer with an [`UploadWriter`].
//! 3. Each `write` drains one chunk into the pipe; its [`WritePromise`]
//!    resolves once the pipe accepted the chunk. Only one write may be in
//!    flight, so at most one chunk sits between producer and pipe.
//! 4. `done` resolves the size request with the total bytes written.
//!
//! A failed drain discards the size request. The engine's size query then
//! fails, which fails the upload and completes the request with an error.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use tokio::sync::oneshot;

use super::coordinator::Runtime;
use super::pipe::PipeWriter;
use crate::data::ScriptValue;
use crate::error::{Error, Result};

/// The pull side of a chunked request body, as seen by an engine.
pub trait ChunkedDataSource {
    /// Register interest in the total size; resolves once the producer is
    /// done. A later call replaces the earlier request.
    fn request_size(&self) -> SizeRequest;

    /// Start producing into `pipe`. Producers can only be started once;
    /// further calls, and calls during teardown, stop silently.
    fn start_reading(&self, pipe: PipeWriter);
}

/// Resolves to the total upload size, or [`Error::SizeUnavailable`] if the
/// size can no longer be reported.
pub struct SizeRequest(pub(crate) oneshot::Receiver<u64>);

impl Future for SizeRequest {
    type Output = Result<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|size| size.map_err(|_| Error::SizeUnavailable))
    }
}

/// Outcome of one producer write.
///
/// Rejections are decided when `write` is called; a successful write
/// resolves once its chunk is drained into the pipe.
#[must_use = "a write is only known to have drained once its promise resolves"]
pub struct WritePromise(oneshot::Receiver<Result<()>>);

impl WritePromise {
    fn pending() -> (oneshot::Sender<Result<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    fn rejected(err: Error) -> Self {
        let (tx, promise) = Self::pending();
        let _ = tx.send(Err(err));
        promise
    }
}

impl Future for WritePromise {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::PipeClosed)))
    }
}

/// A script-side body producer, called once with the writer for the upload.
pub struct BodyProducer(Box<dyn FnOnce(UploadWriter) -> LocalBoxFuture<'static, ()>>);

impl BodyProducer {
    /// # Examples
    ///
    /// ```
    /// use pulith_loader::BodyProducer;
    ///
    /// let producer = BodyProducer::new(|writer| async move {
    ///     if writer.write(b"hello".to_vec()).await.is_ok() {
    ///         writer.done();
    ///     }
    /// });
    /// ```
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(UploadWriter) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self(Box::new(move |writer| Box::pin(producer(writer))))
    }

    fn call(self, writer: UploadWriter) -> LocalBoxFuture<'static, ()> { (self.0)(writer) }
}

impl fmt::Debug for BodyProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("BodyProducer { ... }") }
}

/// Adapter from a push-style producer to a [`ChunkedDataSource`].
pub struct ChunkedUploadSource {
    this: Weak<ChunkedUploadSource>,
    runtime: Rc<Runtime>,
    producer: RefCell<Option<BodyProducer>>,
    size_callback: RefCell<Option<oneshot::Sender<u64>>>,
    pipe: RefCell<Option<PipeWriter>>,
    is_writing: Cell<bool>,
    bytes_written: Cell<u64>,
}

impl ChunkedUploadSource {
    pub(crate) fn new(producer: BodyProducer, runtime: Rc<Runtime>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime,
            producer: RefCell::new(Some(producer)),
            size_callback: RefCell::new(None),
            pipe: RefCell::new(None),
            is_writing: Cell::new(false),
            bytes_written: Cell::new(0),
        })
    }

    /// Total bytes accepted by `write` so far.
    pub fn bytes_written(&self) -> u64 { self.bytes_written.get() }

    pub fn is_writing(&self) -> bool { self.is_writing.get() }

    fn write(&self, chunk: ScriptValue) -> WritePromise {
        self.runtime.assert_current();
        let chunk = match chunk {
            ScriptValue::Buffer(bytes) => bytes,
            other => return WritePromise::rejected(Error::NotABufferView(other.type_name())),
        };
        if self.is_writing.get() {
            return WritePromise::rejected(Error::WritePending);
        }
        if self.size_callback.borrow().is_none() {
            return WritePromise::rejected(Error::WriteAfterDone);
        }
        let (Some(this), Some(pipe)) = (self.this.upgrade(), self.pipe.borrow().clone()) else {
            return WritePromise::rejected(Error::PipeClosed);
        };

        self.is_writing.set(true);
        self.bytes_written.set(self.bytes_written.get() + chunk.len() as u64);
        tracing::trace!(bytes = chunk.len(), total = self.bytes_written.get(), "draining upload chunk");

        let (tx, promise) = WritePromise::pending();
        tokio::task::spawn_local(async move {
            let drained = pipe.write(chunk).await;
            this.on_write_complete(drained, tx);
        });
        promise
    }

    fn on_write_complete(&self, drained: Result<()>, promise: oneshot::Sender<Result<()>>) {
        self.runtime.assert_current();
        self.is_writing.set(false);
        if let Err(err) = &drained {
            tracing::debug!(error = %err, "upload chunk drain failed, dropping size request");
            self.size_callback.borrow_mut().take();
        }
        let _ = promise.send(drained);
    }

    fn done(&self) {
        self.runtime.assert_current();
        let callback = self.size_callback.borrow_mut().take();
        if let Some(callback) = callback {
            let total = self.bytes_written.get();
            tracing::debug!(total, "upload producer done");
            let _ = callback.send(total);
        }
    }

    fn stop_reading(&self) {
        self.pipe.borrow_mut().take();
        self.size_callback.borrow_mut().take();
    }
}

impl ChunkedDataSource for ChunkedUploadSource {
    fn request_size(&self) -> SizeRequest {
        self.runtime.assert_current();
        let (tx, rx) = oneshot::channel();
        *self.size_callback.borrow_mut() = Some(tx);
        SizeRequest(rx)
    }

    fn start_reading(&self, pipe: PipeWriter) {
        self.runtime.assert_current();
        *self.pipe.borrow_mut() = Some(pipe);

        if self.runtime.is_shutting_down() {
            tracing::debug!("runtime tearing down, not starting upload producer");
            self.stop_reading();
            return;
        }
        let producer = self.producer.borrow_mut().take();
        let (Some(this), Some(producer)) = (self.this.upgrade(), producer) else {
            tracing::debug!("upload producer unavailable, not reading");
            self.stop_reading();
            return;
        };

        tokio::task::spawn_local(producer.call(UploadWriter { source: this }));
    }
}

impl fmt::Debug for ChunkedUploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedUploadSource")
            .field("is_writing", &self.is_writing.get())
            .field("bytes_written", &self.bytes_written.get())
            .field("size_pending", &self.size_callback.borrow().is_some())
            .finish()
    }
}

/// Handle passed to a [`BodyProducer`].
#[derive(Clone)]
pub struct UploadWriter {
    source: Rc<ChunkedUploadSource>,
}

impl UploadWriter {
    /// Push one chunk.
    ///
    /// Rejects when `chunk` is not a buffer ([`Error::NotABufferView`]), a
    /// previous write is still draining ([`Error::WritePending`]), or
    /// `done()` was already called ([`Error::WriteAfterDone`]). Await the
    /// promise before writing again.
    pub fn write(&self, chunk: impl Into<ScriptValue>) -> WritePromise { self.source.write(chunk.into()) }

    /// Declare the body complete. Calls after the first are ignored.
    pub fn done(&self) { self.source.done() }

    pub fn bytes_written(&self) -> u64 { self.source.bytes_written() }
}

impl fmt::Debug for UploadWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadWriter").field("source", &self.source).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::pipe::{PipeReader, pipe};
    use crate::effects::coordinator::Coordinator;
    use bytes::Bytes;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    fn runtime() -> Rc<Runtime> {
        let coordinator = Coordinator::new(|_| unreachable!("no engine needed"));
        Rc::clone(coordinator.runtime())
    }

    /// A source whose producer hands its writer back to the test.
    fn captured_source(
        runtime: Rc<Runtime>,
        capacity: usize,
    ) -> (Rc<ChunkedUploadSource>, SizeRequest, PipeReader, oneshot::Receiver<UploadWriter>) {
        let (writer_tx, writer_rx) = oneshot::channel();
        let source = ChunkedUploadSource::new(
            BodyProducer::new(move |writer| async move {
                let _ = writer_tx.send(writer);
            }),
            runtime,
        );
        let size = source.request_size();
        let (pipe_writer, reader) = pipe(capacity);
        source.start_reading(pipe_writer);
        (source, size, reader, writer_rx)
    }

    #[tokio::test]
    async fn second_concurrent_write_is_rejected() {
        LocalSet::new()
            .run_until(async {
                let (_source, _size, mut reader, writer) = captured_source(runtime(), 1);
                let writer = writer.await.unwrap();

                // Fill the pipe so the next drain has to wait for the reader.
                writer.write(vec![0u8; 1]).await.unwrap();

                let first = writer.write(vec![1u8; 4]);
                let second = writer.write(vec![2u8; 4]);
                assert!(matches!(second.await, Err(Error::WritePending)));

                let invalid_second = writer.write("not bytes");
                assert!(invalid_second.await.is_err());

                assert_eq!(reader.read().await.map(|b| b.len()), Some(1));
                first.await.unwrap();
                assert_eq!(reader.read().await, Some(Bytes::from(vec![1u8; 4])));
                assert_eq!(writer.bytes_written(), 5);
            })
            .await;
    }

    #[tokio::test]
    async fn non_buffer_chunks_are_rejected() {
        LocalSet::new()
            .run_until(async {
                let (_source, _size, _reader, writer) = captured_source(runtime(), 1);
                let writer = writer.await.unwrap();

                for value in [ScriptValue::from("text"), ScriptValue::Number(1.0), ScriptValue::Null] {
                    assert!(matches!(writer.write(value).await, Err(Error::NotABufferView(_))));
                }
                assert_eq!(writer.bytes_written(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn size_resolves_only_after_done() {
        LocalSet::new()
            .run_until(async {
                let (_source, mut size, mut reader, writer) = captured_source(runtime(), 4);
                let writer = writer.await.unwrap();

                for chunk in [&b"abc"[..], &b"de"[..], &b"fghij"[..]] {
                    writer.write(chunk).await.unwrap();
                    tokio::task::yield_now().await;
                    assert!(futures_util::poll!(&mut size).is_pending());
                }
                writer.done();

                assert_eq!(size.await.unwrap(), 10);
                let mut received = Vec::new();
                for _ in 0..3 {
                    received.extend_from_slice(&reader.read().await.unwrap());
                }
                assert_eq!(received, b"abcdefghij");
            })
            .await;
    }

    #[tokio::test]
    async fn write_after_done_is_rejected_and_not_counted() {
        LocalSet::new()
            .run_until(async {
                let (_source, size, _reader, writer) = captured_source(runtime(), 4);
                let writer = writer.await.unwrap();

                writer.write(vec![9u8; 6]).await.unwrap();
                writer.done();
                writer.done();
                assert!(matches!(writer.write(vec![1u8]).await, Err(Error::WriteAfterDone)));

                assert_eq!(size.await.unwrap(), 6);
                assert_eq!(writer.bytes_written(), 6);
            })
            .await;
    }

    #[tokio::test]
    async fn drain_failure_rejects_and_discards_size() {
        LocalSet::new()
            .run_until(async {
                let (_source, size, reader, writer) = captured_source(runtime(), 1);
                let writer = writer.await.unwrap();
                drop(reader);

                assert!(matches!(writer.write(vec![1u8; 3]).await, Err(Error::PipeClosed)));
                assert!(matches!(size.await, Err(Error::SizeUnavailable)));
                assert!(matches!(writer.write(vec![1u8]).await, Err(Error::WriteAfterDone)));
            })
            .await;
    }

    #[tokio::test]
    async fn producer_is_started_once() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let counter = Rc::clone(&calls);
                let source = ChunkedUploadSource::new(
                    BodyProducer::new(move |_writer| async move { counter.set(counter.get() + 1) }),
                    runtime(),
                );
                let _size = source.request_size();
                let (first, _r1) = pipe(1);
                source.start_reading(first);
                tokio::task::yield_now().await;

                let second_size = source.request_size();
                let (second, _r2) = pipe(1);
                source.start_reading(second);
                tokio::task::yield_now().await;

                assert_eq!(calls.get(), 1);
                assert!(matches!(second_size.await, Err(Error::SizeUnavailable)));
            })
            .await;
    }

    #[tokio::test]
    async fn teardown_stops_reading_silently() {
        LocalSet::new()
            .run_until(async {
                let coordinator = Coordinator::new(|_| unreachable!("no engine needed"));
                let started = Rc::new(Cell::new(false));
                let flag = Rc::clone(&started);
                let source = ChunkedUploadSource::new(
                    BodyProducer::new(move |_writer| async move { flag.set(true) }),
                    Rc::clone(coordinator.runtime()),
                );
                coordinator.shutdown();

                let size = source.request_size();
                let (writer, mut reader) = pipe(1);
                source.start_reading(writer);
                tokio::task::yield_now().await;

                assert!(!started.get());
                assert_eq!(reader.read().await, None);
                assert!(size.await.is_err());
            })
            .await;
    }
}

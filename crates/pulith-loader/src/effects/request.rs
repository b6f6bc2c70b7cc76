use std::cell::{Cell, RefCell};
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use url::Url;

use super::auth::{AuthChallengeInfo, AuthResponder, LoginCallback};
use super::coordinator::{Coordinator, Runtime};
use super::engine::{AuthRouter, Loader, LoaderClient, ResponseHead, ResumeSignal};
use super::registry::Registry;
use super::upload::{ChunkedDataSource, ChunkedUploadSource};
use crate::core::{is_valid_header_name, valid_headers};
use crate::data::{LoaderEvent, RequestBody, RequestId, RequestOptions, RequestSpec, UploadBody};
use crate::error::{Error, NetError, Result};

/// Where a request is in its lifecycle. Every terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Initializing,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed | RequestState::Cancelled)
    }
}

pub(crate) struct RequestInner {
    id: RequestId,
    runtime: Rc<Runtime>,
    registry: Weak<Registry>,
    state: Cell<RequestState>,
    loader: RefCell<Option<Loader>>,
    events: RefCell<Option<mpsc::UnboundedSender<LoaderEvent>>>,
    cancelled: Rc<Cell<bool>>,
    upload: Option<Rc<ChunkedUploadSource>>,
}

impl RequestInner {
    pub(crate) fn id(&self) -> RequestId { self.id }

    fn emit(&self, event: LoaderEvent) {
        let name = event.name();
        let sent = match self.events.borrow().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        };
        if !sent {
            tracing::trace!(request_id = %self.id, event = name, "event dropped, no listener");
        }
    }

    pub(crate) fn cancel(&self) {
        self.runtime.assert_current();
        if self.state.get().is_terminal() {
            return;
        }
        tracing::debug!(request_id = %self.id, "request cancelled");
        self.cancelled.set(true);
        self.finish(RequestState::Cancelled);
    }

    /// Enter `state`, then release the event sender, the loader and the
    /// registry pin, in that order.
    fn finish(&self, state: RequestState) {
        self.state.set(state);
        self.events.borrow_mut().take();
        let loader = self.loader.borrow_mut().take();
        drop(loader);
        let pin = self.registry.upgrade().and_then(|registry| registry.unpin(self.id));
        drop(pin);
    }

    pub(crate) fn on_auth_required(
        &self,
        url: &Url,
        first_attempt: bool,
        auth_info: AuthChallengeInfo,
        responder: AuthResponder,
    ) {
        self.runtime.assert_current();
        if self.state.get().is_terminal() {
            tracing::debug!(request_id = %self.id, "declining challenge for finished request");
            return;
        }
        self.emit(LoaderEvent::Login {
            url: url.clone(),
            first_attempt,
            auth_info,
            callback: LoginCallback::new(responder),
        });
    }

    fn on_response_started(&self, final_url: &Url, head: &ResponseHead) {
        self.runtime.assert_current();
        if self.state.get().is_terminal() {
            return;
        }
        tracing::debug!(request_id = %self.id, status = head.status_code, "response started");
        self.emit(LoaderEvent::ResponseStarted {
            final_url: final_url.clone(),
            status_code: head.status_code,
            headers: head.headers.clone(),
        });
    }

    fn on_data_received(&self, chunk: &[u8], resume: ResumeSignal) {
        self.runtime.assert_current();
        if self.state.get().is_terminal() {
            return;
        }
        tracing::trace!(request_id = %self.id, bytes = chunk.len(), "data received");
        self.emit(LoaderEvent::Data(Bytes::copy_from_slice(chunk)));
        // Consumers have no way to hold the stream back, so the next chunk
        // is allowed as soon as this one is queued.
        resume.resume();
    }

    fn on_complete(&self, result: std::result::Result<(), NetError>) {
        self.runtime.assert_current();
        if self.state.get().is_terminal() {
            return;
        }
        match result {
            Ok(()) => {
                tracing::debug!(request_id = %self.id, "request complete");
                self.emit(LoaderEvent::Complete);
                self.finish(RequestState::Completed);
            }
            Err(err) => {
                tracing::debug!(request_id = %self.id, error = %err, "request failed");
                self.emit(LoaderEvent::Error(err.to_string()));
                self.finish(RequestState::Failed);
            }
        }
    }
}

impl Drop for RequestInner {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
    }
}

/// The engine's path back into a request. Holds no strong reference, so
/// only the registry pin keeps an in-flight request alive.
struct RequestClient(Weak<RequestInner>);

impl LoaderClient for RequestClient {
    fn on_response_started(&self, final_url: &Url, head: &ResponseHead) {
        if let Some(request) = self.0.upgrade() {
            request.on_response_started(final_url, head);
        }
    }

    fn on_data_received(&self, chunk: &[u8], resume: ResumeSignal) {
        if let Some(request) = self.0.upgrade() {
            request.on_data_received(chunk, resume);
        }
    }

    fn on_complete(&self, result: std::result::Result<(), NetError>) {
        if let Some(request) = self.0.upgrade() {
            request.on_complete(result);
        }
    }

    fn on_retry(&self) {
        if let Some(request) = self.0.upgrade() {
            tracing::trace!(request_id = %request.id, "engine retrying, not surfaced");
        }
    }
}

/// Handle to one streaming request.
///
/// The request stays alive while in flight even if every handle is
/// dropped; it ends through exactly one of [`cancel`](Self::cancel), a
/// `complete` event or an `error` event.
#[derive(Clone)]
pub struct StreamingRequest {
    inner: Rc<RequestInner>,
}

impl StreamingRequest {
    /// Validate `options`, submit the request to its session's engine and
    /// start streaming.
    ///
    /// Header entries with an invalid name or value are dropped silently.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOptions`] if the URL is missing or unparseable or
    /// the method is not a token, and whatever the engine factory returns
    /// when the session has to be created. No network activity has started
    /// when this fails.
    pub fn issue(coordinator: &Coordinator, options: RequestOptions) -> Result<(Self, RequestEvents)> {
        let runtime = coordinator.runtime();
        runtime.assert_current();

        let RequestOptions {
            method,
            url,
            extra_headers,
            redirect,
            body,
            session,
            partition,
        } = options;

        let url = url.ok_or_else(|| Error::InvalidOptions("missing url".to_owned()))?;
        let url = Url::parse(&url).map_err(|e| Error::InvalidOptions(format!("invalid url '{url}': {e}")))?;
        if !is_valid_header_name(&method) {
            return Err(Error::InvalidOptions(format!("invalid method '{method}'")));
        }
        let headers = valid_headers(extra_headers);
        let session = match (session, partition) {
            (Some(session), _) => session,
            (None, Some(partition)) => coordinator.session(&partition)?,
            (None, None) => coordinator.default_session()?,
        };

        let (body, upload) = match body {
            None => (None, None),
            Some(RequestBody::Bytes(bytes)) => (Some(UploadBody::Bytes(bytes)), None),
            Some(RequestBody::Producer(producer)) => {
                let source = ChunkedUploadSource::new(producer, Rc::clone(runtime));
                let pull: Rc<dyn ChunkedDataSource> = Rc::clone(&source) as Rc<dyn ChunkedDataSource>;
                (Some(UploadBody::Chunked(pull)), Some(source))
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancelled = Rc::new(Cell::new(false));
        let registry = coordinator.registry();
        let inner = registry.register(|id| RequestInner {
            id,
            runtime: Rc::clone(runtime),
            registry: Rc::downgrade(registry),
            state: Cell::new(RequestState::Initializing),
            loader: RefCell::new(None),
            events: RefCell::new(Some(events_tx)),
            cancelled: Rc::clone(&cancelled),
            upload,
        });

        let spec = RequestSpec {
            method,
            url,
            headers,
            redirect,
            body,
            correlation: inner.id(),
        };
        tracing::debug!(
            request_id = %inner.id,
            method = %spec.method,
            url = %spec.url,
            partition = session.partition(),
            "issuing request"
        );

        let client: Rc<dyn LoaderClient> = Rc::new(RequestClient(Rc::downgrade(&inner)));
        let loader = session.engine().start(spec, client, AuthRouter::new(registry));
        if inner.state.get().is_terminal() {
            tracing::warn!(request_id = %inner.id, "engine finished request before returning its loader");
        } else {
            *inner.loader.borrow_mut() = Some(loader);
            registry.pin(&inner);
            inner.state.set(RequestState::InFlight);
        }

        let events = RequestEvents {
            rx: events_rx,
            cancelled,
        };
        Ok((Self { inner }, events))
    }

    /// Resolve a live request by id on `coordinator`'s thread.
    pub fn from_id(coordinator: &Coordinator, id: RequestId) -> Option<Self> {
        coordinator.runtime().assert_current();
        coordinator.registry().lookup(id).map(|inner| Self { inner })
    }

    pub fn id(&self) -> RequestId { self.inner.id }

    pub fn state(&self) -> RequestState { self.inner.state.get() }

    pub fn is_in_flight(&self) -> bool { self.state() == RequestState::InFlight }

    /// Abort the request. No event is delivered after this returns,
    /// including events already queued. A no-op once the request ended.
    pub fn cancel(&self) { self.inner.cancel() }

    /// Bytes accepted from the body producer, if the body is chunked.
    pub fn bytes_uploaded(&self) -> Option<u64> {
        self.inner.upload.as_ref().map(|upload| upload.bytes_written())
    }
}

impl fmt::Debug for StreamingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingRequest")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("upload", &self.inner.upload)
            .finish()
    }
}

/// The events of one request, in emission order. Ends after the terminal
/// event, or immediately once the request is cancelled.
pub struct RequestEvents {
    rx: mpsc::UnboundedReceiver<LoaderEvent>,
    cancelled: Rc<Cell<bool>>,
}

impl RequestEvents {
    pub async fn next(&mut self) -> Option<LoaderEvent> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// The next event if one is already queued.
    pub fn try_next(&mut self) -> Option<LoaderEvent> {
        if self.discard_if_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<LoaderEvent>> {
        if self.discard_if_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }

    fn discard_if_cancelled(&mut self) -> bool {
        if !self.cancelled.get() {
            return false;
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        true
    }
}

impl Stream for RequestEvents {
    type Item = LoaderEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LoaderEvent>> {
        self.get_mut().poll_event(cx)
    }
}

impl fmt::Debug for RequestEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvents")
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::engine::NetworkEngine;

    /// Engine that accepts every request and never calls back.
    struct SilentEngine {
        started: Cell<usize>,
        cancelled: Rc<Cell<usize>>,
    }

    impl NetworkEngine for SilentEngine {
        fn start(&self, _spec: RequestSpec, _client: Rc<dyn LoaderClient>, _auth: AuthRouter) -> Loader {
            self.started.set(self.started.get() + 1);
            let cancelled = Rc::clone(&self.cancelled);
            Loader::new(move || cancelled.set(cancelled.get() + 1))
        }
    }

    fn coordinator() -> (Coordinator, Rc<SilentEngine>) {
        let engine = Rc::new(SilentEngine {
            started: Cell::new(0),
            cancelled: Rc::new(Cell::new(0)),
        });
        (Coordinator::with_engine(engine.clone()), engine)
    }

    #[test]
    fn terminal_states() {
        assert!(!RequestState::Initializing.is_terminal());
        assert!(!RequestState::InFlight.is_terminal());
        assert!(RequestState::Completed.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
    }

    #[test]
    fn issued_request_is_pinned_until_cancelled() {
        let (coordinator, engine) = coordinator();
        let (request, mut events) =
            StreamingRequest::issue(&coordinator, RequestOptions::default().url("http://localhost/")).unwrap();
        let id = request.id();

        assert_eq!(engine.started.get(), 1);
        assert!(request.is_in_flight());
        drop(request);
        assert_eq!(coordinator.in_flight_requests(), 1);

        let request = StreamingRequest::from_id(&coordinator, id).unwrap();
        request.cancel();
        request.cancel();
        assert_eq!(request.state(), RequestState::Cancelled);
        assert_eq!(engine.cancelled.get(), 1);
        assert_eq!(coordinator.in_flight_requests(), 0);
        assert!(events.try_next().is_none());

        drop(request);
        assert_eq!(coordinator.live_requests(), 0);
        assert!(StreamingRequest::from_id(&coordinator, id).is_none());
    }

    #[test]
    fn invalid_method_is_a_configuration_error() {
        let (coordinator, engine) = coordinator();
        let result = StreamingRequest::issue(
            &coordinator,
            RequestOptions::default().method("GE T").url("http://localhost/"),
        );
        assert!(matches!(result, Err(Error::InvalidOptions(_))));
        assert_eq!(engine.started.get(), 0);
        assert_eq!(coordinator.live_requests(), 0);
    }

    #[test]
    fn ids_are_unique_among_live_requests() {
        let (coordinator, _engine) = coordinator();
        let options = || RequestOptions::default().url("http://localhost/");
        let (a, _ea) = StreamingRequest::issue(&coordinator, options()).unwrap();
        let (b, _eb) = StreamingRequest::issue(&coordinator, options()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(coordinator.live_requests(), 2);
    }
}

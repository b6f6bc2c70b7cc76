use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use url::Url;

use super::auth::{AuthChallengeInfo, AuthResponder, AuthResponse};
use super::registry::Registry;
use crate::data::{HeaderList, RequestId, RequestSpec};
use crate::error::NetError;

/// The network stack that actually performs requests.
///
/// Implementations handle redirects, TLS, caching and timeouts themselves.
/// Everything runs on the coordination thread: `start` is called there,
/// and every [`LoaderClient`] callback must be invoked there too.
///
/// # Contract
///
/// - `start` must not call back into `client` before it returns.
/// - For a chunked body, call [`ChunkedDataSource::request_size`] before
///   [`ChunkedDataSource::start_reading`].
/// - After [`LoaderClient::on_data_received`], do not deliver the next chunk
///   until the [`ResumeSignal`] fires.
/// - Call [`LoaderClient::on_complete`] exactly once, last.
/// - Once the returned [`Loader`] is dropped, never call `client` again.
///
/// [`ChunkedDataSource::request_size`]: super::ChunkedDataSource::request_size
/// [`ChunkedDataSource::start_reading`]: super::ChunkedDataSource::start_reading
///
/// # Implementations
///
/// - [`ReqwestEngine`](super::ReqwestEngine): production engine using `reqwest`
/// - Scripted engines for testing
pub trait NetworkEngine {
    fn start(&self, spec: RequestSpec, client: Rc<dyn LoaderClient>, auth: AuthRouter) -> Loader;
}

/// Callbacks from an engine into the request that owns the loader.
pub trait LoaderClient {
    fn on_response_started(&self, final_url: &Url, head: &ResponseHead);

    /// `chunk` is only valid for the duration of the call.
    fn on_data_received(&self, chunk: &[u8], resume: ResumeSignal);

    fn on_complete(&self, result: Result<(), NetError>);

    /// The engine is about to retry the request internally.
    fn on_retry(&self) {}
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: HeaderList,
}

/// Owning handle to an in-flight engine request.
///
/// Dropping it cancels the request and cuts the engine's only path back to
/// the client.
pub struct Loader {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Loader {
    /// A loader that runs `cancel` when dropped.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// One-shot permission for the engine to deliver the next chunk.
pub struct ResumeSignal(oneshot::Sender<()>);

impl ResumeSignal {
    pub fn new() -> (Self, Resumed) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), Resumed(rx))
    }

    pub fn resume(self) {
        let _ = self.0.send(());
    }
}

/// Engine side of a [`ResumeSignal`]. Resolves to `false` if the signal was
/// dropped without resuming.
pub struct Resumed(oneshot::Receiver<()>);

impl Resumed {
    /// Whether the signal already fired, without waiting.
    pub fn try_resumed(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }
}

impl Future for Resumed {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        Pin::new(&mut self.get_mut().0).poll(cx).map(|r| r.is_ok())
    }
}

/// Routes authentication challenges to requests by correlation token.
///
/// Challenges are out-of-band: engines raise them against
/// [`RequestSpec::correlation`] rather than the loader client, and the
/// router resolves the token through the coordinator's registry.
#[derive(Clone)]
pub struct AuthRouter {
    registry: Weak<Registry>,
}

impl AuthRouter {
    pub(crate) fn new(registry: &Rc<Registry>) -> Self {
        Self {
            registry: Rc::downgrade(registry),
        }
    }

    /// Deliver a challenge to request `id`. Resolves to the credentials to
    /// retry with, or `None` if declined or the request is gone.
    pub fn challenge(
        &self,
        id: RequestId,
        url: &Url,
        first_attempt: bool,
        info: AuthChallengeInfo,
    ) -> AuthResponse {
        let (responder, response) = AuthResponder::new();
        match self.registry.upgrade().and_then(|registry| registry.lookup(id)) {
            Some(request) => request.on_auth_required(url, first_attempt, info, responder),
            None => {
                tracing::debug!(request_id = %id, "declining challenge for unknown request");
                responder.decline();
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn loader_runs_cancel_once_on_drop() {
        let cancelled = Rc::new(Cell::new(0));
        let counter = Rc::clone(&cancelled);
        let loader = Loader::new(move || counter.set(counter.get() + 1));

        assert_eq!(cancelled.get(), 0);
        drop(loader);
        assert_eq!(cancelled.get(), 1);
    }

    #[tokio::test]
    async fn resume_signal_fires() {
        let (signal, mut resumed) = ResumeSignal::new();
        assert!(!resumed.try_resumed());
        signal.resume();
        assert!(resumed.await);
    }

    #[tokio::test]
    async fn dropped_resume_signal_reports_false() {
        let (signal, resumed) = ResumeSignal::new();
        drop(signal);
        assert!(!resumed.await);
    }

    #[tokio::test]
    async fn router_without_registry_declines() {
        let registry = Rc::new(Registry::new());
        let router = AuthRouter::new(&registry);
        drop(registry);

        let url = Url::parse("https://example.com/").unwrap();
        let response = router.challenge(
            RequestId::new(1),
            &url,
            true,
            AuthChallengeInfo::for_url(&url, false, "basic", "r"),
        );
        assert_eq!(response.await, None);
    }
}

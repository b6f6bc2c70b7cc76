use std::time::Duration;

use super::pipe::DEFAULT_PIPE_CAPACITY;

/// Configuration for a session's [`ReqwestEngine`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pulith_loader::EngineOptions;
///
/// let options = EngineOptions::default()
///     .user_agent("loader/1.0")
///     .connect_timeout(Duration::from_secs(10))
///     .max_redirects(5);
/// ```
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default: reqwest's own.
    pub user_agent: Option<String>,

    /// Default: none.
    pub connect_timeout: Option<Duration>,

    /// Redirects followed in [`RedirectMode::Follow`]. Default: 20.
    ///
    /// [`RedirectMode::Follow`]: crate::RedirectMode::Follow
    pub max_redirects: usize,

    /// Upload chunks buffered between producer and connection. Default: 4.
    pub pipe_capacity: usize,

    /// Honour `HTTP(S)_PROXY` from the environment. Default: true.
    pub use_system_proxy: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout: None,
            max_redirects: 20,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            use_system_proxy: true,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    #[must_use]
    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Connect directly, ignoring proxy environment variables.
    #[must_use]
    pub fn no_proxy(mut self) -> Self {
        self.use_system_proxy = false;
        self
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::cell::Cell;
    use std::error::Error as StdError;
    use std::rc::Rc;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use futures_util::{Stream, StreamExt, stream};
    use reqwest::header::{self, HeaderMap};
    use reqwest::{Method, StatusCode, redirect};
    use url::Url;

    use super::EngineOptions;
    use crate::core::parse_challenge;
    use crate::data::{HeaderList, RedirectMode, RequestSpec, UploadBody};
    use crate::effects::auth::{AuthChallengeInfo, Credentials};
    use crate::effects::engine::{AuthRouter, Loader, LoaderClient, NetworkEngine, ResponseHead, ResumeSignal};
    use crate::effects::pipe::{PipeReader, pipe};
    use crate::effects::upload::{ChunkedDataSource, SizeRequest};
    use crate::error::{Error, NetError, Result};

    /// Production engine backed by `reqwest`.
    ///
    /// Holds one client per redirect mode; all of them share the engine's
    /// settings and each keeps its own connection pool and cookie jar.
    pub struct ReqwestEngine {
        follow: reqwest::Client,
        error: reqwest::Client,
        manual: reqwest::Client,
        pipe_capacity: usize,
    }

    impl ReqwestEngine {
        /// # Errors
        ///
        /// [`Error::EngineSetup`] if the TLS backend or proxy settings
        /// cannot be initialised.
        pub fn new(options: EngineOptions) -> Result<Self> {
            let build = |policy: redirect::Policy| {
                let mut builder = reqwest::Client::builder().redirect(policy).cookie_store(true);
                if let Some(user_agent) = &options.user_agent {
                    builder = builder.user_agent(user_agent.as_str());
                }
                if let Some(timeout) = options.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if !options.use_system_proxy {
                    builder = builder.no_proxy();
                }
                builder.build().map_err(Error::EngineSetup)
            };

            Ok(Self {
                follow: build(redirect::Policy::limited(options.max_redirects))?,
                error: build(redirect::Policy::custom(|attempt| attempt.error(NetError::UnsafeRedirect)))?,
                manual: build(redirect::Policy::none())?,
                pipe_capacity: options.pipe_capacity,
            })
        }

        fn client(&self, mode: RedirectMode) -> &reqwest::Client {
            match mode {
                RedirectMode::Follow => &self.follow,
                RedirectMode::Error => &self.error,
                RedirectMode::Manual => &self.manual,
            }
        }
    }

    impl NetworkEngine for ReqwestEngine {
        fn start(&self, spec: RequestSpec, client: Rc<dyn LoaderClient>, auth: AuthRouter) -> Loader {
            let http = self.client(spec.redirect).clone();
            let cancelled = Rc::new(Cell::new(false));
            let client = Guarded {
                client,
                cancelled: Rc::clone(&cancelled),
            };
            let pipe_capacity = self.pipe_capacity;

            let task = tokio::task::spawn_local(async move {
                let result = run(&http, &spec, &client, &auth, pipe_capacity).await;
                client.on_complete(result);
            });
            Loader::new(move || {
                cancelled.set(true);
                task.abort();
            })
        }
    }

    /// Drops callbacks once the loader is gone, covering the stretch between
    /// `abort` and the task's next suspension point.
    struct Guarded {
        client: Rc<dyn LoaderClient>,
        cancelled: Rc<Cell<bool>>,
    }

    impl Guarded {
        fn live(&self) -> Option<&dyn LoaderClient> {
            (!self.cancelled.get()).then_some(&*self.client)
        }
    }

    impl LoaderClient for Guarded {
        fn on_response_started(&self, final_url: &Url, head: &ResponseHead) {
            if let Some(client) = self.live() {
                client.on_response_started(final_url, head);
            }
        }

        fn on_data_received(&self, chunk: &[u8], resume: ResumeSignal) {
            if let Some(client) = self.live() {
                client.on_data_received(chunk, resume);
            }
        }

        fn on_complete(&self, result: std::result::Result<(), NetError>) {
            if let Some(client) = self.live() {
                client.on_complete(result);
            }
        }

        fn on_retry(&self) {
            if let Some(client) = self.live() {
                client.on_retry();
            }
        }
    }

    async fn run(
        http: &reqwest::Client,
        spec: &RequestSpec,
        client: &Guarded,
        auth: &AuthRouter,
        pipe_capacity: usize,
    ) -> std::result::Result<(), NetError> {
        let method = Method::from_bytes(spec.method.as_bytes()).map_err(|_| NetError::InvalidArgument)?;
        let replayable = spec.body.as_ref().is_none_or(UploadBody::is_replayable);
        let mut credentials: Option<(bool, Credentials)> = None;
        let mut first_attempt = true;

        loop {
            let mut builder = http.request(method.clone(), spec.url.clone());
            for entry in spec.headers.iter() {
                builder = builder.header(entry.name.as_str(), entry.value.as_str());
            }
            if let Some((is_proxy, credentials)) = &credentials {
                let name = if *is_proxy { header::PROXY_AUTHORIZATION } else { header::AUTHORIZATION };
                builder = builder.header(name, basic_authorization(credentials));
            }
            let mut request = builder.build().map_err(|e| classify(&e, spec.redirect))?;
            // The body goes on after `build` so the builder never sees it.
            if let Some(body) = &spec.body {
                *request.body_mut() = Some(upload_body(body, pipe_capacity));
            }

            let response = http.execute(request).await.map_err(|e| classify(&e, spec.redirect))?;
            let status = response.status();
            let is_proxy = status == StatusCode::PROXY_AUTHENTICATION_REQUIRED;
            if replayable && (status == StatusCode::UNAUTHORIZED || is_proxy) {
                if let Some(info) = basic_challenge(&response, is_proxy) {
                    tracing::debug!(request_id = %spec.correlation, is_proxy, realm = %info.realm, "auth challenge");
                    let answer = auth.challenge(spec.correlation, response.url(), first_attempt, info).await;
                    if let Some(supplied) = answer {
                        credentials = Some((is_proxy, supplied));
                        first_attempt = false;
                        client.on_retry();
                        continue;
                    }
                }
            }

            return stream_response(response, client, spec.redirect).await;
        }
    }

    async fn stream_response(
        response: reqwest::Response,
        client: &Guarded,
        redirect: RedirectMode,
    ) -> std::result::Result<(), NetError> {
        let head = ResponseHead {
            status_code: response.status().as_u16(),
            headers: header_list(response.headers()),
        };
        let final_url = response.url().clone();
        client.on_response_started(&final_url, &head);

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| classify(&e, redirect))?;
            if chunk.is_empty() {
                continue;
            }
            let (signal, resumed) = ResumeSignal::new();
            client.on_data_received(&chunk, signal);
            if !resumed.await {
                return Err(NetError::Aborted);
            }
        }
        Ok(())
    }

    fn basic_challenge(response: &reqwest::Response, is_proxy: bool) -> Option<AuthChallengeInfo> {
        let name = if is_proxy { header::PROXY_AUTHENTICATE } else { header::WWW_AUTHENTICATE };
        response
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(parse_challenge)
            .find(|challenge| challenge.scheme == "basic")
            .map(|challenge| AuthChallengeInfo::for_url(response.url(), is_proxy, challenge.scheme, challenge.realm))
    }

    fn basic_authorization(credentials: &Credentials) -> String {
        let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
        format!("Basic {token}")
    }

    fn header_list(headers: &HeaderMap) -> HeaderList {
        let mut list = HeaderList::new();
        for (name, value) in headers {
            list.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        list
    }

    fn upload_body(body: &UploadBody, pipe_capacity: usize) -> reqwest::Body {
        match body {
            UploadBody::Bytes(bytes) => reqwest::Body::from(bytes.clone()),
            UploadBody::Chunked(source) => {
                let size = source.request_size();
                let (writer, reader) = pipe(pipe_capacity);
                source.start_reading(writer);
                reqwest::Body::wrap_stream(upload_stream(reader, size))
            }
        }
    }

    struct UploadState {
        reader: PipeReader,
        size: Option<SizeRequest>,
        expected: Option<u64>,
        sent: u64,
        finished: bool,
    }

    enum UploadStep {
        Chunk(Option<Bytes>),
        Size(Result<u64>),
    }

    async fn wait_size(size: &mut Option<SizeRequest>) -> Option<Result<u64>> {
        match size {
            Some(size) => Some(size.await),
            None => None,
        }
    }

    /// Read chunks until the producer's declared size has been sent.
    ///
    /// Fails the body when the size becomes unavailable or the bytes read
    /// disagree with it.
    fn upload_stream(reader: PipeReader, size: SizeRequest) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let state = UploadState {
            reader,
            size: Some(size),
            expected: None,
            sent: 0,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.finished || state.expected == Some(state.sent) {
                    return None;
                }

                let step = {
                    let UploadState { reader, size, .. } = &mut state;
                    tokio::select! {
                        chunk = reader.read() => UploadStep::Chunk(chunk),
                        Some(resolved) = wait_size(size) => UploadStep::Size(resolved),
                    }
                };

                let failure = match step {
                    UploadStep::Size(Ok(expected)) => {
                        state.size = None;
                        state.expected = Some(expected);
                        tracing::trace!(expected, sent = state.sent, "upload size known");
                        (state.sent > expected).then_some(Error::UploadSize {
                            expected,
                            actual: state.sent,
                        })
                    }
                    UploadStep::Size(Err(err)) => Some(err),
                    UploadStep::Chunk(Some(chunk)) => {
                        state.sent += chunk.len() as u64;
                        match state.expected {
                            Some(expected) if state.sent > expected => Some(Error::UploadSize {
                                expected,
                                actual: state.sent,
                            }),
                            _ => return Some((Ok(chunk), state)),
                        }
                    }
                    UploadStep::Chunk(None) => match state.size.take() {
                        Some(size) => match size.await {
                            Ok(expected) if expected == state.sent => return None,
                            Ok(expected) => Some(Error::UploadSize {
                                expected,
                                actual: state.sent,
                            }),
                            Err(err) => Some(err),
                        },
                        None => Some(Error::PipeClosed),
                    },
                };

                if let Some(err) = failure {
                    tracing::debug!(error = %err, "upload body failed");
                    state.finished = true;
                    return Some((Err(err), state));
                }
            }
        })
    }

    /// Map a transport failure to the network error reported to the request.
    fn classify(err: &reqwest::Error, mode: RedirectMode) -> NetError {
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(net) = cause.downcast_ref::<NetError>() {
                return *net;
            }
            if let Some(upload) = cause.downcast_ref::<Error>() {
                return match upload {
                    Error::Network(net) => *net,
                    _ => NetError::UploadFailed,
                };
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => return NetError::ConnectionRefused,
                    std::io::ErrorKind::ConnectionReset => return NetError::ConnectionReset,
                    _ => {}
                }
            }
            source = cause.source();
        }

        if err.is_timeout() {
            NetError::TimedOut
        } else if err.is_redirect() {
            match mode {
                RedirectMode::Error => NetError::UnsafeRedirect,
                _ => NetError::TooManyRedirects,
            }
        } else if err.is_builder() {
            NetError::InvalidArgument
        } else if err.is_connect() {
            NetError::ConnectionFailed
        } else if err.is_decode() {
            NetError::InvalidResponse
        } else {
            NetError::Failed
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tokio::sync::oneshot;

        fn size_request(size: Option<u64>) -> SizeRequest {
            let (tx, rx) = oneshot::channel();
            if let Some(size) = size {
                let _ = tx.send(size);
            }
            SizeRequest(rx)
        }

        #[tokio::test]
        async fn upload_stream_ends_at_declared_size() {
            let (writer, reader) = pipe(4);
            writer.write(Bytes::from_static(b"abc")).await.unwrap();
            writer.write(Bytes::from_static(b"de")).await.unwrap();

            // The writer stays open, as the upload source keeps it.
            let chunks: Vec<_> = upload_stream(reader, size_request(Some(5))).collect().await;
            let chunks: Vec<Bytes> = chunks.into_iter().map(|c| c.unwrap()).collect();
            assert_eq!(chunks, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]);
            drop(writer);
        }

        #[tokio::test]
        async fn upload_stream_fails_when_size_is_discarded() {
            let (_writer, reader) = pipe(4);
            let items: Vec<_> = upload_stream(reader, size_request(None)).collect().await;
            assert_eq!(items.len(), 1);
            assert!(matches!(items[0], Err(Error::SizeUnavailable)));
        }

        #[tokio::test]
        async fn upload_stream_rejects_overrun() {
            let (writer, reader) = pipe(4);
            writer.write(Bytes::from_static(b"abcdef")).await.unwrap();
            drop(writer);

            let items: Vec<_> = upload_stream(reader, size_request(Some(2))).collect().await;
            assert!(
                items
                    .iter()
                    .any(|item| matches!(item, Err(Error::UploadSize { expected: 2, actual: 6 })))
            );
        }

        #[test]
        fn basic_authorization_encodes_credentials() {
            let value = basic_authorization(&Credentials::new("Aladdin", "open sesame"));
            assert_eq!(value, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        }

        #[test]
        fn response_headers_keep_duplicates() {
            let mut headers = HeaderMap::new();
            headers.append(header::SET_COOKIE, "a=1".parse().unwrap());
            headers.append(header::SET_COOKIE, "b=2".parse().unwrap());
            headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

            let list = header_list(&headers);
            assert_eq!(list.len(), 3);
            assert_eq!(list.get("content-type"), Some("text/plain"));
        }

        #[test]
        fn engine_builds_with_defaults() {
            assert!(ReqwestEngine::new(EngineOptions::default().no_proxy()).is_ok());
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestEngine;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_option_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.max_redirects, 20);
        assert_eq!(options.pipe_capacity, DEFAULT_PIPE_CAPACITY);
        assert!(options.use_system_proxy);
        assert!(options.user_agent.is_none());
    }

    #[test]
    fn engine_option_setters() {
        let options = EngineOptions::default()
            .user_agent("ua")
            .max_redirects(2)
            .pipe_capacity(1)
            .no_proxy();
        assert_eq!(options.user_agent.as_deref(), Some("ua"));
        assert_eq!(options.max_redirects, 2);
        assert_eq!(options.pipe_capacity, 1);
        assert!(!options.use_system_proxy);
    }
}

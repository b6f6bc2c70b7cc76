use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use url::Url;

/// Details of an authentication challenge, as shown to the login handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallengeInfo {
    pub is_proxy: bool,
    /// Lowercased scheme, e.g. `basic`.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub realm: String,
}

impl AuthChallengeInfo {
    pub fn for_url(
        url: &Url,
        is_proxy: bool,
        scheme: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            is_proxy,
            scheme: scheme.into(),
            host: url.host_str().unwrap_or_default().to_owned(),
            port: url.port_or_known_default().unwrap_or(0),
            realm: realm.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Answers one challenge exactly once.
///
/// Consumed by [`supply`](Self::supply) or [`decline`](Self::decline);
/// dropping it unanswered declines.
pub struct AuthResponder {
    tx: Option<oneshot::Sender<Option<Credentials>>>,
}

impl AuthResponder {
    pub fn new() -> (Self, AuthResponse) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, AuthResponse(rx))
    }

    pub fn respond(mut self, credentials: Option<Credentials>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(credentials);
        }
    }

    pub fn supply(self, credentials: Credentials) {
        self.respond(Some(credentials));
    }

    pub fn decline(self) {
        self.respond(None);
    }
}

impl Drop for AuthResponder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(None);
        }
    }
}

/// Engine side of an [`AuthResponder`].
pub struct AuthResponse(oneshot::Receiver<Option<Credentials>>);

impl Future for AuthResponse {
    type Output = Option<Credentials>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|answer| answer.ok().flatten())
    }
}

/// The callback carried by a `login` event.
///
/// Call [`respond`](Self::respond) with credentials to retry, or with
/// `None` (or drop the callback) to decline.
pub struct LoginCallback {
    responder: AuthResponder,
}

impl LoginCallback {
    pub(crate) fn new(responder: AuthResponder) -> Self { Self { responder } }

    pub fn respond(self, credentials: Option<Credentials>) { self.responder.respond(credentials) }

    pub fn supply(self, username: impl Into<String>, password: impl Into<String>) {
        self.responder.supply(Credentials::new(username, password))
    }

    pub fn decline(self) { self.responder.decline() }
}

impl fmt::Debug for LoginCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("LoginCallback { ... }") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supplied_credentials_arrive() {
        let (responder, response) = AuthResponder::new();
        LoginCallback::new(responder).supply("user", "pass");
        assert_eq!(response.await, Some(Credentials::new("user", "pass")));
    }

    #[tokio::test]
    async fn declined_and_dropped_callbacks_answer_none() {
        let (responder, response) = AuthResponder::new();
        LoginCallback::new(responder).decline();
        assert_eq!(response.await, None);

        let (responder, response) = AuthResponder::new();
        drop(LoginCallback::new(responder));
        assert_eq!(response.await, None);
    }

    #[test]
    fn challenge_info_uses_default_port() {
        let url = Url::parse("https://example.com/private").unwrap();
        let info = AuthChallengeInfo::for_url(&url, false, "basic", "vault");
        assert_eq!(info.host, "example.com");
        assert_eq!(info.port, 443);
        assert_eq!(info.realm, "vault");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("me", "hunter2"));
        assert!(rendered.contains("me"));
        assert!(!rendered.contains("hunter2"));
    }
}

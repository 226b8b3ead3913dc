//! Per-page-load session state.
//!
//! [`SessionProvider`] is the sole writer of the session. On load the host
//! calls [`SessionProvider::absorb_redirect`] with its [`Environment`]; if
//! the current URL carries a `code` query parameter the code is exchanged
//! for a verified identity, the session is installed atomically, and the
//! consumed parameters are scrubbed from the URL so a later re-render cannot
//! re-exchange a stale token (or leak it through history and referrers).
//!
//! Consumers read the session through cloneable [`SessionHandle`]s backed by
//! a watch channel, and may reset it with [`SessionHandle::deauthenticate`].

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::code::{decode_session_code, VerifiedSession};
use crate::ports::Environment;
use crate::urls::{query_param, strip_query_params};
use crate::{Address, Result};

/// The session state for the current page load.
///
/// Either anonymous or fully authenticated; the verified triple
/// (user, digest, signature) never exists partially populated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthSession {
    /// No identity established.
    #[default]
    Anonymous,
    /// Identity established by a successful code exchange.
    Authenticated(VerifiedSession),
}

impl AuthSession {
    /// The authenticated user, if any.
    pub fn user(&self) -> Option<&Address> {
        match self {
            AuthSession::Anonymous => None,
            AuthSession::Authenticated(v) => Some(&v.user),
        }
    }

    /// The raw session code, if authenticated.
    pub fn code(&self) -> Option<&str> {
        match self {
            AuthSession::Anonymous => None,
            AuthSession::Authenticated(v) => Some(&v.code),
        }
    }

    /// The signed digest, if authenticated.
    pub fn digest(&self) -> Option<&str> {
        match self {
            AuthSession::Anonymous => None,
            AuthSession::Authenticated(v) => Some(&v.digest),
        }
    }

    /// The signature the identity was recovered from, if authenticated.
    pub fn signature(&self) -> Option<&str> {
        match self {
            AuthSession::Anonymous => None,
            AuthSession::Authenticated(v) => Some(&v.signature),
        }
    }

    /// Whether an identity is established.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthSession::Authenticated(_))
    }
}

/// Owns the session and absorbs incoming checkout redirects.
pub struct SessionProvider {
    tx: watch::Sender<AuthSession>,
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider {
    /// Create a provider with an empty (anonymous) session.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthSession::default());
        Self { tx }
    }

    /// A cloneable read handle onto the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            rx: self.tx.subscribe(),
            tx: self.tx.clone(),
        }
    }

    /// The current session snapshot.
    pub fn session(&self) -> AuthSession {
        self.tx.borrow().clone()
    }

    /// Exchange a `code` query parameter in the current URL, if present.
    ///
    /// Returns the authenticated user when a session is (or already was)
    /// installed for the URL's code, and `Ok(None)` when the URL carries no
    /// code. On a failed exchange the existing session is left untouched.
    ///
    /// Side effect: after a successful exchange the `code` and `state`
    /// parameters are removed from the URL via [`Environment::replace_url`],
    /// so the same token is not re-exchanged on a later call. Calling this
    /// again with the same URL before the scrub has landed is a no-op that
    /// returns the already-installed identity.
    pub fn absorb_redirect(&self, env: &dyn Environment) -> Result<Option<Address>> {
        let url = env.current_url();
        let Some(code) = query_param(&url, "code") else {
            return Ok(None);
        };

        // Idempotency guard: a re-render before the scrub must not repeat
        // the exchange or its side effects.
        if self.tx.borrow().code() == Some(code.as_str()) {
            return Ok(self.tx.borrow().user().cloned());
        }

        let verified = match decode_session_code(&code) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "session code exchange failed; staying unauthenticated");
                return Err(err);
            }
        };
        let user = verified.user.clone();
        debug!(user = %user, "session installed from redirect code");
        self.tx.send_replace(AuthSession::Authenticated(verified));

        let cleaned = strip_query_params(&url, &["code", "state"]);
        if !env.replace_url(&cleaned) {
            debug!("no navigation capability; leaving code parameter in url");
        }
        Ok(Some(user))
    }
}

/// Read access to the session, plus the one sanctioned reset path.
#[derive(Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<AuthSession>,
    tx: watch::Sender<AuthSession>,
}

impl SessionHandle {
    /// The current session snapshot.
    pub fn current(&self) -> AuthSession {
        self.rx.borrow().clone()
    }

    /// The authenticated user, if any.
    pub fn user(&self) -> Option<Address> {
        self.rx.borrow().user().cloned()
    }

    /// The raw session code, if authenticated.
    pub fn code(&self) -> Option<String> {
        self.rx.borrow().code().map(str::to_string)
    }

    /// Wait for the session to change. Returns `false` once the provider and
    /// all handles are gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Reset the session to its empty initial shape.
    pub fn deauthenticate(&self) {
        self.tx.send_replace(AuthSession::Anonymous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockEnvironment, TestKeypair};

    #[test]
    fn url_without_code_leaves_session_anonymous() {
        let provider = SessionProvider::new();
        let env = MockEnvironment::new("https://example.com/app?zip=10013");

        assert_eq!(provider.absorb_redirect(&env).unwrap(), None);
        assert_eq!(provider.session(), AuthSession::Anonymous);
        assert!(env.replacements().is_empty());
    }

    #[test]
    fn valid_code_installs_session_and_scrubs_url() {
        let keypair = TestKeypair::from_seed(11);
        let code = keypair.session_code("digest-1");
        let env = MockEnvironment::new(&format!(
            "https://example.com/app?zip=10013&code={}&state=xyz",
            urlencoding::encode(&code)
        ));

        let provider = SessionProvider::new();
        let user = provider.absorb_redirect(&env).unwrap();
        assert_eq!(user, Some(keypair.address()));

        let session = provider.session();
        assert_eq!(session.user(), Some(&keypair.address()));
        assert_eq!(session.code(), Some(code.as_str()));
        assert_eq!(session.digest(), Some("digest-1"));

        let replacements = env.replacements();
        assert_eq!(replacements.len(), 1);
        assert!(!replacements[0].contains("code="));
        assert!(!replacements[0].contains("state="));
        assert!(replacements[0].contains("zip=10013"));
    }

    #[test]
    fn absorbing_the_same_url_twice_is_idempotent() {
        let keypair = TestKeypair::from_seed(12);
        let code = keypair.session_code("digest-2");
        let env = MockEnvironment::without_navigation(&format!(
            "https://example.com/app?code={}",
            urlencoding::encode(&code)
        ));

        let provider = SessionProvider::new();
        provider.absorb_redirect(&env).unwrap();
        let first = provider.session();

        // Without a navigation capability the URL keeps the code; a second
        // absorption must not repeat side effects or change the session.
        provider.absorb_redirect(&env).unwrap();
        assert_eq!(provider.session(), first);
        assert!(env.replacements().is_empty());
    }

    #[test]
    fn cleaned_url_leaves_an_installed_session_unchanged() {
        let keypair = TestKeypair::from_seed(13);
        let code = keypair.session_code("digest-3");
        let env = MockEnvironment::new(&format!(
            "https://example.com/app?code={}",
            urlencoding::encode(&code)
        ));

        let provider = SessionProvider::new();
        provider.absorb_redirect(&env).unwrap();
        let installed = provider.session();

        // The mock applied the scrub; absorbing the cleaned URL is a no-op.
        assert_eq!(provider.absorb_redirect(&env).unwrap(), None);
        assert_eq!(provider.session(), installed);
    }

    #[test]
    fn failed_exchange_leaves_existing_session_untouched() {
        let provider = SessionProvider::new();
        let bad = MockEnvironment::new("https://example.com/app?code=%21%21");

        assert!(provider.absorb_redirect(&bad).is_err());
        assert_eq!(provider.session(), AuthSession::Anonymous);
        assert!(bad.replacements().is_empty());
    }

    #[test]
    fn deauthenticate_resets_to_empty() {
        let keypair = TestKeypair::from_seed(14);
        let env = MockEnvironment::new(&format!(
            "https://example.com/app?code={}",
            urlencoding::encode(&keypair.session_code("digest-4"))
        ));

        let provider = SessionProvider::new();
        provider.absorb_redirect(&env).unwrap();
        assert!(provider.session().is_authenticated());

        provider.handle().deauthenticate();
        assert_eq!(provider.session(), AuthSession::Anonymous);
    }
}

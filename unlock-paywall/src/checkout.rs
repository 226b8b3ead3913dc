//! Redirect URLs for the hosted checkout.
//!
//! Two outgoing flows, both full-page redirects: `authenticate` asks the
//! checkout service to sign the visitor in and bounce back with a session
//! code; `checkout` carries a serialized paywall config so the visitor can
//! purchase a membership. The outgoing config is always forced pessimistic:
//! the service must wait for on-chain settlement before redirecting back.

use crate::urls::{host_of, set_query_param};
use crate::{PaywallConfig, Result, UnlockError};

/// Production checkout endpoint.
pub const DEFAULT_CHECKOUT_URL: &str = "https://app.unlock-protocol.com/checkout";

/// Where the hosted checkout lives. Overridable for staging deployments.
#[derive(Clone, Debug)]
pub struct CheckoutConfig {
    /// Full URL of the checkout endpoint.
    pub base_url: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKOUT_URL)
    }
}

impl CheckoutConfig {
    /// Point at a custom checkout endpoint.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

/// The sign-in redirect: `client_id` is the current host, `redirect_uri`
/// the current URL.
pub fn authenticate_url(checkout: &CheckoutConfig, current_url: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}",
        checkout.base_url,
        urlencoding::encode(host_of(current_url)),
        urlencoding::encode(current_url)
    )
}

/// The purchase redirect, carrying the serialized config.
///
/// The config is cloned and `pessimistic` forced to `true`; callers cannot
/// override this. When a session code exists it is re-embedded into the
/// return URL so the session survives the external round trip.
pub fn checkout_url(
    checkout: &CheckoutConfig,
    config: &PaywallConfig,
    session_code: Option<&str>,
    current_url: &str,
) -> Result<String> {
    let mut outgoing = config.clone();
    outgoing.pessimistic = true;
    let serialized = serde_json::to_string(&outgoing)
        .map_err(|e| UnlockError::Serialization(format!("paywall config: {e}")))?;

    let redirect_uri = match session_code {
        Some(code) => set_query_param(current_url, "code", code),
        None => current_url.to_string(),
    };

    Ok(format!(
        "{}?paywallConfig={}&redirectUri={}",
        checkout.base_url,
        urlencoding::encode(&serialized),
        urlencoding::encode(&redirect_uri)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_lock;
    use crate::urls::query_param;
    use crate::NetworkId;

    #[test]
    fn authenticate_url_carries_host_and_return_address() {
        let url = authenticate_url(
            &CheckoutConfig::default(),
            "https://localhost:3000/app?zip=10013",
        );
        assert!(url.starts_with(DEFAULT_CHECKOUT_URL));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("localhost:3000"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("https://localhost:3000/app?zip=10013")
        );
    }

    #[test]
    fn checkout_always_serializes_pessimistic_true() {
        let mut config = PaywallConfig::new("t", Some(NetworkId(1))).with_lock(test_lock(1), None);
        config.pessimistic = false;

        let url = checkout_url(&CheckoutConfig::default(), &config, None, "https://x.test/").unwrap();
        let serialized = query_param(&url, "paywallConfig").unwrap();
        let round_trip: PaywallConfig = serde_json::from_str(&serialized).unwrap();

        assert!(round_trip.pessimistic);
        // The caller's config is not mutated.
        assert!(!config.pessimistic);
    }

    #[test]
    fn existing_session_code_rides_along_in_redirect_uri() {
        let config = PaywallConfig::new("t", Some(NetworkId(1))).with_lock(test_lock(1), None);
        let url = checkout_url(
            &CheckoutConfig::default(),
            &config,
            Some("abc123=="),
            "https://x.test/app",
        )
        .unwrap();

        let redirect_uri = query_param(&url, "redirectUri").unwrap();
        assert_eq!(query_param(&redirect_uri, "code").as_deref(), Some("abc123=="));
    }
}

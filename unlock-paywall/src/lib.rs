//! Unlock paywall authentication and authorization.
//!
//! This crate recovers a signed-in identity from a checkout redirect and
//! decides whether that identity currently holds a valid, unexpired
//! membership against one or more on-chain "locks". It intentionally stays
//! UI-agnostic: the host page is reached only through the capability traits
//! in [`ports`], and all ledger access goes through trait-based dependency
//! injection so any conformant client satisfies the contract.
//!
//! # Overview
//!
//! - [`code`] decodes an opaque session code into a verified identity
//!   (signature recovery, no network I/O).
//! - [`session`] owns the per-page-load session state and absorbs an
//!   incoming `code` query parameter from the current URL.
//! - [`ledger`] exposes read-only access to lock contracts, with a JSON-RPC
//!   client behind the `http-rpc` feature.
//! - [`memberships`] fans out over a paywall configuration's locks and
//!   assembles every membership the identity holds.
//! - [`paywall`] is the consumer-facing facade: a state machine that
//!   re-queries whenever the identity changes and builds the authenticate /
//!   checkout redirects.
//!
//! # Example
//!
//! ```ignore
//! use unlock_paywall::{PaywallConfig, session::SessionProvider, paywall::Paywall};
//! use unlock_paywall::ledger::RpcConnector;
//!
//! let provider = SessionProvider::new();
//! provider.absorb_redirect(&env)?; // env implements ports::Environment
//!
//! let paywall = Paywall::new(config, provider.handle(), connector, navigator);
//! if paywall.state().is_authorized() {
//!     // gate the paid feature
//! }
//! ```

use std::collections::BTreeMap;

pub mod checkout;
pub mod code;
pub mod errors;
pub mod ledger;
pub mod memberships;
pub mod paywall;
pub mod ports;
pub mod session;
mod urls;

/// Mock ports, mock ledger and signing fixtures.
///
/// Only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::UnlockError;

/// Common result alias for paywall operations.
pub type Result<T> = std::result::Result<T, UnlockError>;

/// Seconds since the Unix epoch, as reported by a lock contract.
///
/// Contracts report `type(uint256).max` for non-expiring keys; values that do
/// not fit are saturated to `u64::MAX` on decode and treated as never
/// expiring.
pub type UnixTimestamp = u64;

/// Chain id of the network a lock is deployed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

fn parse_h160(kind: &str, s: &str) -> Result<[u8; 20]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped)
        .map_err(|e| UnlockError::Decode(format!("invalid {kind} {s:?}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| UnlockError::Decode(format!("invalid {kind} {s:?}: expected 20 bytes")))
}

fn format_h160(bytes: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// An account address recovered from a session-code signature.
///
/// Always re-derived from the signature, never taken from user input.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Parse an address from `0x`-prefixed (or bare) hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        parse_h160("address", s).map(Self)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_h160(&self.0))
    }
}

impl std::str::FromStr for Address {
    type Err = UnlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Address {
    type Error = UnlockError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

/// The address of a lock contract gating access.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LockAddress(pub [u8; 20]);

impl LockAddress {
    /// Parse a lock address from `0x`-prefixed (or bare) hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        parse_h160("lock address", s).map(Self)
    }
}

impl std::fmt::Display for LockAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_h160(&self.0))
    }
}

impl std::str::FromStr for LockAddress {
    type Err = UnlockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for LockAddress {
    type Error = UnlockError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<LockAddress> for String {
    fn from(lock: LockAddress) -> Self {
        lock.to_string()
    }
}

/// A membership token id, kept as an opaque 256-bit word.
///
/// Real locks mint ids above `u64`, and the id must round-trip byte-exact
/// into `keyExpirationTimestampFor`, so the raw word is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(pub [u8; 32]);

impl TokenId {
    /// Build a token id from a small integer (low-order word).
    pub fn from_u64(id: u64) -> Self {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&id.to_be_bytes());
        Self(word)
    }

    /// Parse a token id from `0x`-prefixed (or bare) hex, up to 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|e| UnlockError::Decode(format!("invalid token id {s:?}: {e}")))?;
        if bytes.len() > 32 {
            return Err(UnlockError::Decode(format!(
                "invalid token id {s:?}: longer than 32 bytes"
            )));
        }
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self(word))
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for TokenId {
    type Error = UnlockError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<TokenId> for String {
    fn from(id: TokenId) -> Self {
        id.to_string()
    }
}

/// Per-lock settings inside a [`PaywallConfig`].
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LockConfig {
    /// Network override for this lock; falls back to the config-level default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkId>,
}

/// Caller-supplied description of which locks and networks gate access.
///
/// Serializes to the JSON shape the hosted checkout expects, so the same
/// value round-trips through the `paywallConfig` redirect parameter.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PaywallConfig {
    /// Human-readable title shown by the hosted checkout.
    pub title: String,
    /// Default network for locks that do not carry their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkId>,
    /// The locks gating access, keyed by contract address.
    pub locks: BTreeMap<LockAddress, LockConfig>,
    /// Whether the hosted checkout must wait for on-chain settlement before
    /// redirecting back. [`checkout`] forces this to `true` on every outgoing
    /// config regardless of what the caller set.
    #[serde(default)]
    pub pessimistic: bool,
}

impl PaywallConfig {
    /// Create a config with a default network and no locks.
    pub fn new(title: impl Into<String>, network: Option<NetworkId>) -> Self {
        Self {
            title: title.into(),
            network,
            locks: BTreeMap::new(),
            pessimistic: false,
        }
    }

    /// Add a lock, optionally overriding the network for it.
    pub fn with_lock(mut self, lock: LockAddress, network: Option<NetworkId>) -> Self {
        self.locks.insert(lock, LockConfig { network });
        self
    }
}

/// One membership token held by a user in a specific lock.
///
/// Derived entirely from ledger reads; immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Membership {
    /// Network the lock lives on.
    pub network: NetworkId,
    /// The lock contract.
    pub lock: LockAddress,
    /// The membership token id.
    pub token_id: TokenId,
    /// Expiration in seconds since the Unix epoch (saturated, see
    /// [`UnixTimestamp`]).
    pub expiration: UnixTimestamp,
}

impl Membership {
    /// Whether this membership is still valid at `now_ms` (milliseconds since
    /// the Unix epoch).
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        self.expiration.saturating_mul(1000) > now_ms
    }
}

/// A lock whose read chain failed while querying memberships.
///
/// Kept separate from an honest "zero keys" result: an RPC failure is
/// inconclusive, not a proof of non-membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockFailure {
    /// The lock whose reads failed.
    pub lock: LockAddress,
    /// The network the reads targeted, when one was resolved.
    pub network: Option<NetworkId>,
    /// The first error encountered for this lock.
    pub error: UnlockError,
}

/// The outcome of a membership query across all configured locks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipReport {
    /// Every membership found, union across locks, order unspecified.
    pub memberships: Vec<Membership>,
    /// Locks that errored and therefore contributed no memberships.
    pub failures: Vec<LockFailure>,
}

impl MembershipReport {
    /// Whether at least one lock failed, making the result incomplete.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Whether any membership in the report is valid at `now_ms`.
    pub fn any_valid_at(&self, now_ms: u64) -> bool {
        self.memberships.iter().any(|m| m.is_valid_at(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_through_hex() {
        let addr = Address::from_hex("0x00112233445566778899aabbccddeeff00112233").unwrap();
        assert_eq!(addr.to_string(), "0x00112233445566778899aabbccddeeff00112233");
        assert_eq!(Address::from_hex(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn address_rejects_bad_hex_and_bad_length() {
        assert!(Address::from_hex("0xzz").is_err());
        assert!(Address::from_hex("0x0011").is_err());
    }

    #[test]
    fn token_id_round_trips_and_pads() {
        let id = TokenId::from_u64(42);
        assert!(id.to_string().ends_with("2a"));
        assert_eq!(TokenId::from_hex("0x2a").unwrap(), id);
        assert_eq!(TokenId::from_hex(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn config_serializes_to_checkout_shape() {
        let lock = LockAddress::from_hex("0x00112233445566778899aabbccddeeff00112233").unwrap();
        let config = PaywallConfig::new("My paywall", Some(NetworkId(137))).with_lock(lock, None);

        let json: serde_json::Value = serde_json::to_value(&config).unwrap();
        assert_eq!(json["title"], "My paywall");
        assert_eq!(json["network"], 137);
        assert_eq!(json["pessimistic"], false);
        assert!(json["locks"]["0x00112233445566778899aabbccddeeff00112233"].is_object());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: PaywallConfig = serde_json::from_str(
            r#"{"title":"t","locks":{"0x00112233445566778899aabbccddeeff00112233":{"network":10}}}"#,
        )
        .unwrap();
        assert_eq!(config.network, None);
        assert!(!config.pessimistic);
        let lock_cfg = config.locks.values().next().unwrap();
        assert_eq!(lock_cfg.network, Some(NetworkId(10)));
    }

    #[test]
    fn membership_validity_saturates() {
        let membership = Membership {
            network: NetworkId(1),
            lock: LockAddress([0u8; 20]),
            token_id: TokenId::from_u64(1),
            expiration: u64::MAX,
        };
        // The non-expiring sentinel stays valid at any clock reading.
        assert!(membership.is_valid_at(u64::MAX - 1));
    }
}

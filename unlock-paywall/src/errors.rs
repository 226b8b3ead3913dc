//! Error types for paywall operations.

use crate::{LockAddress, NetworkId};

/// Error type covering session exchange, ledger reads and redirect building.
///
/// `Decode` and `InvalidSignature` are non-retryable: the session stays
/// unauthenticated. `LedgerRead` is inconclusive and is surfaced through
/// [`crate::MembershipReport::failures`] rather than being folded into an
/// empty membership list.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UnlockError {
    /// Malformed session code (bad base64, JSON or hex).
    #[error("malformed session code: {0}")]
    Decode(String),

    /// The signature does not recover to any address for the given digest.
    #[error("signature does not recover to an address: {0}")]
    InvalidSignature(String),

    /// RPC or network failure while reading a lock contract.
    #[error("ledger read failed for lock {lock} on network {network}: {reason}")]
    LedgerRead {
        /// Network the read targeted.
        network: NetworkId,
        /// Lock contract the read targeted.
        lock: LockAddress,
        /// Underlying transport or RPC error.
        reason: String,
    },

    /// A lock carries no network and the config has no default either.
    #[error("no network configured for lock {lock}")]
    MissingNetwork {
        /// The lock missing a network.
        lock: LockAddress,
    },

    /// Failed to serialize an outgoing paywall config.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

//! Read-only access to lock contracts.
//!
//! [`LockReader`] is the capability boundary: three view calls against a
//! lock, no writes, no gas, no signing. [`LockConnector`] hands out one
//! reader per (network, lock) pair; readers hold no shared mutable state and
//! may be invoked concurrently without synchronization.
//!
//! The production implementation speaks JSON-RPC over HTTP and lives behind
//! the `http-rpc` feature; tests inject mocks through the same traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Address, LockAddress, NetworkId, Result, TokenId, UnixTimestamp};

pub(crate) mod abi;
#[cfg(feature = "http-rpc")]
mod rpc;

#[cfg(feature = "http-rpc")]
pub use rpc::{rpc_endpoint_for, RpcConnector, RpcLockClient, DEFAULT_RPC_BASE_URL};

/// The three view calls a lock contract exposes for membership queries.
#[async_trait]
pub trait LockReader: Send + Sync {
    /// Number of membership tokens owned by `owner` in this lock.
    async fn total_keys(&self, owner: &Address) -> Result<u64>;

    /// The token id at `index` in `owner`'s enumeration, `index < total_keys`.
    async fn token_of_owner_by_index(&self, owner: &Address, index: u64) -> Result<TokenId>;

    /// Expiration timestamp of the given membership token.
    async fn key_expiration_timestamp_for(&self, token_id: &TokenId) -> Result<UnixTimestamp>;
}

/// Factory for per-(network, lock) readers.
pub trait LockConnector: Send + Sync {
    /// Build a reader for `lock` on `network`.
    fn reader(&self, network: NetworkId, lock: &LockAddress) -> Result<Arc<dyn LockReader>>;
}

//! JSON-RPC lock reader over HTTP.
//!
//! One client per (network, lock) pair, pointed at the per-network RPC
//! endpoint. All three reads are `eth_call`s against the latest block; every
//! transport or RPC failure maps to [`UnlockError::LedgerRead`] carrying the
//! lock and network so callers can surface a partial result instead of a
//! false "not a member".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::abi;
use super::{LockConnector, LockReader};
use crate::{Address, LockAddress, NetworkId, Result, TokenId, UnixTimestamp, UnlockError};

/// Base URL of the hosted per-network RPC proxy.
pub const DEFAULT_RPC_BASE_URL: &str = "https://rpc.unlock-protocol.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The RPC endpoint serving `network` under `base_url`.
pub fn rpc_endpoint_for(base_url: &str, network: NetworkId) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), network)
}

/// A JSON-RPC reader for one lock on one network.
pub struct RpcLockClient {
    endpoint: String,
    network: NetworkId,
    lock: LockAddress,
    client: reqwest::Client,
}

impl RpcLockClient {
    /// Build a client against the hosted per-network RPC proxy.
    pub fn new(network: NetworkId, lock: LockAddress) -> Result<Self> {
        Self::with_base_url(DEFAULT_RPC_BASE_URL, network, lock)
    }

    /// Build a client against a custom RPC base URL.
    pub fn with_base_url(base_url: &str, network: NetworkId, lock: LockAddress) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UnlockError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: rpc_endpoint_for(base_url, network),
            network,
            lock,
            client,
        })
    }

    fn read_error(&self, reason: impl Into<String>) -> UnlockError {
        UnlockError::LedgerRead {
            network: self.network,
            lock: self.lock.clone(),
            reason: reason.into(),
        }
    }

    async fn eth_call(&self, data: String) -> Result<String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": self.lock.to_string(), "data": data }, "latest"],
        });
        debug!(endpoint = %self.endpoint, lock = %self.lock, "eth_call");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.read_error(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| self.read_error(format!("http error: {e}")))?;

        let payload: RpcResponse = response
            .json()
            .await
            .map_err(|e| self.read_error(format!("invalid response body: {e}")))?;

        if let Some(err) = payload.error {
            return Err(self.read_error(format!("rpc error {}: {}", err.code, err.message)));
        }
        payload
            .result
            .ok_or_else(|| self.read_error("response carried neither result nor error"))
    }

    async fn call_word(&self, data: String) -> Result<[u8; 32]> {
        let result = self.eth_call(data).await?;
        abi::decode_word(&result).map_err(|e| self.read_error(e))
    }
}

#[derive(serde::Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(serde::Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[async_trait]
impl LockReader for RpcLockClient {
    async fn total_keys(&self, owner: &Address) -> Result<u64> {
        let data = abi::call_data(abi::TOTAL_KEYS, &[abi::encode_address(&owner.0)]);
        let word = self.call_word(data).await?;
        Ok(abi::word_to_u64_saturating(&word))
    }

    async fn token_of_owner_by_index(&self, owner: &Address, index: u64) -> Result<TokenId> {
        let data = abi::call_data(
            abi::TOKEN_OF_OWNER_BY_INDEX,
            &[abi::encode_address(&owner.0), abi::encode_u64(index)],
        );
        Ok(TokenId(self.call_word(data).await?))
    }

    async fn key_expiration_timestamp_for(&self, token_id: &TokenId) -> Result<UnixTimestamp> {
        let data = abi::call_data(abi::KEY_EXPIRATION_TIMESTAMP_FOR, &[token_id.0]);
        let word = self.call_word(data).await?;
        Ok(abi::word_to_u64_saturating(&word))
    }
}

/// [`LockConnector`] building [`RpcLockClient`]s against one base URL.
#[derive(Clone, Debug)]
pub struct RpcConnector {
    base_url: String,
}

impl Default for RpcConnector {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_BASE_URL)
    }
}

impl RpcConnector {
    /// Connector against a custom RPC base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl LockConnector for RpcConnector {
    fn reader(&self, network: NetworkId, lock: &LockAddress) -> Result<Arc<dyn LockReader>> {
        Ok(Arc::new(RpcLockClient::with_base_url(
            &self.base_url,
            network,
            lock.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_base_url_slash_network() {
        assert_eq!(
            rpc_endpoint_for(DEFAULT_RPC_BASE_URL, NetworkId(137)),
            "https://rpc.unlock-protocol.com/137"
        );
        assert_eq!(
            rpc_endpoint_for("http://localhost:8545/", NetworkId(1)),
            "http://localhost:8545/1"
        );
    }
}

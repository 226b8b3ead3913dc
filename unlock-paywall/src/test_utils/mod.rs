//! Testing infrastructure: a signing fixture, an in-memory ledger with call
//! accounting, and mock host-page ports.
//!
//! Only compiled with the `test-utils` feature or in test builds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libsecp256k1::{PublicKey, SecretKey};
use sha3::{Digest, Keccak256};

use crate::code::{encode_session_code, personal_message_hash};
use crate::ledger::{LockConnector, LockReader};
use crate::ports::{Environment, Navigator};
use crate::{Address, LockAddress, NetworkId, Result, TokenId, UnixTimestamp, UnlockError};

/// A deterministic address for tests.
pub fn test_user(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    Address(bytes)
}

/// A deterministic lock address for tests.
pub fn test_lock(n: u8) -> LockAddress {
    let mut bytes = [0xa0u8; 20];
    bytes[19] = n;
    LockAddress(bytes)
}

/// A deterministic secp256k1 keypair that can mint session codes.
pub struct TestKeypair {
    secret: SecretKey,
    address: Address,
}

impl TestKeypair {
    /// Derive a keypair from a non-zero seed byte.
    pub fn from_seed(seed: u8) -> Self {
        assert_ne!(seed, 0, "the zero scalar is not a valid secret key");
        let secret = SecretKey::parse(&[seed; 32]).expect("seed below the curve order");
        let public = PublicKey::from_secret_key(&secret);
        let serialized = public.serialize();
        let hash = Keccak256::digest(&serialized[1..]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self {
            secret,
            address: Address(bytes),
        }
    }

    /// The address this keypair signs as.
    pub fn address(&self) -> Address {
        self.address.clone()
    }

    /// Produce a 65-byte recoverable personal-message signature, `0x`-hex,
    /// with a legacy 27/28 v byte.
    pub fn sign_digest(&self, digest: &str) -> String {
        let message = libsecp256k1::Message::parse(&personal_message_hash(digest));
        let (signature, recovery_id) = libsecp256k1::sign(&message, &self.secret);
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.serialize());
        bytes[64] = 27 + recovery_id.serialize();
        format!("0x{}", hex::encode(bytes))
    }

    /// Mint a full session code over `digest`.
    pub fn session_code(&self, digest: &str) -> String {
        encode_session_code(digest, &self.sign_digest(digest))
    }
}

#[derive(Clone, Default)]
struct MockLock {
    keys_by_owner: HashMap<Address, Vec<(TokenId, UnixTimestamp)>>,
    delay_by_owner: HashMap<Address, Duration>,
    /// Extra per-index delay so later indices resolve first, exercising
    /// completion-order independence.
    stagger: Duration,
    fail: bool,
}

/// An in-memory ledger keyed by (network, lock), counting every read.
#[derive(Default)]
pub struct MockConnector {
    locks: Mutex<HashMap<(NetworkId, LockAddress), MockLock>>,
    calls: Arc<AtomicUsize>,
}

impl MockConnector {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_lock(&self, network: NetworkId, lock: &LockAddress, f: impl FnOnce(&mut MockLock)) {
        let mut locks = self.locks.lock().expect("mock ledger lock");
        f(locks.entry((network, lock.clone())).or_default());
    }

    /// Install `(token id, expiration)` keys for `owner` in a lock.
    pub fn add_keys(
        &self,
        network: NetworkId,
        lock: &LockAddress,
        owner: &Address,
        keys: &[(u64, UnixTimestamp)],
    ) {
        self.with_lock(network, lock, |entry| {
            let owned = entry.keys_by_owner.entry(owner.clone()).or_default();
            for (id, expiration) in keys {
                owned.push((TokenId::from_u64(*id), *expiration));
            }
        });
    }

    /// Delay every read issued for `owner` against a lock.
    pub fn set_delay(
        &self,
        network: NetworkId,
        lock: &LockAddress,
        owner: &Address,
        delay: Duration,
    ) {
        self.with_lock(network, lock, |entry| {
            entry.delay_by_owner.insert(owner.clone(), delay);
        });
    }

    /// Stagger per-index reads so higher indices complete first.
    pub fn set_stagger(&self, network: NetworkId, lock: &LockAddress, stagger: Duration) {
        self.with_lock(network, lock, |entry| entry.stagger = stagger);
    }

    /// Make every read against a lock fail.
    pub fn fail_lock(&self, network: NetworkId, lock: &LockAddress) {
        self.with_lock(network, lock, |entry| entry.fail = true);
    }

    /// Total number of reads issued through this connector.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LockConnector for MockConnector {
    fn reader(&self, network: NetworkId, lock: &LockAddress) -> Result<Arc<dyn LockReader>> {
        let snapshot = self
            .locks
            .lock()
            .expect("mock ledger lock")
            .get(&(network, lock.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(Arc::new(MockReader {
            network,
            lock: lock.clone(),
            state: snapshot,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct MockReader {
    network: NetworkId,
    lock: LockAddress,
    state: MockLock,
    calls: Arc<AtomicUsize>,
}

impl MockReader {
    fn record(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail {
            return Err(UnlockError::LedgerRead {
                network: self.network,
                lock: self.lock.clone(),
                reason: "mock rpc failure".into(),
            });
        }
        Ok(())
    }

    fn keys_of(&self, owner: &Address) -> Vec<(TokenId, UnixTimestamp)> {
        self.state
            .keys_by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    fn delay_of(&self, owner: &Address) -> Duration {
        self.state
            .delay_by_owner
            .get(owner)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LockReader for MockReader {
    async fn total_keys(&self, owner: &Address) -> Result<u64> {
        self.record()?;
        tokio::time::sleep(self.delay_of(owner)).await;
        Ok(self.keys_of(owner).len() as u64)
    }

    async fn token_of_owner_by_index(&self, owner: &Address, index: u64) -> Result<TokenId> {
        self.record()?;
        let keys = self.keys_of(owner);
        let remaining = keys.len() as u32 - (index as u32).min(keys.len() as u32);
        tokio::time::sleep(self.delay_of(owner) + self.state.stagger * remaining).await;
        keys.get(index as usize)
            .map(|(id, _)| *id)
            .ok_or_else(|| UnlockError::LedgerRead {
                network: self.network,
                lock: self.lock.clone(),
                reason: format!("index {index} out of range"),
            })
    }

    async fn key_expiration_timestamp_for(&self, token_id: &TokenId) -> Result<UnixTimestamp> {
        self.record()?;
        self.state
            .keys_by_owner
            .values()
            .flatten()
            .find(|(id, _)| id == token_id)
            .map(|(_, expiration)| *expiration)
            .ok_or_else(|| UnlockError::LedgerRead {
                network: self.network,
                lock: self.lock.clone(),
                reason: format!("unknown token {token_id}"),
            })
    }
}

/// A host page with a mutable address bar.
pub struct MockEnvironment {
    url: Mutex<String>,
    replacements: Mutex<Vec<String>>,
    navigable: bool,
}

impl MockEnvironment {
    /// A page that supports replace-navigation.
    pub fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            replacements: Mutex::new(Vec::new()),
            navigable: true,
        }
    }

    /// A page with no navigation function; `replace_url` reports failure.
    pub fn without_navigation(url: &str) -> Self {
        Self {
            navigable: false,
            ..Self::new(url)
        }
    }

    /// Point the page at a new address.
    pub fn set_url(&self, url: &str) {
        *self.url.lock().expect("mock url lock") = url.to_string();
    }

    /// Every URL passed to `replace_url` so far.
    pub fn replacements(&self) -> Vec<String> {
        self.replacements.lock().expect("mock url lock").clone()
    }
}

impl Environment for MockEnvironment {
    fn current_url(&self) -> String {
        self.url.lock().expect("mock url lock").clone()
    }

    fn replace_url(&self, url: &str) -> bool {
        if !self.navigable {
            return false;
        }
        self.replacements
            .lock()
            .expect("mock url lock")
            .push(url.to_string());
        self.set_url(url);
        true
    }
}

/// Records full-page redirects instead of performing them.
#[derive(Default)]
pub struct MockNavigator {
    redirects: Mutex<Vec<String>>,
}

impl MockNavigator {
    /// A navigator with no redirects recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every redirect issued so far.
    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().expect("mock navigator lock").clone()
    }

    /// The most recent redirect, if any.
    pub fn last_redirect(&self) -> Option<String> {
        self.redirects().last().cloned()
    }
}

impl Navigator for MockNavigator {
    fn redirect(&self, url: &str) {
        self.redirects
            .lock()
            .expect("mock navigator lock")
            .push(url.to_string());
    }
}

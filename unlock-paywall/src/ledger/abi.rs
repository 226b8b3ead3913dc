//! Minimal ABI encoding for the three lock view calls.
//!
//! Calldata is the 4-byte selector (Keccak-256 of the canonical signature)
//! followed by 32-byte words, one per argument. Results are single 32-byte
//! words. Nothing dynamic is involved, so a full ABI library is not carried.

use sha3::{Digest, Keccak256};

pub(crate) const TOTAL_KEYS: &str = "totalKeys(address)";
pub(crate) const TOKEN_OF_OWNER_BY_INDEX: &str = "tokenOfOwnerByIndex(address,uint256)";
pub(crate) const KEY_EXPIRATION_TIMESTAMP_FOR: &str = "keyExpirationTimestampFor(uint256)";

/// First four bytes of the Keccak-256 of the canonical signature.
pub(crate) fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Left-pad a 20-byte address into a 32-byte word.
pub(crate) fn encode_address(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Encode a u64 into a big-endian 32-byte word.
pub(crate) fn encode_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Build `0x`-hex calldata for `signature` with the given argument words.
pub(crate) fn call_data(signature: &str, args: &[[u8; 32]]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    format!("0x{}", hex::encode(data))
}

/// Decode a single 32-byte word from a `0x`-hex `eth_call` result.
pub(crate) fn decode_word(result: &str) -> std::result::Result<[u8; 32], String> {
    let stripped = result.strip_prefix("0x").unwrap_or(result);
    let bytes = hex::decode(stripped).map_err(|e| format!("result is not hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("expected a 32-byte word, got {} bytes", bytes.len()));
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(word)
}

/// Interpret a word as a u64, saturating when the value does not fit.
///
/// Locks report `type(uint256).max` for non-expiring keys; those saturate to
/// `u64::MAX` and stay valid under the millisecond comparison downstream.
pub(crate) fn word_to_u64_saturating(word: &[u8; 32]) -> u64 {
    if word[..24].iter().any(|b| *b != 0) {
        return u64::MAX;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    u64::from_be_bytes(tail)
}

//! Session-code exchange.
//!
//! A session code is `base64(JSON({ "d": digest, "s": signature }))`,
//! round-tripped through the checkout redirect URL. Decoding recovers the
//! signer's address from the signature over the digest; there is no path
//! that trusts a claimed address, the identity is always re-derived.
//!
//! Pure and synchronous: no network I/O.

use base64::Engine;
use libsecp256k1::{Message, RecoveryId, Signature};
use sha3::{Digest, Keccak256};

use crate::{Address, Result, UnlockError};

/// Prefix mandated by the personal message signing scheme (EIP-191).
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(serde::Deserialize)]
struct CodePayload {
    d: String,
    s: String,
}

/// An identity established by successfully decoding a session code.
///
/// The three verification artifacts and the recovered user are only ever
/// constructed together, so a partially-populated session is
/// unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSession {
    /// The address recovered from `signature` over `digest`.
    pub user: Address,
    /// The signed message.
    pub digest: String,
    /// The 65-byte recoverable signature, `0x`-hex.
    pub signature: String,
    /// The raw session code, kept so the session survives a checkout
    /// round trip.
    pub code: String,
}

/// Decode a session code into a verified identity.
///
/// Fails with [`UnlockError::Decode`] when the base64 or JSON layers are
/// malformed, and with [`UnlockError::InvalidSignature`] when no address can
/// be recovered from the embedded signature.
pub fn decode_session_code(code: &str) -> Result<VerifiedSession> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(code.trim())
        .map_err(|e| UnlockError::Decode(format!("invalid base64: {e}")))?;
    let payload: CodePayload = serde_json::from_slice(&raw)
        .map_err(|e| UnlockError::Decode(format!("invalid JSON payload: {e}")))?;
    let user = recover_signer(&payload.d, &payload.s)?;
    Ok(VerifiedSession {
        user,
        digest: payload.d,
        signature: payload.s,
        code: code.to_string(),
    })
}

/// Encode a digest/signature pair into a session code.
///
/// Inverse of [`decode_session_code`]; used when re-embedding an existing
/// session into a redirect URL and by test fixtures.
pub fn encode_session_code(digest: &str, signature: &str) -> String {
    let payload = serde_json::json!({ "d": digest, "s": signature });
    base64::engine::general_purpose::STANDARD.encode(payload.to_string())
}

/// Recover the address that produced `signature` over `digest`.
pub fn recover_signer(digest: &str, signature: &str) -> Result<Address> {
    let bytes = parse_signature(signature)?;
    let recovery_id = normalize_v(bytes[64])?;

    let sig = Signature::parse_standard_slice(&bytes[..64])
        .map_err(|e| UnlockError::InvalidSignature(format!("unparseable signature: {e:?}")))?;
    let rec = RecoveryId::parse(recovery_id)
        .map_err(|e| UnlockError::InvalidSignature(format!("bad recovery id: {e:?}")))?;
    let message = Message::parse(&personal_message_hash(digest));

    let public_key = libsecp256k1::recover(&message, &sig, &rec)
        .map_err(|e| UnlockError::InvalidSignature(format!("recovery failed: {e:?}")))?;

    // Address = low 20 bytes of Keccak-256 over the uncompressed point,
    // tag byte excluded.
    let serialized = public_key.serialize();
    let hash = keccak256(&serialized[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Ok(Address(address))
}

/// Keccak-256 hash of the EIP-191 personal message wrapping `digest`.
pub(crate) fn personal_message_hash(digest: &str) -> [u8; 32] {
    let mut buf = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 24 + digest.len());
    buf.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
    buf.extend_from_slice(digest.len().to_string().as_bytes());
    buf.extend_from_slice(digest.as_bytes());
    keccak256(&buf)
}

fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn parse_signature(signature: &str) -> Result<[u8; 65]> {
    let stripped = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(stripped)
        .map_err(|e| UnlockError::InvalidSignature(format!("signature is not hex: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        UnlockError::InvalidSignature(format!("expected 65 signature bytes, got {}", b.len()))
    })
}

/// Accepts both raw recovery ids (0/1) and the legacy 27/28 v values.
fn normalize_v(v: u8) -> Result<u8> {
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        other => Err(UnlockError::InvalidSignature(format!(
            "unsupported v byte {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestKeypair;

    #[test]
    fn decode_recovers_the_signer() {
        let keypair = TestKeypair::from_seed(7);
        let code = keypair.session_code("weather-session-123");

        let session = decode_session_code(&code).unwrap();
        assert_eq!(session.user, keypair.address());
        assert_eq!(session.digest, "weather-session-123");
        assert_eq!(session.code, code);
    }

    #[test]
    fn legacy_and_raw_v_bytes_recover_identically() {
        let keypair = TestKeypair::from_seed(9);
        let legacy = keypair.sign_digest("d");
        let mut bytes = hex::decode(legacy.strip_prefix("0x").unwrap()).unwrap();
        bytes[64] -= 27;
        let raw = format!("0x{}", hex::encode(&bytes));

        assert_eq!(
            recover_signer("d", &legacy).unwrap(),
            recover_signer("d", &raw).unwrap()
        );
    }

    #[test]
    fn bad_base64_is_a_decode_error() {
        let err = decode_session_code("!!not-base64!!").unwrap_err();
        assert!(matches!(err, UnlockError::Decode(_)));
    }

    #[test]
    fn non_json_payload_is_a_decode_error() {
        let code = base64::engine::general_purpose::STANDARD.encode("plain text");
        let err = decode_session_code(&code).unwrap_err();
        assert!(matches!(err, UnlockError::Decode(_)));
    }

    #[test]
    fn short_signature_is_an_invalid_signature_error() {
        let code = encode_session_code("digest", "0xdeadbeef");
        let err = decode_session_code(&code).unwrap_err();
        assert!(matches!(err, UnlockError::InvalidSignature(_)));
    }

    #[test]
    fn unsupported_v_byte_is_rejected() {
        let keypair = TestKeypair::from_seed(3);
        let mut bytes =
            hex::decode(keypair.sign_digest("d").strip_prefix("0x").unwrap()).unwrap();
        bytes[64] = 99;
        let err = recover_signer("d", &format!("0x{}", hex::encode(&bytes))).unwrap_err();
        assert!(matches!(err, UnlockError::InvalidSignature(_)));
    }

    #[test]
    fn tampered_digest_recovers_a_different_address() {
        let keypair = TestKeypair::from_seed(5);
        let signature = keypair.sign_digest("original");

        // Recovery still succeeds but yields some other address, never the
        // signer's: the signature binds the digest.
        match recover_signer("tampered", &signature) {
            Ok(address) => assert_ne!(address, keypair.address()),
            Err(err) => assert!(matches!(err, UnlockError::InvalidSignature(_))),
        }
    }
}

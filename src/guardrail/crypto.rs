//! Stateless reversible token substitution (spec §4.3 "Stateless reversible
//! substitution").
//!
//! `IV = HMAC-SHA256(HMAC-SHA256(K, category), value)[:16]`, `ct =
//! AES-256-CTR(K, IV, value)`, `checksum = HMAC-SHA256(K, value || category)[:4]`,
//! `token = base64url_nopad(IV || ct || checksum)`. Deterministic IV derivation
//! (rather than a random nonce, as the teacher's `env_crypto.rs` AES-GCM
//! helpers use) is what makes the same plaintext anonymize to the same token
//! every time, which the detector idempotency rule and the reverse map both
//! depend on.

use aes::cipher::{KeyIvInit, StreamCipher};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type Aes256Ctr = ctr::Ctr64BE<aes::Aes256>;

const IV_LEN: usize = 16;
const CHECKSUM_LEN: usize = 4;

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn derive_iv(key: &[u8; 32], category: &str, value: &str) -> [u8; IV_LEN] {
    let category_key = hmac(key, category.as_bytes());
    let digest = hmac(&category_key, value.as_bytes());
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&digest[..IV_LEN]);
    iv
}

fn checksum(key: &[u8; 32], value: &str, category: &str) -> [u8; CHECKSUM_LEN] {
    let mut data = Vec::with_capacity(value.len() + category.len());
    data.extend_from_slice(value.as_bytes());
    data.extend_from_slice(category.as_bytes());
    let digest = hmac(key, &data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Encrypt `value` under `category` into an opaque, URL-safe token.
pub fn encode_token(key: &[u8; 32], category: &str, value: &str) -> String {
    let iv = derive_iv(key, category, value);
    let mut buf = value.as_bytes().to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut buf);
    let sum = checksum(key, value, category);

    let mut payload = Vec::with_capacity(IV_LEN + buf.len() + CHECKSUM_LEN);
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&sum);
    URL_SAFE_NO_PAD.encode(payload)
}

/// Decrypt a token back to its plaintext iff the checksum verifies over
/// `plaintext || category`. Returns `None` for malformed or tampered tokens —
/// callers pass those through unchanged (spec §4.3 "failure-safe").
pub fn decode_token(key: &[u8; 32], category: &str, token: &str) -> Option<String> {
    let payload = URL_SAFE_NO_PAD.decode(token).ok()?;
    if payload.len() < IV_LEN + CHECKSUM_LEN {
        return None;
    }
    let (iv, rest) = payload.split_at(IV_LEN);
    let (ct, sum) = rest.split_at(rest.len() - CHECKSUM_LEN);

    let mut iv_arr = [0u8; IV_LEN];
    iv_arr.copy_from_slice(iv);
    let mut plaintext = ct.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), (&iv_arr).into());
    cipher.apply_keystream(&mut plaintext);
    let plaintext = String::from_utf8(plaintext).ok()?;

    let expected = checksum(key, &plaintext, category);
    if expected.as_slice() == sum {
        Some(plaintext)
    } else {
        None
    }
}

/// A keyed pseudorandom byte string derived from `value`, used to pick
/// deterministic fake replacements (names, IPv4 octets, email handles) from
/// fixed pools (spec §6.3 "keyed by HMAC"). Not used for the reversible
/// token itself — that's `encode_token`.
pub fn keyed_index(key: &[u8; 32], value: &str) -> [u8; 32] {
    hmac(key, value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn round_trips_through_encode_decode() {
        let token = encode_token(&KEY, "pii.email", "alice@example.com");
        assert_eq!(
            decode_token(&KEY, "pii.email", &token),
            Some("alice@example.com".to_string())
        );
    }

    #[test]
    fn same_value_and_category_is_deterministic() {
        let a = encode_token(&KEY, "pii.ssn", "123-45-6789");
        let b = encode_token(&KEY, "pii.ssn", "123-45-6789");
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_category_fails_checksum() {
        let token = encode_token(&KEY, "pii.ssn", "123-45-6789");
        assert_eq!(decode_token(&KEY, "pii.other", &token), None);
    }

    #[test]
    fn garbage_token_decodes_to_none() {
        assert_eq!(decode_token(&KEY, "pii.ssn", "not-a-real-token"), None);
    }

    #[test]
    fn token_is_url_safe() {
        let token = encode_token(&KEY, "pii.address", "221B Baker Street, London");
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }
}

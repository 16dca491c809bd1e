//! HMAC-SHA256 signing
//!
//! Signatures travel as lowercase hex. Verification decodes the provided
//! value and compares it with the expected MAC in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the MAC over the concatenation of `parts`.
fn mac_over(secret: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

/// Hex-encoded `HMAC-SHA256(secret, parts[0] ++ parts[1] ++ ...)`.
pub fn sign_hex(secret: &[u8], parts: &[&[u8]]) -> String {
    hex::encode(mac_over(secret, parts))
}

/// Verify a hex signature against the MAC of `parts`.
///
/// Returns false for malformed hex or a length mismatch without
/// short-circuiting on the MAC contents.
pub fn verify_hex(secret: &[u8], parts: &[&[u8]], provided_hex: &str) -> bool {
    let provided = match hex::decode(provided_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let expected = mac_over(secret, parts);
    expected.as_slice().ct_eq(provided.as_slice()).unwrap_u8() == 1
}

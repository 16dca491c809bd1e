//! Crypto and network helpers
//!
//! Request signing and caller IP matching shared by the partner auth gate,
//! the processor webhook and signed download URLs.

pub mod ip;
pub mod signature;

pub use ip::{ip_allowed, normalize_ip, IpRule};
pub use signature::{sign_hex, verify_hex};

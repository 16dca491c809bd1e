//! Caller IP normalization and allowlist matching
//!
//! Allowlist entries are either a single address (`203.0.113.7`) or a CIDR
//! block (`10.0.0.0/8`, `2001:db8::/32`).

use std::net::IpAddr;
use std::str::FromStr;

/// Strip the IPv4-mapped IPv6 prefix so `::ffff:1.2.3.4` compares as `1.2.3.4`.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// A parsed allowlist entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
}

impl IpRule {
    /// Check whether `ip` (already normalized) falls under this rule.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match *self {
            IpRule::Exact(addr) => addr == ip,
            IpRule::Cidr { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(candidate)) => {
                    let mask = prefix_mask_u32(prefix);
                    u32::from(net) & mask == u32::from(candidate) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(candidate)) => {
                    let mask = prefix_mask_u128(prefix);
                    u128::from(net) & mask == u128::from(candidate) & mask
                }
                _ => false,
            },
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Error parsing an allowlist entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid IP allowlist entry: {0}")]
pub struct IpRuleError(pub String);

impl FromStr for IpRule {
    type Err = IpRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            None => IpAddr::from_str(s)
                .map(|ip| IpRule::Exact(normalize_ip(ip)))
                .map_err(|_| IpRuleError(s.to_string())),
            Some((addr, prefix)) => {
                let network = IpAddr::from_str(addr).map_err(|_| IpRuleError(s.to_string()))?;
                let prefix: u8 = prefix.parse().map_err(|_| IpRuleError(s.to_string()))?;
                let max = if network.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(IpRuleError(s.to_string()));
                }
                Ok(IpRule::Cidr { network, prefix })
            }
        }
    }
}

/// Check a caller against raw allowlist entries.
///
/// Unparseable entries are skipped (and logged) rather than widening access.
/// An empty list matches nothing.
pub fn ip_allowed(ip: IpAddr, allowlist: &[String]) -> bool {
    let ip = normalize_ip(ip);
    allowlist.iter().any(|entry| match entry.parse::<IpRule>() {
        Ok(rule) => rule.matches(ip),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed allowlist entry");
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalize_mapped_ipv4() {
        assert_eq!(normalize_ip(ip("::ffff:192.168.1.10")), ip("192.168.1.10"));
        assert_eq!(normalize_ip(ip("192.168.1.10")), ip("192.168.1.10"));
        assert_eq!(normalize_ip(ip("2001:db8::1")), ip("2001:db8::1"));
    }

    #[test]
    fn test_exact_and_cidr_matching() {
        let list = vec!["203.0.113.7".to_string(), "10.0.0.0/8".to_string()];
        assert!(ip_allowed(ip("203.0.113.7"), &list));
        assert!(ip_allowed(ip("::ffff:203.0.113.7"), &list));
        assert!(ip_allowed(ip("10.255.1.2"), &list));
        assert!(!ip_allowed(ip("11.0.0.1"), &list));
        assert!(!ip_allowed(ip("203.0.113.8"), &list));
    }

    #[test]
    fn test_ipv6_cidr() {
        let list = vec!["2001:db8::/32".to_string()];
        assert!(ip_allowed(ip("2001:db8:abcd::1"), &list));
        assert!(!ip_allowed(ip("2001:db9::1"), &list));
        assert!(!ip_allowed(ip("10.0.0.1"), &list));
    }

    #[test]
    fn test_empty_and_malformed_lists_match_nothing() {
        assert!(!ip_allowed(ip("127.0.0.1"), &[]));
        assert!(!ip_allowed(ip("127.0.0.1"), &["not-an-ip".to_string()]));
        assert!(!ip_allowed(ip("127.0.0.1"), &["127.0.0.0/40".to_string()]));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        let rule: IpRule = "0.0.0.0/0".parse().unwrap();
        assert!(rule.matches(ip("8.8.8.8")));
        assert!(!rule.matches(ip("::1")));
    }
}

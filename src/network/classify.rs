//! Address classification and subnet arithmetic
//!
//! All comparisons are byte-wise on IPv4 octets so the same helpers serve
//! the interface table and ad-hoc queries.

use std::net::{IpAddr, Ipv4Addr};

/// Private ranges as (network, prefix length)
///
/// Both 172.16/16 and 172.24/16 count as private so that common
/// virtualization host networks are treated as local.
const PRIVATE_RANGES: [([u8; 4], u8); 6] = [
    ([10, 0, 0, 0], 8),
    ([127, 0, 0, 0], 8),
    ([172, 16, 0, 0], 16),
    ([172, 24, 0, 0], 16),
    ([192, 168, 0, 0], 16),
    ([169, 254, 0, 0], 16),
];

/// Whether an IPv4 address falls into one of the private ranges
pub fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    PRIVATE_RANGES
        .iter()
        .any(|(network, prefix)| same_network(addr.octets(), *network, mask_bytes(*prefix)))
}

/// Whether an address is private; IPv6 addresses are never classified private
pub fn is_private_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(_) => false,
    }
}

/// Whether an IPv4 address is link-local (169.254/16)
pub fn is_link_local(addr: Ipv4Addr) -> bool {
    addr.octets()[0] == 169 && addr.octets()[1] == 254
}

/// Subnet mask bytes for a prefix length (clamped to 32)
pub fn mask_bytes(prefix: u8) -> [u8; 4] {
    let prefix = prefix.min(32) as u32;
    let bits: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    bits.to_be_bytes()
}

/// Prefix length of a contiguous subnet mask, `None` for non-contiguous masks
pub fn prefix_from_mask(mask: [u8; 4]) -> Option<u8> {
    let bits = u32::from_be_bytes(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) == 0 {
        Some(prefix as u8)
    } else {
        None
    }
}

/// Apply a mask to an address, byte by byte
pub fn masked(addr: [u8; 4], mask: [u8; 4]) -> [u8; 4] {
    [
        addr[0] & mask[0],
        addr[1] & mask[1],
        addr[2] & mask[2],
        addr[3] & mask[3],
    ]
}

/// Whether two addresses share a network under `mask`
pub fn same_network(a: [u8; 4], b: [u8; 4], mask: [u8; 4]) -> bool {
    masked(a, mask) == masked(b, mask)
}

/// A usable unicast mask has a non-zero first byte
pub fn is_routable_mask(mask: [u8; 4]) -> bool {
    mask[0] != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10.1.2.3", true)]
    #[case("127.0.0.1", true)]
    #[case("172.16.5.5", true)]
    #[case("172.24.9.1", true)]
    #[case("192.168.1.1", true)]
    #[case("169.254.0.9", true)]
    #[case("8.8.8.8", false)]
    #[case("172.17.0.1", false)]
    #[case("11.0.0.1", false)]
    fn test_private_ranges(#[case] addr: &str, #[case] expected: bool) {
        let addr: Ipv4Addr = addr.parse().unwrap();
        assert_eq!(is_private_ipv4(addr), expected, "{addr}");
    }

    #[test]
    fn test_ipv6_is_not_private() {
        assert!(!is_private_ip("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_mask_round_trip() {
        assert_eq!(mask_bytes(24), [255, 255, 255, 0]);
        assert_eq!(mask_bytes(0), [0, 0, 0, 0]);
        assert_eq!(mask_bytes(32), [255, 255, 255, 255]);
        assert_eq!(mask_bytes(20), [255, 255, 240, 0]);
        assert_eq!(prefix_from_mask([255, 255, 240, 0]), Some(20));
        assert_eq!(prefix_from_mask([255, 0, 255, 0]), None);
    }

    #[test]
    fn test_same_network() {
        let mask = mask_bytes(24);
        assert!(same_network([192, 168, 1, 10], [192, 168, 1, 200], mask));
        assert!(!same_network([192, 168, 1, 10], [192, 168, 2, 10], mask));
    }

    #[test]
    fn test_routable_mask() {
        assert!(is_routable_mask([255, 0, 0, 0]));
        assert!(!is_routable_mask([0, 0, 0, 0]));
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Arithmetic over inclusive address ranges: successor computation,
//! adjacency, and decomposition of a range into the minimal CIDR cover.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use num_traits::{PrimInt, Unsigned};

use crate::prefix::{Ipv4Prefix, Ipv6Prefix, Prefix, PrefixError};

/// Fixed-width unsigned integer view of an address family.
trait AddrBits: PrimInt + Unsigned {
    const BITS: u8;
}

impl AddrBits for u32 {
    const BITS: u8 = 32;
}

impl AddrBits for u128 {
    const BITS: u8 = 128;
}

/// The address right after `addr`, or `None` at the family's maximum.
/// The `None` stands in for the distinguished invalid address that compares
/// unequal to every valid one, which is what keeps terminal ranges from
/// wrapping around.
#[must_use]
pub fn next_addr(addr: &IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(a) => a.to_bits().checked_add(1).map(|b| Ipv4Addr::from_bits(b).into()),
        IpAddr::V6(a) => a.to_bits().checked_add(1).map(|b| Ipv6Addr::from_bits(b).into()),
    }
}

/// Two prefixes are adjacent iff they share a family and the successor of
/// the end of `a` is the start of `b`.
#[must_use]
pub fn adjacent(a: &Prefix, b: &Prefix) -> bool {
    if a.is_ipv4() != b.is_ipv4() {
        return false;
    }
    next_addr(&a.last_address()) == Some(b.as_address())
}

/// Zero the host bits of `addr` below `bits`. Lengths at or above the
/// family width leave the address unchanged.
#[must_use]
pub fn mask_addr(addr: &IpAddr, bits: u8) -> IpAddr {
    match addr {
        IpAddr::V4(a) => {
            let mask = u32::MAX.unbounded_shl(u32::from(32u8.saturating_sub(bits)));
            Ipv4Addr::from_bits(a.to_bits() & mask).into()
        }
        IpAddr::V6(a) => {
            let mask = u128::MAX.unbounded_shl(u32::from(128u8.saturating_sub(bits)));
            Ipv6Addr::from_bits(a.to_bits() & mask).into()
        }
    }
}

/// Widest block that starts at `cur` and stays inside `[cur, end]`,
/// expressed as a host-bit count.
#[allow(clippy::cast_possible_truncation)]
fn widest_block<B: AddrBits>(cur: B, end: B) -> u8 {
    let align = cur.trailing_zeros().min(u32::from(B::BITS)) as u8;
    let mut host = align;
    while host > 0 {
        let span = if host == B::BITS {
            B::max_value()
        } else {
            (B::one().unsigned_shl(u32::from(host))) - B::one()
        };
        if span <= end - cur {
            break;
        }
        host -= 1;
    }
    host
}

/// Decompose `[start, end]` into the unique minimal list of non-overlapping
/// blocks `(base, host_bits)` in ascending order.
fn blocks<B: AddrBits>(start: B, end: B) -> Vec<(B, u8)> {
    let mut out = Vec::new();
    let mut cur = start;
    loop {
        let host = widest_block(cur, end);
        out.push((cur, host));
        let span = if host == B::BITS {
            B::max_value()
        } else {
            (B::one().unsigned_shl(u32::from(host))) - B::one()
        };
        if end - cur == span {
            break;
        }
        cur = cur + span + B::one();
    }
    out
}

/// Decompose the inclusive range `[start, end]` into the unique minimal
/// list of non-overlapping CIDR prefixes covering it, in strictly
/// increasing address order.
///
/// # Errors
///
/// Fails if the endpoints belong to different families or if `start` is
/// above `end`.
pub fn range_to_cidrs(start: &IpAddr, end: &IpAddr) -> Result<Vec<Prefix>, PrefixError> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            if s > e {
                return Err(PrefixError::InvertedRange(*start, *end));
            }
            blocks(s.to_bits(), e.to_bits())
                .into_iter()
                .map(|(base, host)| {
                    Ipv4Prefix::new(Ipv4Addr::from_bits(base), 32 - host).map(Prefix::IPV4)
                })
                .collect()
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            if s > e {
                return Err(PrefixError::InvertedRange(*start, *end));
            }
            blocks(s.to_bits(), e.to_bits())
                .into_iter()
                .map(|(base, host)| {
                    Ipv6Prefix::new(Ipv6Addr::from_bits(base), 128 - host).map(Prefix::IPV6)
                })
                .collect()
        }
        _ => Err(PrefixError::FamilyMismatch(*start, *end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_addr() {
        assert_eq!(next_addr(&addr("10.0.0.255")), Some(addr("10.0.1.0")));
        assert_eq!(next_addr(&addr("255.255.255.255")), None);
        assert_eq!(next_addr(&addr("::ffff")), Some(addr("::1:0")));
        assert_eq!(
            next_addr(&addr("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")),
            None
        );
    }

    #[test]
    fn test_adjacent() {
        let a = Prefix::from("10.0.0.0/25");
        let b = Prefix::from("10.0.0.128/25");
        assert!(adjacent(&a, &b));
        assert!(!adjacent(&b, &a));
        assert!(!adjacent(&a, &a));
        // Across families: never adjacent.
        assert!(!adjacent(&a, &Prefix::from("::/0")));
        // The terminal prefix has no successor.
        let last = Prefix::from("255.255.255.255/32");
        assert!(!adjacent(&last, &Prefix::from("0.0.0.0/0")));
    }

    #[test]
    fn test_mask_addr() {
        assert_eq!(mask_addr(&addr("10.1.2.3"), 16), addr("10.1.0.0"));
        assert_eq!(mask_addr(&addr("10.1.2.3"), 32), addr("10.1.2.3"));
        assert_eq!(mask_addr(&addr("2001:db8:1::1"), 32), addr("2001:db8::"));
    }

    #[test]
    fn test_range_to_cidrs_aligned() {
        let out = range_to_cidrs(&addr("10.0.0.0"), &addr("10.0.0.255")).unwrap();
        assert_eq!(out, vec![Prefix::from("10.0.0.0/24")]);
    }

    #[test]
    fn test_range_to_cidrs_unaligned() {
        // 10.0.0.1..10.0.0.6 needs four blocks.
        let out = range_to_cidrs(&addr("10.0.0.1"), &addr("10.0.0.6")).unwrap();
        assert_eq!(
            out,
            vec![
                Prefix::from("10.0.0.1/32"),
                Prefix::from("10.0.0.2/31"),
                Prefix::from("10.0.0.4/31"),
                Prefix::from("10.0.0.6/32"),
            ]
        );
    }

    #[test]
    fn test_range_to_cidrs_full_space() {
        let out = range_to_cidrs(&addr("0.0.0.0"), &addr("255.255.255.255")).unwrap();
        assert_eq!(out, vec![Prefix::from("0.0.0.0/0")]);
        let out = range_to_cidrs(
            &addr("::"),
            &addr("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff"),
        )
        .unwrap();
        assert_eq!(out, vec![Prefix::from("::/0")]);
    }

    #[test]
    fn test_range_to_cidrs_terminal() {
        // Ends at the family maximum without wrapping.
        let out = range_to_cidrs(&addr("255.255.255.254"), &addr("255.255.255.255")).unwrap();
        assert_eq!(out, vec![Prefix::from("255.255.255.254/31")]);
    }

    #[test]
    fn test_range_to_cidrs_single() {
        let out = range_to_cidrs(&addr("10.0.0.1"), &addr("10.0.0.1")).unwrap();
        assert_eq!(out, vec![Prefix::from("10.0.0.1/32")]);
    }

    #[test]
    fn test_range_to_cidrs_errors() {
        assert!(matches!(
            range_to_cidrs(&addr("10.0.0.2"), &addr("10.0.0.1")),
            Err(PrefixError::InvertedRange(_, _))
        ));
        assert!(matches!(
            range_to_cidrs(&addr("10.0.0.1"), &addr("::1")),
            Err(PrefixError::FamilyMismatch(_, _))
        ));
    }

    #[test]
    fn test_range_to_cidrs_properties() {
        bolero::check!()
            .with_type::<(u32, u32)>()
            .for_each(|&(a, b)| {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let start = IpAddr::from(Ipv4Addr::from_bits(lo));
                let end = IpAddr::from(Ipv4Addr::from_bits(hi));
                let cidrs = range_to_cidrs(&start, &end).unwrap();
                assert!(!cidrs.is_empty());
                // Covers the range exactly: first starts at lo, last ends at
                // hi, and each block is adjacent to its successor.
                assert_eq!(cidrs[0].as_address(), start);
                assert_eq!(cidrs[cidrs.len() - 1].last_address(), end);
                for pair in cidrs.windows(2) {
                    assert!(adjacent(&pair[0], &pair[1]));
                    assert!(pair[0].as_address() < pair[1].as_address());
                }
            });
    }

    #[test]
    fn test_split_then_merge_identity() {
        bolero::check!()
            .with_type::<(u32, u8, u8)>()
            .for_each(|&(bits, len, extra)| {
                let len = len % 33;
                let depth = (len + extra % 11).min(32);
                let p = Prefix::IPV4(
                    Ipv4Prefix::new(Ipv4Addr::from_bits(bits), len).unwrap(),
                );
                let parts = p.split(depth).unwrap();
                // Sub-prefixes tile the parent exactly.
                assert_eq!(parts[0].as_address(), p.as_address());
                assert_eq!(parts[parts.len() - 1].last_address(), p.last_address());
                for pair in parts.windows(2) {
                    assert!(adjacent(&pair[0], &pair[1]));
                }
            });
    }
}

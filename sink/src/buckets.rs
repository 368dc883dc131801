// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bucket expansion over inclusive ranges: the bucket-aligned addresses a
//! range touches, bounded by the same fan-out cap as prefix splitting.

use std::net::{Ipv4Addr, Ipv6Addr};

use lpm::prefix::{IpAddr, MAX_SPLIT_DEPTH};
use lpm::range::mask_addr;
use merge::MergeError;

/// Widest allowed expansion of one range.
pub const MAX_FANOUT: u32 = 1 << MAX_SPLIT_DEPTH;

/// The bucket addresses (aligned to `bits`) covering `[start, end]`, in
/// ascending order. Both endpoints must share a family.
pub fn bucket_addrs(start: &IpAddr, end: &IpAddr, bits: u8) -> Result<Vec<IpAddr>, MergeError> {
    let first = mask_addr(start, bits);
    let last = mask_addr(end, bits);
    let overflow = || MergeError::BucketFanout {
        start: start.to_string(),
        end: end.to_string(),
        max: MAX_FANOUT,
    };
    match (first, last) {
        (IpAddr::V4(lo), IpAddr::V4(hi)) => {
            let step = 1u32.unbounded_shl(u32::from(32u8.saturating_sub(bits)));
            if step == 0 {
                return Err(overflow());
            }
            let count = (hi.to_bits() - lo.to_bits()) / step + 1;
            if count > MAX_FANOUT {
                return Err(overflow());
            }
            Ok((0..count)
                .map(|i| IpAddr::V4(Ipv4Addr::from_bits(lo.to_bits() + i * step)))
                .collect())
        }
        (IpAddr::V6(lo), IpAddr::V6(hi)) => {
            let step = 1u128.unbounded_shl(u32::from(128u8.saturating_sub(bits)));
            if step == 0 {
                return Err(overflow());
            }
            let count = (hi.to_bits() - lo.to_bits()) / step + 1;
            if count > u128::from(MAX_FANOUT) {
                return Err(overflow());
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok((0..count as u32)
                .map(|i| IpAddr::V6(Ipv6Addr::from_bits(lo.to_bits() + u128::from(i) * step)))
                .collect())
        }
        _ => Err(overflow()),
    }
}

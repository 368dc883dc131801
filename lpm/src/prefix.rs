// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type to represent IP-version neutral network prefixes.

use ipnet::{Ipv4Net, Ipv6Net};
use std::fmt::{Debug, Display};
pub use std::net::IpAddr;
pub use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Widest fan-out a single [`Prefix::split`] call may produce, as a depth
/// delta. `2^10` sub-prefixes is the ceiling.
pub const MAX_SPLIT_DEPTH: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    #[error("Invalid Prefix: {0}")]
    Invalid(String),
    #[error("Mask length {0} is invalid")]
    InvalidLength(u8),
    #[error("Splitting {prefix} at depth {depth} would exceed the {max} sub-prefix bound")]
    SplitFanout {
        prefix: String,
        depth: u8,
        max: u32,
    },
    #[error("Addresses {0} and {1} belong to different IP families")]
    FamilyMismatch(IpAddr, IpAddr),
    #[error("Range start {0} is above range end {1}")]
    InvertedRange(IpAddr, IpAddr),
}

////////////////////////////////////////////////////////////
// IPv4 prefix
////////////////////////////////////////////////////////////

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Prefix(Ipv4Net);

impl Ipv4Prefix {
    pub const MAX_LEN: u8 = 32;

    /// Build a prefix from an address and a mask length. Host bits are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is greater than `Self::MAX_LEN`.
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, PrefixError> {
        if len > Self::MAX_LEN {
            return Err(PrefixError::InvalidLength(len));
        }
        let addr = Ipv4Addr::from_bits(
            addr.to_bits() & u32::MAX.unbounded_shl(u32::from(Self::MAX_LEN - len)),
        );
        Ok(Self(
            Ipv4Net::new(addr, len).map_err(|e| PrefixError::Invalid(e.to_string()))?,
        ))
    }

    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    #[must_use]
    pub fn len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Last address covered by the prefix.
    #[must_use]
    pub fn last(&self) -> Ipv4Addr {
        let host = u32::MAX.unbounded_shr(u32::from(self.len()));
        Ipv4Addr::from_bits(self.network().to_bits() | host)
    }
}

impl Debug for Ipv4Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl Display for Ipv4Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Ipv4Prefix {
    fn default() -> Self {
        Self(Ipv4Net::new(Ipv4Addr::new(0, 0, 0, 0), 0).unwrap())
    }
}

impl From<Ipv4Net> for Ipv4Prefix {
    fn from(value: Ipv4Net) -> Self {
        Self::new(value.network(), value.prefix_len())
            .unwrap_or_else(|_| unreachable!("Invalid IPv4 prefix: {:?}", value))
    }
}

impl FromStr for Ipv4Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or(PrefixError::Invalid(s.to_string()))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| PrefixError::Invalid(s.to_string()))?;
        let len = len
            .parse::<u8>()
            .map_err(|_| PrefixError::Invalid(s.to_string()))?;
        Self::new(addr, len)
    }
}

////////////////////////////////////////////////////////////
// IPv6 prefix
////////////////////////////////////////////////////////////

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv6Prefix(Ipv6Net);

impl Ipv6Prefix {
    pub const MAX_LEN: u8 = 128;

    /// Build a prefix from an address and a mask length. Host bits are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is greater than `Self::MAX_LEN`.
    pub fn new(addr: Ipv6Addr, len: u8) -> Result<Self, PrefixError> {
        if len > Self::MAX_LEN {
            return Err(PrefixError::InvalidLength(len));
        }
        let addr = Ipv6Addr::from_bits(
            addr.to_bits() & u128::MAX.unbounded_shl(u32::from(Self::MAX_LEN - len)),
        );
        Ok(Self(
            Ipv6Net::new(addr, len).map_err(|e| PrefixError::Invalid(e.to_string()))?,
        ))
    }

    #[must_use]
    pub fn network(&self) -> Ipv6Addr {
        self.0.network()
    }

    #[must_use]
    pub fn len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// Last address covered by the prefix.
    #[must_use]
    pub fn last(&self) -> Ipv6Addr {
        let host = u128::MAX.unbounded_shr(u32::from(self.len()));
        Ipv6Addr::from_bits(self.network().to_bits() | host)
    }
}

impl Debug for Ipv6Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl Display for Ipv6Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Ipv6Prefix {
    fn default() -> Self {
        Self(Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0).unwrap())
    }
}

impl From<Ipv6Net> for Ipv6Prefix {
    fn from(value: Ipv6Net) -> Self {
        Self::new(value.network(), value.prefix_len())
            .unwrap_or_else(|_| unreachable!("Invalid IPv6 prefix: {:?}", value))
    }
}

impl FromStr for Ipv6Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or(PrefixError::Invalid(s.to_string()))?;
        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| PrefixError::Invalid(s.to_string()))?;
        let len = len
            .parse::<u8>()
            .map_err(|_| PrefixError::Invalid(s.to_string()))?;
        Self::new(addr, len)
    }
}

/// Type to represent both IPv4 and IPv6 prefixes to expose an IP
/// version-independent API. The merger never stores prefixes in bulk, so
/// keeping IPv6 in the same basket as IPv4 costs nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub enum Prefix {
    IPV4(Ipv4Prefix),
    IPV6(Ipv6Prefix),
}

impl Prefix {
    pub const MAX_LEN_IPV4: u8 = 32;
    pub const MAX_LEN_IPV6: u8 = 128;

    /// Build 0.0.0.0/0. "Default" is a very overloaded term. Calling this
    /// `root_v4`.
    #[must_use]
    pub fn root_v4() -> Prefix {
        Prefix::IPV4(Ipv4Prefix::default())
    }

    /// Build `::/0`.
    #[must_use]
    pub fn root_v6() -> Prefix {
        Prefix::IPV6(Ipv6Prefix::default())
    }

    /// Check whether the prefix is IPv4
    #[must_use]
    pub fn is_ipv4(&self) -> bool {
        matches!(self, Prefix::IPV4(_))
    }

    /// Check whether the prefix is IPv6
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        matches!(self, Prefix::IPV6(_))
    }

    /// First address covered by the prefix (the network address).
    #[must_use]
    pub fn as_address(&self) -> IpAddr {
        match *self {
            Prefix::IPV4(p) => p.network().into(),
            Prefix::IPV6(p) => p.network().into(),
        }
    }

    /// Last address covered by the prefix.
    #[must_use]
    pub fn last_address(&self) -> IpAddr {
        match *self {
            Prefix::IPV4(p) => p.last().into(),
            Prefix::IPV6(p) => p.last().into(),
        }
    }

    /// Get prefix length
    #[must_use]
    pub fn length(&self) -> u8 {
        match *self {
            Prefix::IPV4(p) => p.len(),
            Prefix::IPV6(p) => p.len(),
        }
    }

    /// Maximum mask length for the prefix's family.
    #[must_use]
    pub fn max_length(&self) -> u8 {
        match self {
            Prefix::IPV4(_) => Self::MAX_LEN_IPV4,
            Prefix::IPV6(_) => Self::MAX_LEN_IPV6,
        }
    }

    /// Tell if prefix is a host
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.length() == self.max_length()
    }

    /// Check whether prefix covers a given address
    #[must_use]
    pub fn covers_addr(&self, addr: &IpAddr) -> bool {
        match (self, addr) {
            (Prefix::IPV4(p), IpAddr::V4(a)) => {
                *a >= p.network() && *a <= p.last()
            }
            (Prefix::IPV6(p), IpAddr::V6(a)) => {
                *a >= p.network() && *a <= p.last()
            }
            _ => false,
        }
    }

    /// Check whether prefix covers another prefix
    #[must_use]
    pub fn covers(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Prefix::IPV4(p1), Prefix::IPV4(p2)) => {
                let mask = u32::MAX.unbounded_shl(u32::from(Ipv4Prefix::MAX_LEN - p1.len()));
                p1.len() <= p2.len() && p1.network().to_bits() == p2.network().to_bits() & mask
            }
            (Prefix::IPV6(p1), Prefix::IPV6(p2)) => {
                let mask = u128::MAX.unbounded_shl(u32::from(Ipv6Prefix::MAX_LEN - p1.len()));
                p1.len() <= p2.len() && p1.network().to_bits() == p2.network().to_bits() & mask
            }
            _ => false,
        }
    }

    /// The more specific of two prefixes. Ties go to `a`.
    #[must_use]
    pub fn smaller_of(a: Prefix, b: Prefix) -> Prefix {
        if b.length() > a.length() { b } else { a }
    }

    /// Coarsen the prefix to at most `max_len` bits. Prefixes already at or
    /// above that level, and IPv4 prefixes, pass through unchanged.
    #[must_use]
    pub fn truncate_v6(&self, max_len: u8) -> Prefix {
        match *self {
            Prefix::IPV6(p) if p.len() > max_len && max_len <= Self::MAX_LEN_IPV6 => {
                Prefix::IPV6(
                    Ipv6Prefix::new(p.network(), max_len)
                        .unwrap_or_else(|_| unreachable!("length checked above")),
                )
            }
            other => other,
        }
    }

    /// Split the prefix into its sub-prefixes at `depth` bits, in address
    /// order. A prefix already at or below the requested depth is returned
    /// unchanged as a single element.
    ///
    /// # Errors
    ///
    /// Fails if `depth` exceeds the family's maximum mask length or if the
    /// fan-out would exceed `2^`[`MAX_SPLIT_DEPTH`] sub-prefixes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn split(&self, depth: u8) -> Result<Vec<Prefix>, PrefixError> {
        let len = self.length();
        if depth > self.max_length() {
            return Err(PrefixError::InvalidLength(depth));
        }
        if depth <= len {
            return Ok(vec![*self]);
        }
        if depth - len > MAX_SPLIT_DEPTH {
            return Err(PrefixError::SplitFanout {
                prefix: self.to_string(),
                depth,
                max: 1 << MAX_SPLIT_DEPTH,
            });
        }
        let count = 1u32 << (depth - len);
        let mut out = Vec::with_capacity(count as usize);
        match *self {
            Prefix::IPV4(p) => {
                let step = 1u32.unbounded_shl(u32::from(Self::MAX_LEN_IPV4 - depth));
                let base = p.network().to_bits();
                for i in 0..count {
                    out.push(Prefix::IPV4(Ipv4Prefix::new(
                        Ipv4Addr::from_bits(base + i * step),
                        depth,
                    )?));
                }
            }
            Prefix::IPV6(p) => {
                let step = 1u128.unbounded_shl(u32::from(Self::MAX_LEN_IPV6 - depth));
                let base = p.network().to_bits();
                for i in 0..count {
                    out.push(Prefix::IPV6(Ipv6Prefix::new(
                        Ipv6Addr::from_bits(base + u128::from(i) * step),
                        depth,
                    )?));
                }
            }
        }
        Ok(out)
    }

    /// Build a [`Prefix`] from an address and a mask length. Host bits are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Fails if the prefix length exceeds the maximum allowed for the
    /// address family.
    pub fn from_addr_len(addr: IpAddr, len: u8) -> Result<Self, PrefixError> {
        match addr {
            IpAddr::V4(a) => Ok(Prefix::IPV4(Ipv4Prefix::new(a, len)?)),
            IpAddr::V6(a) => Ok(Prefix::IPV6(Ipv6Prefix::new(a, len)?)),
        }
    }

}

impl From<Ipv4Prefix> for Prefix {
    fn from(value: Ipv4Prefix) -> Self {
        Self::IPV4(value)
    }
}

impl From<Ipv6Prefix> for Prefix {
    fn from(value: Ipv6Prefix) -> Self {
        Self::IPV6(value)
    }
}

impl From<Ipv4Net> for Prefix {
    fn from(value: Ipv4Net) -> Self {
        Prefix::IPV4(Ipv4Prefix::from(value))
    }
}

impl From<Ipv6Net> for Prefix {
    fn from(value: Ipv6Net) -> Self {
        Prefix::IPV6(Ipv6Prefix::from(value))
    }
}

impl TryFrom<(IpAddr, u8)> for Prefix {
    type Error = PrefixError;

    fn try_from(tuple: (IpAddr, u8)) -> Result<Self, Self::Error> {
        Prefix::from_addr_len(tuple.0, tuple.1)
    }
}

/// Newtype for parsing prefixes out of strings. A plain `TryFrom<&str>`
/// would collide with the testing `From<&str>` through the blanket
/// `TryFrom` impl.
#[derive(Debug)]
#[repr(transparent)]
pub struct PrefixString<'a>(pub &'a str);

impl<'a> TryFrom<PrefixString<'a>> for Prefix {
    type Error = PrefixError;

    fn try_from(value: PrefixString<'a>) -> Result<Self, Self::Error> {
        let PrefixString(s) = value;
        if let Ok(p) = s.parse::<Ipv4Prefix>() {
            Ok(Prefix::IPV4(p))
        } else if let Ok(p) = s.parse::<Ipv6Prefix>() {
            Ok(Prefix::IPV6(p))
        } else {
            Err(PrefixError::Invalid(s.to_string()))
        }
    }
}

impl FromStr for Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Prefix::try_from(PrefixString(s))
    }
}

/// Only for testing. Will panic with badly formatted prefix strings
#[cfg(any(test, feature = "testing"))]
impl From<&str> for Prefix {
    fn from(s: &str) -> Self {
        s.parse().unwrap()
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prefix::IPV4(p) => write!(f, "{p}"),
            Prefix::IPV6(p) => write!(f, "{p}"),
        }
    }
}

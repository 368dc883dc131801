// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The writer capabilities the merger emits to. Every sink takes rows;
//! sinks that can express an address range natively opt into
//! [`RangeWriter`] and skip CIDR decomposition entirely.

use lpm::prefix::{IpAddr, Prefix};
use mmdb::Value;

use crate::errors::MergeError;

/// Row-oriented sink. Slot `i` of `values` always corresponds to the
/// configured column `i`; absent data arrives as `None`.
pub trait RowWriter {
    fn write_row(&mut self, prefix: &Prefix, values: &[Option<Value>]) -> Result<(), MergeError>;

    fn flush(&mut self) -> Result<(), MergeError>;

    /// Range capability probe. The default sink has none.
    fn as_range_writer(&mut self) -> Option<&mut dyn RangeWriter> {
        None
    }
}

/// Optional capability: accept one inclusive address range per coalesced
/// run instead of its CIDR cover.
pub trait RangeWriter {
    fn write_range(
        &mut self,
        start: &IpAddr,
        end: &IpAddr,
        values: &[Option<Value>],
    ) -> Result<(), MergeError>;
}

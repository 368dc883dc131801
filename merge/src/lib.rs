// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The streaming multi-source network merger. Given N ordered source
//! databases and a set of column bindings, produces an ascending,
//! non-overlapping stream of `(network, values)` rows in constant working
//! memory, coalescing adjacent equal-valued networks before they reach the
//! sink.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]

pub mod accumulator;
pub mod columns;
pub mod driver;
pub mod errors;
pub mod source;
pub mod walker;
pub mod writer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use accumulator::{AccumulatedRange, Accumulator};
pub use columns::{BoundColumn, Extractor};
pub use driver::{MergeOptions, MergeStats, merge};
pub use errors::MergeError;
pub use source::NetworkReader;
pub use writer::{RangeWriter, RowWriter};

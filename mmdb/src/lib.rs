// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! MMDB binary prefix-tree databases: read-only access with ordered
//! network enumeration, and a builder for writing new files.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod decoder;
pub mod error;
pub mod metadata;
pub mod path;
pub mod reader;
pub mod value;
pub mod writer;

pub use error::MmdbError;
pub use metadata::Metadata;
pub use path::PathSegment;
pub use reader::{DataRef, NetLeaf, Reader};
pub use value::Value;
pub use writer::Writer;

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::net::IpAddr;

use thiserror::Error;

/// The reasons reading or writing an MMDB file may fail.
#[derive(Debug, Error)]
pub enum MmdbError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("No MMDB metadata marker found")]
    NoMetadata,
    #[error("Bad metadata: {0}")]
    BadMetadata(&'static str),
    #[error("Malformed database: {0}")]
    Malformed(String),
    #[error("Unknown data type {0}")]
    UnknownType(u8),
    #[error("Truncated data section at offset {0}")]
    Truncated(usize),
    #[error("Pointer chain exceeds depth limit at offset {0}")]
    PointerChain(usize),
    #[error("Type mismatch at '{path}': cannot traverse {found}")]
    PathType { path: String, found: &'static str },
    #[error("Scope {0} does not match the database IP version")]
    ScopeFamily(IpAddr),
    #[error("Record value {0} does not fit the chosen record size")]
    RecordOverflow(u64),
    #[error("Search tree exceeds {0} nodes")]
    TreeTooLarge(u64),
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use config::ConfigError;
use lpm::prefix::PrefixError;
use mmdb::MmdbError;
use thiserror::Error;

/// The reasons a merge may stop. The first error wins; partial output is
/// not rolled back.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Source databases mix IPv4-only and IPv6 trees")]
    FamilyMismatch,
    #[error("Type mismatch at '{path}': cannot traverse {found}")]
    StructuralDecode { path: String, found: &'static str },
    #[error("Source database error: {0}")]
    Reader(MmdbError),
    #[error("Sink error: {0}")]
    Writer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prefix(#[from] PrefixError),
    #[error("Bucket column would fan out beyond {max} rows over {start}..{end}")]
    BucketFanout {
        start: String,
        end: String,
        max: u32,
    },
    #[error("Merge canceled")]
    Canceled,
}

impl From<MmdbError> for MergeError {
    fn from(e: MmdbError) -> Self {
        match e {
            // A path/type conflict is a contract violation between the job
            // and the data, not a broken source file.
            MmdbError::PathType { path, found } => MergeError::StructuralDecode { path, found },
            other => MergeError::Reader(other),
        }
    }
}

impl MergeError {
    /// Wrap a sink-side failure.
    pub fn sink<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MergeError::Writer(Box::new(e))
    }
}

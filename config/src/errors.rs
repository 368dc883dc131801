// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type for configuration / validation failures. Any result returned while
//! loading or validating a merge job is a `ConfigError`.

use thiserror::Error;

/// The reasons why we may reject a merge job
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read job file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Cannot parse job file: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("At least one source database is required")]
    NoDatabases,
    #[error("At least one value column is required")]
    NoColumns,
    #[error("A database named '{0}' already exists")]
    DuplicateDatabase(String),
    #[error("A column named '{0}' already exists")]
    DuplicateColumn(String),
    #[error("Column '{column}' refers to unknown database '{database}'")]
    UnknownDatabase { column: String, database: String },
    #[error("'{0}' is not a valid IPv6 minimum prefix length")]
    BadIpv6MinPrefix(u8),
    #[error("Bucket size {size} is invalid for {family}")]
    BadBucketSize { family: &'static str, size: u8 },
    #[error("Output needs either 'path' or both 'ipv4_path' and 'ipv6_path'")]
    BadOutputPaths,
    #[error("A network_bucket column requires per-family split output")]
    BucketNeedsSplit,
    #[error(
        "Integer network columns with an IPv6-capable source need split \
         output or a columnar sink"
    )]
    Ipv6IntegerColumns,
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use merge::MergeError;
use thiserror::Error;

/// Sink-side failures; surfaced to the merger as writer errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("Parquet failure: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow failure: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("Cannot render value as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Column '{column}': cannot coerce {found} to {want}")]
    Coerce {
        column: String,
        found: &'static str,
        want: &'static str,
    },
}

impl From<SinkError> for MergeError {
    fn from(e: SinkError) -> Self {
        MergeError::sink(e)
    }
}

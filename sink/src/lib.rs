// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Sinks for the merged network stream: CSV, Parquet, and MMDB, plus the
//! sink-side concerns the merger stays out of — materializing network
//! columns, coercing values to column types, splitting output per address
//! family, and expanding bucket rows.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]

pub mod buckets;
pub mod cells;
mod csv_sink;
pub mod errors;
pub mod mmdb_sink;
mod parquet_sink;
pub mod tabular;

use config::{Config, OutputFormat};
use merge::{BoundColumn, MergeError, RowWriter};
use tracing::warn;

pub use errors::SinkError;

/// Build the sink a job asks for. `ipv6_capable` reflects the opened
/// sources and decides how integer network columns are typed.
pub fn build_sink(
    config: &Config,
    columns: &[BoundColumn],
    ipv6_capable: bool,
) -> Result<Box<dyn RowWriter>, MergeError> {
    match config.output.format {
        OutputFormat::Csv | OutputFormat::Parquet => {
            let sink = tabular::TabularSink::open(config, columns, ipv6_capable)?;
            Ok(Box::new(sink))
        }
        OutputFormat::Mmdb => {
            if !config.network_columns.is_empty() {
                // The network is the tree key; there is nothing to
                // materialize.
                warn!("network_columns are ignored for mmdb output");
            }
            let sink = mmdb_sink::MmdbSink::open(config, columns, ipv6_capable)?;
            Ok(Box::new(sink))
        }
    }
}

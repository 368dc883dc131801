// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! MMDB sink: rows become `column name -> value` maps keyed by their
//! network in a freshly built tree. The network itself is the tree key, so
//! network columns do not apply here.

use std::path::PathBuf;

use config::Config;
use lpm::prefix::Prefix;
use merge::{BoundColumn, MergeError, RowWriter};
use mmdb::{Value, Writer};
use tracing::info;

use crate::errors::SinkError;

pub struct MmdbSink {
    writer: Option<Writer>,
    columns: Vec<String>,
    path: PathBuf,
    rows: u64,
}

impl MmdbSink {
    pub fn open(
        config: &Config,
        columns: &[BoundColumn],
        ipv6_capable: bool,
    ) -> Result<Self, SinkError> {
        let Some(path) = &config.output.path else {
            unreachable!("validated mmdb output carries a single path");
        };
        let database_type = config
            .output
            .database_type
            .clone()
            .unwrap_or_else(|| "Merged".to_string());
        let ip_version = if ipv6_capable { 6 } else { 4 };
        Ok(Self {
            writer: Some(Writer::new(ip_version, &database_type)),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            path: path.clone(),
            rows: 0,
        })
    }
}

impl RowWriter for MmdbSink {
    fn write_row(&mut self, prefix: &Prefix, values: &[Option<Value>]) -> Result<(), MergeError> {
        let record: Vec<(String, Value)> = self
            .columns
            .iter()
            .zip(values)
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect();
        if record.is_empty() {
            // Nothing to store; an empty map would only bloat the tree.
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.insert(prefix, Value::Map(record))?;
            self.rows += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MergeError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let bytes = writer.into_bytes()?;
        std::fs::write(&self.path, &bytes).map_err(SinkError::from)?;
        info!(
            "wrote {} ({} networks, {} bytes)",
            self.path.display(),
            self.rows,
            bytes.len()
        );
        Ok(())
    }
}

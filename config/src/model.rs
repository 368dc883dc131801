// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mmdb::PathSegment;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// One source database: a unique name columns refer to, and its file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub name: String,
    pub path: PathBuf,
}

/// Sink-side type hint for a value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    String,
    I64,
    F64,
    Bool,
    Binary,
}

/// One value column: where it comes from and how the sink should treat it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub database: String,
    /// Path into the decoded record; empty means the whole record.
    #[serde(default)]
    pub path: Vec<PathSegment>,
    #[serde(rename = "type", default)]
    pub type_hint: Option<SinkType>,
}

/// The network columns a tabular sink can materialize from the emitted
/// prefix or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkColumnKind {
    Cidr,
    StartIp,
    EndIp,
    StartInt,
    EndInt,
    NetworkBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkColumnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
    Mmdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Single output file. Mutually exclusive with the split pair.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub ipv4_path: Option<PathBuf>,
    #[serde(default)]
    pub ipv6_path: Option<PathBuf>,
    /// `database_type` metadata for MMDB output.
    #[serde(default)]
    pub database_type: Option<String>,
}

impl OutputConfig {
    /// Whether rows are routed into per-family files.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.ipv4_path.is_some() && self.ipv6_path.is_some()
    }
}

fn default_bucket_size() -> u8 {
    16
}

/// A full merge job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub databases: Vec<DatabaseRef>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub network_columns: Vec<NetworkColumnSpec>,
    pub output: OutputConfig,
    #[serde(default)]
    pub include_empty_rows: bool,
    #[serde(default)]
    pub ipv6_min_prefix: Option<u8>,
    #[serde(default)]
    pub disable_decode_cache: bool,
    #[serde(default = "default_bucket_size")]
    pub ipv4_bucket_size: u8,
    #[serde(default = "default_bucket_size")]
    pub ipv6_bucket_size: u8,
}

impl Config {
    /// Load and structurally validate a job file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and structurally validate a job description.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml_ng::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that need nothing but the job itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases.is_empty() {
            return Err(ConfigError::NoDatabases);
        }
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns);
        }
        let mut names = HashSet::new();
        for db in &self.databases {
            if !names.insert(db.name.as_str()) {
                return Err(ConfigError::DuplicateDatabase(db.name.clone()));
            }
        }
        let mut columns = HashSet::new();
        for name in self
            .network_columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
        {
            if !columns.insert(name) {
                return Err(ConfigError::DuplicateColumn(name.to_string()));
            }
        }
        for column in &self.columns {
            if !self.databases.iter().any(|db| db.name == column.database) {
                return Err(ConfigError::UnknownDatabase {
                    column: column.name.clone(),
                    database: column.database.clone(),
                });
            }
        }
        if let Some(bits) = self.ipv6_min_prefix {
            if bits == 0 || bits > 128 {
                return Err(ConfigError::BadIpv6MinPrefix(bits));
            }
        }
        if self.ipv4_bucket_size == 0 || self.ipv4_bucket_size > 32 {
            return Err(ConfigError::BadBucketSize {
                family: "IPv4",
                size: self.ipv4_bucket_size,
            });
        }
        if self.ipv6_bucket_size == 0 || self.ipv6_bucket_size > 128 {
            return Err(ConfigError::BadBucketSize {
                family: "IPv6",
                size: self.ipv6_bucket_size,
            });
        }
        self.validate_output()
    }

    fn validate_output(&self) -> Result<(), ConfigError> {
        let out = &self.output;
        let split_halves =
            u8::from(out.ipv4_path.is_some()) + u8::from(out.ipv6_path.is_some());
        let valid = match (out.path.is_some(), split_halves) {
            (true, 0) => true,
            (false, 2) => matches!(out.format, OutputFormat::Csv | OutputFormat::Parquet),
            _ => false,
        };
        if !valid {
            return Err(ConfigError::BadOutputPaths);
        }
        if matches!(out.format, OutputFormat::Csv | OutputFormat::Parquet)
            && self.has_network_column(NetworkColumnKind::NetworkBucket)
            && !out.is_split()
        {
            return Err(ConfigError::BucketNeedsSplit);
        }
        Ok(())
    }

    /// Checks that depend on what the opened sources can produce. An
    /// IPv6-capable source may emit IPv6 rows, which do not fit the integer
    /// network columns of a single CSV file.
    pub fn validate_for_sources(&self, ipv6_capable: bool) -> Result<(), ConfigError> {
        let has_int_columns = self.has_network_column(NetworkColumnKind::StartInt)
            || self.has_network_column(NetworkColumnKind::EndInt);
        if ipv6_capable
            && has_int_columns
            && self.output.format == OutputFormat::Csv
            && !self.output.is_split()
        {
            return Err(ConfigError::Ipv6IntegerColumns);
        }
        Ok(())
    }

    #[must_use]
    pub fn has_network_column(&self, kind: NetworkColumnKind) -> bool {
        self.network_columns.iter().any(|c| c.kind == kind)
    }

    /// Index of the database a column reads, in declaration order.
    #[must_use]
    pub fn database_index(&self, name: &str) -> Option<usize> {
        self.databases.iter().position(|db| db.name == name)
    }
}

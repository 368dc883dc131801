// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The merge-job model: which databases to read, which record paths become
//! columns, which network columns to materialize, and where the rows go.
//! A job is described in YAML; everything a job can get wrong is a
//! [`ConfigError`].

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]

pub mod errors;
pub mod model;

pub use errors::ConfigError;
pub use model::{
    ColumnSpec, Config, DatabaseRef, NetworkColumnKind, NetworkColumnSpec, OutputConfig,
    OutputFormat, SinkType,
};

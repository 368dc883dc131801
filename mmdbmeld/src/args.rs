// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub(crate) use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mmdbmeld")]
#[command(version)]
#[command(
    about = "Merge MMDB databases into one CSV, Parquet, or MMDB file",
    long_about = None
)]
pub(crate) struct CmdArgs {
    /// Merge job description (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override the job's single output path
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log filter, e.g. "info" or "debug,mmdbmeld_mmdb=trace"
    #[arg(long, value_name = "FILTER", default_value = "info")]
    log: String,
}

impl CmdArgs {
    pub(crate) fn config_path(&self) -> &PathBuf {
        &self.config
    }

    pub(crate) fn output_override(&self) -> Option<&PathBuf> {
        self.output.as_ref()
    }

    pub(crate) fn log_filter(&self) -> &str {
        &self.log
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod args;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::args::{CmdArgs, Parser};
use config::Config;
use merge::{Extractor, MergeError, MergeOptions, NetworkReader, merge};
use mmdb::Reader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

fn run(args: &CmdArgs) -> Result<(), MergeError> {
    let mut config = Config::from_path(args.config_path())?;
    if let Some(path) = args.output_override() {
        config.output.path = Some(path.clone());
    }

    let mut readers = Vec::with_capacity(config.databases.len());
    for db in &config.databases {
        let reader = Reader::open(&db.path)?;
        info!(
            "opened '{}' ({}): {} ({} networks tree, IPv{})",
            db.name,
            db.path.display(),
            reader.metadata().database_type,
            reader.metadata().node_count,
            reader.metadata().ip_version,
        );
        readers.push(reader);
    }
    let ipv6_capable = readers.iter().any(|r| r.metadata().ip_version == 6);
    config.validate_for_sources(ipv6_capable)?;

    let extractor = Extractor::new(&config)?;
    let mut sink = sink::build_sink(&config, extractor.columns(), ipv6_capable)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))
        .expect("failed to set SIGINT handler");

    let sources: Vec<&dyn NetworkReader> = readers
        .iter()
        .map(|r| r as &dyn NetworkReader)
        .collect();
    let stats = merge(
        &sources,
        &extractor,
        &MergeOptions::from(&config),
        Some(cancel.as_ref()),
        sink.as_mut(),
    )?;
    info!(
        "done: {} networks emitted, {} coalesced ranges",
        stats.emitted, stats.ranges
    );
    Ok(())
}

fn main() {
    let args = CmdArgs::parse();
    init_logging(args.log_filter());

    if let Err(e) = run(&args) {
        error!("merge failed: {e}");
        std::process::exit(1);
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The network iterator driver: nested, scope-narrowing traversal over the
//! ordered sources. The first source walks its whole tree; every deeper
//! source walks only within the effective prefix established so far. Each
//! step narrows the effective prefix to the more specific side, so the
//! emitted stream is ascending and non-overlapping by construction.

use std::sync::atomic::{AtomicBool, Ordering};

use config::Config;
use lpm::prefix::Prefix;
use mmdb::Value;
use mmdb::reader::DataRef;
use tracing::{debug, info};

use crate::accumulator::Accumulator;
use crate::columns::Extractor;
use crate::errors::MergeError;
use crate::source::NetworkReader;
use crate::writer::RowWriter;

/// The merge-relevant slice of a job.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub include_empty_rows: bool,
    pub ipv6_min_prefix: Option<u8>,
}

impl From<&Config> for MergeOptions {
    fn from(config: &Config) -> Self {
        Self {
            include_empty_rows: config.include_empty_rows,
            ipv6_min_prefix: config.ipv6_min_prefix,
        }
    }
}

/// Counters reported after a merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    /// Effective prefixes handed to the accumulator.
    pub emitted: u64,
    /// Coalesced ranges handed to the sink.
    pub ranges: u64,
}

/// Merge `readers` into `writer`.
///
/// All sources must be keyed by the same IP version. The writer is flushed
/// before returning. A raised `cancel` flag is observed between emissions.
pub fn merge(
    readers: &[&dyn NetworkReader],
    extractor: &Extractor,
    options: &MergeOptions,
    cancel: Option<&AtomicBool>,
    writer: &mut dyn RowWriter,
) -> Result<MergeStats, MergeError> {
    let Some(first) = readers.first() else {
        return Ok(MergeStats::default());
    };
    if readers.iter().any(|r| r.ip_version() != first.ip_version()) {
        return Err(MergeError::FamilyMismatch);
    }
    debug_assert_eq!(readers.len(), extractor.source_count());

    let mut run = Run {
        extractor,
        options,
        cancel,
        writer,
        accumulator: Accumulator::new(options.include_empty_rows),
        results: vec![None; readers.len()],
        row: Vec::with_capacity(extractor.width()),
        emitted: 0,
    };

    let mut last: Option<Prefix> = None;
    for leaf in readers[0].networks(true) {
        let leaf = leaf?;
        let prefix = run.normalize(leaf.prefix);
        if last == Some(prefix) {
            continue;
        }
        last = Some(prefix);
        run.results[0] = leaf.data;
        run.descend(readers, 1, prefix)?;
    }
    run.accumulator.flush(&mut *run.writer)?;
    run.writer.flush()?;

    let stats = MergeStats {
        emitted: run.emitted,
        ranges: run.accumulator.flushed(),
    };
    info!(
        "merged {} source(s): {} networks, {} coalesced ranges",
        readers.len(),
        stats.emitted,
        stats.ranges
    );
    Ok(stats)
}

struct Run<'a> {
    extractor: &'a Extractor,
    options: &'a MergeOptions,
    cancel: Option<&'a AtomicBool>,
    writer: &'a mut dyn RowWriter,
    accumulator: Accumulator,
    /// Per-source covering record for the current effective prefix; slot
    /// `d` is overwritten in place as source `d` advances.
    results: Vec<Option<DataRef>>,
    /// Working value vector, reused across emissions.
    row: Vec<Option<Value>>,
    emitted: u64,
}

impl Run<'_> {
    fn normalize(&self, prefix: Prefix) -> Prefix {
        match self.options.ipv6_min_prefix {
            Some(bits) => prefix.truncate_v6(bits),
            None => prefix,
        }
    }

    /// Walk source `depth` within `effective`; at the bottom, emit.
    fn descend(
        &mut self,
        readers: &[&dyn NetworkReader],
        depth: usize,
        effective: Prefix,
    ) -> Result<(), MergeError> {
        if depth == readers.len() {
            return self.emit(readers, effective);
        }
        // Coarsening can collapse runs of leaves onto one prefix; the
        // first record of each collapsed block is authoritative.
        let mut last: Option<Prefix> = None;
        for leaf in readers[depth].networks_within(&effective, true)? {
            let leaf = leaf?;
            let prefix = self.normalize(leaf.prefix);
            if last == Some(prefix) {
                continue;
            }
            last = Some(prefix);
            self.results[depth] = leaf.data;
            self.descend(readers, depth + 1, Prefix::smaller_of(effective, prefix))?;
        }
        Ok(())
    }

    fn emit(&mut self, readers: &[&dyn NetworkReader], effective: Prefix) -> Result<(), MergeError> {
        if let Some(flag) = self.cancel {
            if flag.load(Ordering::Relaxed) {
                debug!("merge canceled at {effective}");
                return Err(MergeError::Canceled);
            }
        }
        self.extractor
            .extract(readers, &self.results, &mut self.row)?;
        self.emitted += 1;
        self.accumulator
            .process(&effective, &self.row, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RangeSink, RowSink, TableReader};
    use config::Config;
    use lpm::prefix::IpAddr;
    use lpm::range::next_addr;

    fn single_column_job() -> Config {
        Config::from_yaml(
            r"
databases:
  - name: main
    path: main.mmdb
columns:
  - name: country
    database: main
    path: [country]
output:
  format: csv
  path: out.csv
",
        )
        .unwrap()
    }

    fn two_column_job() -> Config {
        Config::from_yaml(
            r"
databases:
  - name: left
    path: left.mmdb
  - name: right
    path: right.mmdb
columns:
  - name: a
    database: left
    path: [a]
  - name: b
    database: right
    path: [b]
output:
  format: csv
  path: out.csv
",
        )
        .unwrap()
    }

    fn country(code: &str) -> Value {
        Value::Map(vec![("country".to_string(), Value::from(code))])
    }

    fn run_single(
        reader: &TableReader,
        config: &Config,
    ) -> (Vec<(Prefix, Vec<Option<Value>>)>, MergeStats) {
        let extractor = Extractor::new(config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![reader];
        let stats = merge(
            &readers,
            &extractor,
            &MergeOptions::from(config),
            None,
            &mut sink,
        )
        .unwrap();
        (sink.rows, stats)
    }

    #[test]
    fn test_adjacent_equal_networks_merge() {
        let mut reader = TableReader::ipv4();
        reader.insert(&Prefix::from("10.0.0.0/25"), country("US"));
        reader.insert(&Prefix::from("10.0.0.128/25"), country("US"));
        let (rows, stats) = run_single(&reader, &single_column_job());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, Prefix::from("10.0.0.0/24"));
        assert_eq!(rows[0].1, vec![Some(Value::from("US"))]);
        assert_eq!(stats.ranges, 1);
    }

    #[test]
    fn test_data_change_does_not_merge() {
        let mut reader = TableReader::ipv4();
        reader.insert(&Prefix::from("10.0.0.0/25"), country("US"));
        reader.insert(&Prefix::from("10.0.0.128/25"), country("CA"));
        let (rows, _) = run_single(&reader, &single_column_job());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, Prefix::from("10.0.0.0/25"));
        assert_eq!(rows[1].0, Prefix::from("10.0.0.128/25"));
    }

    #[test]
    fn test_unaligned_run_row_and_range_sinks() {
        let mut reader = TableReader::ipv4();
        for host in 1..=6u32 {
            let p = Prefix::from(format!("10.0.0.{host}/32").as_str());
            reader.insert(&p, country("US"));
        }
        let config = single_column_job();
        let (rows, _) = run_single(&reader, &config);
        let got: Vec<Prefix> = rows.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            got,
            vec![
                Prefix::from("10.0.0.1/32"),
                Prefix::from("10.0.0.2/31"),
                Prefix::from("10.0.0.4/31"),
                Prefix::from("10.0.0.6/32"),
            ]
        );

        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RangeSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&reader];
        merge(
            &readers,
            &extractor,
            &MergeOptions::from(&config),
            None,
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.ranges.len(), 1);
        assert_eq!(sink.ranges[0].0, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(sink.ranges[0].1, "10.0.0.6".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_two_sources_overlap() {
        let mut left = TableReader::ipv4();
        left.insert(
            &Prefix::from("10.0.0.0/16"),
            Value::Map(vec![("a".to_string(), Value::Uint32(1))]),
        );
        let mut right = TableReader::ipv4();
        right.insert(
            &Prefix::from("10.0.1.0/24"),
            Value::Map(vec![("b".to_string(), Value::Uint32(2))]),
        );

        let config = two_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&left, &right];
        merge(
            &readers,
            &extractor,
            &MergeOptions::from(&config),
            None,
            &mut sink,
        )
        .unwrap();

        // Non-overlapping, ascending, and covering the /16 exactly.
        assert_ascending_non_overlapping(&sink.rows);
        assert_eq!(
            sink.rows[0].0.as_address(),
            "10.0.0.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            sink.rows[sink.rows.len() - 1].0.last_address(),
            "10.0.255.255".parse::<IpAddr>().unwrap()
        );
        for pair in sink.rows.windows(2) {
            assert!(lpm::range::adjacent(&pair[0].0, &pair[1].0));
        }
        // The overlapped /24 carries both values; its surroundings carry
        // only the broad one.
        let overlapped: Vec<_> = sink
            .rows
            .iter()
            .filter(|(p, _)| *p == Prefix::from("10.0.1.0/24"))
            .collect();
        assert_eq!(overlapped.len(), 1);
        assert_eq!(
            overlapped[0].1,
            vec![Some(Value::Uint32(1)), Some(Value::Uint32(2))]
        );
        assert_eq!(
            sink.rows[0].1,
            vec![Some(Value::Uint32(1)), None]
        );
    }

    #[test]
    fn test_first_source_gaps_with_second_source_data() {
        // The first source has no record around the second's; the rows
        // still appear, with a nil first column.
        let mut left = TableReader::ipv4();
        left.insert(
            &Prefix::from("10.0.0.0/24"),
            Value::Map(vec![("a".to_string(), Value::Uint32(1))]),
        );
        let mut right = TableReader::ipv4();
        right.insert(
            &Prefix::from("192.168.0.0/24"),
            Value::Map(vec![("b".to_string(), Value::Uint32(2))]),
        );
        let config = two_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&left, &right];
        merge(
            &readers,
            &extractor,
            &MergeOptions::from(&config),
            None,
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.rows[0].0, Prefix::from("10.0.0.0/24"));
        assert_eq!(sink.rows[0].1, vec![Some(Value::Uint32(1)), None]);
        assert_eq!(sink.rows[1].0, Prefix::from("192.168.0.0/24"));
        assert_eq!(sink.rows[1].1, vec![None, Some(Value::Uint32(2))]);
    }

    #[test]
    fn test_family_mismatch_rejected() {
        let left = TableReader::ipv4();
        let right = TableReader::ipv6();
        let config = two_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&left, &right];
        assert!(matches!(
            merge(
                &readers,
                &extractor,
                &MergeOptions::default(),
                None,
                &mut sink
            ),
            Err(MergeError::FamilyMismatch)
        ));
    }

    #[test]
    fn test_ipv6_coarsening_dedups_leaves() {
        let mut reader = TableReader::ipv6();
        // Hosts inside one /64 with the same record, plus a differently
        // valued host in the next /64. The zero host makes the block's
        // first leaf a data leaf, which is the one coarsening keeps.
        for host in ["2001:db8::/128", "2001:db8::2/128", "2001:db8::ffff/128"] {
            reader.insert(&Prefix::from(host), country("US"));
        }
        reader.insert(&Prefix::from("2001:db8:0:1::/128"), country("CA"));

        let config = single_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&reader];
        let options = MergeOptions {
            include_empty_rows: false,
            ipv6_min_prefix: Some(64),
        };
        merge(&readers, &extractor, &options, None, &mut sink).unwrap();

        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.rows[0].0, Prefix::from("2001:db8::/64"));
        assert_eq!(sink.rows[0].1, vec![Some(Value::from("US"))]);
        assert_eq!(sink.rows[1].0, Prefix::from("2001:db8:0:1::/64"));
        assert_eq!(sink.rows[1].1, vec![Some(Value::from("CA"))]);
    }

    #[test]
    fn test_cancellation_observed_between_emissions() {
        let mut reader = TableReader::ipv4();
        reader.insert(&Prefix::from("10.0.0.0/24"), country("US"));
        let config = single_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&reader];
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            merge(
                &readers,
                &extractor,
                &MergeOptions::from(&config),
                Some(&cancel),
                &mut sink
            ),
            Err(MergeError::Canceled)
        ));
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn test_no_readers_is_a_no_op() {
        let config = single_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let stats = merge(&[], &extractor, &MergeOptions::default(), None, &mut sink).unwrap();
        assert_eq!(stats.emitted, 0);
    }

    fn assert_ascending_non_overlapping(rows: &[(Prefix, Vec<Option<Value>>)]) {
        for pair in rows.windows(2) {
            let (a, b) = (&pair[0].0, &pair[1].0);
            assert!(a.as_address() < b.as_address(), "{a} !< {b}");
            assert!(
                next_addr(&a.last_address()).is_none_or(|n| n <= b.as_address()),
                "{a} overlaps {b}"
            );
        }
    }

    #[test]
    fn test_merge_invariants_hold_for_generated_tables() {
        let config = two_column_job();
        let extractor = Extractor::new(&config).unwrap();
        bolero::check!()
            .with_type::<(Vec<(u32, u8)>, Vec<(u32, u8)>)>()
            .for_each(|(first, second)| {
                let mut left = TableReader::ipv4();
                for (bits, len) in first {
                    let p = Prefix::try_from((
                        IpAddr::V4(std::net::Ipv4Addr::from_bits(*bits)),
                        len % 33,
                    ))
                    .unwrap();
                    left.insert(
                        &p,
                        Value::Map(vec![("a".to_string(), Value::Uint32(bits % 5))]),
                    );
                }
                let mut right = TableReader::ipv4();
                for (bits, len) in second {
                    let p = Prefix::try_from((
                        IpAddr::V4(std::net::Ipv4Addr::from_bits(*bits)),
                        len % 33,
                    ))
                    .unwrap();
                    right.insert(
                        &p,
                        Value::Map(vec![("b".to_string(), Value::Uint32(bits % 3))]),
                    );
                }
                let mut sink = RowSink::default();
                let readers: Vec<&dyn NetworkReader> = vec![&left, &right];
                merge(
                    &readers,
                    &extractor,
                    &MergeOptions::default(),
                    None,
                    &mut sink,
                )
                .unwrap();
                assert_ascending_non_overlapping(&sink.rows);
                // No all-nil rows without include_empty_rows.
                assert!(
                    sink.rows
                        .iter()
                        .all(|(_, values)| values.iter().any(Option::is_some))
                );
            });
    }

    #[test]
    fn test_full_coverage_with_empty_rows_included() {
        let mut reader = TableReader::ipv4();
        reader.insert(&Prefix::from("10.0.0.0/24"), country("US"));
        reader.insert(&Prefix::from("200.0.0.0/8"), country("BR"));
        let config = single_column_job();
        let extractor = Extractor::new(&config).unwrap();
        let mut sink = RowSink::default();
        let readers: Vec<&dyn NetworkReader> = vec![&reader];
        let options = MergeOptions {
            include_empty_rows: true,
            ipv6_min_prefix: None,
        };
        merge(&readers, &extractor, &options, None, &mut sink).unwrap();
        // The emitted stream tiles the whole space the first source
        // enumerates.
        assert_eq!(
            sink.rows[0].0.as_address(),
            "0.0.0.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            sink.rows[sink.rows.len() - 1].0.last_address(),
            "255.255.255.255".parse::<IpAddr>().unwrap()
        );
        for pair in sink.rows.windows(2) {
            assert!(lpm::range::adjacent(&pair[0].0, &pair[1].0));
        }
    }
}

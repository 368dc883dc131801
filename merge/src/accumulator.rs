// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The streaming accumulator: at most one live range at a time, grown
//! while incoming networks stay adjacent and equal-valued, handed to the
//! sink the moment either breaks.

use lpm::prefix::{IpAddr, Prefix};
use lpm::range::{next_addr, range_to_cidrs};
use mmdb::Value;

use crate::errors::MergeError;
use crate::writer::RowWriter;

/// One coalesced run of networks carrying identical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedRange {
    pub start: IpAddr,
    pub end: IpAddr,
    pub values: Vec<Option<Value>>,
}

/// Coalescing state between the driver and a sink.
#[derive(Debug, Default)]
pub struct Accumulator {
    current: Option<AccumulatedRange>,
    include_empty_rows: bool,
    flushed: u64,
}

impl Accumulator {
    #[must_use]
    pub fn new(include_empty_rows: bool) -> Self {
        Self {
            current: None,
            include_empty_rows,
            flushed: 0,
        }
    }

    /// Ranges handed to the sink so far.
    #[must_use]
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Feed one emitted network. The values are copied only when a new
    /// range is adopted.
    pub fn process(
        &mut self,
        prefix: &Prefix,
        values: &[Option<Value>],
        writer: &mut dyn RowWriter,
    ) -> Result<(), MergeError> {
        if !self.include_empty_rows && values.iter().all(Option::is_none) {
            return Ok(());
        }
        let extends = match &self.current {
            Some(range) => {
                same_family(&range.end, prefix)
                    && next_addr(&range.end) == Some(prefix.as_address())
                    && range.values == values
            }
            None => false,
        };
        if extends {
            if let Some(range) = &mut self.current {
                range.end = prefix.last_address();
            }
        } else {
            self.flush(writer)?;
            self.current = Some(AccumulatedRange {
                start: prefix.as_address(),
                end: prefix.last_address(),
                values: values.to_vec(),
            });
        }
        Ok(())
    }

    /// Hand the live range to the sink: whole if the sink takes ranges,
    /// otherwise as its minimal CIDR cover, one row per prefix.
    pub fn flush(&mut self, writer: &mut dyn RowWriter) -> Result<(), MergeError> {
        let Some(range) = self.current.take() else {
            return Ok(());
        };
        self.flushed += 1;
        if let Some(ranges) = writer.as_range_writer() {
            ranges.write_range(&range.start, &range.end, &range.values)?;
        } else {
            for prefix in range_to_cidrs(&range.start, &range.end)? {
                writer.write_row(&prefix, &range.values)?;
            }
        }
        Ok(())
    }
}

fn same_family(end: &IpAddr, prefix: &Prefix) -> bool {
    end.is_ipv4() == prefix.is_ipv4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RangeSink, RowSink};

    fn values(country: &str) -> Vec<Option<Value>> {
        vec![Some(Value::from(country))]
    }

    #[test]
    fn test_adjacent_equal_networks_coalesce() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(&Prefix::from("10.0.0.0/25"), &values("US"), &mut sink)
            .unwrap();
        acc.process(&Prefix::from("10.0.0.128/25"), &values("US"), &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].0, Prefix::from("10.0.0.0/24"));
        assert_eq!(sink.rows[0].1, values("US"));
        assert_eq!(acc.flushed(), 1);
    }

    #[test]
    fn test_value_change_breaks_the_run() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(&Prefix::from("10.0.0.0/25"), &values("US"), &mut sink)
            .unwrap();
        acc.process(&Prefix::from("10.0.0.128/25"), &values("CA"), &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.rows[0].0, Prefix::from("10.0.0.0/25"));
        assert_eq!(sink.rows[1].0, Prefix::from("10.0.0.128/25"));
    }

    #[test]
    fn test_gap_breaks_the_run() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(&Prefix::from("10.0.0.0/25"), &values("US"), &mut sink)
            .unwrap();
        acc.process(&Prefix::from("10.0.1.0/25"), &values("US"), &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 2);
    }

    #[test]
    fn test_unaligned_run_decomposes_for_row_sinks() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        for host in 1..=6u32 {
            let prefix = Prefix::from(format!("10.0.0.{host}/32").as_str());
            acc.process(&prefix, &values("US"), &mut sink).unwrap();
        }
        acc.flush(&mut sink).unwrap();
        let got: Vec<Prefix> = sink.rows.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            got,
            vec![
                Prefix::from("10.0.0.1/32"),
                Prefix::from("10.0.0.2/31"),
                Prefix::from("10.0.0.4/31"),
                Prefix::from("10.0.0.6/32"),
            ]
        );
    }

    #[test]
    fn test_unaligned_run_stays_whole_for_range_sinks() {
        let mut acc = Accumulator::new(false);
        let mut sink = RangeSink::default();
        for host in 1..=6u32 {
            let prefix = Prefix::from(format!("10.0.0.{host}/32").as_str());
            acc.process(&prefix, &values("US"), &mut sink).unwrap();
        }
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.ranges.len(), 1);
        let (start, end, vals) = &sink.ranges[0];
        assert_eq!(*start, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(*end, "10.0.0.6".parse::<IpAddr>().unwrap());
        assert_eq!(vals, &values("US"));
    }

    #[test]
    fn test_all_nil_rows_dropped_by_default() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(&Prefix::from("10.0.0.0/24"), &[None], &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert!(sink.rows.is_empty());

        let mut acc = Accumulator::new(true);
        acc.process(&Prefix::from("10.0.0.0/24"), &[None], &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 1);
    }

    #[test]
    fn test_family_switch_flushes() {
        // The v4 plane of a v6 source runs out and v6 networks follow; the
        // boundary can never coalesce.
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(&Prefix::from("255.255.255.0/24"), &values("US"), &mut sink)
            .unwrap();
        acc.process(&Prefix::from("::/24"), &values("US"), &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 2);
    }

    #[test]
    fn test_terminal_range_does_not_wrap() {
        let mut acc = Accumulator::new(false);
        let mut sink = RowSink::default();
        acc.process(
            &Prefix::from("255.255.255.255/32"),
            &values("US"),
            &mut sink,
        )
        .unwrap();
        // The successor of the family maximum is the distinguished invalid
        // address: nothing is adjacent to it.
        acc.process(&Prefix::from("0.0.0.0/1"), &values("US"), &mut sink)
            .unwrap();
        acc.flush(&mut sink).unwrap();
        assert_eq!(sink.rows.len(), 2);
    }
}

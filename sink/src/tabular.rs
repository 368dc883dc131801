// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The tabular sinks. Network columns are materialized here from the
//! emitted prefix or range; value columns are coerced per their hints;
//! bucket columns duplicate a row across every bucket it spans. Output is
//! a single file or a per-family pair.

use std::path::Path;

use config::{Config, NetworkColumnKind, OutputFormat, SinkType};
use lpm::prefix::{IpAddr, Prefix};
use lpm::range::mask_addr;
use merge::{BoundColumn, MergeError, RangeWriter, RowWriter};
use mmdb::Value;
use tracing::debug;

use crate::buckets::bucket_addrs;
use crate::cells::{Cell, coerce};
use crate::csv_sink::CsvBackend;
use crate::errors::SinkError;
use crate::parquet_sink::{ColumnType, ParquetBackend};

enum BackendImpl {
    Csv(CsvBackend),
    Parquet(ParquetBackend),
}

struct Output {
    backend: BackendImpl,
    /// Integer network columns carry 128-bit values (decimal text in CSV,
    /// 16-byte fixed in Parquet) instead of i64.
    wide_ints: bool,
}

impl Output {
    fn append(&mut self, cells: &[Cell]) -> Result<(), SinkError> {
        match &mut self.backend {
            BackendImpl::Csv(b) => b.append(cells),
            BackendImpl::Parquet(b) => b.append(cells),
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        match &mut self.backend {
            BackendImpl::Csv(b) => b.finish(),
            BackendImpl::Parquet(b) => b.finish(),
        }
    }
}

enum Route {
    Single(Output),
    Split { v4: Output, v6: Output },
}

/// CSV/Parquet sink with family routing and bucket expansion.
pub struct TabularSink {
    network: Vec<(String, NetworkColumnKind)>,
    values: Vec<(String, Option<SinkType>)>,
    v4_bucket: u8,
    v6_bucket: u8,
    needs_cidr: bool,
    has_bucket: bool,
    route: Route,
}

impl TabularSink {
    pub fn open(
        config: &Config,
        columns: &[BoundColumn],
        ipv6_capable: bool,
    ) -> Result<Self, SinkError> {
        let network: Vec<(String, NetworkColumnKind)> = config
            .network_columns
            .iter()
            .map(|c| (c.name.clone(), c.kind))
            .collect();
        let values: Vec<(String, Option<SinkType>)> = columns
            .iter()
            .map(|c| (c.name.clone(), c.type_hint))
            .collect();
        let needs_cidr = network
            .iter()
            .any(|(_, kind)| *kind == NetworkColumnKind::Cidr);
        let has_bucket = network
            .iter()
            .any(|(_, kind)| *kind == NetworkColumnKind::NetworkBucket);

        let open_one = |path: &Path, wide_ints: bool| -> Result<Output, SinkError> {
            let backend = match config.output.format {
                OutputFormat::Csv => {
                    let headers: Vec<String> = network
                        .iter()
                        .map(|(name, _)| name.clone())
                        .chain(values.iter().map(|(name, _)| name.clone()))
                        .collect();
                    BackendImpl::Csv(CsvBackend::create(path, &headers)?)
                }
                OutputFormat::Parquet => BackendImpl::Parquet(ParquetBackend::create(
                    path,
                    &column_types(&network, &values, wide_ints),
                )?),
                OutputFormat::Mmdb => unreachable!("tabular sink never opens mmdb output"),
            };
            debug!("opened {} for tabular output", path.display());
            Ok(Output { backend, wide_ints })
        };

        let route = if config.output.is_split() {
            let (Some(v4_path), Some(v6_path)) =
                (&config.output.ipv4_path, &config.output.ipv6_path)
            else {
                unreachable!("validated split output carries both paths");
            };
            Route::Split {
                v4: open_one(v4_path, false)?,
                v6: open_one(v6_path, true)?,
            }
        } else {
            let Some(path) = &config.output.path else {
                unreachable!("validated single output carries a path");
            };
            let wide = ipv6_capable && config.output.format == OutputFormat::Parquet;
            Route::Single(open_one(path, wide)?)
        };

        Ok(Self {
            network,
            values,
            v4_bucket: config.ipv4_bucket_size,
            v6_bucket: config.ipv6_bucket_size,
            needs_cidr,
            has_bucket,
            route,
        })
    }

    fn output_for(&mut self, is_v4: bool) -> &mut Output {
        match &mut self.route {
            Route::Single(output) => output,
            Route::Split { v4, v6 } => {
                if is_v4 {
                    v4
                } else {
                    v6
                }
            }
        }
    }

    fn bucket_bits(&self, is_v4: bool) -> u8 {
        if is_v4 { self.v4_bucket } else { self.v6_bucket }
    }

    /// Write one logical row, expanded per bucket when configured.
    fn emit(
        &mut self,
        start: &IpAddr,
        end: &IpAddr,
        cidr: Option<&Prefix>,
        buckets: &[IpAddr],
        values: &[Option<Value>],
    ) -> Result<(), MergeError> {
        let is_v4 = start.is_ipv4();
        let wide_ints = self.output_for(is_v4).wide_ints;

        let mut value_cells = Vec::with_capacity(self.values.len());
        for ((name, hint), value) in self.values.iter().zip(values) {
            value_cells.push(coerce(name, value.as_ref(), *hint)?);
        }

        let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(buckets.len().max(1));
        let bucket_slots: &[Option<&IpAddr>] = &if self.has_bucket {
            buckets.iter().map(Some).collect::<Vec<_>>()
        } else {
            vec![None]
        };
        for bucket in bucket_slots {
            let mut row = Vec::with_capacity(self.network.len() + value_cells.len());
            for (_, kind) in &self.network {
                row.push(match kind {
                    NetworkColumnKind::Cidr => match cidr {
                        Some(prefix) => Cell::Str(prefix.to_string()),
                        None => unreachable!("a cidr column forces row mode"),
                    },
                    NetworkColumnKind::StartIp => Cell::Str(start.to_string()),
                    NetworkColumnKind::EndIp => Cell::Str(end.to_string()),
                    NetworkColumnKind::StartInt => int_cell(start, wide_ints),
                    NetworkColumnKind::EndInt => int_cell(end, wide_ints),
                    NetworkColumnKind::NetworkBucket => match bucket {
                        Some(addr) => Cell::Str(addr.to_string()),
                        None => unreachable!("bucket slots follow the bucket column"),
                    },
                });
            }
            row.extend(value_cells.iter().cloned());
            rows.push(row);
        }

        let output = self.output_for(is_v4);
        for row in &rows {
            output.append(row).map_err(MergeError::from)?;
        }
        Ok(())
    }
}

impl RowWriter for TabularSink {
    fn write_row(&mut self, prefix: &Prefix, values: &[Option<Value>]) -> Result<(), MergeError> {
        let start = prefix.as_address();
        let end = prefix.last_address();
        let buckets = if self.has_bucket {
            let bits = self.bucket_bits(prefix.is_ipv4());
            prefix
                .split(bits)?
                .iter()
                .map(|sub| mask_addr(&sub.as_address(), bits))
                .collect()
        } else {
            Vec::new()
        };
        self.emit(&start, &end, Some(prefix), &buckets, values)
    }

    fn flush(&mut self) -> Result<(), MergeError> {
        match &mut self.route {
            Route::Single(output) => output.finish().map_err(MergeError::from),
            Route::Split { v4, v6 } => {
                v4.finish().map_err(MergeError::from)?;
                v6.finish().map_err(MergeError::from)
            }
        }
    }

    fn as_range_writer(&mut self) -> Option<&mut dyn RangeWriter> {
        if self.needs_cidr { None } else { Some(self) }
    }
}

impl RangeWriter for TabularSink {
    fn write_range(
        &mut self,
        start: &IpAddr,
        end: &IpAddr,
        values: &[Option<Value>],
    ) -> Result<(), MergeError> {
        let buckets = if self.has_bucket {
            bucket_addrs(start, end, self.bucket_bits(start.is_ipv4()))?
        } else {
            Vec::new()
        };
        self.emit(start, end, None, &buckets, values)
    }
}

fn int_cell(addr: &IpAddr, wide: bool) -> Cell {
    match addr {
        IpAddr::V4(a) => {
            if wide {
                Cell::U128(u128::from(a.to_bits()))
            } else {
                Cell::I64(i64::from(a.to_bits()))
            }
        }
        IpAddr::V6(a) => Cell::U128(a.to_bits()),
    }
}

fn column_types(
    network: &[(String, NetworkColumnKind)],
    values: &[(String, Option<SinkType>)],
    wide_ints: bool,
) -> Vec<(String, ColumnType, bool)> {
    let int_type = if wide_ints {
        ColumnType::Fixed16
    } else {
        ColumnType::I64
    };
    let mut columns = Vec::with_capacity(network.len() + values.len());
    for (name, kind) in network {
        let ty = match kind {
            NetworkColumnKind::StartInt | NetworkColumnKind::EndInt => int_type,
            _ => ColumnType::Utf8,
        };
        columns.push((name.clone(), ty, false));
    }
    for (name, hint) in values {
        let ty = match hint {
            Some(SinkType::I64) => ColumnType::I64,
            Some(SinkType::F64) => ColumnType::F64,
            Some(SinkType::Bool) => ColumnType::Bool,
            Some(SinkType::Binary) => ColumnType::Bin,
            Some(SinkType::String) | None => ColumnType::Utf8,
        };
        columns.push((name.clone(), ty, true));
    }
    columns
}

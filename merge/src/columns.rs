// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Column extraction: resolve each configured column to a source index and
//! a normalized path once, then fill the working value vector for every
//! emitted network. Each source's record is decoded at most once per
//! emission; all of its columns walk the same decoded root.

use config::{Config, ConfigError, SinkType};
use mmdb::PathSegment;
use mmdb::Value;
use mmdb::reader::DataRef;

use crate::errors::MergeError;
use crate::source::NetworkReader;
use crate::walker::walk;

/// A column bound to its source.
#[derive(Debug, Clone)]
pub struct BoundColumn {
    pub name: String,
    pub reader: usize,
    pub path: Vec<PathSegment>,
    pub type_hint: Option<SinkType>,
}

/// Built once per merge from the job's column list.
#[derive(Debug)]
pub struct Extractor {
    columns: Vec<BoundColumn>,
    by_reader: Vec<Vec<usize>>,
    use_cache: bool,
}

impl Extractor {
    /// Resolve the job's columns against its database list.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let mut columns = Vec::with_capacity(config.columns.len());
        let mut by_reader = vec![Vec::new(); config.databases.len()];
        for (index, spec) in config.columns.iter().enumerate() {
            let reader = config.database_index(&spec.database).ok_or_else(|| {
                ConfigError::UnknownDatabase {
                    column: spec.name.clone(),
                    database: spec.database.clone(),
                }
            })?;
            by_reader[reader].push(index);
            columns.push(BoundColumn {
                name: spec.name.clone(),
                reader,
                path: spec.path.clone(),
                type_hint: spec.type_hint,
            });
        }
        Ok(Self {
            columns,
            by_reader,
            use_cache: !config.disable_decode_cache,
        })
    }

    #[must_use]
    pub fn columns(&self) -> &[BoundColumn] {
        &self.columns
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of sources the bindings were resolved against.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.by_reader.len()
    }

    /// Fill `row` for one emitted network. `results[d]` is source `d`'s
    /// covering record, `None` when the source has nothing there; slot `i`
    /// of `row` always lands the value for column `i`.
    pub fn extract(
        &self,
        readers: &[&dyn NetworkReader],
        results: &[Option<DataRef>],
        row: &mut Vec<Option<Value>>,
    ) -> Result<(), MergeError> {
        row.clear();
        row.resize(self.columns.len(), None);
        if self.use_cache {
            for (reader_index, column_indices) in self.by_reader.iter().enumerate() {
                if column_indices.is_empty() {
                    continue;
                }
                let Some(data) = results[reader_index] else {
                    continue;
                };
                let decoded = readers[reader_index].decode(data)?;
                for &column in column_indices {
                    row[column] = walk(&decoded, &self.columns[column].path)?.cloned();
                }
            }
        } else {
            for (index, column) in self.columns.iter().enumerate() {
                if let Some(data) = results[column.reader] {
                    row[index] = readers[column.reader].decode_path(data, &column.path)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TableReader;
    use config::Config;
    use lpm::prefix::Prefix;

    fn job(disable_cache: bool) -> Config {
        let raw = format!(
            r"
databases:
  - name: city
    path: city.mmdb
  - name: asn
    path: asn.mmdb
columns:
  - name: country
    database: city
    path: [country, iso_code]
  - name: asn
    database: asn
    path: [number]
  - name: city_name
    database: city
    path: [names, en]
output:
  format: csv
  path: out.csv
disable_decode_cache: {disable_cache}
"
        );
        Config::from_yaml(&raw).unwrap()
    }

    fn city_record() -> Value {
        Value::Map(vec![
            (
                "country".to_string(),
                Value::Map(vec![("iso_code".to_string(), Value::from("US"))]),
            ),
            (
                "names".to_string(),
                Value::Map(vec![("en".to_string(), Value::from("Oakland"))]),
            ),
        ])
    }

    fn asn_record() -> Value {
        Value::Map(vec![("number".to_string(), Value::Uint32(13335))])
    }

    fn extract_with(disable_cache: bool) -> Vec<Option<Value>> {
        let config = job(disable_cache);
        let extractor = Extractor::new(&config).unwrap();
        let mut city = TableReader::ipv4();
        city.insert(&Prefix::from("10.0.0.0/24"), city_record());
        let mut asn = TableReader::ipv4();
        asn.insert(&Prefix::from("10.0.0.0/24"), asn_record());
        let readers: Vec<&dyn NetworkReader> = vec![&city, &asn];
        let city_ref = city.data_ref_for(&Prefix::from("10.0.0.0/24")).unwrap();
        let asn_ref = asn.data_ref_for(&Prefix::from("10.0.0.0/24")).unwrap();
        let mut row = Vec::new();
        extractor
            .extract(&readers, &[Some(city_ref), Some(asn_ref)], &mut row)
            .unwrap();
        row
    }

    #[test]
    fn test_slots_align_with_columns() {
        for disable_cache in [false, true] {
            let row = extract_with(disable_cache);
            assert_eq!(
                row,
                vec![
                    Some(Value::from("US")),
                    Some(Value::Uint32(13335)),
                    Some(Value::from("Oakland")),
                ],
                "disable_decode_cache = {disable_cache}"
            );
        }
    }

    #[test]
    fn test_missing_source_contributes_nil() {
        let config = job(false);
        let extractor = Extractor::new(&config).unwrap();
        let mut city = TableReader::ipv4();
        city.insert(&Prefix::from("10.0.0.0/24"), city_record());
        let asn = TableReader::ipv4();
        let readers: Vec<&dyn NetworkReader> = vec![&city, &asn];
        let city_ref = city.data_ref_for(&Prefix::from("10.0.0.0/24")).unwrap();
        let mut row = Vec::new();
        extractor
            .extract(&readers, &[Some(city_ref), None], &mut row)
            .unwrap();
        assert_eq!(row[0], Some(Value::from("US")));
        assert_eq!(row[1], None);
    }

    #[test]
    fn test_unknown_database_fails_at_build() {
        let mut config = job(false);
        config.columns[1].database = "nope".to_string();
        assert!(matches!(
            Extractor::new(&config),
            Err(ConfigError::UnknownDatabase { .. })
        ));
    }
}

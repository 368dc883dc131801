// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! CSV backend: one header row, then cells rendered as text. Nil renders
//! empty.

use std::fs::File;
use std::path::Path;

use crate::cells::Cell;
use crate::errors::SinkError;

pub(crate) struct CsvBackend {
    writer: csv::Writer<File>,
}

impl CsvBackend {
    pub(crate) fn create(path: &Path, headers: &[String]) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new().from_path(path)?;
        writer.write_record(headers)?;
        Ok(Self { writer })
    }

    pub(crate) fn append(&mut self, cells: &[Cell]) -> Result<(), SinkError> {
        self.writer
            .write_record(cells.iter().map(render).collect::<Vec<_>>())?;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn render(cell: &Cell) -> String {
    match cell {
        Cell::Null => String::new(),
        Cell::Str(s) => s.clone(),
        Cell::I64(v) => v.to_string(),
        Cell::F64(v) => v.to_string(),
        Cell::Bool(v) => v.to_string(),
        Cell::Bin(b) => hex::encode(b),
        Cell::U128(v) => v.to_string(),
    }
}

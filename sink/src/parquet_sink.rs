// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parquet backend: a fixed Arrow schema per output file, rows buffered
//! into builders and written as row groups.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, FixedSizeBinaryBuilder, Float64Builder,
    Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::cells::Cell;
use crate::errors::SinkError;

/// Rows per row group.
const BATCH_ROWS: usize = 8192;

/// Column shapes the sink can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnType {
    Utf8,
    I64,
    F64,
    Bool,
    Bin,
    /// 16-byte big-endian address integer.
    Fixed16,
}

impl ColumnType {
    fn data_type(self) -> DataType {
        match self {
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::I64 => DataType::Int64,
            ColumnType::F64 => DataType::Float64,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Bin => DataType::Binary,
            ColumnType::Fixed16 => DataType::FixedSizeBinary(16),
        }
    }

    fn builder(self) -> Builder {
        match self {
            ColumnType::Utf8 => Builder::Utf8(StringBuilder::new()),
            ColumnType::I64 => Builder::I64(Int64Builder::new()),
            ColumnType::F64 => Builder::F64(Float64Builder::new()),
            ColumnType::Bool => Builder::Bool(BooleanBuilder::new()),
            ColumnType::Bin => Builder::Bin(BinaryBuilder::new()),
            ColumnType::Fixed16 => Builder::Fixed16(FixedSizeBinaryBuilder::new(16)),
        }
    }
}

enum Builder {
    Utf8(StringBuilder),
    I64(Int64Builder),
    F64(Float64Builder),
    Bool(BooleanBuilder),
    Bin(BinaryBuilder),
    Fixed16(FixedSizeBinaryBuilder),
}

impl Builder {
    fn append(&mut self, cell: &Cell, column: &str) -> Result<(), SinkError> {
        let mismatch = || SinkError::Coerce {
            column: column.to_string(),
            found: "cell",
            want: "column type",
        };
        match (self, cell) {
            (Builder::Utf8(b), Cell::Str(v)) => b.append_value(v),
            (Builder::Utf8(b), Cell::Null) => b.append_null(),
            (Builder::I64(b), Cell::I64(v)) => b.append_value(*v),
            (Builder::I64(b), Cell::Null) => b.append_null(),
            (Builder::F64(b), Cell::F64(v)) => b.append_value(*v),
            (Builder::F64(b), Cell::Null) => b.append_null(),
            (Builder::Bool(b), Cell::Bool(v)) => b.append_value(*v),
            (Builder::Bool(b), Cell::Null) => b.append_null(),
            (Builder::Bin(b), Cell::Bin(v)) => b.append_value(v),
            (Builder::Bin(b), Cell::Null) => b.append_null(),
            (Builder::Fixed16(b), Cell::U128(v)) => {
                b.append_value(v.to_be_bytes())?;
            }
            (Builder::Fixed16(b), Cell::I64(v)) => {
                // An IPv4 row in a Fixed16 column widens to 16 bytes.
                #[allow(clippy::cast_sign_loss)]
                b.append_value((*v as u128).to_be_bytes())?;
            }
            (Builder::Fixed16(b), Cell::Null) => b.append_null(),
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Builder::Utf8(b) => Arc::new(b.finish()),
            Builder::I64(b) => Arc::new(b.finish()),
            Builder::F64(b) => Arc::new(b.finish()),
            Builder::Bool(b) => Arc::new(b.finish()),
            Builder::Bin(b) => Arc::new(b.finish()),
            Builder::Fixed16(b) => Arc::new(b.finish()),
        }
    }
}

pub(crate) struct ParquetBackend {
    schema: Arc<Schema>,
    names: Vec<String>,
    builders: Vec<Builder>,
    writer: Option<ArrowWriter<File>>,
    buffered: usize,
}

impl ParquetBackend {
    pub(crate) fn create(
        path: &Path,
        columns: &[(String, ColumnType, bool)],
    ) -> Result<Self, SinkError> {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, ty, nullable)| Field::new(name, ty.data_type(), *nullable))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let file = File::create(path)?;
        let writer = ArrowWriter::try_new(file, schema.clone(), None)?;
        Ok(Self {
            schema,
            names: columns.iter().map(|(name, _, _)| name.clone()).collect(),
            builders: columns.iter().map(|(_, ty, _)| ty.builder()).collect(),
            writer: Some(writer),
            buffered: 0,
        })
    }

    pub(crate) fn append(&mut self, cells: &[Cell]) -> Result<(), SinkError> {
        for (index, cell) in cells.iter().enumerate() {
            self.builders[index].append(cell, &self.names[index])?;
        }
        self.buffered += 1;
        if self.buffered >= BATCH_ROWS {
            self.write_batch()?;
        }
        Ok(())
    }

    fn write_batch(&mut self) -> Result<(), SinkError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(Builder::finish).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }
        self.buffered = 0;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), SinkError> {
        self.write_batch()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

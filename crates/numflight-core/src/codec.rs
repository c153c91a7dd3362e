//! Columnar codec: [`ArrayMap`] ⇄ [`Table`].
//!
//! Each named array becomes one Arrow column of type `LargeList<T>`. Every
//! batch holds one row, and a column's values are its rows concatenated in
//! batch order. List offsets carry the exact length of every piece, so arrays
//! of different lengths travel side by side without padding. Large arrays are
//! split into pieces of about [`TransportConfig::BATCH_BYTES`] so that no
//! single message has to hold a whole array. The logical shape rides along as
//! JSON in the field metadata under [`SHAPE_METADATA_KEY`].
//!
//! ```text
//! schema:  input: LargeList<Int64>  {"numflight.shape": "[3]"}
//!          label: LargeList<Utf8>   {"numflight.shape": "[2]"}
//! batch 0: [[1, 2, 3]]              [["a", "b"]]
//! ```

use crate::array::{ArrayMap, DType, NdArray};
use crate::config::{TransportConfig, SHAPE_METADATA_KEY};
use crate::error::{FlightError, Result};
use arrow::array::{new_empty_array, Array, ArrayRef, AsArray, LargeListArray};
use arrow::buffer::OffsetBuffer;
use arrow::compute::concat;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Columnar wire representation of an [`ArrayMap`].
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// Summary of one encoded column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: DType,
    pub len: usize,
    pub shape: Vec<usize>,
    /// Size of the packed values; for strings, UTF-8 bytes plus offsets.
    pub byte_len: usize,
}

impl Table {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect()
    }

    /// Describe every column in schema order.
    pub fn columns(&self) -> Result<Vec<ColumnInfo>> {
        let arrays = decode(self)?;
        Ok(self
            .schema
            .fields()
            .iter()
            .filter_map(|field| arrays.get(field.name()).map(|a| (field.name(), a)))
            .filter_map(|(name, array)| {
                array.dtype().map(|dtype| ColumnInfo {
                    name: name.clone(),
                    dtype,
                    len: array.len(),
                    shape: array.shape().to_vec(),
                    byte_len: packed_len(array.values(), dtype),
                })
            })
            .collect())
    }
}

fn packed_len(values: &ArrayRef, dtype: DType) -> usize {
    match dtype.byte_width() {
        Some(width) => values.len() * width,
        None => {
            let strings = values.as_string::<i32>();
            let start = strings.value_offsets()[0] as usize;
            let end = strings.value_offsets()[strings.len()] as usize;
            (end - start) + (strings.len() + 1) * std::mem::size_of::<i32>()
        }
    }
}

/// Encode an array map into a columnar table.
///
/// Fails with [`FlightError::EmptyInput`] for an empty map and with
/// [`FlightError::UnsupportedType`] for any array outside the supported
/// element types or containing nulls. Nothing is produced on failure.
pub fn encode(arrays: &ArrayMap) -> Result<Table> {
    encode_with_batch_size(arrays, TransportConfig::BATCH_BYTES)
}

/// [`encode`] with pieces of at most about `batch_bytes` per batch.
///
/// A single string longer than `batch_bytes` still travels in one piece.
pub fn encode_with_batch_size(arrays: &ArrayMap, batch_bytes: usize) -> Result<Table> {
    if arrays.is_empty() {
        return Err(FlightError::EmptyInput);
    }

    let mut fields = Vec::with_capacity(arrays.len());
    let mut pieces = Vec::with_capacity(arrays.len());

    for (name, array) in arrays {
        let values = array.values();
        let dtype = array.dtype().ok_or_else(|| FlightError::UnsupportedType {
            column: name.clone(),
            data_type: values.data_type().to_string(),
        })?;
        if values.null_count() > 0 {
            return Err(FlightError::UnsupportedType {
                column: name.clone(),
                data_type: format!("{} with {} nulls", dtype, values.null_count()),
            });
        }

        let item = Arc::new(Field::new("item", dtype.to_arrow(), false));
        let metadata = HashMap::from([(
            SHAPE_METADATA_KEY.to_string(),
            serde_json::to_string(array.shape())?,
        )]);
        fields.push(Field::new(name, DataType::LargeList(item), false).with_metadata(metadata));
        pieces.push((dtype, split_values(values, dtype, batch_bytes)));
    }

    let schema = Arc::new(Schema::new(fields));
    let batches = pack_batches(&schema, pieces, batch_bytes)?;
    debug!(
        "Encoded {} columns into {} batches",
        schema.fields().len(),
        batches.len()
    );

    Ok(Table { schema, batches })
}

/// Cut `values` into consecutive slices of about `budget` bytes each.
///
/// An empty array yields one empty slice so the column still has a piece.
fn split_values(values: &ArrayRef, dtype: DType, budget: usize) -> Vec<ArrayRef> {
    let len = values.len();
    if len == 0 {
        return vec![values.clone()];
    }

    let budget = budget.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    match dtype.byte_width() {
        Some(width) => {
            let step = (budget / width).max(1);
            while start < len {
                let take = step.min(len - start);
                pieces.push(values.slice(start, take));
                start += take;
            }
        }
        None => {
            let offsets = values.as_string::<i32>().value_offsets();
            let size = |from: usize, to: usize| {
                (offsets[to] - offsets[from]) as usize
                    + (to - from + 1) * std::mem::size_of::<i32>()
            };
            while start < len {
                let mut end = start + 1;
                while end < len && size(start, end + 1) <= budget {
                    end += 1;
                }
                pieces.push(values.slice(start, end - start));
                start = end;
            }
        }
    }
    pieces
}

/// Lay pieces out as one-row batches, filling each batch up to `budget`.
///
/// A column contributes at most one piece per batch; columns without a piece
/// in a batch get an empty row.
fn pack_batches(
    schema: &SchemaRef,
    pieces: Vec<(DType, Vec<ArrayRef>)>,
    budget: usize,
) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    let mut row: Vec<Option<ArrayRef>> = vec![None; schema.fields().len()];
    let mut row_bytes = 0;

    for (index, (dtype, column)) in pieces.into_iter().enumerate() {
        for piece in column {
            let size = packed_len(&piece, dtype);
            if row[index].is_some() || (row_bytes > 0 && row_bytes + size > budget) {
                batches.push(finish_row(schema, &mut row)?);
                row_bytes = 0;
            }
            row[index] = Some(piece);
            row_bytes += size;
        }
    }
    batches.push(finish_row(schema, &mut row)?);

    Ok(batches)
}

fn finish_row(schema: &SchemaRef, row: &mut [Option<ArrayRef>]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .zip(row.iter_mut())
        .map(|(field, slot)| {
            let item = match field.data_type() {
                DataType::LargeList(item) => item.clone(),
                other => {
                    return Err(FlightError::malformed(format!(
                        "column {} has type {}, expected a large list",
                        field.name(),
                        other
                    )))
                }
            };
            let values = slot
                .take()
                .unwrap_or_else(|| new_empty_array(item.data_type()));
            let offsets = OffsetBuffer::<i64>::from_lengths([values.len()]);
            let list = LargeListArray::try_new(item, offsets, values, None)?;
            Ok(Arc::new(list) as ArrayRef)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Decode a table produced by [`encode`] back into an array map.
pub fn decode(table: &Table) -> Result<ArrayMap> {
    let fields = table.schema.fields();
    for (index, batch) in table.batches.iter().enumerate() {
        if batch.num_columns() != fields.len() {
            return Err(FlightError::malformed(format!(
                "batch {} has {} columns, schema declares {}",
                index,
                batch.num_columns(),
                fields.len()
            )));
        }
    }

    let mut arrays = ArrayMap::new();
    for (index, field) in fields.iter().enumerate() {
        let name = field.name();
        let item = match field.data_type() {
            DataType::LargeList(item) => item,
            other => {
                return Err(FlightError::malformed(format!(
                    "column {} has type {}, expected a large list",
                    name, other
                )))
            }
        };
        if DType::from_arrow(item.data_type()).is_none() {
            return Err(FlightError::UnsupportedType {
                column: name.clone(),
                data_type: item.data_type().to_string(),
            });
        }

        let values = column_values(table, index, name, item.data_type())?;
        if values.null_count() > 0 {
            return Err(FlightError::malformed(format!(
                "column {} contains {} nulls",
                name,
                values.null_count()
            )));
        }

        let array = match field.metadata().get(SHAPE_METADATA_KEY) {
            Some(raw) => {
                let shape: Vec<usize> = serde_json::from_str(raw).map_err(|e| {
                    FlightError::malformed(format!("column {} has invalid shape {}: {}", name, raw, e))
                })?;
                NdArray::new(values)
                    .with_shape(shape)
                    .map_err(|e| FlightError::malformed(format!("column {}: {}", name, e)))?
            }
            None => NdArray::new(values),
        };

        if arrays.insert(name.clone(), array).is_some() {
            return Err(FlightError::malformed(format!("duplicate column {}", name)));
        }
    }

    Ok(arrays)
}

/// Concatenate the rows holding column `index` across all batches.
fn column_values(table: &Table, index: usize, name: &str, item: &DataType) -> Result<ArrayRef> {
    let mut rows = 0;
    let mut pieces = Vec::new();
    for batch in &table.batches {
        let list = batch.column(index).as_list_opt::<i64>().ok_or_else(|| {
            FlightError::malformed(format!("column {} is not a large list in every batch", name))
        })?;
        for row in 0..list.len() {
            if list.is_null(row) {
                return Err(FlightError::malformed(format!("column {} has a null row", name)));
            }
            rows += 1;
            let piece = list.value(row);
            if !piece.is_empty() {
                pieces.push(piece);
            }
        }
    }

    if rows == 0 {
        return Err(FlightError::malformed(format!("column {} has no rows", name)));
    }
    match pieces.len() {
        0 => Ok(new_empty_array(item)),
        1 => Ok(pieces.swap_remove(0)),
        _ => {
            let parts: Vec<&dyn Array> = pieces.iter().map(|piece| piece.as_ref()).collect();
            Ok(concat(&parts)?)
        }
    }
}

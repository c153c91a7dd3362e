//! Named numeric arrays: the application-level payload.
//!
//! An [`NdArray`] wraps an Arrow array of one supported element type together
//! with a logical shape. An [`ArrayMap`] names a set of them.

use crate::error::{FlightError, Result};
use arrow::array::{Array, ArrayRef, AsArray, PrimitiveArray, StringArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Mapping from column name to array. Iteration order is sorted by name.
pub type ArrayMap = BTreeMap<String, NdArray>;

/// Element types that can cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
}

impl DType {
    pub const ALL: [DType; 11] = [
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
        DType::Utf8,
    ];

    /// Map an Arrow data type onto the supported set.
    pub fn from_arrow(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Int8 => Some(DType::Int8),
            DataType::Int16 => Some(DType::Int16),
            DataType::Int32 => Some(DType::Int32),
            DataType::Int64 => Some(DType::Int64),
            DataType::UInt8 => Some(DType::UInt8),
            DataType::UInt16 => Some(DType::UInt16),
            DataType::UInt32 => Some(DType::UInt32),
            DataType::UInt64 => Some(DType::UInt64),
            DataType::Float32 => Some(DType::Float32),
            DataType::Float64 => Some(DType::Float64),
            DataType::Utf8 => Some(DType::Utf8),
            _ => None,
        }
    }

    pub fn to_arrow(self) -> DataType {
        match self {
            DType::Int8 => DataType::Int8,
            DType::Int16 => DataType::Int16,
            DType::Int32 => DataType::Int32,
            DType::Int64 => DataType::Int64,
            DType::UInt8 => DataType::UInt8,
            DType::UInt16 => DataType::UInt16,
            DType::UInt32 => DataType::UInt32,
            DType::UInt64 => DataType::UInt64,
            DType::Float32 => DataType::Float32,
            DType::Float64 => DataType::Float64,
            DType::Utf8 => DataType::Utf8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Utf8 => "utf8",
        }
    }

    /// Fixed element width in bytes; `None` for variable-width strings.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            DType::Int8 | DType::UInt8 => Some(1),
            DType::Int16 | DType::UInt16 => Some(2),
            DType::Int32 | DType::UInt32 | DType::Float32 => Some(4),
            DType::Int64 | DType::UInt64 | DType::Float64 => Some(8),
            DType::Utf8 => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flat Arrow array plus the shape it represents.
///
/// The values are stored row-major; `shape` defaults to `[len]`. Element type
/// is checked when the array is encoded, not when it is built, so any Arrow
/// array can be wrapped here.
///
/// Equality compares shape, element type and values. Primitive values are
/// compared by their bytes, so `NaN` equals an identical `NaN` and `-0.0`
/// differs from `0.0`.
#[derive(Debug, Clone)]
pub struct NdArray {
    values: ArrayRef,
    shape: Vec<usize>,
}

impl PartialEq for NdArray {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.values.to_data() == other.values.to_data()
    }
}

impl NdArray {
    /// Wrap an Arrow array as a one-dimensional array.
    pub fn new(values: ArrayRef) -> Self {
        let shape = vec![values.len()];
        Self { values, shape }
    }

    /// Reinterpret the values with a new shape.
    ///
    /// The product of `shape` must equal the element count. An empty shape
    /// describes a scalar and requires exactly one element. A product that
    /// overflows `usize` never matches.
    pub fn with_shape(mut self, shape: Vec<usize>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
        if expected != Some(self.values.len()) {
            return Err(FlightError::InvalidShape {
                shape,
                len: self.values.len(),
            });
        }
        self.shape = shape;
        Ok(self)
    }

    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Element type, or `None` if the wrapped array is not supported.
    pub fn dtype(&self) -> Option<DType> {
        DType::from_arrow(self.values.data_type())
    }

    /// Borrow the values as a native slice when the array holds `T`.
    pub fn as_slice<T: ArrowPrimitiveType>(&self) -> Option<&[T::Native]> {
        self.values
            .as_primitive_opt::<T>()
            .map(|array| &array.values()[..])
    }

    /// Collect string values when the array holds UTF-8 data.
    pub fn as_strings(&self) -> Option<Vec<&str>> {
        self.values
            .as_string_opt::<i32>()
            .map(|array| array.iter().map(|v| v.unwrap_or_default()).collect())
    }
}

impl From<ArrayRef> for NdArray {
    fn from(values: ArrayRef) -> Self {
        NdArray::new(values)
    }
}

macro_rules! impl_from_vec {
    ($($native:ty => $arrow:ty),* $(,)?) => {
        $(
            impl From<Vec<$native>> for NdArray {
                fn from(values: Vec<$native>) -> Self {
                    NdArray::new(Arc::new(PrimitiveArray::<$arrow>::from(values)))
                }
            }
        )*
    };
}

impl_from_vec!(
    i8 => Int8Type,
    i16 => Int16Type,
    i32 => Int32Type,
    i64 => Int64Type,
    u8 => UInt8Type,
    u16 => UInt16Type,
    u32 => UInt32Type,
    u64 => UInt64Type,
    f32 => Float32Type,
    f64 => Float64Type,
);

impl From<Vec<String>> for NdArray {
    fn from(values: Vec<String>) -> Self {
        NdArray::new(Arc::new(StringArray::from(values)))
    }
}

impl From<Vec<&str>> for NdArray {
    fn from(values: Vec<&str>) -> Self {
        NdArray::new(Arc::new(StringArray::from(values)))
    }
}

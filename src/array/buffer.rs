//! Typed n-dimensional buffers decoded from raw block bytes

use ndarray::{ArrayD, IxDyn};
use std::fmt;

use crate::error::{CatalogError, Result};
use crate::models::{DataType, Endianness};

/// Concrete element types a block can decode to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    /// numpy-style kind code
    pub fn kind_code(&self) -> &'static str {
        match self {
            ElementType::Bool => "b",
            ElementType::I8 | ElementType::I16 | ElementType::I32 | ElementType::I64 => "i",
            ElementType::U8 | ElementType::U16 | ElementType::U32 | ElementType::U64 => "u",
            ElementType::F32 | ElementType::F64 => "f",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "bool",
            ElementType::I8 => "int8",
            ElementType::I16 => "int16",
            ElementType::I32 => "int32",
            ElementType::I64 => "int64",
            ElementType::U8 => "uint8",
            ElementType::U16 => "uint16",
            ElementType::U32 => "uint32",
            ElementType::U64 => "uint64",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Rust scalar types that map onto an [`ElementType`]
pub trait Element: Copy + Default + Send + Sync + fmt::Debug + 'static {
    const TYPE: ElementType;

    /// Decode one element; `bytes.len()` equals `TYPE.size()`
    fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self;

    /// Append the little-endian encoding of `self`
    fn write_le(self, out: &mut Vec<u8>);

    fn wrap(array: ArrayD<Self>) -> NumericArray;

    fn unwrap(array: NumericArray) -> Option<ArrayD<Self>>;
}

macro_rules! numeric_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const TYPE: ElementType = ElementType::$variant;

            fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                match endianness {
                    Endianness::Big => <$t>::from_be_bytes(raw),
                    Endianness::Little | Endianness::NotApplicable => <$t>::from_le_bytes(raw),
                }
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn wrap(array: ArrayD<Self>) -> NumericArray {
                NumericArray::$variant(array)
            }

            fn unwrap(array: NumericArray) -> Option<ArrayD<Self>> {
                match array {
                    NumericArray::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

numeric_element!(i8, I8);
numeric_element!(i16, I16);
numeric_element!(i32, I32);
numeric_element!(i64, I64);
numeric_element!(u8, U8);
numeric_element!(u16, U16);
numeric_element!(u32, U32);
numeric_element!(u64, U64);
numeric_element!(f32, F32);
numeric_element!(f64, F64);

impl Element for bool {
    const TYPE: ElementType = ElementType::Bool;

    fn from_bytes(bytes: &[u8], _endianness: Endianness) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn wrap(array: ArrayD<Self>) -> NumericArray {
        NumericArray::Bool(array)
    }

    fn unwrap(array: NumericArray) -> Option<ArrayD<Self>> {
        match array {
            NumericArray::Bool(array) => Some(array),
            _ => None,
        }
    }
}

/// Run `$body` with `$T` bound to the Rust type of `$element`
macro_rules! with_element_type {
    ($element:expr, $T:ident => $body:expr) => {
        match $element {
            $crate::array::ElementType::Bool => {
                type $T = bool;
                $body
            }
            $crate::array::ElementType::I8 => {
                type $T = i8;
                $body
            }
            $crate::array::ElementType::I16 => {
                type $T = i16;
                $body
            }
            $crate::array::ElementType::I32 => {
                type $T = i32;
                $body
            }
            $crate::array::ElementType::I64 => {
                type $T = i64;
                $body
            }
            $crate::array::ElementType::U8 => {
                type $T = u8;
                $body
            }
            $crate::array::ElementType::U16 => {
                type $T = u16;
                $body
            }
            $crate::array::ElementType::U32 => {
                type $T = u32;
                $body
            }
            $crate::array::ElementType::U64 => {
                type $T = u64;
                $body
            }
            $crate::array::ElementType::F32 => {
                type $T = f32;
                $body
            }
            $crate::array::ElementType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use with_element_type;

/// A decoded block or region, tagged with its element type
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    Bool(ArrayD<bool>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! for_each_variant {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            NumericArray::Bool($array) => $body,
            NumericArray::I8($array) => $body,
            NumericArray::I16($array) => $body,
            NumericArray::I32($array) => $body,
            NumericArray::I64($array) => $body,
            NumericArray::U8($array) => $body,
            NumericArray::U16($array) => $body,
            NumericArray::U32($array) => $body,
            NumericArray::U64($array) => $body,
            NumericArray::F32($array) => $body,
            NumericArray::F64($array) => $body,
        }
    };
}

impl NumericArray {
    /// Reinterpret `bytes` as a flat buffer of `dtype` with the given shape.
    ///
    /// The byte count must be exactly `product(shape) * itemsize`.
    pub fn decode(bytes: &[u8], dtype: &DataType, shape: &[usize]) -> Result<Self> {
        let element = dtype.element_type()?;
        let expected = shape.iter().product::<usize>() * element.size();
        if bytes.len() != expected {
            return Err(CatalogError::MalformedResponse(format!(
                "{} bytes cannot hold {:?} {}",
                bytes.len(),
                shape,
                element
            )));
        }
        with_element_type!(element, T => decode_as::<T>(bytes, dtype.endianness, shape))
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            NumericArray::Bool(_) => ElementType::Bool,
            NumericArray::I8(_) => ElementType::I8,
            NumericArray::I16(_) => ElementType::I16,
            NumericArray::I32(_) => ElementType::I32,
            NumericArray::I64(_) => ElementType::I64,
            NumericArray::U8(_) => ElementType::U8,
            NumericArray::U16(_) => ElementType::U16,
            NumericArray::U32(_) => ElementType::U32,
            NumericArray::U64(_) => ElementType::U64,
            NumericArray::F32(_) => ElementType::F32,
            NumericArray::F64(_) => ElementType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        for_each_variant!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the buffer; `None` if `T` is not the element type
    pub fn into_array<T: Element>(self) -> Option<ArrayD<T>> {
        T::unwrap(self)
    }
}

impl<T: Element> From<ArrayD<T>> for NumericArray {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl fmt::Display for NumericArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for_each_variant!(self, a => write!(f, "{}", a))
    }
}

fn decode_as<T: Element>(
    bytes: &[u8],
    endianness: Endianness,
    shape: &[usize],
) -> Result<NumericArray> {
    let values: Vec<T> = bytes
        .chunks_exact(T::TYPE.size())
        .map(|chunk| T::from_bytes(chunk, endianness))
        .collect();
    let array = ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| CatalogError::MalformedResponse(format!("cannot reshape block: {}", e)))?;
    Ok(T::wrap(array))
}

/// Little-endian bytes of `array` in logical (row-major) order
pub fn encode_le<T: Element>(array: &ArrayD<T>) -> Vec<u8> {
    let mut out = Vec::with_capacity(array.len() * T::TYPE.size());
    for value in array.iter() {
        value.write_le(&mut out);
    }
    out
}

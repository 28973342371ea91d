//! Typed block arrays.
//!
//! Every block travels through the engine as a [`BlockArray`]: a 3-D array
//! shaped `(bands, rows, cols)` whose element type is one of the GDAL pixel
//! types the engine can read and write.

use crate::error::{BlockError, Result};
use gdal::raster::{GdalDataType, GdalType};
use ndarray::{s, Array3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    UInt8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl PixelType {
    pub const ALL: [PixelType; 7] = [
        PixelType::UInt8,
        PixelType::UInt16,
        PixelType::Int16,
        PixelType::UInt32,
        PixelType::Int32,
        PixelType::Float32,
        PixelType::Float64,
    ];

    pub fn from_gdal(data_type: GdalDataType) -> Result<Self> {
        match data_type {
            GdalDataType::UInt8 => Ok(PixelType::UInt8),
            GdalDataType::UInt16 => Ok(PixelType::UInt16),
            GdalDataType::Int16 => Ok(PixelType::Int16),
            GdalDataType::UInt32 => Ok(PixelType::UInt32),
            GdalDataType::Int32 => Ok(PixelType::Int32),
            GdalDataType::Float32 => Ok(PixelType::Float32),
            GdalDataType::Float64 => Ok(PixelType::Float64),
            other => Err(BlockError::UnsupportedDataType(format!("{:?}", other))),
        }
    }

    /// GDAL's name for the type, as accepted by `-ot`.
    pub fn gdal_name(self) -> &'static str {
        match self {
            PixelType::UInt8 => "Byte",
            PixelType::UInt16 => "UInt16",
            PixelType::Int16 => "Int16",
            PixelType::UInt32 => "UInt32",
            PixelType::Int32 => "Int32",
            PixelType::Float32 => "Float32",
            PixelType::Float64 => "Float64",
        }
    }

    pub fn from_gdal_name(name: &str) -> Result<Self> {
        PixelType::ALL
            .iter()
            .copied()
            .find(|t| t.gdal_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| BlockError::UnsupportedDataType(name.to_string()))
    }

    pub fn is_float(self) -> bool {
        matches!(self, PixelType::Float32 | PixelType::Float64)
    }

    pub fn size_bytes(self) -> usize {
        match self {
            PixelType::UInt8 => 1,
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::UInt32 | PixelType::Int32 | PixelType::Float32 => 4,
            PixelType::Float64 => 8,
        }
    }

    /// Whether per-value histogram counts stay small enough to be kept
    /// while blocks stream past.
    pub fn supports_single_pass_histogram(self) -> bool {
        matches!(self, PixelType::UInt8 | PixelType::UInt16 | PixelType::Int16)
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            PixelType::UInt8 => 1,
            PixelType::UInt16 => 2,
            PixelType::Int16 => 3,
            PixelType::UInt32 => 4,
            PixelType::Int32 => 5,
            PixelType::Float32 => 6,
            PixelType::Float64 => 7,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        PixelType::ALL.iter().copied().find(|t| t.code() == code)
    }
}

/// Element types a [`BlockArray`] can hold.
pub trait Pixel:
    GdalType + bytemuck::Pod + Default + PartialOrd + Send + Sync + 'static
{
    const TYPE: PixelType;

    fn to_f64(self) -> f64;

    /// Saturating conversion, NaN becomes zero for integer types.
    fn from_f64(value: f64) -> Self;

    fn wrap(array: Array3<Self>) -> BlockArray;

    fn peek(array: &BlockArray) -> Option<&Array3<Self>>;

    fn peek_mut(array: &mut BlockArray) -> Option<&mut Array3<Self>>;
}

macro_rules! impl_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const TYPE: PixelType = PixelType::$variant;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn wrap(array: Array3<Self>) -> BlockArray {
                BlockArray::$variant(array)
            }

            fn peek(array: &BlockArray) -> Option<&Array3<Self>> {
                match array {
                    BlockArray::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn peek_mut(array: &mut BlockArray) -> Option<&mut Array3<Self>> {
                match array {
                    BlockArray::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

impl_pixel!(u8, UInt8);
impl_pixel!(u16, UInt16);
impl_pixel!(i16, Int16);
impl_pixel!(u32, UInt32);
impl_pixel!(i32, Int32);
impl_pixel!(f32, Float32);
impl_pixel!(f64, Float64);

/// Run `$body` with `$t` bound to the Rust element type of a [`PixelType`].
macro_rules! with_pixel_type {
    ($pixel_type:expr, $t:ident => $body:expr) => {
        match $pixel_type {
            $crate::array::PixelType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::array::PixelType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::array::PixelType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::array::PixelType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::array::PixelType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::array::PixelType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::array::PixelType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

/// Run `$body` with `$a` bound to the typed array inside a [`BlockArray`].
macro_rules! with_block_array {
    ($array:expr, $a:ident => $body:expr) => {
        match $array {
            $crate::array::BlockArray::UInt8($a) => $body,
            $crate::array::BlockArray::UInt16($a) => $body,
            $crate::array::BlockArray::Int16($a) => $body,
            $crate::array::BlockArray::UInt32($a) => $body,
            $crate::array::BlockArray::Int32($a) => $body,
            $crate::array::BlockArray::Float32($a) => $body,
            $crate::array::BlockArray::Float64($a) => $body,
        }
    };
}

pub(crate) use with_block_array;
pub(crate) use with_pixel_type;

/// A `(bands, rows, cols)` array of one pixel type.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockArray {
    UInt8(Array3<u8>),
    UInt16(Array3<u16>),
    Int16(Array3<i16>),
    UInt32(Array3<u32>),
    Int32(Array3<i32>),
    Float32(Array3<f32>),
    Float64(Array3<f64>),
}

impl BlockArray {
    pub fn zeros(pixel_type: PixelType, shape: (usize, usize, usize)) -> Self {
        with_pixel_type!(pixel_type, T => T::wrap(Array3::<T>::default(shape)))
    }

    /// Array with every pixel of band `b` set to `fill[b]`.
    pub fn filled(pixel_type: PixelType, shape: (usize, usize, usize), fill: &[f64]) -> Self {
        with_pixel_type!(pixel_type, T => {
            let mut array = Array3::<T>::default(shape);
            for (band, mut plane) in array.outer_iter_mut().enumerate() {
                let value = fill.get(band).copied().unwrap_or(0.0);
                plane.fill(T::from_f64(value));
            }
            T::wrap(array)
        })
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            BlockArray::UInt8(_) => PixelType::UInt8,
            BlockArray::UInt16(_) => PixelType::UInt16,
            BlockArray::Int16(_) => PixelType::Int16,
            BlockArray::UInt32(_) => PixelType::UInt32,
            BlockArray::Int32(_) => PixelType::Int32,
            BlockArray::Float32(_) => PixelType::Float32,
            BlockArray::Float64(_) => PixelType::Float64,
        }
    }

    /// `(bands, rows, cols)`
    pub fn shape(&self) -> (usize, usize, usize) {
        with_block_array!(self, a => a.dim())
    }

    pub fn band_count(&self) -> usize {
        self.shape().0
    }

    pub fn get<T: Pixel>(&self) -> Option<&Array3<T>> {
        T::peek(self)
    }

    pub fn get_mut<T: Pixel>(&mut self) -> Option<&mut Array3<T>> {
        T::peek_mut(self)
    }

    /// Drop `margin` pixels from every edge of the row and column axes.
    pub fn trim_margin(&self, margin: usize) -> Result<BlockArray> {
        let (bands, rows, cols) = self.shape();
        if rows < 2 * margin || cols < 2 * margin {
            return Err(BlockError::InvalidDimensions(cols, rows));
        }
        if margin == 0 {
            return Ok(self.clone());
        }
        Ok(with_block_array!(self, a => {
            let inner = a.slice(s![0..bands, margin..rows - margin, margin..cols - margin]);
            Pixel::wrap(inner.to_owned())
        }))
    }

    pub fn to_f64(&self) -> Array3<f64> {
        with_block_array!(self, a => a.mapv(|v| v.to_f64()))
    }

    pub fn from_f64(pixel_type: PixelType, values: &Array3<f64>) -> Self {
        with_pixel_type!(pixel_type, T => T::wrap(values.mapv(T::from_f64)))
    }
}

impl<T: Pixel> From<Array3<T>> for BlockArray {
    fn from(array: Array3<T>) -> Self {
        T::wrap(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_filled_per_band() {
        let arr = BlockArray::filled(PixelType::Int16, (2, 3, 4), &[-5.0, 7.0]);
        let a = arr.get::<i16>().unwrap();
        assert!(a.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == -5));
        assert!(a.index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 7));
    }

    #[test]
    fn test_trim_margin() {
        let data = Array3::from_shape_fn((1, 6, 5), |(_, r, c)| (r * 10 + c) as u8);
        let arr = BlockArray::from(data);
        let inner = arr.trim_margin(1).unwrap();
        assert_eq!(inner.shape(), (1, 4, 3));
        let a = inner.get::<u8>().unwrap();
        assert_eq!(a[[0, 0, 0]], 11);
        assert_eq!(a[[0, 3, 2]], 43);
    }

    #[test]
    fn test_trim_margin_too_large() {
        let arr = BlockArray::zeros(PixelType::UInt8, (1, 2, 2));
        assert!(arr.trim_margin(2).is_err());
    }

    #[test]
    fn test_from_f64_saturates() {
        let values = Array3::from_elem((1, 1, 2), 300.0);
        let arr = BlockArray::from_f64(PixelType::UInt8, &values);
        assert_eq!(arr.get::<u8>().unwrap()[[0, 0, 1]], 255);
        assert!(arr.get::<f32>().is_none());
    }

    #[test]
    fn test_pixel_type_names() {
        assert_eq!(PixelType::from_gdal_name("byte").unwrap(), PixelType::UInt8);
        assert_eq!(PixelType::from_gdal_name("Float32").unwrap(), PixelType::Float32);
        assert!(PixelType::from_gdal_name("CInt16").is_err());
        for t in PixelType::ALL {
            assert_eq!(PixelType::from_code(t.code()), Some(t));
        }
    }
}

//! Tensor implementation
//!
//! This module provides the core `Tensor` type: a dense N-dimensional array in
//! row-major order whose shape is checked at construction and at every
//! boundary that consumes it.

use std::fmt;

use num_traits::Num;
use serde::{Deserialize, Serialize};

use crate::error::{ComprobarError, Result};

/// Element type tag stored alongside tensor bytes
///
/// Names follow the safetensors convention so a bundle header reads the same
/// way in any consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// 64-bit signed integer
    I64,
}

impl Dtype {
    /// Size of one element in bytes
    #[must_use]
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::I64 => "I64",
        };
        f.write_str(name)
    }
}

/// Scalar types that can live in a tensor bundle
pub trait Element: Num + Copy + fmt::Debug {
    /// Dtype tag written to the bundle header
    const DTYPE: Dtype;

    /// Append the little-endian encoding of `self` to `out`
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element from exactly `DTYPE.size_in_bytes()` bytes
    fn read_le(bytes: &[u8]) -> Self;
}

impl Element for f32 {
    const DTYPE: Dtype = Dtype::F32;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_le_bytes(buf)
    }
}

impl Element for i64 {
    const DTYPE: Dtype = Dtype::I64;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        i64::from_le_bytes(buf)
    }
}

/// N-dimensional dense tensor
///
/// # Examples
///
/// ```
/// use comprobar::Tensor;
///
/// let t = Tensor::from_vec(vec![2, 3], vec![
///     1.0, 2.0, 3.0,
///     4.0, 5.0, 6.0,
/// ]).unwrap();
///
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.ndim(), 2);
/// assert_eq!(t.size(), 6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Num> {
    /// Flattened data in row-major order
    data: Vec<T>,
    /// Shape of the tensor
    shape: Vec<usize>,
}

impl<T: Num + Clone> Tensor<T> {
    /// Create a new tensor from a vector and shape
    ///
    /// # Arguments
    ///
    /// * `shape` - Dimensions of the tensor
    /// * `data` - Flattened data in row-major order
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - Shape is empty
    /// - Data size doesn't match shape
    /// - Shape contains zero
    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        if shape.is_empty() {
            return Err(ComprobarError::InvalidShape {
                reason: "Shape cannot be empty".to_string(),
            });
        }

        if shape.contains(&0) {
            return Err(ComprobarError::InvalidShape {
                reason: format!("Shape dimensions cannot be zero: {shape:?}"),
            });
        }

        let expected_size = shape.iter().product();

        if data.len() != expected_size {
            return Err(ComprobarError::DataShapeMismatch {
                data_size: data.len(),
                shape,
                expected: expected_size,
            });
        }

        Ok(Self { data, shape })
    }

    /// Create a zero-filled tensor
    ///
    /// # Errors
    ///
    /// Same conditions as [`Tensor::from_vec`] on the shape.
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let size = shape.iter().product();
        Self::from_vec(shape, vec![T::zero(); size])
    }

    /// Get the shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the underlying data
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Fail unless the shape equals `expected` exactly
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::ShapeMismatch`] naming `operation` and both shapes.
    pub fn expect_shape(&self, operation: &str, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(ComprobarError::ShapeMismatch {
                operation: operation.to_string(),
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        Ok(())
    }

    /// Fail unless the tensor has rank `ndim`
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::InvalidShape`] with the offending shape.
    pub fn expect_ndim(&self, operation: &str, ndim: usize) -> Result<()> {
        if self.shape.len() != ndim {
            return Err(ComprobarError::InvalidShape {
                reason: format!(
                    "{operation}: expected rank {ndim}, got shape {:?}",
                    self.shape
                ),
            });
        }
        Ok(())
    }
}

impl<T: Num + Clone + fmt::Display> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={:?}, data=[", self.shape)?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{val}")?;
        }
        write!(f, "])")
    }
}

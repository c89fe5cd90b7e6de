//! Tensor bundle container
//!
//! A bundle is a named set of dense tensors written once and read back by a
//! verifier. The on-disk layout is the safetensors layout, so any safetensors
//! reader can open a bundle too.
//!
//! ## Format Overview
//!
//! ```text
//! Bundle := HEADER_LEN METADATA TENSOR_DATA
//!
//! HEADER_LEN := u64 (little-endian), length of METADATA in bytes
//!
//! METADATA := JSON {
//!   "__metadata__": { "key": "value", ... },     (optional)
//!   "tensor_name": {
//!     "dtype": "F32" | "F64" | "I64",
//!     "shape": [dim1, dim2, ...],
//!     "data_offsets": [start, end]
//!   },
//!   ...
//! }   padded with spaces to a multiple of 8 bytes
//!
//! TENSOR_DATA := little-endian, row-major tensor bytes in key order
//! ```
//!
//! Keys are kept sorted, so a bundle built from the same tensors always
//! serializes to the same bytes.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    error::{ComprobarError, Result},
    tensor::{Dtype, Element, Tensor},
};

/// Header key reserved for the string metadata map
pub const METADATA_KEY: &str = "__metadata__";

/// Upper bound on the JSON header size accepted by the reader
const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

/// Per-tensor header entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderEntry {
    dtype: Dtype,
    shape: Vec<usize>,
    data_offsets: [usize; 2],
}

/// One stored tensor: dtype, shape and its little-endian bytes
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    /// Element type
    pub dtype: Dtype,
    /// Dimensions
    pub shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl BundleEntry {
    /// Raw little-endian bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Named tensors plus a string metadata map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorBundle {
    entries: BTreeMap<String, BundleEntry>,
    metadata: BTreeMap<String, String>,
}

impl TensorBundle {
    /// Create an empty bundle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor under `name`
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::SerializationError`] if the key is already
    /// present or collides with the reserved metadata key
    pub fn insert<T: Element>(&mut self, name: &str, tensor: &Tensor<T>) -> Result<()> {
        if name == METADATA_KEY {
            return Err(ComprobarError::SerializationError {
                reason: format!("'{METADATA_KEY}' is reserved for bundle metadata"),
            });
        }
        if self.entries.contains_key(name) {
            return Err(ComprobarError::SerializationError {
                reason: format!("Duplicate tensor key '{name}'"),
            });
        }

        let mut bytes = Vec::with_capacity(tensor.size() * T::DTYPE.size_in_bytes());
        for &value in tensor.data() {
            value.write_le(&mut bytes);
        }

        self.entries.insert(
            name.to_string(),
            BundleEntry {
                dtype: T::DTYPE,
                shape: tensor.shape().to_vec(),
                bytes,
            },
        );
        Ok(())
    }

    /// Set a metadata value, replacing any previous one
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Metadata value for `key`
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// All metadata
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Tensor keys in serialization order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Stored entry for `name`
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&BundleEntry> {
        self.entries.get(name)
    }

    /// Whether `name` is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of tensors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle holds no tensors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode the tensor stored under `name`
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or stored with another dtype
    pub fn get<T: Element>(&self, name: &str) -> Result<Tensor<T>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ComprobarError::TensorNotFound {
                name: name.to_string(),
            })?;

        if entry.dtype != T::DTYPE {
            return Err(ComprobarError::DtypeMismatch {
                name: name.to_string(),
                expected: T::DTYPE.to_string(),
                actual: entry.dtype.to_string(),
            });
        }

        let values = entry
            .bytes
            .chunks_exact(T::DTYPE.size_in_bytes())
            .map(T::read_le)
            .collect();
        Tensor::from_vec(entry.shape.clone(), values)
    }

    /// Serialize to the bundle byte layout
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be encoded
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header.insert(
                METADATA_KEY.to_string(),
                serde_json::to_value(&self.metadata)?,
            );
        }

        let mut offset = 0;
        for (name, entry) in &self.entries {
            let end = offset + entry.bytes.len();
            header.insert(
                name.clone(),
                serde_json::to_value(HeaderEntry {
                    dtype: entry.dtype,
                    shape: entry.shape.clone(),
                    data_offsets: [offset, end],
                })?,
            );
            offset = end;
        }

        let mut header_bytes = serde_json::to_vec(&header)?;
        let padding = (8 - header_bytes.len() % 8) % 8;
        header_bytes.extend(std::iter::repeat_n(b' ', padding));

        let mut out = Vec::with_capacity(8 + header_bytes.len() + offset);
        out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&header_bytes);
        for entry in self.entries.values() {
            out.extend_from_slice(&entry.bytes);
        }
        Ok(out)
    }

    /// Parse a bundle from bytes
    ///
    /// # Errors
    ///
    /// Returns [`ComprobarError::FormatError`] if:
    /// - The header length prefix is missing or out of range
    /// - The header is not valid JSON of the expected shape
    /// - Data offsets are out of bounds, overlap, leave gaps, or disagree
    ///   with `dtype` × `shape`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (len_bytes, rest) = data.split_first_chunk::<8>().ok_or_else(|| {
            ComprobarError::FormatError {
                reason: format!("Bundle too small: {} bytes (need at least 8)", data.len()),
            }
        })?;
        let header_len = u64::from_le_bytes(*len_bytes);
        if header_len > MAX_HEADER_LEN || header_len > rest.len() as u64 {
            return Err(ComprobarError::FormatError {
                reason: format!(
                    "Header length {header_len} exceeds available {} bytes",
                    rest.len()
                ),
            });
        }
        let (header_bytes, payload) = rest.split_at(header_len as usize);

        let header: BTreeMap<String, serde_json::Value> = serde_json::from_slice(header_bytes)
            .map_err(|e| ComprobarError::FormatError {
                reason: format!("Malformed bundle header: {e}"),
            })?;

        let mut bundle = Self::new();
        let mut spans = Vec::with_capacity(header.len());

        for (name, value) in header {
            if name == METADATA_KEY {
                bundle.metadata = serde_json::from_value(value).map_err(|e| {
                    ComprobarError::FormatError {
                        reason: format!("Malformed {METADATA_KEY}: {e}"),
                    }
                })?;
                continue;
            }

            let info: HeaderEntry =
                serde_json::from_value(value).map_err(|e| ComprobarError::FormatError {
                    reason: format!("Malformed header entry '{name}': {e}"),
                })?;
            let [start, end] = info.data_offsets;
            let expected_len = info
                .shape
                .iter()
                .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
                .and_then(|n| n.checked_mul(info.dtype.size_in_bytes()))
                .ok_or_else(|| ComprobarError::FormatError {
                    reason: format!(
                        "Tensor '{name}' byte size overflows for {} {:?}",
                        info.dtype, info.shape
                    ),
                })?;

            if start > end || end > payload.len() {
                return Err(ComprobarError::FormatError {
                    reason: format!(
                        "Tensor '{name}' offsets [{start}, {end}) exceed data size {}",
                        payload.len()
                    ),
                });
            }
            if end - start != expected_len {
                return Err(ComprobarError::FormatError {
                    reason: format!(
                        "Tensor '{name}' spans {} bytes but {} {:?} needs {expected_len}",
                        end - start,
                        info.dtype,
                        info.shape
                    ),
                });
            }

            spans.push((start, end, name.clone()));
            bundle.entries.insert(
                name,
                BundleEntry {
                    dtype: info.dtype,
                    shape: info.shape,
                    bytes: payload[start..end].to_vec(),
                },
            );
        }

        spans.sort();
        let mut cursor = 0;
        for (start, end, name) in &spans {
            if *start != cursor {
                return Err(ComprobarError::FormatError {
                    reason: format!(
                        "Tensor '{name}' starts at {start}, expected {cursor} (gap or overlap)"
                    ),
                });
            }
            cursor = *end;
        }
        if cursor != payload.len() {
            return Err(ComprobarError::FormatError {
                reason: format!(
                    "{} trailing bytes after last tensor",
                    payload.len() - cursor
                ),
            });
        }

        Ok(bundle)
    }

    /// Write the bundle to `path` atomically
    ///
    /// The bytes go to a temporary file in the destination directory which is
    /// renamed over `path` only after a full write and sync, so a reader never
    /// sees a partial bundle.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or any filesystem step fails
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_atomic(path.as_ref(), &bytes)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            tensors = self.len(),
            bytes = bytes.len(),
            "Wrote tensor bundle"
        );
        Ok(())
    }

    /// Read a bundle from `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is malformed
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| ComprobarError::IoError {
            message: format!("Failed to read bundle {}: {e}", path.display()),
        })?;
        Self::from_bytes(&data)
    }
}

/// Write `bytes` to `path` through a synced temporary file and a rename
///
/// # Errors
///
/// Returns [`ComprobarError::IoError`] naming the failing step
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ComprobarError::IoError {
        message: format!("Failed to create {}: {e}", dir.display()),
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ComprobarError::IoError {
        message: format!("Failed to create temporary file in {}: {e}", dir.display()),
    })?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ComprobarError::IoError {
            message: format!("Failed to write {}: {e}", path.display()),
        })?;
    tmp.persist(path).map_err(|e| ComprobarError::IoError {
        message: format!("Failed to move bundle into {}: {}", path.display(), e.error),
    })?;
    Ok(())
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

//! Row encoder.
//!
//! Wire layout (all integers little-endian):
//!
//! ```text
//! u64 field_count
//! repeated field_count times:
//!     u32 storage_type
//!     payload:
//!         null        u32 0
//!         bool        u8
//!         integer     i64
//!         real        f64
//!         text/blob   u32 len, len bytes, zero padding to an 8-byte boundary
//! ```
//!
//! A zero-length text or blob writes the null payload under its own type tag.

use crate::decoder::MAX_VALUE_SIZE;
use crate::error::{CodecError, CodecResult};
use crate::field::FieldInfo;
use crate::row::{DataItem, RowWithLog};
use crate::value::Value;

pub(crate) const FIELD_COUNT_LEN: usize = 8;
pub(crate) const TYPE_TAG_LEN: usize = 4;
pub(crate) const LENGTH_PREFIX_LEN: usize = 4;
pub(crate) const FIXED_WIDTH_LEN: usize = 8;
pub(crate) const BOOL_LEN: usize = 1;

/// Rounds `len` up to the next multiple of 8.
pub(crate) fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Encodes a row's columns and log metadata into a [`DataItem`].
///
/// # Errors
///
/// Returns [`CodecError::FieldCountMismatch`] if the row's column count
/// differs from `fields.len()`, [`CodecError::ValueTooLarge`] if a text or
/// blob reaches [`MAX_VALUE_SIZE`], or [`CodecError::OutOfMemory`] if the
/// output buffer cannot be allocated.
pub fn encode_row(row: &RowWithLog, fields: &[FieldInfo]) -> CodecResult<DataItem> {
    let value = encode_values(&row.columns, fields)?;
    Ok(DataItem::with_log(value, &row.log))
}

/// Encodes a sequence of column values laid out by `fields`.
///
/// # Errors
///
/// See [`encode_row`].
pub fn encode_values(values: &[Value], fields: &[FieldInfo]) -> CodecResult<Vec<u8>> {
    if values.len() != fields.len() {
        return Err(CodecError::FieldCountMismatch {
            expected: fields.len(),
            actual: values.len(),
        });
    }
    let mut encoder = RowEncoder::with_capacity(encoded_len(values))?;
    encoder.encode(values)?;
    Ok(encoder.into_bytes())
}

/// Exact number of bytes [`encode_values`] produces for `values`.
pub fn encoded_len(values: &[Value]) -> usize {
    FIELD_COUNT_LEN
        + values
            .iter()
            .map(|v| TYPE_TAG_LEN + payload_len(v))
            .sum::<usize>()
}

fn payload_len(value: &Value) -> usize {
    match value {
        Value::Null => LENGTH_PREFIX_LEN,
        Value::Bool(_) => BOOL_LEN,
        Value::Integer(_) | Value::Real(_) => FIXED_WIDTH_LEN,
        Value::Text(s) => LENGTH_PREFIX_LEN + align8(s.len()),
        Value::Blob(b) => LENGTH_PREFIX_LEN + align8(b.len()),
    }
}

/// A row encoder writing into a pre-sized buffer.
pub struct RowEncoder {
    buffer: Vec<u8>,
}

impl RowEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create an encoder whose buffer holds at least `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OutOfMemory`] if the allocation fails.
    pub fn with_capacity(capacity: usize) -> CodecResult<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| CodecError::OutOfMemory {
                requested: capacity,
            })?;
        Ok(Self { buffer })
    }

    /// Encode a full row: the field count followed by every value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ValueTooLarge`] for a text or blob the decoder
    /// would refuse. The buffer is left partially written.
    pub fn encode(&mut self, values: &[Value]) -> CodecResult<()> {
        self.buffer
            .extend_from_slice(&(values.len() as u64).to_le_bytes());
        for value in values {
            self.encode_value(value)?;
        }
        Ok(())
    }

    /// Encode a single tagged value.
    ///
    /// # Errors
    ///
    /// See [`RowEncoder::encode`].
    pub fn encode_value(&mut self, value: &Value) -> CodecResult<()> {
        self.buffer
            .extend_from_slice(&value.storage_type().code().to_le_bytes());
        match value {
            Value::Null => self.encode_null(),
            Value::Bool(b) => self.buffer.push(u8::from(*b)),
            Value::Integer(n) => self.buffer.extend_from_slice(&n.to_le_bytes()),
            Value::Real(x) => self.buffer.extend_from_slice(&x.to_le_bytes()),
            Value::Text(s) => return self.encode_bytes(s.as_bytes()),
            Value::Blob(b) => return self.encode_bytes(b),
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn encode_null(&mut self) {
        self.buffer.extend_from_slice(&0u32.to_le_bytes());
    }

    fn encode_bytes(&mut self, bytes: &[u8]) -> CodecResult<()> {
        if bytes.is_empty() {
            self.encode_null();
            return Ok(());
        }
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|&len| u64::from(len) < MAX_VALUE_SIZE)
            .ok_or(CodecError::ValueTooLarge {
                size: bytes.len() as u64,
                max: MAX_VALUE_SIZE,
            })?;
        self.buffer.extend_from_slice(&len.to_le_bytes());
        self.buffer.extend_from_slice(bytes);
        let padding = align8(bytes.len()) - bytes.len();
        self.buffer.resize(self.buffer.len() + padding, 0);
        Ok(())
    }
}

impl Default for RowEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StorageType;

    fn int_field(name: &str) -> FieldInfo {
        FieldInfo::new(name, StorageType::Integer)
    }

    #[test]
    fn encode_single_integer() {
        let bytes = encode_values(&[Value::Integer(42)], &[int_field("id")]).unwrap();
        let mut expected = 1u64.to_le_bytes().to_vec();
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&42i64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn encode_text_is_padded() {
        let fields = [FieldInfo::new("s", StorageType::Text)];
        let bytes = encode_values(&[Value::from("hello")], &fields).unwrap();
        // count + tag + len + 8 aligned bytes
        assert_eq!(bytes.len(), 8 + 4 + 4 + 8);
        assert_eq!(&bytes[16..21], b"hello");
        assert_eq!(&bytes[21..24], &[0, 0, 0]);
    }

    #[test]
    fn empty_text_written_as_null_payload() {
        let fields = [FieldInfo::new("s", StorageType::Text)];
        let empty = encode_values(&[Value::from("")], &fields).unwrap();
        let null = encode_values(&[Value::Null], &fields).unwrap();
        assert_eq!(empty.len(), null.len());
        // Same payload, only the type tag differs.
        assert_eq!(&empty[12..], &null[12..]);
    }

    #[test]
    fn field_count_mismatch() {
        let err = encode_values(&[Value::Integer(1)], &[]).unwrap_err();
        assert_eq!(
            err,
            CodecError::FieldCountMismatch {
                expected: 0,
                actual: 1
            }
        );
    }

    #[test]
    fn value_at_size_limit_rejected() {
        let fields = [FieldInfo::new("b", StorageType::Blob)];
        let limit = MAX_VALUE_SIZE as usize;
        let err = encode_values(&[Value::Blob(vec![7; limit])], &fields).unwrap_err();
        assert_eq!(
            err,
            CodecError::ValueTooLarge {
                size: MAX_VALUE_SIZE,
                max: MAX_VALUE_SIZE
            }
        );

        // One byte under the limit still survives decoding.
        let value = Value::Blob(vec![7; limit - 1]);
        let bytes = encode_values(std::slice::from_ref(&value), &fields).unwrap();
        let decoded = crate::decoder::decode_values(&bytes).unwrap();
        assert_eq!(decoded, vec![value]);
    }

    #[test]
    fn encoded_len_is_exact() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Integer(-3),
            Value::Real(2.5),
            Value::from("abcdefghi"),
            Value::Blob(vec![1, 2, 3]),
        ];
        let fields: Vec<FieldInfo> = values
            .iter()
            .enumerate()
            .map(|(i, v)| FieldInfo::new(format!("c{i}"), v.storage_type()))
            .collect();
        let bytes = encode_values(&values, &fields).unwrap();
        assert_eq!(bytes.len(), encoded_len(&values));
    }

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
    }
}

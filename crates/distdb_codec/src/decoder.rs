//! Row decoder.

use crate::encoder::{align8, BOOL_LEN, FIXED_WIDTH_LEN, LENGTH_PREFIX_LEN, TYPE_TAG_LEN};
use crate::error::{CodecError, CodecResult};
use crate::field::{FieldInfo, FieldMapping};
use crate::row::{DataItem, RowWithLog};
use crate::value::{StorageType, Value};

/// Hard ceiling on the declared column count of a row.
///
/// Guards against schema drift and corrupted counts allocating huge rows.
pub const MAX_COLUMNS: u64 = 32767;

/// Maximum size of a single text or blob value.
pub const MAX_VALUE_SIZE: u64 = 4 * 1024 * 1024;

/// Decodes a [`DataItem`] produced under the remote schema `remote_fields`.
///
/// Parsing is positional per the remote schema; `mapping` is not consulted
/// here. Callers re-project the returned columns into local order with
/// [`FieldMapping::project`]. Tombstones skip value decoding and come back
/// with no columns.
///
/// # Errors
///
/// Returns a parse failure if the bytes are malformed, the column count
/// exceeds [`MAX_COLUMNS`] or does not match `remote_fields`, or a value is
/// over [`MAX_VALUE_SIZE`].
pub fn decode_row(
    item: &DataItem,
    remote_fields: &[FieldInfo],
    _mapping: &FieldMapping,
) -> CodecResult<RowWithLog> {
    let columns = if item.is_deleted() {
        Vec::new()
    } else {
        let values = decode_values(&item.value)?;
        if values.len() != remote_fields.len() {
            return Err(CodecError::parse_failure(format!(
                "decoded {} columns, remote schema has {}",
                values.len(),
                remote_fields.len()
            )));
        }
        values
    };
    Ok(RowWithLog::new(columns, item.log()))
}

/// Decodes the column values of one encoded row.
///
/// # Errors
///
/// See [`decode_row`].
pub fn decode_values(bytes: &[u8]) -> CodecResult<Vec<Value>> {
    let mut decoder = RowDecoder::new(bytes);
    decoder.decode()
}

/// A decoder over one encoded row.
pub struct RowDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RowDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the field count and every value.
    pub fn decode(&mut self) -> CodecResult<Vec<Value>> {
        let count = self.read_u64()?;
        if count > MAX_COLUMNS {
            return Err(CodecError::TooManyColumns {
                count,
                max: MAX_COLUMNS,
            });
        }
        // Every value needs at least a tag and a one-byte payload, so a
        // count larger than that is a truncated buffer.
        let min_len = (count as usize).saturating_mul(TYPE_TAG_LEN + BOOL_LEN);
        if min_len > self.data.len() - self.pos {
            return Err(self.eof(min_len));
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.decode_value()?);
        }
        Ok(values)
    }

    /// Decode one tagged value.
    pub fn decode_value(&mut self) -> CodecResult<Value> {
        let ty = StorageType::try_from(self.read_u32()?)?;
        match ty {
            StorageType::Null => {
                let marker = self.read_u32()?;
                if marker != 0 {
                    return Err(CodecError::parse_failure(format!(
                        "null marker must be 0, got {marker}"
                    )));
                }
                Ok(Value::Null)
            }
            StorageType::Bool => Ok(Value::Bool(self.read_bytes(BOOL_LEN)?[0] != 0)),
            StorageType::Integer => Ok(Value::Integer(i64::from_le_bytes(self.read_array()?))),
            StorageType::Real => Ok(Value::Real(f64::from_le_bytes(self.read_array()?))),
            StorageType::Text => match self.read_length_prefixed()? {
                None => Ok(Value::Null),
                Some(bytes) => std::str::from_utf8(bytes)
                    .map(|s| Value::Text(s.to_string()))
                    .map_err(|_| CodecError::InvalidUtf8),
            },
            StorageType::Blob => Ok(self
                .read_length_prefixed()?
                .map_or(Value::Null, |bytes| Value::Blob(bytes.to_vec()))),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn eof(&self, needed: usize) -> CodecError {
        CodecError::UnexpectedEof {
            offset: self.pos,
            needed,
            available: self.data.len() - self.pos,
        }
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof(len))?;
        if end > self.data.len() {
            return Err(self.eof(len));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[inline]
    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.read_array::<FIXED_WIDTH_LEN>()?))
    }

    /// Reads a text/blob payload; a zero length means null.
    fn read_length_prefixed(&mut self) -> CodecResult<Option<&'a [u8]>> {
        let len = u64::from(u32::from_le_bytes(
            self.read_array::<LENGTH_PREFIX_LEN>()?,
        ));
        if len == 0 {
            return Ok(None);
        }
        if len >= MAX_VALUE_SIZE {
            return Err(CodecError::ValueTooLarge {
                size: len,
                max: MAX_VALUE_SIZE,
            });
        }
        let len = len as usize;
        let padded = self.read_bytes(align8(len))?;
        Ok(Some(&padded[..len]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_row, encode_values};
    use crate::row::LogInfo;

    fn fields_of(values: &[Value]) -> Vec<FieldInfo> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| FieldInfo::new(format!("c{i}"), v.storage_type()))
            .collect()
    }

    #[test]
    fn decode_mixed_row() {
        let values = vec![
            Value::Integer(42),
            Value::from("hello"),
            Value::Null,
            Value::Bool(false),
            Value::Real(-0.5),
            Value::Blob(vec![9; 17]),
        ];
        let bytes = encode_values(&values, &fields_of(&values)).unwrap();
        assert_eq!(decode_values(&bytes).unwrap(), values);
    }

    #[test]
    fn zero_length_blob_decodes_to_null() {
        let values = vec![Value::Blob(Vec::new()), Value::from("")];
        let bytes = encode_values(&values, &fields_of(&values)).unwrap();
        assert_eq!(decode_values(&bytes).unwrap(), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn column_count_over_ceiling() {
        let bytes = (MAX_COLUMNS + 1).to_le_bytes();
        let err = decode_values(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::TooManyColumns { .. }));
        assert!(err.is_parse_failure());
    }

    #[test]
    fn truncated_buffer() {
        let values = vec![Value::Integer(7), Value::from("abc")];
        let bytes = encode_values(&values, &fields_of(&values)).unwrap();
        for cut in [0, 4, 9, 13, bytes.len() - 1] {
            let err = decode_values(&bytes[..cut]).unwrap_err();
            assert!(err.is_parse_failure(), "cut at {cut}: {err:?}");
        }
    }

    #[test]
    fn oversized_value_rejected() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&StorageType::Blob.code().to_le_bytes());
        bytes.extend_from_slice(&(MAX_VALUE_SIZE as u32).to_le_bytes());
        let err = decode_values(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::ValueTooLarge { .. }));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&77u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(decode_values(&bytes).unwrap_err().is_parse_failure());
    }

    #[test]
    fn nonzero_null_marker_rejected() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&StorageType::Null.code().to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        assert!(decode_values(&bytes).unwrap_err().is_parse_failure());
    }

    #[test]
    fn invalid_utf8_text() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&StorageType::Text.code().to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_values(&bytes).unwrap_err(), CodecError::InvalidUtf8);
    }

    #[test]
    fn tombstone_skips_values() {
        let fields = vec![FieldInfo::new("id", StorageType::Integer)];
        let mut item = encode_row(
            &RowWithLog::new(vec![Value::Integer(1)], LogInfo::default()),
            &fields,
        )
        .unwrap();
        item.flags |= LogInfo::DELETE_FLAG;
        item.value = vec![0xde, 0xad];
        let row = decode_row(&item, &fields, &FieldMapping::identity(1)).unwrap();
        assert!(row.columns.is_empty());
        assert!(row.is_deleted());
    }

    #[test]
    fn count_must_match_remote_schema() {
        let fields = vec![FieldInfo::new("id", StorageType::Integer)];
        let item = encode_row(
            &RowWithLog::new(vec![Value::Integer(1)], LogInfo::default()),
            &fields,
        )
        .unwrap();
        let err = decode_row(&item, &[], &FieldMapping::identity(0)).unwrap_err();
        assert!(err.is_parse_failure());
    }
}

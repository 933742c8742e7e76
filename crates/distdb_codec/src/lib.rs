//! # distdb Codec
//!
//! Binary row codec for distdb synchronization.
//!
//! Every row exchanged between replicas passes through this crate. A row is
//! a positional list of typed [`Value`]s plus change-log metadata
//! ([`LogInfo`]). The codec:
//!
//! - Writes each value behind its storage-type tag
//! - Bounds column count and single-value size on decode
//! - Tolerates schema drift: a [`FieldMapping`] re-projects rows decoded
//!   under the remote schema into the local column order
//!
//! ## Usage
//!
//! ```
//! use distdb_codec::{decode_row, encode_row, FieldInfo, FieldMapping, LogInfo, RowWithLog, StorageType, Value};
//!
//! let fields = vec![
//!     FieldInfo::new("id", StorageType::Integer),
//!     FieldInfo::new("name", StorageType::Text),
//! ];
//! let row = RowWithLog::new(vec![Value::Integer(42), Value::from("hello")], LogInfo::default());
//!
//! let item = encode_row(&row, &fields).unwrap();
//! let decoded = decode_row(&item, &fields, &FieldMapping::identity(fields.len())).unwrap();
//! assert_eq!(decoded, row);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod field;
mod row;
mod transform;
mod value;

pub use decoder::{decode_row, decode_values, RowDecoder, MAX_COLUMNS, MAX_VALUE_SIZE};
pub use encoder::{encode_row, encode_values, encoded_len, RowEncoder};
pub use error::{CodecError, CodecResult};
pub use field::{build_field_mapping, FieldInfo, FieldMapping, NOT_FOUND};
pub use row::{DataItem, LogInfo, RowWithLog};
pub use transform::{transform_data_items, transform_table_data};
pub use value::{StorageType, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("NaN never compares equal", |x| !x.is_nan())
                .prop_map(Value::Real),
            "[a-zA-Z0-9 ]{1,40}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 1..64).prop_map(Value::Blob),
        ]
    }

    fn log_strategy() -> impl Strategy<Value = LogInfo> {
        (
            any::<u64>(),
            any::<u64>(),
            "[a-z0-9]{0,12}",
            "[a-z0-9]{0,12}",
            prop::collection::vec(any::<u8>(), 0..32),
        )
            .prop_map(|(timestamp, write_timestamp, origin_device, device, hash_key)| LogInfo {
                timestamp,
                write_timestamp,
                origin_device,
                device,
                hash_key,
                flags: LogInfo::LOCAL_FLAG,
            })
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_row(
            columns in prop::collection::vec(value_strategy(), 0..12),
            log in log_strategy(),
        ) {
            let fields: Vec<FieldInfo> = columns
                .iter()
                .enumerate()
                .map(|(i, v)| FieldInfo::new(format!("c{i}"), v.storage_type()))
                .collect();
            let row = RowWithLog::new(columns, log);
            let item = encode_row(&row, &fields).unwrap();
            prop_assert_eq!(item.value.len(), encoded_len(&row.columns));
            let decoded = decode_row(&item, &fields, &FieldMapping::identity(fields.len())).unwrap();
            prop_assert_eq!(decoded, row);
        }

        #[test]
        fn mapping_points_at_same_named_field(
            remote in prop::collection::hash_set("[a-e]{1,2}", 0..8),
            local in prop::collection::vec("[a-e]{1,2}", 0..8),
        ) {
            let remote: Vec<FieldInfo> = remote
                .into_iter()
                .map(|n| FieldInfo::new(n, StorageType::Text))
                .collect();
            let local: Vec<FieldInfo> = local
                .into_iter()
                .map(|n| FieldInfo::new(n, StorageType::Text))
                .collect();
            let mapping = build_field_mapping(&remote, &local);
            prop_assert_eq!(mapping.len(), local.len());
            for (i, field) in local.iter().enumerate() {
                match mapping.get(i) {
                    Some(r) => prop_assert_eq!(&remote[r].name, &field.name),
                    None => prop_assert!(remote.iter().all(|f| f.name != field.name)),
                }
            }
        }

        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_values(&bytes);
        }
    }

    #[test]
    fn scenario_int_text_null() {
        let fields = vec![
            FieldInfo::new("n", StorageType::Integer),
            FieldInfo::new("s", StorageType::Text),
            FieldInfo::new("b", StorageType::Blob),
        ];
        let row = RowWithLog::new(
            vec![Value::Integer(42), Value::from("hello"), Value::Null],
            LogInfo::default(),
        );
        let item = encode_row(&row, &fields).unwrap();
        let decoded = decode_row(&item, &fields, &FieldMapping::identity(3)).unwrap();
        assert_eq!(
            decoded.columns,
            vec![Value::Integer(42), Value::from("hello"), Value::Null]
        );
    }
}

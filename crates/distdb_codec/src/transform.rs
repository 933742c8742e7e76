//! Batch conversion between table rows and exchanged data items.

use crate::decoder::decode_row;
use crate::encoder::encode_row;
use crate::error::CodecResult;
use crate::field::{FieldInfo, FieldMapping};
use crate::row::{DataItem, RowWithLog};

/// Encodes every row of a table batch.
///
/// Stops at the first row that fails; no partial batch is returned.
///
/// # Errors
///
/// Propagates the first encode error.
pub fn transform_table_data(
    rows: &[RowWithLog],
    fields: &[FieldInfo],
) -> CodecResult<Vec<DataItem>> {
    rows.iter().map(|row| encode_row(row, fields)).collect()
}

/// Decodes a batch received under `remote` into rows laid out by `local`.
///
/// The field mapping is built once and reused for the whole batch. Local
/// columns missing remotely are filled with null. Tombstones keep an empty
/// column list.
///
/// # Errors
///
/// A malformed item aborts the whole batch.
pub fn transform_data_items(
    items: &[DataItem],
    remote: &[FieldInfo],
    local: &[FieldInfo],
) -> CodecResult<Vec<RowWithLog>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let mapping = FieldMapping::build(remote, local);
    items
        .iter()
        .map(|item| {
            let mut row = decode_row(item, remote, &mapping)?;
            if !row.is_deleted() {
                row.columns = mapping.project(&row.columns);
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::LogInfo;
    use crate::value::{StorageType, Value};
    use crate::CodecError;

    fn field(name: &str, ty: StorageType) -> FieldInfo {
        FieldInfo::new(name, ty)
    }

    fn log(ts: u64) -> LogInfo {
        LogInfo {
            timestamp: ts,
            write_timestamp: ts,
            origin_device: "dev-a".into(),
            device: "dev-a".into(),
            hash_key: ts.to_le_bytes().to_vec(),
            flags: 0,
        }
    }

    #[test]
    fn drifted_batch_projects_into_local_order() {
        let remote = vec![
            field("a", StorageType::Integer),
            field("b", StorageType::Text),
            field("c", StorageType::Integer),
        ];
        let local = vec![
            field("b", StorageType::Text),
            field("c", StorageType::Integer),
            field("d", StorageType::Blob),
        ];
        let rows = vec![RowWithLog::new(
            vec![Value::Integer(1), Value::from("bee"), Value::Integer(3)],
            log(10),
        )];
        let items = transform_table_data(&rows, &remote).unwrap();
        let decoded = transform_data_items(&items, &remote, &local).unwrap();
        assert_eq!(
            decoded[0].columns,
            vec![Value::from("bee"), Value::Integer(3), Value::Null]
        );
        assert_eq!(decoded[0].log, log(10));
    }

    #[test]
    fn tombstones_pass_through() {
        let fields = vec![field("id", StorageType::Integer)];
        let tomb = RowWithLog::tombstone(vec![1, 2], 99, "dev-b");
        let mut tomb_with_cols = tomb.clone();
        tomb_with_cols.columns = vec![Value::Integer(5)];
        let items = transform_table_data(&[tomb_with_cols], &fields).unwrap();
        let decoded = transform_data_items(&items, &fields, &fields).unwrap();
        assert_eq!(decoded, vec![tomb]);
    }

    #[test]
    fn malformed_item_aborts_batch() {
        let fields = vec![field("id", StorageType::Integer)];
        let rows = vec![
            RowWithLog::new(vec![Value::Integer(1)], log(1)),
            RowWithLog::new(vec![Value::Integer(2)], log(2)),
        ];
        let mut items = transform_table_data(&rows, &fields).unwrap();
        items[1].value.truncate(3);
        let err = transform_data_items(&items, &fields, &fields).unwrap_err();
        assert!(err.is_parse_failure());
    }

    #[test]
    fn encode_failure_aborts_batch() {
        let fields = vec![field("id", StorageType::Integer)];
        let rows = vec![RowWithLog::new(vec![], log(1))];
        assert!(matches!(
            transform_table_data(&rows, &fields),
            Err(CodecError::FieldCountMismatch { .. })
        ));
    }
}

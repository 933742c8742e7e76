//! Encode command implementation.

use super::parse_schema;
use distdb_codec::{encode_values, Value};
use distdb_storage::to_hex;

/// Runs the encode command.
pub fn run(schema: &str, values: &str) -> Result<(), Box<dyn std::error::Error>> {
    let fields = parse_schema(schema)?;
    let values: Vec<Value> = serde_json::from_str(values)?;
    let bytes = encode_values(&values, &fields)?;
    tracing::debug!(columns = values.len(), bytes = bytes.len(), "encoded row");
    println!("{}", to_hex(&bytes));
    Ok(())
}

//! Decode command implementation.

use super::{parse_hex, parse_schema};
use distdb_codec::{decode_values, FieldMapping, Value};

/// Runs the decode command.
///
/// Without a schema the values are printed in wire order. With one, the
/// column count is checked against it, and `local` re-projects the row.
pub fn run(
    hex: &str,
    schema: Option<&str>,
    local: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex(hex)?;
    let values = decode_values(&bytes)?;
    let values = match schema {
        None => values,
        Some(schema) => project(values, schema, local)?,
    };
    println!("{}", serde_json::to_string(&values)?);
    Ok(())
}

fn project(
    values: Vec<Value>,
    schema: &str,
    local: Option<&str>,
) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let remote = parse_schema(schema)?;
    if remote.len() != values.len() {
        return Err(format!(
            "decoded {} columns, schema has {}",
            values.len(),
            remote.len()
        )
        .into());
    }
    let Some(local) = local else {
        return Ok(values);
    };
    let local = parse_schema(local)?;
    let mapping = FieldMapping::build(&remote, &local);
    for (i, field) in local.iter().enumerate() {
        if mapping.get(i).is_none() {
            tracing::warn!(field = %field.name, "local field missing remotely, filled with null");
        }
    }
    Ok(mapping.project(&values))
}

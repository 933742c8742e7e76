//! CLI command implementations.

pub mod decode;
pub mod encode;
pub mod identifier;
pub mod simulate;

use distdb_codec::{FieldInfo, StorageType};

/// Parses a `name:type,...` schema string.
pub fn parse_schema(schema: &str) -> Result<Vec<FieldInfo>, String> {
    schema
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|spec| {
            let (name, ty) = spec
                .split_once(':')
                .ok_or_else(|| format!("field `{spec}` is missing a type"))?;
            Ok(FieldInfo::new(name.trim(), parse_type(ty.trim())?))
        })
        .collect()
}

fn parse_type(name: &str) -> Result<StorageType, String> {
    match name.to_ascii_lowercase().as_str() {
        "null" => Ok(StorageType::Null),
        "integer" | "int" => Ok(StorageType::Integer),
        "real" | "float" => Ok(StorageType::Real),
        "text" | "string" => Ok(StorageType::Text),
        "blob" | "bytes" => Ok(StorageType::Blob),
        "bool" => Ok(StorageType::Bool),
        other => Err(format!("unknown storage type `{other}`")),
    }
}

/// Parses lowercase or uppercase hex, ignoring whitespace.
pub fn parse_hex(hex: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(s, 16).map_err(|_| format!("invalid hex byte `{s}`"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_parses_names_and_types() {
        let fields = parse_schema("id:integer, name:TEXT,raw:blob").unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].name, "name");
        assert_eq!(fields[1].storage_type, StorageType::Text);
        assert_eq!(fields[2].storage_type, StorageType::Blob);
    }

    #[test]
    fn schema_rejects_bad_fields() {
        assert!(parse_schema("id").is_err());
        assert!(parse_schema("id:decimal").is_err());
        assert!(parse_schema("").unwrap().is_empty());
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("00ff 1A").unwrap(), vec![0x00, 0xff, 0x1a]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }
}

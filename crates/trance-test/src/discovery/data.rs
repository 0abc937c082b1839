//! External data sources for data-driven tests
//!
//! A data source is a JSON file holding an array of parameter tuples:
//! `[[1, 2, 3], [4, 5, 9]]`. Rows are enumerated in file order.

use crate::value::Value;
use std::fs;
use std::path::Path;

/// Read and validate a data source; the error names the offending entry
pub fn load_rows(path: &Path) -> Result<Vec<Vec<Value>>, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read data source '{}': {}", path.display(), e))?;
    parse_rows(&text).map_err(|e| format!("data source '{}': {}", path.display(), e))
}

pub fn parse_rows(text: &str) -> Result<Vec<Vec<Value>>, String> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
    let serde_json::Value::Array(entries) = json else {
        return Err("expected a JSON array of parameter tuples".to_string());
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            serde_json::Value::Array(items) => Ok(items.iter().map(Value::from_json).collect()),
            other => Err(format!(
                "entry {} is not a parameter tuple (found {})",
                index,
                json_kind(other)
            )),
        })
        .collect()
}

/// Index of the first row whose arity differs from the first row
pub fn inconsistent_arity(rows: &[Vec<Value>]) -> Option<(usize, usize, usize)> {
    let expected = rows.first()?.len();
    rows.iter()
        .enumerate()
        .find(|(_, row)| row.len() != expected)
        .map(|(index, row)| (index, expected, row.len()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

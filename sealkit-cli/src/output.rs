//! Row rendering for `sealkit query`.

use std::io::{self, Write};

use sealkit_db::Value;

/// Renders one cell for the tab-separated table output.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Blob(bytes) => format!("x'{}'", hex::encode(bytes)),
        other => other.as_text().into_owned(),
    }
}

/// Converts one cell to JSON. Blobs become hex strings; non-finite floats
/// become `null`.
pub fn json_cell(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer32(v) => (*v).into(),
        Value::Integer64(v) => (*v).into(),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(v) => v.clone().into(),
        Value::Blob(v) => hex::encode(v).into(),
    }
}

/// Writes a header line of column names followed by one tab-separated line
/// per row.
pub fn write_table(out: &mut impl Write, names: &[String], rows: &[Vec<Value>]) -> io::Result<()> {
    writeln!(out, "{}", names.join("\t"))?;
    for row in rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    Ok(())
}

/// Writes one JSON array per row.
pub fn write_json(out: &mut impl Write, rows: &[Vec<Value>]) -> io::Result<()> {
    for row in rows {
        let cells: Vec<serde_json::Value> = row.iter().map(json_cell).collect();
        serde_json::to_writer(&mut *out, &cells)?;
        writeln!(out)?;
    }
    Ok(())
}

// src/extract.rs

use anyhow::{anyhow, Result};
use dbase::{FieldValue, Reader};
use encoding_rs::Encoding;
use std::path::Path;

use crate::scan::{table::table_encoding, FieldSpec, MatchResult};

/// The matched fields of one record, in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValues {
    pub index: usize,
    pub values: Vec<(String, FieldValue)>,
}

impl RecordValues {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(field_text)
    }
}

/// Text held by a character or memo value, right padding removed.
pub fn field_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim_end().to_string()),
        FieldValue::Memo(s) => Some(s.trim_end().to_string()),
        _ => None,
    }
}

/// Render any value for display.
pub fn display_value(value: &FieldValue) -> String {
    match field_text(value) {
        Some(text) => text,
        None => match value {
            FieldValue::Character(None) => String::new(),
            other => format!("{:?}", other),
        },
    }
}

/// Read the matched fields of every record of a matching table.
#[tracing::instrument(level = "debug", skip_all, fields(table = %m.table_name))]
pub fn extract_values(m: &MatchResult, encoding: &'static Encoding) -> Result<Vec<RecordValues>> {
    extract_fields(&m.path, &m.fields, encoding)
}

/// Read `fields` of every record of the table at `path`.
pub fn extract_fields(
    path: &Path,
    fields: &[FieldSpec],
    encoding: &'static Encoding,
) -> Result<Vec<RecordValues>> {
    let mut reader = Reader::from_path_with_encoding(path, table_encoding(encoding))
        .map_err(|e| anyhow!("opening table {}: {}", path.display(), e))?;

    let mut rows = Vec::new();
    for (index, record) in reader.iter_records().enumerate() {
        let record =
            record.map_err(|e| anyhow!("reading record {} of {}: {}", index, path.display(), e))?;
        let values = fields
            .iter()
            .map(|f| {
                let value = record
                    .get(&f.name)
                    .cloned()
                    .unwrap_or(FieldValue::Character(None));
                (f.name.clone(), value)
            })
            .collect();
        rows.push(RecordValues { index, values });
    }
    Ok(rows)
}

// src/scan/table.rs

use dbase::{encoding::EncodingRs, FieldInfo, FieldType, Reader};
use encoding_rs::Encoding;
use serde::{Serialize, Serializer};
use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const TABLE_EXTENSION: &str = "dbf";

/// Field names whose presence makes a table a translation target.
pub const TARGET_FIELDS: [&str; 2] = ["COMMENT", "_COMMENT"];

/// Fields reported for a matching table.
pub const DEFAULT_ALLOW_LIST: [&str; 6] = ["_SKZ", "_UNAME", "NAME", "LANGNAME", "_COMMENT", "COMMENT"];

/// One entry of a table's field catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", serialize_with = "serialize_field_type")]
    pub field_type: FieldType,
    pub length: u8,
}

impl FieldSpec {
    fn from_info(info: &FieldInfo) -> Self {
        Self {
            name: info.name().to_string(),
            field_type: info.field_type(),
            length: info.length(),
        }
    }

    pub fn is_target(&self) -> bool {
        TARGET_FIELDS.contains(&self.name.as_str())
    }
}

fn serialize_field_type<S: Serializer>(ty: &FieldType, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{:?}", ty))
}

/// An opened table's catalog. Lives only until the table is classified.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub path: PathBuf,
    pub encoding: &'static Encoding,
    pub fields: Vec<FieldSpec>,
}

impl TableDescriptor {
    pub fn has_target(&self) -> bool {
        self.fields.iter().any(FieldSpec::is_target)
    }
}

/// A table that carries `COMMENT` and/or `_COMMENT`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub table_name: String,
    pub directory: PathBuf,
    pub path: PathBuf,
    /// Allow-listed fields, in catalog order.
    pub fields: Vec<FieldSpec>,
    /// `COMMENT`/`_COMMENT` as present in the catalog, whatever the allow-list says.
    pub targets: Vec<FieldSpec>,
}

impl MatchResult {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn target(&self, name: &str) -> Option<&FieldSpec> {
        self.targets.iter().find(|f| f.name == name)
    }

    pub fn target_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.targets.iter()
    }
}

/// Why a candidate file was left out of the scan.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("cannot open for writing: {0}")]
    Open(#[source] io::Error),
    #[error("cannot read table: {0}")]
    Table(String),
    #[error("cannot read directory entry: {0}")]
    Walk(#[source] io::Error),
}

impl SkipReason {
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Open(_) => "open",
            SkipReason::Table(_) => "table",
            SkipReason::Walk(_) => "walk",
        }
    }
}

pub fn is_table_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(TABLE_EXTENSION))
        .unwrap_or(false)
}

pub(crate) fn table_encoding(encoding: &'static Encoding) -> EncodingRs {
    EncodingRs::from(encoding)
}

/// Open `path` read-write, then read its field catalog under `encoding`.
///
/// Both handles are dropped before returning, whatever the outcome.
pub fn inspect_table(path: &Path, encoding: &'static Encoding) -> Result<TableDescriptor, SkipReason> {
    {
        let _writable = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(SkipReason::Open)?;
    }
    read_catalog(path, encoding)
}

/// Read the field catalog without asking for write access.
pub fn read_catalog(path: &Path, encoding: &'static Encoding) -> Result<TableDescriptor, SkipReason> {
    let reader = Reader::from_path_with_encoding(path, table_encoding(encoding))
        .map_err(|e| SkipReason::Table(e.to_string()))?;
    let fields = reader.fields().iter().map(FieldSpec::from_info).collect();

    Ok(TableDescriptor {
        path: path.to_path_buf(),
        encoding,
        fields,
    })
}

/// Keep the allow-listed fields, preserving catalog order.
pub fn select_fields(fields: &[FieldSpec], allow_list: &[String]) -> Vec<FieldSpec> {
    fields
        .iter()
        .filter(|f| allow_list.iter().any(|a| a == &f.name))
        .cloned()
        .collect()
}

/// A table matches iff its field names intersect [`TARGET_FIELDS`].
pub fn classify(descriptor: &TableDescriptor, allow_list: &[String]) -> Option<MatchResult> {
    if !descriptor.has_target() {
        return None;
    }

    let fields = select_fields(&descriptor.fields, allow_list);
    let targets = descriptor.fields.iter().filter(|f| f.is_target()).cloned().collect();

    let path = descriptor.path.clone();
    Some(MatchResult {
        table_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        path,
        fields,
        targets,
    })
}

// src/history/mod.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

/// What was written into one field of one record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub original: String,
    pub translated: String,
    pub target_language: String,
    pub translated_at: DateTime<Utc>,
}

/// JSON-backed journal of translations written back into tables.
pub struct TranslationHistory {
    path: PathBuf,
    entries: BTreeMap<String, HistoryEntry>,
    dirty: bool,
}

impl TranslationHistory {
    /// Load the journal at `path`; a missing file is an empty journal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("opening translation history {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing translation history {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded translation history");
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    /// `<table path>#<record index>#<field>`
    pub fn key(table: &Path, record: usize, field: &str) -> String {
        format!("{}#{}#{}", table.display(), record, field)
    }

    pub fn get(&self, table: &Path, record: usize, field: &str) -> Option<&HistoryEntry> {
        self.entries.get(&Self::key(table, record, field))
    }

    /// True if `current` is exactly what this tool last wrote into that field.
    pub fn is_translated(&self, table: &Path, record: usize, field: &str, current: &str) -> bool {
        self.get(table, record, field)
            .map(|e| e.translated.trim_end() == current.trim_end())
            .unwrap_or(false)
    }

    pub fn record(
        &mut self,
        table: &Path,
        record: usize,
        field: &str,
        original: &str,
        translated: &str,
        target_language: &str,
    ) {
        self.entries.insert(
            Self::key(table, record, field),
            HistoryEntry {
                original: original.to_string(),
                translated: translated.to_string(),
                target_language: target_language.to_string(),
                translated_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the journal if anything changed since the last save.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating history directory {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &self.entries)
            .context("serializing translation history")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("writing translation history {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

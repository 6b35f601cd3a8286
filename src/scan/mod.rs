// src/scan/mod.rs

pub mod summary;
pub mod table;

use anyhow::{bail, Context, Result};
use encoding_rs::Encoding;
use glob::{glob_with, MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use summary::ScanSummary;
pub use table::{
    classify, inspect_table, read_catalog, FieldSpec, MatchResult, SkipReason, TableDescriptor,
    DEFAULT_ALLOW_LIST, TARGET_FIELDS,
};

use table::{is_table_file, TABLE_EXTENSION};

/// What happened to one candidate file.
#[derive(Debug)]
pub enum ScanOutcome {
    Matched(MatchResult),
    NoTarget { path: PathBuf },
    Skipped { path: PathBuf, reason: SkipReason },
}

impl ScanOutcome {
    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            ScanOutcome::Matched(m) => Some(m),
            _ => None,
        }
    }
}

/// Walks a directory tree and classifies every `.dbf` table in it.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    encoding: &'static Encoding,
    allow_list: Vec<String>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, encoding: &'static Encoding) -> Self {
        Self {
            root: root.into(),
            encoding,
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_allow_list(mut self, allow_list: Vec<String>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily inspect every table under the root, one at a time.
    ///
    /// Each call walks the filesystem again. Per-file failures come back as
    /// [`ScanOutcome::Skipped`]; only an unusable root is an error.
    pub fn scan(&self) -> Result<impl Iterator<Item = ScanOutcome> + '_> {
        if !self.root.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        info!(root = %self.root.display(), encoding = self.encoding.name(), "scanning for COMMENT fields");

        let pattern = format!(
            "{}/**/*.{}",
            Pattern::escape(&self.root.to_string_lossy()),
            TABLE_EXTENSION
        );
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let paths = glob_with(&pattern, options)
            .with_context(|| format!("building table pattern for {}", self.root.display()))?;

        Ok(paths.filter_map(move |entry| match entry {
            Ok(path) if path.is_file() && is_table_file(&path) => Some(self.inspect(path)),
            Ok(_) => None,
            Err(err) => {
                let path = err.path().to_path_buf();
                warn!(path = %path.display(), error = %err, "cannot read directory entry");
                Some(ScanOutcome::Skipped {
                    path,
                    reason: SkipReason::Walk(err.into_error()),
                })
            }
        }))
    }

    /// Only the matching tables.
    pub fn matches(&self) -> Result<impl Iterator<Item = MatchResult> + '_> {
        Ok(self.scan()?.filter_map(ScanOutcome::into_match))
    }

    /// Run the whole scan and tally the outcomes.
    pub fn summarize(&self) -> Result<ScanSummary> {
        let summary = ScanSummary::from_outcomes(self.scan()?);
        info!(
            candidates = summary.candidates,
            matched = summary.matched,
            skipped = summary.skipped_total(),
            "found {} files",
            summary.matched
        );
        Ok(summary)
    }

    fn inspect(&self, path: PathBuf) -> ScanOutcome {
        match inspect_table(&path, self.encoding) {
            Ok(descriptor) => match classify(&descriptor, &self.allow_list) {
                Some(m) => {
                    info!(table = %m.table_name, "table contains COMMENT or _COMMENT field");
                    ScanOutcome::Matched(m)
                }
                None => {
                    debug!(path = %path.display(), "no COMMENT fields");
                    ScanOutcome::NoTarget { path }
                }
            },
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping table");
                ScanOutcome::Skipped { path, reason }
            }
        }
    }
}

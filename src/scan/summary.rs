use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf};

use super::{MatchResult, ScanOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub kind: &'static str,
    pub message: String,
}

/// Tally of one scan: every outcome is counted, matches and skips are kept.
#[derive(Debug, Default, Serialize)]
pub struct ScanSummary {
    pub candidates: usize,
    pub matched: usize,
    pub without_target: usize,
    /// skip kind → count
    pub skipped: BTreeMap<&'static str, usize>,
    pub skipped_files: Vec<SkippedFile>,
    pub matches: Vec<MatchResult>,
}

impl ScanSummary {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = ScanOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }

    pub fn record(&mut self, outcome: ScanOutcome) {
        self.candidates += 1;
        match outcome {
            ScanOutcome::Matched(m) => {
                self.matched += 1;
                self.matches.push(m);
            }
            ScanOutcome::NoTarget { .. } => self.without_target += 1,
            ScanOutcome::Skipped { path, reason } => {
                *self.skipped.entry(reason.kind()).or_insert(0) += 1;
                self.skipped_files.push(SkippedFile {
                    path,
                    kind: reason.kind(),
                    message: reason.to_string(),
                });
            }
        }
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SkipReason;
    use std::io;

    #[test]
    fn tallies_each_outcome_kind() {
        let summary = ScanSummary::from_outcomes(vec![
            ScanOutcome::NoTarget {
                path: PathBuf::from("a.dbf"),
            },
            ScanOutcome::Skipped {
                path: PathBuf::from("b.dbf"),
                reason: SkipReason::Open(io::Error::new(io::ErrorKind::PermissionDenied, "locked")),
            },
            ScanOutcome::Skipped {
                path: PathBuf::from("c.dbf"),
                reason: SkipReason::Table("bad header".into()),
            },
            ScanOutcome::Skipped {
                path: PathBuf::from("d.dbf"),
                reason: SkipReason::Table("bad header".into()),
            },
        ]);

        assert_eq!(summary.candidates, 4);
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.without_target, 1);
        assert_eq!(summary.skipped_total(), 3);
        assert_eq!(summary.skipped.get("open"), Some(&1));
        assert_eq!(summary.skipped.get("table"), Some(&2));
        assert_eq!(summary.skipped_files[0].message, "cannot open for writing: locked");
    }

    #[test]
    fn empty_scan_reports_zero() {
        let summary = ScanSummary::from_outcomes(Vec::new());
        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.matched, 0);
        assert!(summary.matches.is_empty());
    }
}

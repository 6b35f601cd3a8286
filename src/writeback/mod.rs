// src/writeback/mod.rs

pub mod layout;
pub mod policy;

use anyhow::{bail, Result};
use dbase::FieldType;
use encoding_rs::Encoding;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use layout::{FieldSlot, TableLayout};
pub use policy::{FieldPrecedence, RerunPolicy};

use crate::extract::extract_fields;
use crate::history::TranslationHistory;
use crate::scan::{FieldSpec, MatchResult};
use crate::translate::Translate;

#[derive(Debug, Clone, Copy, Default)]
pub struct WritebackOptions {
    pub precedence: FieldPrecedence,
    pub rerun: RerunPolicy,
    /// Translate and count, but touch neither the table nor the history.
    pub dry_run: bool,
}

/// Per-table counters; each (record, field) visited lands in exactly one
/// of `translated`, `unchanged`, `skipped_empty`, `skipped_translated`,
/// `skipped_unsupported` or `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WritebackSummary {
    pub table: String,
    pub fields: Vec<String>,
    pub records: usize,
    pub translated: usize,
    pub unchanged: usize,
    pub skipped_empty: usize,
    pub skipped_translated: usize,
    pub skipped_unsupported: usize,
    pub truncated: usize,
    pub failed: usize,
}

/// Translate the target field(s) of one table and store the results in place.
///
/// Text is read and written under `encoding`. A failed translation only
/// costs that record; a failed read or write of the table aborts the table,
/// but what was already stored stays in the journal.
#[tracing::instrument(level = "info", skip_all, fields(table = %m.table_name))]
pub async fn translate_table<T: Translate>(
    m: &MatchResult,
    translator: &T,
    history: &mut TranslationHistory,
    encoding: &'static Encoding,
    options: &WritebackOptions,
) -> Result<WritebackSummary> {
    let targets = options.precedence.select(m);
    let mut summary = WritebackSummary {
        table: m.table_name.clone(),
        fields: targets.iter().map(|f| f.name.clone()).collect(),
        ..Default::default()
    };
    if targets.is_empty() {
        return Ok(summary);
    }

    let outcome = translate_records(m, &targets, translator, history, encoding, options, &mut summary).await;
    let saved = if options.dry_run { Ok(()) } else { history.save() };
    outcome.and(saved)?;

    info!(
        records = summary.records,
        translated = summary.translated,
        failed = summary.failed,
        "completed processing table"
    );
    Ok(summary)
}

async fn translate_records<T: Translate>(
    m: &MatchResult,
    targets: &[&FieldSpec],
    translator: &T,
    history: &mut TranslationHistory,
    encoding: &'static Encoding,
    options: &WritebackOptions,
    summary: &mut WritebackSummary,
) -> Result<()> {
    let (text_fields, unsupported): (Vec<FieldSpec>, Vec<FieldSpec>) = targets
        .iter()
        .map(|f| (*f).clone())
        .partition(|f| f.field_type == FieldType::Character);
    for field in &unsupported {
        debug!(field = %field.name, field_type = ?field.field_type, "only character fields are written");
    }

    let rows = extract_fields(&m.path, &text_fields, encoding)?;
    summary.records = rows.len();
    summary.skipped_unsupported = rows.len() * unsupported.len();

    let layout = if options.dry_run || text_fields.is_empty() {
        None
    } else {
        Some(TableLayout::read(&m.path)?)
    };
    if let Some(layout) = &layout {
        if layout.num_records() != rows.len() as u64 {
            bail!(
                "{}: header lists {} records but {} were read",
                m.table_name,
                layout.num_records(),
                rows.len()
            );
        }
    }

    for row in &rows {
        for field in &text_fields {
            let text = match row.text(&field.name) {
                Some(text) if !text.trim().is_empty() => text,
                _ => {
                    summary.skipped_empty += 1;
                    continue;
                }
            };

            if options.rerun == RerunPolicy::SkipTranslated
                && history.is_translated(&m.path, row.index, &field.name, &text)
            {
                summary.skipped_translated += 1;
                continue;
            }

            let translated = match translator.translate(&text).await {
                Ok(t) => t,
                Err(err) => {
                    warn!(record = row.index, field = %field.name, error = %err, "translation failed; skipping record");
                    summary.failed += 1;
                    continue;
                }
            };

            let (stored, truncated) = fit_to_field(translated.trim(), field.length, encoding);
            if stored == text.trim() {
                debug!(record = row.index, field = %field.name, "translation unchanged");
                summary.unchanged += 1;
                if !options.dry_run {
                    history.record(&m.path, row.index, &field.name, &text, &stored, translator.target_language());
                }
                continue;
            }
            if truncated {
                warn!(record = row.index, field = %field.name, length = field.length, "translation truncated to field length");
                summary.truncated += 1;
            }

            if let Some(layout) = &layout {
                let (bytes, _, replaced) = encoding.encode(&stored);
                if replaced {
                    warn!(record = row.index, field = %field.name, code_page = encoding.name(), "translation has characters outside the code page");
                }
                layout.write_field(row.index, layout.slot(field)?, &bytes)?;
                history.record(&m.path, row.index, &field.name, &text, &stored, translator.target_language());
            }
            debug!(record = row.index, field = %field.name, original = %text, translated = %stored, "updated record");
            summary.translated += 1;
        }
    }
    Ok(())
}

/// Cut `text` on a char boundary so its encoded form fits `length` bytes.
pub fn fit_to_field(text: &str, length: u8, encoding: &'static Encoding) -> (String, bool) {
    let limit = usize::from(length);
    let fits = |s: &str| encoding.encode(s).0.len() <= limit;
    if fits(text) {
        return (text.to_string(), false);
    }
    let end = text
        .char_indices()
        .map(|(idx, _)| idx)
        .rev()
        .find(|&idx| fits(&text[..idx]))
        .unwrap_or(0);
    (text[..end].trim_end().to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_values;
    use crate::scan::table::tests::{write_both_table, write_comment_table};
    use crate::scan::Scanner;
    use anyhow::anyhow;
    use std::{
        cell::{Cell, RefCell},
        fs,
        path::{Path, PathBuf},
    };
    use tempfile::tempdir;

    /// Prefixes the text with "EN:"; fails for texts containing "boom".
    struct FakeTranslator {
        calls: Cell<usize>,
        seen: RefCell<Vec<String>>,
    }

    impl FakeTranslator {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Translate for FakeTranslator {
        fn target_language(&self) -> &str {
            "en"
        }

        async fn translate(&self, text: &str) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.seen.borrow_mut().push(text.to_string());
            if text.contains("boom") {
                anyhow::bail!("service unavailable");
            }
            Ok(format!("EN:{}", text))
        }
    }

    /// Deletes the table when asked to translate "vanish", so the next store fails.
    struct TableRemover {
        table: PathBuf,
    }

    impl Translate for TableRemover {
        fn target_language(&self) -> &str {
            "en"
        }

        async fn translate(&self, text: &str) -> Result<String> {
            if text == "vanish" {
                fs::remove_file(&self.table)?;
            }
            Ok(format!("EN:{}", text))
        }
    }

    fn single_match(root: &Path) -> Result<MatchResult> {
        match_under(root, encoding_rs::WINDOWS_1252)
    }

    fn match_under(root: &Path, encoding: &'static Encoding) -> Result<MatchResult> {
        Scanner::new(root, encoding)
            .matches()?
            .next()
            .ok_or_else(|| anyhow!("no match under {}", root.display()))
    }

    /// Overwrite COMMENT of `record` with `text` encoded under `encoding`.
    fn store_comment(m: &MatchResult, record: usize, text: &str, encoding: &'static Encoding) -> Result<()> {
        let layout = TableLayout::read(&m.path)?;
        let comment = m.target("COMMENT").ok_or_else(|| anyhow!("no COMMENT"))?;
        layout.write_field(record, layout.slot(comment)?, &encoding.encode(text).0)
    }

    fn texts(m: &MatchResult, field: &str) -> Result<Vec<Option<String>>> {
        Ok(extract_values(m, encoding_rs::WINDOWS_1252)?
            .iter()
            .map(|r| r.text(field).filter(|t| !t.is_empty()))
            .collect())
    }

    #[tokio::test]
    async fn translates_and_skips_on_rerun() -> Result<()> {
        let dir = tempdir()?;
        write_comment_table(
            &dir.path().join("t.dbf"),
            &[("a", "eins"), ("b", ""), ("c", "drei")],
        )?;
        let m = single_match(dir.path())?;
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;
        let translator = FakeTranslator::new();
        let options = WritebackOptions::default();

        let first = translate_table(&m, &translator, &mut history, encoding_rs::WINDOWS_1252, &options).await?;
        assert_eq!(first.records, 3);
        assert_eq!(first.translated, 2);
        assert_eq!(first.skipped_empty, 1);
        assert_eq!(translator.calls.get(), 2);
        assert_eq!(
            texts(&m, "COMMENT")?,
            vec![Some("EN:eins".to_string()), None, Some("EN:drei".to_string())]
        );

        // second run: everything already translated
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;
        let second = translate_table(&m, &translator, &mut history, encoding_rs::WINDOWS_1252, &options).await?;
        assert_eq!(second.translated, 0);
        assert_eq!(second.skipped_translated, 2);
        assert_eq!(translator.calls.get(), 2);

        let retranslate = WritebackOptions {
            rerun: RerunPolicy::Retranslate,
            ..options
        };
        let third = translate_table(&m, &translator, &mut history, encoding_rs::WINDOWS_1252, &retranslate).await?;
        assert_eq!(third.translated, 2);
        assert_eq!(translator.calls.get(), 4);
        assert_eq!(texts(&m, "COMMENT")?[0].as_deref(), Some("EN:EN:eins"));
        Ok(())
    }

    #[tokio::test]
    async fn precedence_decides_which_field_is_written() -> Result<()> {
        for (precedence, comment, underscore) in [
            (FieldPrecedence::CommentFirst, "EN:plain", "under"),
            (FieldPrecedence::UnderscoreFirst, "plain", "EN:under"),
            (FieldPrecedence::Both, "EN:plain", "EN:under"),
        ] {
            let dir = tempdir()?;
            write_both_table(&dir.path().join("b.dbf"), &[("n", "plain", "under")])?;
            let m = single_match(dir.path())?;
            let mut history = TranslationHistory::open(dir.path().join("history.json"))?;
            let options = WritebackOptions {
                precedence,
                ..Default::default()
            };

            translate_table(&m, &FakeTranslator::new(), &mut history, encoding_rs::WINDOWS_1252, &options).await?;
            assert_eq!(texts(&m, "COMMENT")?[0].as_deref(), Some(comment), "{:?}", precedence);
            assert_eq!(texts(&m, "_COMMENT")?[0].as_deref(), Some(underscore), "{:?}", precedence);
        }
        Ok(())
    }

    #[tokio::test]
    async fn one_failed_record_does_not_stop_the_table() -> Result<()> {
        let dir = tempdir()?;
        write_comment_table(
            &dir.path().join("t.dbf"),
            &[("a", "eins"), ("b", "boom"), ("c", "drei")],
        )?;
        let m = single_match(dir.path())?;
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;

        let summary = translate_table(
            &m,
            &FakeTranslator::new(),
            &mut history,
            encoding_rs::WINDOWS_1252,
            &WritebackOptions::default(),
        )
        .await?;
        assert_eq!(summary.translated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            texts(&m, "COMMENT")?,
            vec![
                Some("EN:eins".to_string()),
                Some("boom".to_string()),
                Some("EN:drei".to_string())
            ]
        );
        assert_eq!(history.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_leaves_table_and_history_alone() -> Result<()> {
        let dir = tempdir()?;
        write_comment_table(&dir.path().join("t.dbf"), &[("a", "eins")])?;
        let m = single_match(dir.path())?;
        let history_path = dir.path().join("history.json");
        let mut history = TranslationHistory::open(&history_path)?;
        let options = WritebackOptions {
            dry_run: true,
            ..Default::default()
        };

        let summary = translate_table(&m, &FakeTranslator::new(), &mut history, encoding_rs::WINDOWS_1252, &options).await?;
        assert_eq!(summary.translated, 1);
        assert_eq!(texts(&m, "COMMENT")?[0].as_deref(), Some("eins"));
        assert!(history.is_empty());
        assert!(!history_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn cyrillic_round_trips_under_the_chosen_code_page() -> Result<()> {
        let cp1251 = encoding_rs::WINDOWS_1251;
        let dir = tempdir()?;
        let path = dir.path().join("ru.dbf");
        write_comment_table(&path, &[("a", "x"), ("b", "x")])?;
        let m = match_under(dir.path(), cp1251)?;
        let long = "Я".repeat(39);
        store_comment(&m, 0, "Привет", cp1251)?;
        store_comment(&m, 1, &long, cp1251)?;

        let translator = FakeTranslator::new();
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;
        let summary = translate_table(&m, &translator, &mut history, cp1251, &WritebackOptions::default()).await?;

        assert_eq!(*translator.seen.borrow(), vec!["Привет".to_string(), long.clone()]);
        assert_eq!(summary.translated, 2);
        // one byte per letter: 3 + 39 > 40
        assert_eq!(summary.truncated, 1);

        let rows = extract_values(&m, cp1251)?;
        assert_eq!(rows[0].text("COMMENT").as_deref(), Some("EN:Привет"));
        let expected = format!("EN:{}", "Я".repeat(37));
        assert_eq!(rows[1].text("COMMENT").as_deref(), Some(expected.as_str()));

        let raw = fs::read(&path)?;
        let encoded = cp1251.encode("EN:Привет").0;
        assert_eq!(encoded.len(), 9);
        assert!(raw.windows(encoded.len()).any(|w| w == &encoded[..]));
        Ok(())
    }

    #[tokio::test]
    async fn overlong_translation_is_counted_as_truncated() -> Result<()> {
        let dir = tempdir()?;
        let original = "a".repeat(38);
        write_comment_table(&dir.path().join("t.dbf"), &[("a", original.as_str())])?;
        let m = single_match(dir.path())?;
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;

        let summary = translate_table(
            &m,
            &FakeTranslator::new(),
            &mut history,
            encoding_rs::WINDOWS_1252,
            &WritebackOptions::default(),
        )
        .await?;
        assert_eq!(summary.translated, 1);
        assert_eq!(summary.truncated, 1);
        let stored = texts(&m, "COMMENT")?[0].clone().unwrap_or_default();
        assert_eq!(stored.len(), 40);
        assert!(stored.starts_with("EN:aaa"));
        Ok(())
    }

    #[tokio::test]
    async fn memo_targets_are_left_alone() -> Result<()> {
        let dir = tempdir()?;
        write_comment_table(&dir.path().join("t.dbf"), &[("a", "eins"), ("b", "zwei")])?;
        let mut m = single_match(dir.path())?;
        for target in &mut m.targets {
            target.field_type = FieldType::Memo;
        }
        let translator = FakeTranslator::new();
        let mut history = TranslationHistory::open(dir.path().join("history.json"))?;

        let summary = translate_table(&m, &translator, &mut history, encoding_rs::WINDOWS_1252, &WritebackOptions::default()).await?;
        assert_eq!(summary.records, 2);
        assert_eq!(summary.skipped_unsupported, 2);
        assert_eq!(summary.translated, 0);
        assert_eq!(translator.calls.get(), 0);
        assert_eq!(
            texts(&m, "COMMENT")?,
            vec![Some("eins".to_string()), Some("zwei".to_string())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn aborted_table_keeps_stored_records_in_history() -> Result<()> {
        let dir = tempdir()?;
        let table = dir.path().join("t.dbf");
        write_comment_table(&table, &[("a", "eins"), ("b", "vanish"), ("c", "drei")])?;
        let m = single_match(dir.path())?;
        let history_path = dir.path().join("history.json");
        let mut history = TranslationHistory::open(&history_path)?;
        let translator = TableRemover { table: table.clone() };

        let result = translate_table(&m, &translator, &mut history, encoding_rs::WINDOWS_1252, &WritebackOptions::default()).await;
        assert!(result.is_err());

        let reloaded = TranslationHistory::open(&history_path)?;
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.is_translated(&m.path, 0, "COMMENT", "EN:eins"));
        Ok(())
    }

    #[test]
    fn long_translations_are_cut_to_the_field() {
        let (text, cut) = fit_to_field("short", 10, encoding_rs::WINDOWS_1252);
        assert_eq!((text.as_str(), cut), ("short", false));

        let (text, cut) = fit_to_field("exactly ten", 10, encoding_rs::WINDOWS_1252);
        assert_eq!((text.as_str(), cut), ("exactly te", true));

        // two bytes per char in UTF-8
        let (text, cut) = fit_to_field("ääää", 5, encoding_rs::UTF_8);
        assert_eq!((text.as_str(), cut), ("ää", true));
        // one byte per char in windows-1252
        let (text, cut) = fit_to_field("ääää", 5, encoding_rs::WINDOWS_1252);
        assert_eq!((text.as_str(), cut), ("ääää", false));
    }
}

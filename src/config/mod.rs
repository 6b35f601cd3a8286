// src/config/mod.rs

pub mod code_page;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub use code_page::{resolve_encoding, CodePage};

use crate::scan::table::DEFAULT_ALLOW_LIST;
use crate::translate::DEFAULT_ENDPOINT;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const HISTORY_FILE: &str = "translation_history.json";

/// Settings persisted in the JSON config file.
///
/// Keys this struct does not know about are kept in `extra` and written
/// back untouched on save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_encoding")]
    pub default_encoding: String,
    /// code page → display name, as shown by `config code-pages`
    #[serde(default = "default_code_pages")]
    pub code_pages: BTreeMap<String, String>,
    #[serde(default)]
    pub translator_settings: TranslatorSettings,
    #[serde(default)]
    pub directories: Directories,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslatorSettings {
    pub target_language: String,
    pub source_language: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Total attempts per text, including the first one.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Directories {
    pub db_root_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    pub allow_list: Vec<String>,
}

fn default_encoding() -> String {
    "cp1252".to_string()
}

fn default_code_pages() -> BTreeMap<String, String> {
    [
        ("cp1250", "Central European (Windows-1250)"),
        ("cp1251", "Cyrillic (Windows-1251)"),
        ("cp1252", "Western European (Windows-1252)"),
        ("cp1253", "Greek (Windows-1253)"),
        ("cp1254", "Turkish (Windows-1254)"),
        ("cp866", "Cyrillic (DOS 866)"),
        ("utf-8", "Unicode (UTF-8)"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_encoding: default_encoding(),
            code_pages: default_code_pages(),
            translator_settings: TranslatorSettings::default(),
            directories: Directories::default(),
            scan: ScanSettings::default(),
            extra: Map::new(),
        }
    }
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            source_language: "auto".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Look up a code page by its code or by its display name.
    pub fn code_page(&self, input: &str) -> Result<CodePage> {
        CodePage::lookup(input, &self.code_pages)
    }

    /// The code page configured as default.
    pub fn default_code_page(&self) -> Result<CodePage> {
        self.code_page(&self.default_encoding)
            .context("resolving `default_encoding` from settings")
    }
}

/// Owns the settings file and its parsed contents.
///
/// Every setter saves immediately; there is no background writer.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Settings,
}

impl ConfigStore {
    /// Load `path`, failing if it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file =
            File::open(&path).with_context(|| format!("opening config {}", path.display()))?;
        let settings: Settings = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(Self { path, settings })
    }

    /// Load `path`, falling back to defaults when the file is missing.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }
        warn!(path = %path.display(), "config not found; using default settings");
        Ok(Self {
            path,
            settings: Settings::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Default location of the translation history, next to the config file.
    pub fn history_path(&self) -> PathBuf {
        config_dir(&self.path).join(HISTORY_FILE)
    }

    /// Write the settings atomically: temp file in the same directory, then rename.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir(&self.path);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &self.settings)
            .context("serializing settings")?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("writing config {}", self.path.display()))?;

        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    pub fn set_default_encoding(&mut self, input: &str) -> Result<CodePage> {
        let page = self.settings.code_page(input)?;
        self.settings.default_encoding = page.code.clone();
        self.save()?;
        Ok(page)
    }

    pub fn set_target_language(&mut self, language: &str) -> Result<()> {
        let language = language.trim();
        if language.is_empty() {
            bail!("target language must not be empty");
        }
        self.settings.translator_settings.target_language = language.to_string();
        self.save()
    }

    pub fn set_db_root_dir(&mut self, dir: impl Into<PathBuf>) -> Result<()> {
        self.settings.directories.db_root_dir = Some(dir.into());
        self.save()
    }

    /// Set a value at a nested key path, e.g. `["translator_settings", "target_language"]`.
    ///
    /// Intermediate objects are created as needed. The result must still
    /// deserialize into [`Settings`], otherwise nothing is changed.
    pub fn update_nested(&mut self, key_path: &[&str], value: Value) -> Result<()> {
        let (last, parents) = key_path
            .split_last()
            .ok_or_else(|| anyhow!("empty key path"))?;

        let mut doc = serde_json::to_value(&self.settings).context("serializing settings")?;
        let mut node = &mut doc;
        for key in parents {
            let obj = node
                .as_object_mut()
                .ok_or_else(|| anyhow!("`{}` is not an object", key))?;
            node = obj
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(|| anyhow!("parent of `{}` is not an object", last))?
            .insert(last.to_string(), value);

        let updated: Settings = serde_json::from_value(doc)
            .with_context(|| format!("invalid value for `{}`", key_path.join(".")))?;
        self.settings = updated;
        self.save()
    }
}

fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

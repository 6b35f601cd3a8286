use anyhow::{anyhow, Result};
use encoding_rs::Encoding;
use std::collections::BTreeMap;

/// A code page chosen by the user, resolved to an `encoding_rs` encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CodePage {
    pub code: String,
    pub display_name: Option<String>,
    pub encoding: &'static Encoding,
}

impl CodePage {
    /// Accepts either a code (`cp1251`) or one of the configured display
    /// names (`Cyrillic (Windows-1251)`).
    pub fn lookup(input: &str, code_pages: &BTreeMap<String, String>) -> Result<Self> {
        let input = input.trim();
        let code = if code_pages.contains_key(input) {
            input.to_string()
        } else if let Some((code, _)) = code_pages.iter().find(|(_, name)| name.as_str() == input) {
            code.clone()
        } else {
            input.to_ascii_lowercase()
        };

        let encoding = resolve_encoding(&code)?;
        Ok(Self {
            display_name: code_pages.get(&code).cloned(),
            code,
            encoding,
        })
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.code)
    }
}

/// Resolve a code page label through the WHATWG label table.
pub fn resolve_encoding(code: &str) -> Result<&'static Encoding> {
    Encoding::for_label(code.trim().as_bytes())
        .ok_or_else(|| anyhow!("unsupported code page `{}`", code))
}

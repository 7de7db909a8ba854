//! File extension to highlighter syntax lookup.
//!
//! Built once from the `[languages]` config table and shared read-only with
//! the highlight stage.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Syntax used when the extension is missing or unknown.
pub const FALLBACK_SYNTAX: &str = "text";

/// Extensions for one syntax: either `"cpp cc cxx"` or `["cpp", "cc", "cxx"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageEntry {
    Spaced(String),
    List(Vec<String>),
}

impl LanguageEntry {
    pub fn extensions(&self) -> Vec<&str> {
        match self {
            LanguageEntry::Spaced(s) => s.split_whitespace().collect(),
            LanguageEntry::List(v) => v.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageMap {
    by_extension: HashMap<String, String>,
}

impl LanguageMap {
    /// Build the lookup from `syntax -> extensions` entries.
    ///
    /// Extensions are matched case-insensitively and without the leading dot.
    /// If two syntaxes claim the same extension, the later one (by name) wins.
    pub fn from_entries(entries: &BTreeMap<String, LanguageEntry>) -> Self {
        let mut by_extension = HashMap::new();
        for (syntax, entry) in entries {
            for ext in entry.extensions() {
                let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                if !ext.is_empty() {
                    by_extension.insert(ext, syntax.clone());
                }
            }
        }
        Self { by_extension }
    }

    /// Mapping for common contest languages, used when none is configured.
    pub fn builtin() -> Self {
        let entries: BTreeMap<String, LanguageEntry> = [
            ("c", "c h"),
            ("cpp", "cpp cc cxx c++ hpp hh"),
            ("csharp", "cs"),
            ("delphi", "pas dpr pp"),
            ("go", "go"),
            ("haskell", "hs"),
            ("java", "java"),
            ("javascript", "js"),
            ("kotlin", "kt kts"),
            ("python", "py py3"),
            ("ruby", "rb"),
            ("rust", "rs"),
            ("scala", "scala"),
        ]
        .into_iter()
        .map(|(syntax, exts)| (syntax.to_string(), LanguageEntry::Spaced(exts.to_string())))
        .collect();
        Self::from_entries(&entries)
    }

    /// Syntax for `filename`, or [`FALLBACK_SYNTAX`].
    pub fn syntax_for(&self, filename: &str) -> &str {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
            .map(String::as_str)
            .unwrap_or(FALLBACK_SYNTAX)
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

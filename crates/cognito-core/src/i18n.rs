//! Translation lookup by dotted key
//!
//! Each locale is a nested JSON table (`{"chat": {"you": "You"}}`) addressed
//! as `chat.you`. Lookups fall back from the requested locale to
//! [`DEFAULT_LOCALE`], then to a caller-supplied fallback, then to the key.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

pub const DEFAULT_LOCALE: &str = "en";

const BUNDLED: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en.json")),
    ("es", include_str!("../locales/es.json")),
];

pub struct Translations {
    tables: BTreeMap<String, Value>,
}

impl Translations {
    /// Locales shipped with the crate
    pub fn bundled() -> Self {
        let mut translations = Self {
            tables: BTreeMap::new(),
        };
        for (locale, source) in BUNDLED {
            if let Err(e) = translations.add_locale(locale, source) {
                warn!(locale, error = %e, "Skipping unreadable locale table");
            }
        }
        translations
    }

    pub fn add_locale(&mut self, locale: &str, json: &str) -> Result<()> {
        let table: Value = serde_json::from_str(json)?;
        self.tables.insert(locale.to_string(), table);
        Ok(())
    }

    pub fn locales(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// The exact entry for `key` in `locale`, without any fallback
    pub fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        let mut node = self.tables.get(locale)?;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        node.as_str()
    }

    /// Translate `key`: requested locale, default locale, `fallback`, raw key
    pub fn text(&self, locale: &str, key: &str, fallback: Option<&str>) -> String {
        self.lookup(locale, key)
            .or_else(|| self.lookup(DEFAULT_LOCALE, key))
            .or(fallback)
            .unwrap_or(key)
            .to_string()
    }

    pub fn t(&self, locale: &str, key: &str) -> String {
        self.text(locale, key, None)
    }
}

impl Default for Translations {
    fn default() -> Self {
        Self::bundled()
    }
}

//! Page-level metadata channel.
//!
//! The console mirrors values the backend must be able to read (the
//! anti-forgery token, security policy headers) into `<meta>` entries.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// How a metadata entry is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaKind {
    /// `<meta name="...">`
    Name,
    /// `<meta http-equiv="...">`
    HttpEquiv,
}

impl MetaKind {
    fn attribute(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::HttpEquiv => "http-equiv",
        }
    }
}

/// Page metadata shared between the layer and the trusted backend.
#[derive(Debug, Default)]
pub struct PageMeta {
    entries: Mutex<BTreeMap<(MetaKind, String), String>>,
}

impl PageMeta {
    /// Create empty page metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) an entry.
    pub fn set(&self, kind: MetaKind, key: impl Into<String>, content: impl Into<String>) {
        self.lock().insert((kind, key.into()), content.into());
    }

    /// Set an entry only if absent. Returns true if it was inserted.
    pub fn set_if_absent(
        &self,
        kind: MetaKind,
        key: impl Into<String>,
        content: impl Into<String>,
    ) -> bool {
        let mut entries = self.lock();
        let key = (kind, key.into());
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, content.into());
        true
    }

    /// Get an entry's content.
    pub fn get(&self, kind: MetaKind, key: &str) -> Option<String> {
        self.lock().get(&(kind, key.to_string())).cloned()
    }

    /// Check whether an entry exists.
    pub fn contains(&self, kind: MetaKind, key: &str) -> bool {
        self.lock().contains_key(&(kind, key.to_string()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render all entries as `<meta>` tags, one per line.
    pub fn render(&self) -> String {
        self.lock()
            .iter()
            .map(|((kind, key), content)| {
                format!(
                    r#"<meta {}="{}" content="{}">"#,
                    kind.attribute(),
                    escape_attribute(key),
                    escape_attribute(content)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(MetaKind, String), String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

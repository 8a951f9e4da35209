//! Public/system identifier catalog.
//!
//! A catalog maps `PUBLIC` and `SYSTEM` identifiers of external resources to
//! local URIs. It is shared between threads behind an `Arc`; lookups take a
//! read lock, loading takes the write lock.
//!
//! The process catalog is created lazily from `MARKCHECK_CATALOG_FILES`
//! unless [`crate::initialize`] ran first, in which case it starts empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use thiserror::Error;

use crate::memory::Allocation;

/// Environment variable listing catalog files (separated by `:` or whitespace).
pub const CATALOG_FILES_ENV: &str = "MARKCHECK_CATALOG_FILES";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug)]
struct Entries {
    public: HashMap<String, String>,
    system: HashMap<String, String>,
    usage: Allocation,
}

#[derive(Debug)]
pub struct Catalog {
    entries: RwLock<Entries>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries {
                public: HashMap::new(),
                system: HashMap::new(),
                usage: Allocation::new(0),
            }),
        }
    }

    /// Parse catalog text and add its entries.
    ///
    /// Each non-blank line is `PUBLIC "id" "uri"` or `SYSTEM "id" "uri"`.
    /// Lines starting with `#` are comments. Returns the number of entries
    /// added.
    pub fn load_str(&self, text: &str) -> Result<usize, CatalogError> {
        let mut parsed = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, rest) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| CatalogError::Syntax {
                    line: idx + 1,
                    message: format!("expected identifier after {line}"),
                })?;
            let is_public = match keyword {
                "PUBLIC" => true,
                "SYSTEM" => false,
                other => {
                    return Err(CatalogError::Syntax {
                        line: idx + 1,
                        message: format!("unknown entry type {other}"),
                    });
                }
            };
            let quoted = quoted_fields(rest).ok_or_else(|| CatalogError::Syntax {
                line: idx + 1,
                message: "expected two quoted fields".to_string(),
            })?;
            parsed.push((is_public, quoted.0, quoted.1));
        }

        let count = parsed.len();
        let mut entries = self.entries.write();
        for (is_public, id, uri) in parsed {
            entries.usage.grow(id.len() + uri.len());
            if is_public {
                entries.public.insert(id, uri);
            } else {
                entries.system.insert(id, uri);
            }
        }
        Ok(count)
    }

    pub fn load_file(&self, path: &Path) -> Result<usize, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_str(&text)
    }

    pub fn add_public(&self, id: impl Into<String>, uri: impl Into<String>) {
        let (id, uri) = (id.into(), uri.into());
        let mut entries = self.entries.write();
        entries.usage.grow(id.len() + uri.len());
        entries.public.insert(id, uri);
    }

    #[must_use]
    pub fn resolve_public(&self, id: &str) -> Option<String> {
        self.entries.read().public.get(id).cloned()
    }

    #[must_use]
    pub fn resolve_system(&self, id: &str) -> Option<String> {
        self.entries.read().system.get(id).cloned()
    }

    /// Resolve an external identifier pair, public id first.
    #[must_use]
    pub fn resolve(&self, public_id: Option<&str>, system_id: Option<&str>) -> Option<String> {
        let entries = self.entries.read();
        public_id
            .and_then(|id| entries.public.get(id))
            .or_else(|| system_id.and_then(|id| entries.system.get(id)))
            .cloned()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.public.clear();
        entries.system.clear();
        entries.usage.resize(0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let entries = self.entries.read();
        entries.public.len() + entries.system.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn quoted_fields(rest: &str) -> Option<(String, String)> {
    let mut fields = Vec::with_capacity(2);
    let mut cursor = rest.trim_start();
    while fields.len() < 2 {
        let quote = cursor.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let body = &cursor[1..];
        let end = body.find(quote)?;
        fields.push(body[..end].to_string());
        cursor = body[end + 1..].trim_start();
    }
    if !cursor.is_empty() {
        return None;
    }
    let uri = fields.pop()?;
    let id = fields.pop()?;
    Some((id, uri))
}

static EXTERNAL_LOADING: AtomicBool = AtomicBool::new(true);
static GLOBAL: OnceLock<Arc<Catalog>> = OnceLock::new();

/// Stop the process catalog from reading files named in the environment.
pub(crate) fn disable_external_loading() {
    EXTERNAL_LOADING.store(false, Ordering::SeqCst);
}

#[must_use]
pub fn external_loading_enabled() -> bool {
    EXTERNAL_LOADING.load(Ordering::SeqCst)
}

/// The process-wide catalog.
pub fn global() -> Arc<Catalog> {
    Arc::clone(GLOBAL.get_or_init(|| {
        let catalog = Catalog::new();
        if external_loading_enabled()
            && let Ok(files) = std::env::var(CATALOG_FILES_ENV)
        {
            for file in files.split(|c: char| c == ':' || c.is_whitespace()) {
                if !file.is_empty() {
                    // Unreadable catalogs are skipped; resolution simply misses.
                    let _ = catalog.load_file(Path::new(file));
                }
            }
        }
        Arc::new(catalog)
    }))
}

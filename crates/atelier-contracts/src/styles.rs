use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::errors::StudioError;

/// Structured knowledge base used as contextual grounding for prompt
/// enhancement. Keys are document base identifiers (filename minus
/// extension); the mapping is immutable after a successful load.
#[derive(Debug, Clone)]
pub struct StyleLibrary {
    categories: IndexMap<String, Value>,
}

impl StyleLibrary {
    pub fn get(&self, category: &str) -> Option<&Value> {
        self.categories.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Compact serialization forwarded to the prompt composer.
    pub fn prompt_digest(&self) -> String {
        serde_json::to_string(&self.categories).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug)]
pub struct LoadReport {
    pub library: Option<StyleLibrary>,
    pub message: String,
}

/// Parses every `*.json` document under `dir` into one mapping. The load is
/// atomic: a single unreadable or malformed document fails the whole load.
pub fn load(dir: &Path) -> LoadReport {
    if !dir.is_dir() {
        return LoadReport {
            library: None,
            message: format!("style directory not found: {}", dir.display()),
        };
    }

    let mut documents: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "json")
            })
            .collect(),
        Err(err) => {
            return LoadReport {
                library: None,
                message: format!("failed to read {}: {err}", dir.display()),
            }
        }
    };
    documents.sort();

    if documents.is_empty() {
        return LoadReport {
            library: None,
            message: format!(
                "style directory {} contains no style documents",
                dir.display()
            ),
        };
    }

    let mut categories = IndexMap::new();
    for path in &documents {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                return LoadReport {
                    library: None,
                    message: format!("failed to read {}: {err}", path.display()),
                }
            }
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                return LoadReport {
                    library: None,
                    message: format!("failed to parse {}: {err}", path.display()),
                }
            }
        };
        let category = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        categories.insert(category, parsed);
    }

    let count = categories.len();
    LoadReport {
        library: Some(StyleLibrary { categories }),
        message: format!("loaded {count} style documents"),
    }
}

/// Lazily populated, process-wide style cache. Reload is the only
/// invalidation; reads and reloads are issued on the same logical thread.
#[derive(Debug)]
pub struct StyleCache {
    dir: PathBuf,
    loaded: Option<StyleLibrary>,
}

impl StyleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cached(&self) -> Option<&StyleLibrary> {
        self.loaded.as_ref()
    }

    pub fn get_or_load(&mut self) -> Result<&StyleLibrary, StudioError> {
        if self.loaded.is_none() {
            let report = load(&self.dir);
            match report.library {
                Some(library) => self.loaded = Some(library),
                None => return Err(StudioError::configuration(report.message)),
            }
        }
        Ok(self.loaded.as_ref().expect("style cache populated"))
    }

    /// Drops the cache and re-runs the load; the old mapping is gone even
    /// when the new load fails.
    pub fn reload(&mut self) -> Result<String, StudioError> {
        self.loaded = None;
        let report = load(&self.dir);
        match report.library {
            Some(library) => {
                self.loaded = Some(library);
                Ok(report.message)
            }
            None => Err(StudioError::configuration(report.message)),
        }
    }
}

//! Process-wide ontology cache
//!
//! Ontology exports are tens of megabytes; each `(source, prefix)` pair is
//! parsed once per process and shared read-only afterwards.

use crate::ontology::{Ontology, Result, IS_A};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type CacheKey = (PathBuf, String);

lazy_static::lazy_static! {
    static ref GLOBAL: OntologyCache = OntologyCache::new();
}

/// Load-once, read-many store of parsed ontologies
#[derive(Debug, Default)]
pub struct OntologyCache {
    entries: Mutex<HashMap<CacheKey, Arc<Ontology>>>,
}

impl OntologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by the whole process
    pub fn global() -> &'static OntologyCache {
        &GLOBAL
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Ontology>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached ontology for `(path, prefix)`, loading it on first use.
    ///
    /// The lock is held for the duration of a load so concurrent callers never
    /// parse the same source twice. A failed load is not cached.
    pub fn get_or_load(&self, path: &Path, prefix: &str) -> Result<Arc<Ontology>> {
        let key = (path.to_path_buf(), prefix.to_string());
        let mut entries = self.lock();
        if let Some(ontology) = entries.get(&key) {
            tracing::debug!(path = %path.display(), prefix, "ontology cache hit");
            return Ok(Arc::clone(ontology));
        }
        let ontology = Arc::new(Ontology::from_path(path, prefix, IS_A)?);
        entries.insert(key, Arc::clone(&ontology));
        Ok(ontology)
    }

    pub fn get(&self, path: &Path, prefix: &str) -> Option<Arc<Ontology>> {
        self.lock()
            .get(&(path.to_path_buf(), prefix.to_string()))
            .cloned()
    }

    /// Register an already-built ontology under `(path, prefix)`
    pub fn insert(&self, path: &Path, prefix: &str, ontology: Ontology) -> Arc<Ontology> {
        let ontology = Arc::new(ontology);
        self.lock()
            .insert((path.to_path_buf(), prefix.to_string()), Arc::clone(&ontology));
        ontology
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

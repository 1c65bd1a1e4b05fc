//! Report cache.
//!
//! Evaluation is deterministic for a fixed catalog, so reports can be
//! reused for identical `(text, document type, modules)` inputs. Entries
//! belong to one orchestrator and therefore one catalog.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use redline_core::ValidationReport;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text_hash: u64,
    text_len: usize,
    document_type: String,
    modules: Vec<String>,
}

impl CacheKey {
    /// `modules` are the resolved ids, in evaluation order.
    pub fn new(text: &str, document_type: &str, modules: &[String]) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            text_hash: hasher.finish(),
            text_len: text.len(),
            document_type: document_type.to_string(),
            modules: modules.to_vec(),
        }
    }
}

pub struct ReportCache {
    cache: Cache<CacheKey, Arc<ValidationReport>>,
}

impl ReportCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<ValidationReport>> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, report: Arc<ValidationReport>) {
        self.cache.insert(key, report).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate; moka applies pending writes lazily.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for ReportCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportCache")
            .field("entries", &self.entry_count())
            .finish()
    }
}

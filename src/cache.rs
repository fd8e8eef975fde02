use crate::diagnosis::{LogDiagnosis, NewDiagnosis};
use crate::store::{DiagnosisStore, StoreError};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const DEFAULT_LRU_CAPACITY: usize = 1024;

/// Exact-match diagnosis cache over a [`DiagnosisStore`].
///
/// Keys are normalized logs; this type never normalizes on its own. A small
/// in-process LRU sits in front of the store and is filled only from store
/// lookups, so it always mirrors what the store's first-match lookup returned.
pub struct DiagnosisCache<S> {
    store: S,
    hot: Option<Mutex<LruCache<String, LogDiagnosis>>>,
}

impl<S: DiagnosisStore> DiagnosisCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, DEFAULT_LRU_CAPACITY)
    }

    /// `capacity == 0` disables the in-process layer.
    pub fn with_capacity(store: S, capacity: usize) -> Self {
        let hot = NonZeroUsize::new(capacity).map(|n| Mutex::new(LruCache::new(n)));
        Self { store, hot }
    }

    pub fn store_ref(&self) -> &S { &self.store }

    pub fn lookup(&self, normalized: &str) -> Result<Option<LogDiagnosis>, StoreError> {
        if let Some(hit) = self.hot_get(normalized) {
            return Ok(Some(hit));
        }
        let found = self.store.find_first_by_log(normalized)?;
        if let Some(rec) = found.as_ref() {
            self.hot_put(rec);
        }
        Ok(found)
    }

    pub fn store(
        &self,
        normalized: &str,
        explanation: &str,
        suggestion: &str,
    ) -> Result<LogDiagnosis, StoreError> {
        self.store.insert(NewDiagnosis {
            log: normalized.to_string(),
            explanation: explanation.to_string(),
            suggestion: suggestion.to_string(),
        })
    }

    fn hot_get(&self, key: &str) -> Option<LogDiagnosis> {
        let hot = self.hot.as_ref()?;
        hot.lock().ok().and_then(|mut guard| guard.get(key).cloned())
    }

    fn hot_put(&self, rec: &LogDiagnosis) {
        if let Some(hot) = self.hot.as_ref() {
            if let Ok(mut guard) = hot.lock() {
                guard.put(rec.log.clone(), rec.clone());
            }
        }
    }
}

use crate::diagnosis::{LogDiagnosis, NewDiagnosis};
use ahash::AHashMap;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Persistence capability behind the diagnosis cache.
///
/// Implementations assign `id` and `created_at` on insert. Lookups are exact
/// string matches; when several records share a key the earliest inserted one
/// is returned.
pub trait DiagnosisStore: Send + Sync {
    fn find_first_by_log(&self, log: &str) -> Result<Option<LogDiagnosis>, StoreError>;
    fn insert(&self, new: NewDiagnosis) -> Result<LogDiagnosis, StoreError>;
}

impl<S: DiagnosisStore + ?Sized> DiagnosisStore for std::sync::Arc<S> {
    fn find_first_by_log(&self, log: &str) -> Result<Option<LogDiagnosis>, StoreError> {
        (**self).find_first_by_log(log)
    }

    fn insert(&self, new: NewDiagnosis) -> Result<LogDiagnosis, StoreError> {
        (**self).insert(new)
    }
}

/// Append-only record list with a first-insert-wins key index.
#[derive(Debug, Default)]
struct Records {
    rows: Vec<LogDiagnosis>,
    first_by_log: AHashMap<String, usize>,
}

impl Records {
    fn from_rows(rows: Vec<LogDiagnosis>) -> Self {
        let mut first_by_log = AHashMap::with_capacity(rows.len());
        for (i, r) in rows.iter().enumerate() {
            first_by_log.entry(r.log.clone()).or_insert(i);
        }
        Self { rows, first_by_log }
    }

    fn find(&self, log: &str) -> Option<&LogDiagnosis> {
        self.first_by_log.get(log).and_then(|&i| self.rows.get(i))
    }

    fn next_id(&self) -> u64 {
        self.rows.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    fn push(&mut self, new: NewDiagnosis) -> LogDiagnosis {
        let rec = new.into_record(self.next_id(), Utc::now());
        let idx = self.rows.len();
        self.first_by_log.entry(rec.log.clone()).or_insert(idx);
        self.rows.push(rec.clone());
        rec
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|r| r.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn records(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl DiagnosisStore for MemoryStore {
    fn find_first_by_log(&self, log: &str) -> Result<Option<LogDiagnosis>, StoreError> {
        Ok(self.records()?.find(log).cloned())
    }

    fn insert(&self, new: NewDiagnosis) -> Result<LogDiagnosis, StoreError> {
        Ok(self.records()?.push(new))
    }
}

/// Store persisted as a single JSON array file.
///
/// The whole file is rewritten on every insert (temp file + rename), which is
/// fine for the volumes a single analyst produces.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<Records>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let rows: Vec<LogDiagnosis> = match fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => Vec::new(),
            Ok(s) => serde_json::from_str(&s)
                .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        log::debug!("opened diagnosis store {} with {} records", path.display(), rows.len());
        Ok(Self { path, inner: Mutex::new(Records::from_rows(rows)) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(&self, records: &Records) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io { path: self.path.clone(), source };
        let body = serde_json::to_vec_pretty(&records.rows)
            .map_err(|source| StoreError::Corrupt { path: self.path.clone(), source })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl DiagnosisStore for JsonFileStore {
    fn find_first_by_log(&self, log: &str) -> Result<Option<LogDiagnosis>, StoreError> {
        let records = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.find(log).cloned())
    }

    fn insert(&self, new: NewDiagnosis) -> Result<LogDiagnosis, StoreError> {
        let mut records = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let rec = records.push(new);
        if let Err(e) = self.flush(&records) {
            // keep memory and disk in agreement
            let mut rows = std::mem::take(&mut records.rows);
            rows.pop();
            *records = Records::from_rows(rows);
            return Err(e);
        }
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new(log: &str, explanation: &str) -> NewDiagnosis {
        NewDiagnosis { log: log.into(), explanation: explanation.into(), suggestion: "fix".into() }
    }

    #[test]
    fn memory_store_assigns_increasing_ids() {
        let s = MemoryStore::new();
        let a = s.insert(new("a", "x")).unwrap();
        let b = s.insert(new("b", "y")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(a.created_at <= b.created_at);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn first_insert_wins_on_duplicate_keys() {
        let s = MemoryStore::new();
        let first = s.insert(new("same", "first")).unwrap();
        s.insert(new("same", "second")).unwrap();
        assert_eq!(s.find_first_by_log("same").unwrap(), Some(first));
    }

    #[test]
    fn lookup_is_exact() {
        let s = MemoryStore::new();
        s.insert(new("Error at [DATA]", "x")).unwrap();
        assert!(s.find_first_by_log("error at [DATA]").unwrap().is_none());
        assert!(s.find_first_by_log("Error at [DATA] ").unwrap().is_none());
    }
}

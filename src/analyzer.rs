use crate::cache::DiagnosisCache;
use crate::diagnosis::LogDiagnosis;
use crate::error::AnalyzeError;
use crate::generate::TextGenerator;
use crate::normalize::normalize;
use crate::prompt::{build_prompt, PromptTemplate};
use crate::reply;
use crate::store::DiagnosisStore;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Inbound request as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub log_content: Option<String>,
}

impl AnalyzeRequest {
    pub fn new(log_content: impl Into<String>) -> Self {
        Self { log_content: Some(log_content.into()) }
    }
}

/// Per-key mutual exclusion so that concurrent first-time analyses of one
/// normalized log share a single external call.
#[derive(Debug, Default)]
struct InFlight {
    slots: Mutex<AHashMap<String, Arc<Mutex<()>>>>,
}

impl InFlight {
    fn run<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let release = SlotRelease { flight: self, key, slot };
        let _held = release.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Drops a key's slot once its last holder leaves, also when `f` unwinds.
struct SlotRelease<'a> {
    flight: &'a InFlight,
    key: &'a str,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut slots = self.flight.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // map + our handle: nobody else is waiting on this key
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(self.key);
        }
    }
}

/// Normalize → cache → prompt → generate → validate → store.
pub struct LogAnalyzer<S, G> {
    cache: DiagnosisCache<S>,
    generator: G,
    template: PromptTemplate,
    in_flight: Option<InFlight>,
}

impl<S: DiagnosisStore, G: TextGenerator> LogAnalyzer<S, G> {
    pub fn new(cache: DiagnosisCache<S>, generator: G) -> Self {
        Self { cache, generator, template: PromptTemplate::default(), in_flight: None }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Serialize concurrent misses on the same key. Off by default: without
    /// it two simultaneous first requests for one log may both call the
    /// service and both store a record.
    pub fn with_single_flight(mut self) -> Self {
        self.in_flight = Some(InFlight::default());
        self
    }

    pub fn cache(&self) -> &DiagnosisCache<S> { &self.cache }

    pub fn generator(&self) -> &G { &self.generator }

    pub fn template(&self) -> &PromptTemplate { &self.template }

    /// Boundary entry point: rejects absent or empty content before any
    /// work is done.
    pub fn handle(&self, request: &AnalyzeRequest) -> Result<LogDiagnosis, AnalyzeError> {
        match request.log_content.as_deref() {
            None | Some("") => Err(AnalyzeError::EmptyInput),
            Some(raw) => self.analyze(raw),
        }
    }

    pub fn analyze(&self, raw_log: &str) -> Result<LogDiagnosis, AnalyzeError> {
        let normalized = normalize(raw_log);
        if let Some(hit) = self.cache.lookup(&normalized)? {
            log::debug!("diagnosis cache hit (id={})", hit.id);
            return Ok(hit);
        }
        match self.in_flight.as_ref() {
            Some(in_flight) => in_flight.run(&normalized, || -> Result<LogDiagnosis, AnalyzeError> {
                // another caller may have finished while we waited
                if let Some(hit) = self.cache.lookup(&normalized)? {
                    log::debug!("diagnosis filled while waiting (id={})", hit.id);
                    return Ok(hit);
                }
                self.diagnose(&normalized)
            }),
            None => self.diagnose(&normalized),
        }
    }

    fn diagnose(&self, normalized: &str) -> Result<LogDiagnosis, AnalyzeError> {
        log::debug!("diagnosis cache miss ({} bytes normalized)", normalized.len());
        let prompt = build_prompt(&self.template, normalized);

        let raw_reply = self.generator.generate(&prompt).map_err(|e| {
            if e.is_unavailable() {
                log::warn!("text-generation service unavailable: {e}");
            } else {
                log::error!("text-generation call failed: {e}");
            }
            AnalyzeError::from(e)
        })?;

        let parsed = match reply::validate(&raw_reply) {
            Ok(parsed) => parsed,
            Err(source) => {
                log::error!("AI reply rejected ({source}); raw reply: {raw_reply}");
                return Err(AnalyzeError::InvalidAiResponse { raw_reply, source });
            }
        };

        let rec = self.cache.store(normalized, &parsed.summary, &parsed.fix)?;
        log::info!("stored diagnosis id={} (template v{})", rec.id, self.template.version);
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::panic::AssertUnwindSafe;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn in_flight_serializes_one_key_and_cleans_up() {
        let flight = InFlight::default();
        let active = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);
        let barrier = Barrier::new(4);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    flight.run("k", || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                });
            }
        });
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(flight.pending(), 0);
    }

    #[test]
    fn panicking_work_still_frees_its_slot() {
        let flight = InFlight::default();
        let res: std::thread::Result<()> = std::panic::catch_unwind(AssertUnwindSafe(|| {
            flight.run("k", || panic!("generator blew up"))
        }));
        assert!(res.is_err());
        assert_eq!(flight.pending(), 0);
        // the poisoned slot is gone; the key is usable again
        assert_eq!(flight.run("k", || 7), 7);
        assert_eq!(flight.pending(), 0);
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: AnalyzeRequest = serde_json::from_str(r#"{"logContent":"boom"}"#).unwrap();
        assert_eq!(req.log_content.as_deref(), Some("boom"));
        let empty: AnalyzeRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.log_content.is_none());
    }
}

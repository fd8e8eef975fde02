use logmedic::cache::DiagnosisCache;
use logmedic::generate::{GenerateError, TextGenerator};
use logmedic::prompt::{Prompt, PromptTemplate};
use logmedic::reply::MalformedReply;
use logmedic::store::{DiagnosisStore, MemoryStore};
use logmedic::{AnalyzeError, AnalyzeRequest, LogAnalyzer, Outcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

/// Generator returning a fixed reply (or error) and recording every prompt.
struct Scripted {
    reply: Box<dyn Fn() -> Result<String, GenerateError> + Send + Sync>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Prompt>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new(f: impl Fn() -> Result<String, GenerateError> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(f),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn ok(body: &'static str) -> Self {
        Self::new(move || Ok(body.to_string()))
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most generate calls seen running at the same time.
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TextGenerator for Scripted {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        (self.reply)()
    }
}

const GOOD_REPLY: &str = r#"{"summary":"Null reference dereferenced","fix":"Check the object before use"}"#;

fn analyzer(gen: Scripted) -> LogAnalyzer<Arc<MemoryStore>, Arc<Scripted>> {
    analyzer_with(Arc::new(MemoryStore::new()), Arc::new(gen))
}

fn analyzer_with(store: Arc<MemoryStore>, gen: Arc<Scripted>) -> LogAnalyzer<Arc<MemoryStore>, Arc<Scripted>> {
    LogAnalyzer::new(DiagnosisCache::new(store), gen)
}

#[test]
fn same_log_twice_calls_the_service_once() {
    let a = analyzer(Scripted::ok(GOOD_REPLY));
    let raw = "Error at 2024-12-14 10:20:30: NullPointerException";

    let first = a.analyze(raw).unwrap();
    assert_eq!(first.log, "Error at [DATA] [HORA]: NullPointerException");
    assert_eq!(first.explanation, "Null reference dereferenced");
    assert_eq!(first.suggestion, "Check the object before use");
    assert_eq!(a.generator().calls(), 1);

    let second = a.analyze(raw).unwrap();
    assert_eq!(second, first);
    assert_eq!(a.generator().calls(), 1);
}

#[test]
fn timestamp_only_differences_hit_the_cache() {
    let a = analyzer(Scripted::ok(GOOD_REPLY));
    let first = a.analyze("2024-12-14 10:20:30 ERROR pool exhausted").unwrap();
    let second = a.analyze("14/01/2025 08:00:01.250 ERROR pool exhausted").unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(a.generator().calls(), 1);
}

#[test]
fn preexisting_record_never_reaches_the_service() {
    let store = Arc::new(MemoryStore::new());
    let seeded = DiagnosisCache::new(store.clone())
        .store("Error at [DATA] [HORA]: NullPointerException", "known", "known fix")
        .unwrap();
    let gen = Arc::new(Scripted::new(|| panic!("service must not be called")));
    let a = analyzer_with(store, gen.clone());

    let got = a.analyze("Error at 1999-01-01 00:00:00: NullPointerException").unwrap();
    assert_eq!(got, seeded);
    assert_eq!(gen.calls(), 0);
}

#[test]
fn prompt_carries_the_normalized_log() {
    let a = analyzer(Scripted::ok(GOOD_REPLY))
        .with_template(PromptTemplate { user_prefix: "Analyze:".into(), ..Default::default() });
    a.analyze("boom at 10:20:30").unwrap();
    let prompts = a.generator().prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].user_text, "Analyze:\nboom at [HORA]");
    assert_eq!(prompts[0].instruction, PromptTemplate::default().instruction);
}

#[test]
fn non_json_reply_is_rejected_and_nothing_stored() {
    let store = Arc::new(MemoryStore::new());
    let a = analyzer_with(store.clone(), Arc::new(Scripted::ok("Sure! Here is what went wrong...")));

    let err = a.analyze("Error at 2024-12-14 10:20:30: NullPointerException").unwrap_err();
    match &err {
        AnalyzeError::InvalidAiResponse { raw_reply, source } => {
            assert_eq!(raw_reply, "Sure! Here is what went wrong...");
            assert!(matches!(source, MalformedReply::NotJson(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.outcome(), Outcome::ProcessingFailed);
    assert!(store.is_empty());
}

#[test]
fn reply_missing_a_field_is_rejected_and_nothing_stored() {
    let store = Arc::new(MemoryStore::new());
    let a = analyzer_with(store.clone(), Arc::new(Scripted::ok(r#"{"summary":"only half"}"#)));

    let err = a.analyze("boom").unwrap_err();
    assert!(matches!(
        err,
        AnalyzeError::InvalidAiResponse { source: MalformedReply::MissingField("fix"), .. }
    ));
    assert!(store.is_empty());
    assert!(store.find_first_by_log("boom").unwrap().is_none());
}

#[test]
fn failed_reply_is_not_cached_and_a_retry_calls_again() {
    let flip = Arc::new(AtomicUsize::new(0));
    let f = flip.clone();
    let a = analyzer(Scripted::new(move || {
        if f.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("not json".to_string())
        } else {
            Ok(GOOD_REPLY.to_string())
        }
    }));
    assert!(a.analyze("boom").is_err());
    assert!(a.analyze("boom").is_ok());
    assert_eq!(a.generator().calls(), 2);
}

#[test]
fn unreachable_service_is_service_unavailable() {
    let store = Arc::new(MemoryStore::new());
    let gen = Scripted::new(|| Err(GenerateError::Unavailable("connection failed: refused".into())));
    let a = analyzer_with(store.clone(), Arc::new(gen));

    let err = a.analyze("boom").unwrap_err();
    assert!(matches!(err, AnalyzeError::ServiceUnavailable(_)));
    assert_eq!(err.status_code(), 503);
    assert!(store.is_empty());
}

#[test]
fn backend_error_status_is_a_processing_failure() {
    let gen = Scripted::new(|| Err(GenerateError::Backend { status: 404, body: "model not found".into() }));
    let err = analyzer(gen).analyze("boom").unwrap_err();
    assert!(matches!(err, AnalyzeError::Generation(_)));
    assert_eq!(err.status_code(), 500);
}

#[test]
fn boundary_rejects_absent_or_empty_content() {
    let a = analyzer(Scripted::new(|| panic!("service must not be called")));
    let absent = a.handle(&AnalyzeRequest::default()).unwrap_err();
    let empty = a.handle(&AnalyzeRequest::new("")).unwrap_err();
    assert!(matches!(absent, AnalyzeError::EmptyInput));
    assert!(matches!(empty, AnalyzeError::EmptyInput));
    assert_eq!(empty.status_code(), 400);
}

#[test]
fn boundary_passes_content_through() {
    let a = analyzer(Scripted::ok(GOOD_REPLY));
    let rec = a.handle(&AnalyzeRequest::new("Error at 2024-12-14 10:20:30: NullPointerException")).unwrap();
    let v = serde_json::to_value(&rec).unwrap();
    for key in ["id", "log", "explanation", "suggestion", "createdAt"] {
        assert!(v.get(key).is_some(), "missing {key}");
    }
}

#[test]
fn single_flight_shares_one_call_between_concurrent_requests() {
    let a = analyzer(Scripted::ok(GOOD_REPLY).slow(Duration::from_millis(100))).with_single_flight();
    let barrier = Barrier::new(6);
    let ids: Vec<u64> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let a = &a;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    a.analyze(&format!("2024-12-1{i} 10:20:3{i} ERROR disk full")).unwrap().id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(a.generator().calls(), 1);
    assert!(ids.iter().all(|&id| id == ids[0]));
}

#[test]
fn single_flight_does_not_serialize_distinct_logs() {
    let a = analyzer(Scripted::ok(GOOD_REPLY).slow(Duration::from_millis(150))).with_single_flight();
    let barrier = Barrier::new(4);
    std::thread::scope(|s| {
        for i in 0..4 {
            let (a, barrier) = (&a, &barrier);
            s.spawn(move || {
                barrier.wait();
                a.analyze(&format!("ERROR code {i}")).unwrap()
            });
        }
    });
    assert_eq!(a.generator().calls(), 4);
    assert!(a.generator().peak() > 1, "distinct keys ran one at a time");
    assert_eq!(a.cache().store_ref().len(), 4);
}

use anyhow::Context;
use clap::Parser;
use logmedic::cache::{DiagnosisCache, DEFAULT_LRU_CAPACITY};
use logmedic::generate::{OllamaClient, OllamaConfig, DEFAULT_MODEL, DEFAULT_OLLAMA_HOST};
use logmedic::prompt::PromptTemplate;
use logmedic::store::{DiagnosisStore, JsonFileStore, MemoryStore};
use logmedic::{AnalyzeError, AnalyzeRequest, LogAnalyzer, LogDiagnosis, Outcome};
use rayon::prelude::*;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

#[derive(Parser, Debug)]
#[command(name = "logmedic", version, about = "Explain a log and suggest a fix, with cached AI diagnoses")]
struct Cli {
    /// Log files to analyze, one diagnosis per file (`-` or nothing for stdin)
    #[arg(required = false)]
    input: Vec<String>,

    /// JSON file holding stored diagnoses (in-memory when absent)
    #[arg(long = "store", env = "LOGMEDIC_STORE")]
    store: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long = "host", env = "LOGMEDIC_OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    host: String,

    /// Model name passed to Ollama
    #[arg(long = "model", env = "LOGMEDIC_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Timeout for one call to the AI service, in seconds
    #[arg(
        long = "timeout-secs",
        env = "LOGMEDIC_TIMEOUT_SECS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_secs: u64,

    /// JSON prompt template overriding the built-in wording
    #[arg(long = "prompt-file")]
    prompt_file: Option<PathBuf>,

    /// Entries kept in the in-process cache in front of the store (0 disables)
    #[arg(long = "lru-capacity", default_value_t = DEFAULT_LRU_CAPACITY)]
    lru_capacity: usize,

    /// Let only one request per distinct log reach the AI service at a time
    #[arg(long = "single-flight", default_value_t = false)]
    single_flight: bool,

    /// Print the normalized log (the cache key) and exit
    #[arg(long = "normalize-only", default_value_t = false)]
    normalize_only: bool,
}

struct Input {
    name: String,
    content: String,
}

fn read_inputs(paths: &[String]) -> anyhow::Result<Vec<Input>> {
    let paths: Vec<String> = if paths.is_empty() { vec!["-".to_string()] } else { paths.to_vec() };
    let mut out = Vec::with_capacity(paths.len());
    let mut stdin_used = false;
    for p in paths {
        let content = if p == "-" {
            anyhow::ensure!(!stdin_used, "stdin (`-`) can only be given once");
            stdin_used = true;
            let mut s = String::new();
            io::stdin().read_to_string(&mut s).context("reading stdin")?;
            s
        } else {
            std::fs::read_to_string(&p).with_context(|| format!("reading {p}"))?
        };
        out.push(Input { name: p, content });
    }
    Ok(out)
}

fn build_analyzer(cli: &Cli) -> anyhow::Result<LogAnalyzer<Arc<dyn DiagnosisStore>, OllamaClient>> {
    let store: Arc<dyn DiagnosisStore> = match cli.store.as_ref() {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let template = match cli.prompt_file.as_ref() {
        Some(path) => PromptTemplate::from_json_file(path)
            .with_context(|| format!("loading prompt template {}", path.display()))?,
        None => PromptTemplate::default(),
    };
    let client = OllamaClient::new(&OllamaConfig {
        host: cli.host.clone(),
        model: cli.model.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    })?;
    log::debug!("using {} with model {} (prompt v{})", client.url(), cli.model, template.version);

    let mut analyzer = LogAnalyzer::new(DiagnosisCache::with_capacity(store, cli.lru_capacity), client)
        .with_template(template);
    if cli.single_flight {
        analyzer = analyzer.with_single_flight();
    }
    Ok(analyzer)
}

fn user_message(err: &AnalyzeError) -> String {
    match err.outcome() {
        Outcome::ServiceUnavailable => "the AI service is down".to_string(),
        Outcome::InvalidInput => "no log content given".to_string(),
        _ => format!("failed to process the AI response: {err}"),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    init_parallelism();
    let cli = Cli::parse();
    let inputs = read_inputs(&cli.input)?;

    if cli.normalize_only {
        for i in &inputs {
            println!("{}", logmedic::normalize::normalize(&i.content));
        }
        return Ok(());
    }

    let analyzer = build_analyzer(&cli)?;
    let results: Vec<Result<LogDiagnosis, AnalyzeError>> = inputs
        .par_iter()
        .map(|i| analyzer.handle(&AnalyzeRequest::new(i.content.clone())))
        .collect();

    let mut exit = Outcome::Ok;
    let single = inputs.len() == 1;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(rec) if single => println!("{}", serde_json::to_string_pretty(&rec)?),
            Ok(rec) => {
                let mut v = serde_json::to_value(&rec)?;
                v["input"] = serde_json::Value::String(input.name.clone());
                println!("{v}");
            }
            Err(e) => {
                eprintln!("{}: {} (status {})", input.name, user_message(&e), e.status_code());
                if exit == Outcome::Ok {
                    exit = e.outcome();
                }
            }
        }
    }
    if exit != Outcome::Ok {
        std::process::exit(exit.exit_code());
    }
    Ok(())
}

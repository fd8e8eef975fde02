use crate::prompt::{OutputFormat, Prompt};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("text-generation service unavailable: {0}")]
    Unavailable(String),
    #[error("text-generation service returned http {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("text-generation service sent an unreadable envelope: {0}")]
    Decode(String),
    #[error("text-generation client misconfigured: {0}")]
    Config(String),
}

impl GenerateError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GenerateError::Unavailable(_))
    }
}

/// Prompt in, raw text out. No structure is promised about the text.
///
/// Refused connections, timeouts and dropped sockets surface as
/// [`GenerateError::Unavailable`]; a reachable backend that answers badly uses
/// the other variants.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerateError>;
}

impl<G: TextGenerator + ?Sized> TextGenerator for std::sync::Arc<G> {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerateError> {
        (**self).generate(prompt)
    }
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    /// Upper bound for one whole call (connect, generation and body read).
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
    options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Blocking client for Ollama's `/api/chat` endpoint, the backend the binary
/// uses.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerateError::Config(e.to_string()))?;
        let host = config.host.trim_end_matches('/');
        Ok(Self {
            client,
            url: format!("{host}/api/chat"),
            model: config.model.clone(),
        })
    }

    pub fn url(&self) -> &str { &self.url }

    fn request_body<'a>(&'a self, prompt: &'a Prompt) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            stream: false,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.instruction },
                ChatMessage { role: "user", content: &prompt.user_text },
            ],
            options: ChatOptions {
                num_predict: prompt.options.max_tokens,
                temperature: prompt.options.temperature,
            },
            format: match prompt.options.format {
                OutputFormat::Json => Some("json"),
                OutputFormat::Text => None,
            },
        }
    }
}

fn describe_transport(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "i/o error"
    };
    format!("{kind}: {e}")
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &Prompt) -> Result<String, GenerateError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&self.request_body(prompt))
            .send()
            .map_err(|e| GenerateError::Unavailable(describe_transport(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(GenerateError::Backend { status: status.as_u16(), body });
        }

        let text = resp
            .text()
            .map_err(|e| GenerateError::Unavailable(describe_transport(&e)))?;
        let out: ChatResponse =
            serde_json::from_str(&text).map_err(|e| GenerateError::Decode(e.to_string()))?;
        Ok(out.message.content)
    }
}

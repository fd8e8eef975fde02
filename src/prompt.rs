use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const USER_PREFIX: &str = "Log for analysis:";

const INSTRUCTION_V1: &str = r#"You are a senior software engineer and SRE (Site Reliability Engineer).
You can analyze logs from any technology (Java, Python, Node, Docker, SQL, operating system, etc).

GOAL:
Identify the technology that produced the log, find the error and give the most direct correction possible.

FORMATTING RULES (CRITICAL):
1. ALWAYS answer in Brazilian Portuguese (PT-BR).
2. Do NOT use Markdown (no ```json fences, just open the braces).
3. Answer ONLY with the raw JSON. No "Here is the JSON" or any extra text.
4. If the log is not an obvious error, explain what it means.
5. BE CONCISE: keep the answer short and direct so it fits the output limit.

RESPONSE JSON FORMAT:
{
    "summary": "Short, blunt explanation of the error (max 2 lines).",
    "fix": "The corrected code or the command to run (no extra explanation here)."
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Output budget in model tokens.
    pub max_tokens: u32,
    pub temperature: f32,
    pub format: OutputFormat,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            format: OutputFormat::Json,
        }
    }
}

/// Prompt wording kept as data so it can be versioned and swapped without
/// touching the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplate {
    pub version: u32,
    pub instruction: String,
    pub user_prefix: String,
    pub options: ModelOptions,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            version: 1,
            instruction: INSTRUCTION_V1.to_string(),
            user_prefix: USER_PREFIX.to_string(),
            options: ModelOptions::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot read prompt template: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid prompt template: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PromptTemplate {
    /// Loads a JSON template; missing keys fall back to the built-in values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Request payload for the text-generation service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub instruction: String,
    pub user_text: String,
    pub options: ModelOptions,
}

pub fn build_prompt(template: &PromptTemplate, normalized_log: &str) -> Prompt {
    Prompt {
        instruction: template.instruction.clone(),
        user_text: format!("{}\n{}", template.user_prefix, normalized_log),
        options: template.options.clone(),
    }
}

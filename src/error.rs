use crate::generate::GenerateError;
use crate::reply::MalformedReply;
use crate::store::StoreError;
use thiserror::Error;

/// Failures of a single analysis request. All of them are terminal for the
/// request and none leaves a stored record behind.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("log content is empty")]
    EmptyInput,

    #[error("AI service is down: {0}")]
    ServiceUnavailable(#[source] GenerateError),

    #[error("failed to interpret AI response: {source}")]
    InvalidAiResponse {
        /// Reply text exactly as the service returned it.
        raw_reply: String,
        #[source]
        source: MalformedReply,
    },

    #[error("AI service call failed: {0}")]
    Generation(#[source] GenerateError),

    #[error("diagnosis store failed: {0}")]
    Store(#[from] StoreError),
}

/// Coarse outcome of a request, for whatever boundary reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    InvalidInput,
    ServiceUnavailable,
    ProcessingFailed,
}

impl Outcome {
    pub fn status_code(self) -> u16 {
        match self {
            Outcome::Ok => 200,
            Outcome::InvalidInput => 400,
            Outcome::ServiceUnavailable => 503,
            Outcome::ProcessingFailed => 500,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Ok => 0,
            Outcome::ProcessingFailed => 1,
            Outcome::InvalidInput => 2,
            Outcome::ServiceUnavailable => 3,
        }
    }
}

impl AnalyzeError {
    pub fn outcome(&self) -> Outcome {
        match self {
            AnalyzeError::EmptyInput => Outcome::InvalidInput,
            AnalyzeError::ServiceUnavailable(_) => Outcome::ServiceUnavailable,
            AnalyzeError::InvalidAiResponse { .. }
            | AnalyzeError::Generation(_)
            | AnalyzeError::Store(_) => Outcome::ProcessingFailed,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.outcome().status_code()
    }

    /// Raw reply for malformed-reply failures.
    pub fn raw_reply(&self) -> Option<&str> {
        match self {
            AnalyzeError::InvalidAiResponse { raw_reply, .. } => Some(raw_reply),
            _ => None,
        }
    }
}

impl From<GenerateError> for AnalyzeError {
    fn from(e: GenerateError) -> Self {
        if e.is_unavailable() {
            AnalyzeError::ServiceUnavailable(e)
        } else {
            AnalyzeError::Generation(e)
        }
    }
}

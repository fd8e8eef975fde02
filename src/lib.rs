pub mod normalize;
pub mod diagnosis;
pub mod store;
pub mod cache;
pub mod prompt;
pub mod reply;
pub mod generate;
pub mod error;
pub mod analyzer;

pub use analyzer::{AnalyzeRequest, LogAnalyzer};
pub use cache::DiagnosisCache;
pub use diagnosis::LogDiagnosis;
pub use error::{AnalyzeError, Outcome};

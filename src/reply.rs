use serde_json::{Map, Value};
use thiserror::Error;

/// The two-field reply contract expected from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisReply {
    pub summary: String,
    pub fix: String,
}

#[derive(Debug, Error)]
pub enum MalformedReply {
    #[error("reply is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("reply is JSON but not an object")]
    NotObject,
    #[error("reply is missing field `{0}`")]
    MissingField(&'static str),
    #[error("reply field `{0}` is not a string")]
    NotText(&'static str),
    #[error("reply field `{0}` is empty")]
    EmptyField(&'static str),
}

// (canonical key, accepted aliases)
const SUMMARY_KEYS: (&str, &[&str]) = ("summary", &["resumo"]);
const FIX_KEYS: (&str, &[&str]) = ("fix", &["solucao"]);

/// Parses a raw model reply into a [`DiagnosisReply`].
///
/// Unknown fields are ignored. Field values are returned exactly as sent.
pub fn validate(raw: &str) -> Result<DiagnosisReply, MalformedReply> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = value.as_object().ok_or(MalformedReply::NotObject)?;
    Ok(DiagnosisReply {
        summary: required_text(obj, SUMMARY_KEYS)?,
        fix: required_text(obj, FIX_KEYS)?,
    })
}

fn required_text(
    obj: &Map<String, Value>,
    (name, aliases): (&'static str, &[&str]),
) -> Result<String, MalformedReply> {
    let v = std::iter::once(name)
        .chain(aliases.iter().copied())
        .find_map(|k| obj.get(k))
        .ok_or(MalformedReply::MissingField(name))?;
    let s = v.as_str().ok_or(MalformedReply::NotText(name))?;
    if s.trim().is_empty() {
        return Err(MalformedReply::EmptyField(name));
    }
    Ok(s.to_string())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored diagnosis for one normalized log.
///
/// Records are immutable once the store hands them out: `id` and
/// `created_at` are assigned at insert and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDiagnosis {
    pub id: u64,
    /// Normalized log text, the lookup key.
    pub log: String,
    pub explanation: String,
    pub suggestion: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Insert payload: a diagnosis before the store assigns identity and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDiagnosis {
    pub log: String,
    pub explanation: String,
    pub suggestion: String,
}

impl NewDiagnosis {
    pub fn into_record(self, id: u64, created_at: DateTime<Utc>) -> LogDiagnosis {
        LogDiagnosis {
            id,
            log: self.log,
            explanation: self.explanation,
            suggestion: self.suggestion,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_with_boundary_field_names() {
        let rec = NewDiagnosis {
            log: "Error at [DATA]".into(),
            explanation: "e".into(),
            suggestion: "s".into(),
        }
        .into_record(7, Utc.with_ymd_and_hms(2024, 12, 14, 10, 20, 30).unwrap());
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["log"], "Error at [DATA]");
        assert_eq!(v["createdAt"], "2024-12-14T10:20:30Z");
        assert!(v.get("created_at").is_none());
    }
}

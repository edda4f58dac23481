//! Best-effort repair of corrupted JSON state files.
//!
//! Two corruption shapes are known to occur in practice:
//!
//! - appended or duplicated content from a write that was not atomic
//!   (`{...}{...` or `{...}\n{...}`): the last complete object wins,
//! - truncation (the tail of the file is missing): the document is cut back to
//!   the last complete value and the open containers are closed.
//!
//! Every candidate must pass the caller's `accept` check; nothing partial is
//! ever returned.

use serde::Serialize;
use serde_json::Value;

use crate::util::{complete_objects, truncation_candidates};

/// Upper bound on truncation cut points tried before giving up.
const MAX_TRUNCATION_ATTEMPTS: usize = 4096;

/// How a document was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    LastCompleteObject,
    ClosedTruncation,
}

impl std::fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairStrategy::LastCompleteObject => write!(f, "last complete object"),
            RepairStrategy::ClosedTruncation => write!(f, "closed truncated structure"),
        }
    }
}

/// Try each repair strategy in turn and return the first candidate `accept` approves.
pub fn repair<F>(text: &str, accept: F) -> Option<(Value, RepairStrategy)>
where
    F: Fn(&Value) -> bool,
{
    for object in complete_objects(text).into_iter().rev() {
        if let Ok(value) = serde_json::from_str::<Value>(object)
            && accept(&value)
        {
            return Some((value, RepairStrategy::LastCompleteObject));
        }
    }

    truncation_candidates(text, MAX_TRUNCATION_ATTEMPTS)
        .into_iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(&candidate).ok())
        .find(|value| accept(value))
        .map(|value| (value, RepairStrategy::ClosedTruncation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_id(v: &Value) -> bool {
        v.get("id").and_then(Value::as_str).is_some()
    }

    #[test]
    fn test_duplicated_content_takes_last_object() {
        let text = r#"{"id": "old", "n": 1}{"id": "new", "n": 2}"#;
        let (value, strategy) = repair(text, has_id).unwrap();
        assert_eq!(strategy, RepairStrategy::LastCompleteObject);
        assert_eq!(value["id"], "new");
    }

    #[test]
    fn test_appended_partial_copy_keeps_complete_one() {
        let text = "{\"id\": \"a\", \"n\": 1}\n{\"id\": \"a\", \"n\"";
        let (value, strategy) = repair(text, has_id).unwrap();
        assert_eq!(strategy, RepairStrategy::LastCompleteObject);
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_truncated_document_is_closed() {
        let text = r#"{"id": "abc", "items": [{"k": 1}, {"k": 2}], "extra": {"x": "y"#;
        let (value, strategy) = repair(text, has_id).unwrap();
        assert_eq!(strategy, RepairStrategy::ClosedTruncation);
        assert_eq!(value["id"], "abc");
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_rejected_candidates_are_not_returned() {
        let text = r#"{"n": 1}{"m": 2"#;
        assert!(repair(text, has_id).is_none());
    }

    #[test]
    fn test_no_structure_at_all() {
        assert!(repair("garbage", |_| true).is_none());
    }
}

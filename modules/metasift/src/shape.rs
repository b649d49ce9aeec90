//! Typed parsers for oracle responses.
//!
//! Each structured oracle call has one parser here. A parser either returns
//! the exact shape the caller asked for or an [`MetaSiftError::OracleShape`];
//! it never truncates, pads or guesses.

use ai_client::{strip_code_blocks, truncate_to_char_boundary, StructuredOutput};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use metasift_common::{CheckVerdict, Decision, MetaSiftError};

/// Wire shape of the relevance filter response.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RelevanceScores {
    /// One score in [0, 1] per fragment, in fragment order.
    pub scores: Vec<f64>,
}

/// Wire shape of the checker response.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RubricScores {
    #[serde(rename = "Data Accuracy")]
    pub data_accuracy: i64,
    #[serde(rename = "Semantic Consistency")]
    pub semantic_consistency: i64,
    #[serde(rename = "Data Completeness")]
    pub data_completeness: i64,
    #[serde(rename = "Overall Score")]
    pub overall_score: i64,
    #[serde(rename = "Suggestion")]
    pub suggestion: String,
}

pub fn relevance_schema() -> (String, Value) {
    ("relevance_scores".to_string(), RelevanceScores::strict_schema())
}

pub fn rubric_schema() -> (String, Value) {
    ("rubric_scores".to_string(), RubricScores::strict_schema())
}

const RAW_PREVIEW_BYTES: usize = 200;

fn parse_json(stage: &'static str, raw: &str) -> Result<Value, MetaSiftError> {
    serde_json::from_str(strip_code_blocks(raw))
        .map_err(|e| {
            let preview = truncate_to_char_boundary(raw, RAW_PREVIEW_BYTES);
            MetaSiftError::shape(stage, format!("response is not JSON: {e}; got {preview:?}"))
        })
}

/// Parse exactly `expected` relevance scores, each in `[0, 1]`.
///
/// Accepts `{"scores": [...]}` or a bare array.
pub fn parse_scores(raw: &str, expected: usize) -> Result<Vec<f64>, MetaSiftError> {
    const STAGE: &str = "filter";

    let items = match parse_json(STAGE, raw)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("scores") {
            Some(Value::Array(items)) => items,
            _ => return Err(MetaSiftError::shape(STAGE, "object without a `scores` array")),
        },
        other => {
            return Err(MetaSiftError::shape(
                STAGE,
                format!("expected a list of scores, got {other}"),
            ))
        }
    };

    if items.len() != expected {
        return Err(MetaSiftError::shape(
            STAGE,
            format!("expected {expected} scores, got {}", items.len()),
        ));
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item.as_f64() {
            Some(score) if (0.0..=1.0).contains(&score) => Ok(score),
            Some(score) => Err(MetaSiftError::shape(
                STAGE,
                format!("score {} out of range: {score}", i + 1),
            )),
            None => Err(MetaSiftError::shape(
                STAGE,
                format!("score {} is not a number: {item}", i + 1),
            )),
        })
        .collect()
}

/// Parse a rubric response and decide accept/reject against `threshold`.
pub fn parse_verdict(raw: &str, threshold: u8) -> Result<CheckVerdict, MetaSiftError> {
    const STAGE: &str = "check";

    let value = parse_json(STAGE, raw)?;
    if !value.is_object() {
        return Err(MetaSiftError::shape(STAGE, "verdict is not an object"));
    }
    let rubric: RubricScores = serde_json::from_value(value)
        .map_err(|e| MetaSiftError::shape(STAGE, format!("malformed verdict: {e}")))?;

    let score = |name: &str, v: i64| -> Result<u8, MetaSiftError> {
        if (1..=10).contains(&v) {
            Ok(v as u8)
        } else {
            Err(MetaSiftError::shape(STAGE, format!("{name} out of 1..=10: {v}")))
        }
    };

    let overall_score = score("Overall Score", rubric.overall_score)?;
    Ok(CheckVerdict {
        data_accuracy: score("Data Accuracy", rubric.data_accuracy)?,
        semantic_consistency: score("Semantic Consistency", rubric.semantic_consistency)?,
        data_completeness: score("Data Completeness", rubric.data_completeness)?,
        overall_score,
        suggestion: rubric.suggestion,
        decision: if overall_score >= threshold {
            Decision::Accept
        } else {
            Decision::Reject
        },
    })
}

/// Parse a normalized batch: a list of exactly `expected` objects, each
/// carrying exactly `keys`.
pub fn parse_records(
    raw: &str,
    expected: usize,
    keys: &[String],
) -> Result<Vec<Map<String, Value>>, MetaSiftError> {
    const STAGE: &str = "normalize";

    let items = match parse_json(STAGE, raw)? {
        Value::Array(items) => items,
        other => {
            return Err(MetaSiftError::shape(
                STAGE,
                format!("expected a list of records, got {}", type_name(&other)),
            ))
        }
    };
    if items.len() != expected {
        return Err(MetaSiftError::shape(
            STAGE,
            format!("expected {expected} records, got {}", items.len()),
        ));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let Value::Object(map) = item else {
                return Err(MetaSiftError::shape(STAGE, format!("record {i} is not an object")));
            };
            if map.len() != keys.len() || !keys.iter().all(|k| map.contains_key(k)) {
                return Err(MetaSiftError::shape(
                    STAGE,
                    format!("record {i} keys differ from the input"),
                ));
            }
            Ok(map)
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_shape_error(err: &MetaSiftError) -> bool {
        matches!(err, MetaSiftError::OracleShape { .. })
    }

    #[test]
    fn scores_accept_object_and_bare_array() {
        assert_eq!(parse_scores(r#"{"scores": [0.8, 0.1]}"#, 2).unwrap(), vec![0.8, 0.1]);
        assert_eq!(parse_scores("[1, 0]", 2).unwrap(), vec![1.0, 0.0]);
        assert_eq!(parse_scores("```json\n[0.5]\n```", 1).unwrap(), vec![0.5]);
    }

    #[test]
    fn wrong_score_count_is_never_truncated_or_padded() {
        assert!(is_shape_error(&parse_scores("[0.8, 0.3, 0.9]", 2).unwrap_err()));
        assert!(is_shape_error(&parse_scores("[0.8]", 2).unwrap_err()));
    }

    #[test]
    fn scores_outside_unit_interval_are_rejected() {
        assert!(parse_scores("[1.2]", 1).is_err());
        assert!(parse_scores("[-0.1]", 1).is_err());
        assert!(parse_scores(r#"["high"]"#, 1).is_err());
        assert!(parse_scores("not json", 1).is_err());
    }

    #[test]
    fn verdict_decision_follows_threshold() {
        let raw = r#"{"Data Accuracy": 9, "Semantic Consistency": 6, "Data Completeness": 8,
                      "Overall Score": 6, "Suggestion": "You should add Table 2, Column 3"}"#;
        assert_eq!(parse_verdict(raw, 6).unwrap().decision, Decision::Accept);
        assert_eq!(parse_verdict(raw, 7).unwrap().decision, Decision::Reject);
    }

    #[test]
    fn verdict_requires_every_rubric_key() {
        let raw = r#"{"Data Accuracy": 9, "Overall Score": 7, "Suggestion": ""}"#;
        assert!(is_shape_error(&parse_verdict(raw, 6).unwrap_err()));
    }

    #[test]
    fn verdict_scores_must_be_in_range() {
        let raw = r#"{"Data Accuracy": 11, "Semantic Consistency": 6, "Data Completeness": 8,
                      "Overall Score": 7, "Suggestion": ""}"#;
        assert!(parse_verdict(raw, 6).is_err());
    }

    #[test]
    fn records_must_keep_length_and_keys() {
        let keys = vec!["River".to_string(), "Reference".to_string()];
        let ok = r#"[{"River": "Tigris", "Reference": "p1"}]"#;
        assert_eq!(parse_records(ok, 1, &keys).unwrap().len(), 1);

        let missing_key = r#"[{"River": "Tigris"}]"#;
        assert!(parse_records(missing_key, 1, &keys).is_err());

        let extra_key = r#"[{"River": "Tigris", "Reference": "p1", "pH": 7}]"#;
        assert!(parse_records(extra_key, 1, &keys).is_err());

        assert!(parse_records(ok, 2, &keys).is_err());
        assert!(parse_records(r#"{"River": "Tigris"}"#, 1, &keys).is_err());
    }

    #[test]
    fn schemas_are_named_and_closed() {
        let (name, schema) = rubric_schema();
        assert_eq!(name, "rubric_scores");
        assert_eq!(schema["additionalProperties"], Value::Bool(false));
        assert!(schema["properties"].get("Overall Score").is_some());
        assert_eq!(relevance_schema().1["required"], serde_json::json!(["scores"]));
    }
}

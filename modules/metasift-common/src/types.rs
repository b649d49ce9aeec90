use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Written in place of an extraction result when a paper/kind yields no data.
pub const NO_DATA: &str = "None";
/// Cell value for a template column the source table did not provide.
pub const MISSING_CELL: &str = "NaN";
/// Cell value for a numeric cell that could not be coerced to a float.
pub const UNPARSEABLE_CELL: &str = "None";
/// Column appended to every canonical table naming the source paper.
pub const REFERENCE_COLUMN: &str = "Reference";

// --- Fragments ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Table,
    Section,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 2] = [FragmentKind::Table, FragmentKind::Section];

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Table => "table",
            FragmentKind::Section => "section",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An atomic, immutable piece of paper content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub text: String,
}

impl Fragment {
    pub fn table(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Table,
            text: text.into(),
        }
    }

    pub fn section(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Section,
            text: text.into(),
        }
    }
}

/// Content of one paper as handed over by the upstream conversion stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperContent {
    /// Markdown tables (including tables and figures rendered to markdown).
    #[serde(default)]
    pub tables: Vec<String>,
    /// Cleaned prose sections.
    #[serde(default)]
    pub sections: Vec<String>,
}

impl PaperContent {
    pub fn fragments(&self, kind: FragmentKind) -> Vec<Fragment> {
        match kind {
            FragmentKind::Table => self.tables.iter().map(Fragment::table).collect(),
            FragmentKind::Section => self.sections.iter().map(Fragment::section).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.sections.is_empty()
    }
}

/// Paper id → content. Iterates in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corpus {
    pub papers: BTreeMap<String, PaperContent>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PaperContent)> {
        self.papers.iter()
    }
}

// --- Extraction ---

/// One integrated table produced by the transform stage, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub system_prompt: String,
    pub query: String,
    /// The reference-answer-and-suggestion block, present on repaired results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_prompt: Option<String>,
    pub integrated_table: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

/// Rubric score for one [`ExtractionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckVerdict {
    #[serde(rename = "Data Accuracy")]
    pub data_accuracy: u8,
    #[serde(rename = "Semantic Consistency")]
    pub semantic_consistency: u8,
    #[serde(rename = "Data Completeness")]
    pub data_completeness: u8,
    #[serde(rename = "Overall Score")]
    pub overall_score: u8,
    #[serde(rename = "Suggestion")]
    pub suggestion: String,
    #[serde(rename = "Decision")]
    pub decision: Decision,
}

impl CheckVerdict {
    pub fn is_accepted(&self) -> bool {
        self.decision == Decision::Accept
    }
}

/// Per-paper output: one slot per fragment kind, `"None"` when there is no data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    #[serde(with = "no_data_sentinel")]
    pub table: Option<ExtractionResult>,
    #[serde(with = "no_data_sentinel")]
    pub text: Option<ExtractionResult>,
}

impl PaperRecord {
    pub fn get(&self, kind: FragmentKind) -> Option<&ExtractionResult> {
        match kind {
            FragmentKind::Table => self.table.as_ref(),
            FragmentKind::Section => self.text.as_ref(),
        }
    }

    pub fn set(&mut self, kind: FragmentKind, result: Option<ExtractionResult>) {
        match kind {
            FragmentKind::Table => self.table = result,
            FragmentKind::Section => self.text = result,
        }
    }

    /// Integrated tables in merge order: table-derived first, then text-derived.
    pub fn integrated_tables(&self) -> impl Iterator<Item = &str> {
        FragmentKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .map(|r| r.integrated_table.as_str())
    }
}

mod no_data_sentinel {
    use super::{ExtractionResult, NO_DATA};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<ExtractionResult>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(result) => result.serialize(serializer),
            None => serializer.serialize_str(NO_DATA),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ExtractionResult>, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(ref s) if s == NO_DATA => Ok(None),
            serde_json::Value::Object(_) => serde_json::from_value(value)
                .map(Some)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected extraction result or \"{NO_DATA}\", got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ExtractionResult {
        ExtractionResult {
            system_prompt: "sys".into(),
            query: "q".into(),
            external_prompt: None,
            integrated_table: "| River |\n|---|\n| Tigris |".into(),
            explanation: "1. Tigris: table 1, row 1".into(),
        }
    }

    #[test]
    fn missing_results_serialize_as_none_sentinel() {
        let record = PaperRecord {
            table: Some(result()),
            text: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["text"], "None");
        assert_eq!(json["table"]["query"], "q");
        assert!(json["table"].get("external_prompt").is_none());

        let back: PaperRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unexpected_sentinel_is_rejected() {
        let err = serde_json::from_str::<PaperRecord>(r#"{"table": 3, "text": "None"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn verdict_uses_rubric_keys() {
        let verdict = CheckVerdict {
            data_accuracy: 9,
            semantic_consistency: 6,
            data_completeness: 8,
            overall_score: 7,
            suggestion: "You should add Table 2, Column 3".into(),
            decision: Decision::Accept,
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["Overall Score"], 7);
        assert_eq!(json["Decision"], "accept");
    }

    #[test]
    fn record_lists_table_result_before_text_result() {
        let mut text = result();
        text.integrated_table = "| from text |".into();
        let record = PaperRecord {
            table: Some(result()),
            text: Some(text),
        };
        let tables: Vec<&str> = record.integrated_tables().collect();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1], "| from text |");
    }

    #[test]
    fn corpus_is_a_plain_map() {
        let corpus: Corpus = serde_json::from_str(
            r#"{"p2": {"tables": ["| a |"]}, "p1": {"sections": ["In 2019 we sampled 12 sites"]}}"#,
        )
        .unwrap();
        let ids: Vec<&String> = corpus.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["p1", "p2"]);
        assert_eq!(corpus.papers["p2"].fragments(FragmentKind::Table)[0].kind, FragmentKind::Table);
    }
}

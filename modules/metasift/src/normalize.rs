//! Numeric normalization of the canonical table.
//!
//! Rows are sent to the oracle in batches. Each batch comes back as a
//! [`BatchOutcome`]; only failed batches are re-sent. If any batch still fails
//! once the attempt budget is spent, the table is left exactly as it was.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use metasift_common::{MetaSiftError, MISSING_CELL, REFERENCE_COLUMN, UNPARSEABLE_CELL};

use crate::merger::{CanonicalTable, Cell};
use crate::oracle::{Oracle, OracleRequest};
use crate::prompts::PromptSet;
use crate::shape::parse_records;

#[derive(Debug)]
pub enum BatchOutcome {
    Normalized { batch: usize, rows: Vec<Vec<Cell>> },
    Failed { batch: usize, reason: String },
}

impl BatchOutcome {
    pub fn batch(&self) -> usize {
        match self {
            BatchOutcome::Normalized { batch, .. } | BatchOutcome::Failed { batch, .. } => *batch,
        }
    }
}

/// Summary of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationReport {
    pub batches: usize,
    pub attempts: u32,
    /// Batches still failing after the last attempt.
    pub failed_batches: Vec<usize>,
    /// False when the pre-normalization table was kept.
    pub applied: bool,
}

pub struct Normalizer {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptSet>,
    batch_size: usize,
    max_try: u32,
    max_workers: usize,
}

impl Normalizer {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptSet>,
        batch_size: usize,
        max_try: u32,
        max_workers: usize,
    ) -> Self {
        Self {
            oracle,
            prompts,
            batch_size: batch_size.max(1),
            max_try: max_try.max(1),
            max_workers: max_workers.max(1),
        }
    }

    /// Normalize `table` in place, or leave it untouched if any batch fails.
    pub async fn normalize(&self, table: &mut CanonicalTable) -> NormalizationReport {
        let ranges: Vec<std::ops::Range<usize>> = (0..table.len())
            .step_by(self.batch_size)
            .map(|start| start..(start + self.batch_size).min(table.len()))
            .collect();

        let mut report = NormalizationReport {
            batches: ranges.len(),
            ..Default::default()
        };
        if ranges.is_empty() {
            report.applied = true;
            return report;
        }

        let mut normalized: Vec<Option<Vec<Vec<Cell>>>> = vec![None; ranges.len()];
        let mut pending: Vec<usize> = (0..ranges.len()).collect();

        while !pending.is_empty() && report.attempts < self.max_try {
            report.attempts += 1;
            let snapshot = &*table;
            let outcomes: Vec<BatchOutcome> = stream::iter(pending.iter().map(|&batch| {
                let range = ranges[batch].clone();
                async move { self.run_batch(snapshot, batch, range).await }
            }))
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

            pending.clear();
            for outcome in outcomes {
                match outcome {
                    BatchOutcome::Normalized { batch, rows } => normalized[batch] = Some(rows),
                    BatchOutcome::Failed { batch, reason } => {
                        warn!(stage = "normalize", batch, attempt = report.attempts, %reason, "Normalization batch failed");
                        pending.push(batch);
                    }
                }
            }
            pending.sort_unstable();
        }

        if !pending.is_empty() {
            warn!(
                stage = "normalize",
                failed = pending.len(),
                batches = ranges.len(),
                "Keeping unnormalized table"
            );
            report.failed_batches = pending;
            return report;
        }

        for (range, rows) in ranges.iter().zip(normalized) {
            if let Some(rows) = rows {
                table.replace_rows(range.start, rows);
            }
        }
        report.applied = true;
        info!(batches = report.batches, attempts = report.attempts, rows = table.len(), "Table normalized");
        report
    }

    async fn run_batch(
        &self,
        table: &CanonicalTable,
        batch: usize,
        range: std::ops::Range<usize>,
    ) -> BatchOutcome {
        match self.try_batch(table, batch, range).await {
            Ok(rows) => BatchOutcome::Normalized { batch, rows },
            Err(e) => BatchOutcome::Failed {
                batch,
                reason: e.to_string(),
            },
        }
    }

    async fn try_batch(
        &self,
        table: &CanonicalTable,
        batch: usize,
        range: std::ops::Range<usize>,
    ) -> Result<Vec<Vec<Cell>>, MetaSiftError> {
        let records = table.records(range.clone());
        let payload = serde_json::to_string(&records)?;
        let request = OracleRequest::new(
            "normalize",
            self.prompts.normalize_system(),
            self.prompts.normalize_query(&payload),
        )
        .temperature(0.0);

        let responses = self
            .oracle
            .complete(&request)
            .await
            .map_err(|e| MetaSiftError::MergeBatch {
                batch,
                reason: format!("{e:#}"),
            })?;
        let raw = responses.first().ok_or_else(|| MetaSiftError::MergeBatch {
            batch,
            reason: "no completion returned".into(),
        })?;

        let parsed = parse_records(raw, records.len(), table.columns())?;
        table.rows()[range]
            .iter()
            .zip(&parsed)
            .map(|(original, rewritten)| rebuild_row(table.columns(), original, rewritten, batch))
            .collect()
    }
}

/// Rebuild one row from its rewritten record. `Reference` is never taken
/// from the response; paper ids stay exactly as merged.
fn rebuild_row(
    columns: &[String],
    original: &[Cell],
    rewritten: &Map<String, Value>,
    batch: usize,
) -> Result<Vec<Cell>, MetaSiftError> {
    columns
        .iter()
        .zip(original)
        .map(|(column, cell)| {
            if column == REFERENCE_COLUMN {
                return Ok(cell.clone());
            }
            let Some(value) = rewritten.get(column) else {
                return Err(MetaSiftError::MergeBatch {
                    batch,
                    reason: format!("column {column:?} missing from response"),
                });
            };
            normalized_cell(cell, value).ok_or_else(|| MetaSiftError::MergeBatch {
                batch,
                reason: format!("column {column:?} came back as {value}"),
            })
        })
        .collect()
}

/// Interpret one rewritten value against the cell it replaces.
///
/// Missing cells stay missing. Numbers and float strings become numbers,
/// `"None"` and null become unparseable, and any other rewrite of a text
/// value is ignored. Booleans, lists and objects reject the batch.
pub fn normalized_cell(original: &Cell, value: &Value) -> Option<Cell> {
    if *original == Cell::Missing {
        return Some(Cell::Missing);
    }
    match value {
        Value::Null => Some(Cell::Unparseable),
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Cell::Number),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed == UNPARSEABLE_CELL {
                Some(Cell::Unparseable)
            } else if trimmed == MISSING_CELL {
                Some(Cell::Missing)
            } else if let Some(n) = trimmed.parse::<f64>().ok().filter(|f| f.is_finite()) {
                Some(Cell::Number(n))
            } else {
                Some(original.clone())
            }
        }
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;
    use serde_json::json;

    const TEMPLATE: &str = "| Site | Content |\n|---|---|";

    fn table(values: &[&str]) -> CanonicalTable {
        let mut table = CanonicalTable::from_template(TEMPLATE).unwrap();
        let mut md = String::from("| Site | Content |\n|---|---|\n");
        for (i, v) in values.iter().enumerate() {
            md.push_str(&format!("| s{i} | {v} |\n"));
        }
        table.append_markdown("p1", &md);
        table
    }

    fn normalizer(oracle: Arc<ScriptedOracle>, batch_size: usize, max_try: u32) -> Normalizer {
        Normalizer::new(
            oracle,
            Arc::new(PromptSet::new("hydrology").unwrap()),
            batch_size,
            max_try,
            4,
        )
    }

    fn response(rows: &[(&str, Value)]) -> String {
        Value::Array(
            rows.iter()
                .map(|(site, content)| json!({"Site": site, "Content": content, "Reference": "p1"}))
                .collect(),
        )
        .to_string()
    }

    #[test]
    fn cell_rules() {
        let text = Cell::Text("32%,0.5".into());
        assert_eq!(normalized_cell(&text, &json!(0.41)), Some(Cell::Number(0.41)));
        assert_eq!(normalized_cell(&text, &json!("0.41")), Some(Cell::Number(0.41)));
        assert_eq!(normalized_cell(&text, &json!("None")), Some(Cell::Unparseable));
        assert_eq!(normalized_cell(&text, &Value::Null), Some(Cell::Unparseable));
        assert_eq!(normalized_cell(&text, &json!("rewritten")), Some(text.clone()));
        assert_eq!(normalized_cell(&Cell::Missing, &json!(3)), Some(Cell::Missing));
        assert_eq!(normalized_cell(&text, &json!(true)), None);
    }

    #[test]
    fn plain_floats_are_a_fixed_point() {
        let cell = Cell::Number(0.35);
        let again = normalized_cell(&cell, &cell.to_json()).unwrap();
        assert_eq!(again, cell);
    }

    #[tokio::test]
    async fn normalizes_the_documented_examples() {
        let oracle = Arc::new(ScriptedOracle::new().on(
            "normalize",
            response(&[
                ("s0", json!(0.41)),
                ("s1", json!("None")),
                ("s2", json!(1900.0)),
            ]),
        ));
        let mut t = table(&["32%,0.5", "declined", "1800-2000 (kg/ha)"]);
        let report = normalizer(oracle, 20, 3).normalize(&mut t).await;

        assert!(report.applied);
        let content: Vec<String> = t.rows().iter().map(|r| r[1].to_string()).collect();
        assert_eq!(content, ["0.41", "None", "1900.0"]);
        assert_eq!(t.rows()[0][0], Cell::Text("s0".into()));
    }

    #[tokio::test]
    async fn numeric_paper_ids_survive_normalization() {
        let mut t = CanonicalTable::from_template(TEMPLATE).unwrap();
        t.append_markdown("00074", "| Site | Content |\n|---|---|\n| s0 | 35% |\n");
        let oracle = Arc::new(ScriptedOracle::new().on(
            "normalize",
            json!([{"Site": "s0", "Content": 0.35, "Reference": 74}]).to_string(),
        ));

        let report = normalizer(oracle, 20, 1).normalize(&mut t).await;

        assert!(report.applied);
        assert_eq!(t.rows()[0][1], Cell::Number(0.35));
        assert_eq!(t.rows()[0][2], Cell::Text("00074".into()));
        assert_eq!(t.rows()[0][2].to_string(), "00074");
    }

    #[tokio::test]
    async fn only_failed_batches_are_retried() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .on_matching("normalize", "\"s0\"", response(&[("s0", json!(1.0))]))
                .on_matching("normalize", "\"s1\"", "not json")
                .on_matching("normalize", "\"s1\"", response(&[("s1", json!(2.0))])),
        );
        let mut t = table(&["1", "2"]);
        let report = normalizer(oracle.clone(), 1, 3).normalize(&mut t).await;

        assert!(report.applied);
        assert_eq!(report.attempts, 2);
        assert_eq!(oracle.call_count("normalize"), 3);
        assert_eq!(t.rows()[1][1], Cell::Number(2.0));
    }

    #[tokio::test]
    async fn persistent_failure_keeps_the_original_table() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .on_matching("normalize", "\"s0\"", response(&[("s0", json!(1.0))]))
                .on_error("normalize", "rate limited")
                .on_error("normalize", "rate limited"),
        );
        let mut t = table(&["1", "2"]);
        let before = t.clone();
        let report = normalizer(oracle, 1, 2).normalize(&mut t).await;

        assert!(!report.applied);
        assert_eq!(report.failed_batches, [1]);
        assert_eq!(t, before);
    }

    #[tokio::test]
    async fn wrong_record_count_fails_the_batch() {
        let oracle = Arc::new(ScriptedOracle::new().on("normalize", response(&[("s0", json!(1.0))])));
        let mut t = table(&["1", "2"]);
        let report = normalizer(oracle, 20, 1).normalize(&mut t).await;
        assert!(!report.applied);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn empty_table_needs_no_calls() {
        let oracle = Arc::new(ScriptedOracle::new());
        let mut t = CanonicalTable::from_template(TEMPLATE).unwrap();
        let report = normalizer(oracle.clone(), 20, 3).normalize(&mut t).await;
        assert!(report.applied);
        assert_eq!(oracle.call_count("normalize"), 0);
    }
}

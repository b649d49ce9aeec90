//! Schema reconciliation: folding per-paper integrated tables into one
//! canonical table keyed by the template's columns.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use metasift_common::{
    MetaSiftError, PaperRecord, MISSING_CELL, REFERENCE_COLUMN, UNPARSEABLE_CELL,
};

use crate::markdown::MarkdownTable;

/// Template names this long or shorter only match exactly.
const FUZZY_MIN_CHARS: usize = 5;
const FUZZY_MAX_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    /// A numeric cell the normalizer could not coerce.
    Unparseable,
    /// No source column provided this value.
    Missing,
}

impl Cell {
    /// Cell for a raw value read from a source table.
    pub fn from_source(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == MISSING_CELL {
            Cell::Missing
        } else {
            Cell::Text(raw.to_string())
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(MISSING_CELL.to_string())),
            Cell::Unparseable => Value::String(UNPARSEABLE_CELL.to_string()),
            Cell::Missing => Value::String(MISSING_CELL.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            // Debug keeps the trailing `.0` on integral values.
            Cell::Number(n) => write!(f, "{n:?}"),
            Cell::Unparseable => f.write_str(UNPARSEABLE_CELL),
            Cell::Missing => f.write_str(MISSING_CELL),
        }
    }
}

/// Index of the first template column `source` matches: exact equality after
/// trimming, or for names longer than five characters a case-insensitive
/// Levenshtein distance of at most two.
pub fn match_column(template: &[String], source: &str) -> Option<usize> {
    let source = source.trim();
    let source_lower = source.to_lowercase();
    template.iter().position(|column| {
        column == source
            || (column.chars().count() > FUZZY_MIN_CHARS
                && strsim::levenshtein(&column.to_lowercase(), &source_lower) <= FUZZY_MAX_DISTANCE)
    })
}

/// The merged meta-analysis table: template columns followed by `Reference`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl CanonicalTable {
    /// Build an empty table from the header row of a markdown template.
    pub fn from_template(template: &str) -> Result<Self, MetaSiftError> {
        let parsed = MarkdownTable::parse(template).ok_or_else(|| {
            MetaSiftError::Config("column template has no markdown header row".into())
        })?;
        let mut columns: Vec<String> = parsed
            .headers
            .into_iter()
            .filter(|h| h != REFERENCE_COLUMN)
            .collect();
        columns.push(REFERENCE_COLUMN.to_string());
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Template columns without `Reference`.
    pub fn declared(&self) -> &[String] {
        &self.columns[..self.columns.len() - 1]
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map each template column to the source column feeding it. The first
    /// source column to claim a template column keeps it.
    fn column_mapping(&self, headers: &[String]) -> Vec<Option<usize>> {
        let declared = self.declared();
        let mut mapping = vec![None; declared.len()];
        for (source_idx, header) in headers.iter().enumerate() {
            match match_column(declared, header) {
                Some(target) if mapping[target].is_none() => mapping[target] = Some(source_idx),
                Some(target) => {
                    debug!(column = %header, target = %declared[target], "Duplicate source column dropped")
                }
                None => debug!(column = %header, "Unmatched source column dropped"),
            }
        }
        mapping
    }

    /// Append every row of `table`, tagged with `paper`. Returns rows added.
    pub fn append(&mut self, paper: &str, table: &MarkdownTable) -> usize {
        let mapping = self.column_mapping(&table.headers);
        for source in &table.rows {
            let mut row: Vec<Cell> = mapping
                .iter()
                .map(|m| match m {
                    Some(idx) => Cell::from_source(&source[*idx]),
                    None => Cell::Missing,
                })
                .collect();
            row.push(Cell::Text(paper.to_string()));
            self.rows.push(row);
        }
        table.rows.len()
    }

    /// Parse a markdown integrated table and append it.
    pub fn append_markdown(&mut self, paper: &str, markdown: &str) -> usize {
        match MarkdownTable::parse(markdown) {
            Some(table) => self.append(paper, &table),
            None => {
                warn!(stage = "merge", paper, "Integrated table could not be parsed, skipping");
                0
            }
        }
    }

    /// Append a paper's table-derived result, then its text-derived result.
    pub fn append_record(&mut self, paper: &str, record: &PaperRecord) -> usize {
        record
            .integrated_tables()
            .map(|table| self.append_markdown(paper, table))
            .sum()
    }

    /// Rows `range` as JSON objects keyed by column name.
    pub fn records(&self, range: std::ops::Range<usize>) -> Vec<Map<String, Value>> {
        self.rows[range]
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.clone(), cell.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Replace rows starting at `start`. Row count never changes.
    pub(crate) fn replace_rows(&mut self, start: usize, rows: Vec<Vec<Cell>>) {
        for (offset, row) in rows.into_iter().enumerate() {
            self.rows[start + offset] = row;
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), MetaSiftError> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| MetaSiftError::Io(std::io::Error::other(e)))?;
        let write = |w: &mut csv::Writer<std::fs::File>, record: Vec<String>| {
            w.write_record(record)
                .map_err(|e| MetaSiftError::Io(std::io::Error::other(e)))
        };
        write(&mut writer, self.columns.clone())?;
        for row in &self.rows {
            write(&mut writer, row.iter().map(Cell::to_string).collect())?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Merge records in the given order into a fresh table.
pub fn merge_records<'a>(
    template: &str,
    records: impl IntoIterator<Item = (&'a str, &'a PaperRecord)>,
) -> Result<CanonicalTable, MetaSiftError> {
    let mut table = CanonicalTable::from_template(template)?;
    for (paper, record) in records {
        table.append_record(paper, record);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metasift_common::ExtractionResult;

    const TEMPLATE: &str = "| River | Location | Heavy metals | Content (µg/L) |\n|---|---|---|---|\n| Tigris River | Turkey | Cu | 40 |";

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn record(table: &str) -> PaperRecord {
        PaperRecord {
            table: Some(ExtractionResult {
                system_prompt: String::new(),
                query: String::new(),
                external_prompt: None,
                integrated_table: table.to_string(),
                explanation: String::new(),
            }),
            text: None,
        }
    }

    #[test]
    fn short_names_only_match_exactly() {
        let template = cols(&["pH", "River"]);
        assert_eq!(match_column(&template, "pH"), Some(0));
        assert_eq!(match_column(&template, "pS"), None);
        assert_eq!(match_column(&template, " River "), Some(1));
        assert_eq!(match_column(&template, "Rivers"), None);
    }

    #[test]
    fn long_names_match_within_two_edits_case_insensitively() {
        let template = cols(&["Heavy metals", "Content (µg/L)"]);
        assert_eq!(match_column(&template, "Heavy Metal"), Some(0));
        assert_eq!(match_column(&template, "content (ug/l)"), Some(1));
        assert_eq!(match_column(&template, "Heavy"), None);
    }

    #[test]
    fn exact_match_is_symmetric() {
        let a = cols(&["Sampling site"]);
        let b = cols(&["Sampling site"]);
        assert_eq!(match_column(&a, &b[0]), match_column(&b, &a[0]));
    }

    #[test]
    fn reconciles_columns_and_tags_reference() {
        let source = "| River | Loc. | Heavy Metal | Content (ug/L) | Sampling Method |\n|---|---|---|---|---|\n| Tigris | Turkey | Cu | 40 | ICP-MS |";
        let mut table = CanonicalTable::from_template(TEMPLATE).unwrap();
        assert_eq!(table.append_markdown("p1", source), 1);

        assert_eq!(
            table.columns(),
            ["River", "Location", "Heavy metals", "Content (µg/L)", "Reference"]
        );
        assert_eq!(
            table.rows()[0],
            [
                Cell::Text("Tigris".into()),
                Cell::Missing,
                Cell::Text("Cu".into()),
                Cell::Text("40".into()),
                Cell::Text("p1".into()),
            ]
        );
    }

    #[test]
    fn second_source_column_for_same_target_is_dropped() {
        let source = "| Heavy metals | Heavy metal |\n|---|---|\n| Cu | Co |";
        let mut table = CanonicalTable::from_template(TEMPLATE).unwrap();
        table.append_markdown("p1", source);
        assert_eq!(table.rows()[0][2], Cell::Text("Cu".into()));
    }

    #[test]
    fn merge_is_associative_in_paper_order() {
        let a = record("| River |\n|---|\n| Tigris |");
        let b = record("| River | Heavy metals |\n|---|---|\n| Tiete | Fe |");
        let c = record("| Content (µg/L) |\n|---|\n| 915 |");

        let mut incremental = merge_records(TEMPLATE, [("a", &a), ("b", &b)]).unwrap();
        incremental.append_record("c", &c);
        let at_once = merge_records(TEMPLATE, [("a", &a), ("b", &b), ("c", &c)]).unwrap();

        assert_eq!(incremental, at_once);
        assert_eq!(at_once.len(), 3);
    }

    #[test]
    fn table_rows_precede_text_rows_for_a_paper() {
        let mut rec = record("| River |\n|---|\n| from table |");
        rec.text = rec.table.clone().map(|mut r| {
            r.integrated_table = "| River |\n|---|\n| from text |".into();
            r
        });
        let table = merge_records(TEMPLATE, [("p", &rec)]).unwrap();
        assert_eq!(table.rows()[0][0], Cell::Text("from table".into()));
        assert_eq!(table.rows()[1][0], Cell::Text("from text".into()));
    }

    #[test]
    fn cells_render_with_sentinels() {
        assert_eq!(Cell::Number(1900.0).to_string(), "1900.0");
        assert_eq!(Cell::Number(0.41).to_string(), "0.41");
        assert_eq!(Cell::Unparseable.to_string(), "None");
        assert_eq!(Cell::Missing.to_string(), "NaN");
        assert_eq!(Cell::from_source(" NaN "), Cell::Missing);
    }

    #[test]
    fn csv_has_template_header_plus_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta_analysis.csv");
        let table = merge_records(TEMPLATE, [("p1", &record("| River |\n|---|\n| Nile, upper |"))]).unwrap();
        table.write_csv(&path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(lines.next(), Some("River,Location,Heavy metals,Content (µg/L),Reference"));
        assert_eq!(lines.next(), Some("\"Nile, upper\",NaN,NaN,NaN,p1"));
    }
}

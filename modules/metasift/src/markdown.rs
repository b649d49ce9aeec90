//! Markdown table handling: splitting an oracle response into table and
//! explanation, ranking sampled completions, and parsing pipe tables.
//!
//! All offsets are character offsets so boundaries land on the same glyphs
//! regardless of multi-byte content like `µg/L`.

use std::sync::LazyLock;

use regex::Regex;

use metasift_common::MISSING_CELL;

const MARKDOWN_FENCE: &str = "```markdown";
const FENCE: &str = "```";

static SEPARATOR_CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^:?-+:?$").unwrap());

fn find_chars(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle.as_slice())
}

fn rfind_chars(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle.as_slice())
}

/// Length of the fenced span: `rfind("```") - find("```markdown")`, with a
/// missing marker counted as -1.
pub fn fenced_span_len(response: &str) -> i64 {
    let chars: Vec<char> = response.chars().collect();
    let last = rfind_chars(&chars, FENCE).map_or(-1, |i| i as i64);
    let first = find_chars(&chars, MARKDOWN_FENCE).map_or(-1, |i| i as i64);
    last - first
}

/// Pick the completion with the longest fenced span. The first one wins ties.
pub fn select_longest_fenced(responses: &[String]) -> Option<&String> {
    let mut best: Option<(&String, i64)> = None;
    for response in responses {
        let len = fenced_span_len(response);
        if best.map_or(len > -1, |(_, best_len)| len > best_len) {
            best = Some((response, len));
        }
    }
    best.map(|(response, _)| response)
}

/// Split a transform response into `(integrated_table, explanation)`.
///
/// With a "```markdown" fence the table runs from the fence to one character
/// past the last "```". If no `|` appears in the ten characters before that
/// end, or there is no fence, the table runs from the first `|` through the
/// last `|`. The explanation is everything after the table.
pub fn split_table_explanation(response: &str) -> (String, String) {
    let chars: Vec<char> = response.chars().collect();

    let fenced = find_chars(&chars, MARKDOWN_FENCE).and_then(|start| {
        let last = rfind_chars(&chars, FENCE)?;
        let end = (last + 4).min(chars.len());
        let window = &chars[end.saturating_sub(10)..end];
        window.contains(&'|').then_some((start, end))
    });

    let (start, end) = match fenced {
        Some(span) => span,
        None => {
            let first = chars.iter().position(|&c| c == '|');
            let last = chars.iter().rposition(|&c| c == '|');
            match (first, last) {
                (Some(first), Some(last)) => (first, last + 1),
                _ => (0, 0),
            }
        }
    };

    let table: String = chars[start..end].iter().collect();
    let explanation: String = chars[end..].iter().collect();
    (table, explanation)
}

/// Remove exactly one leading and one trailing newline.
pub fn trim_template(template: &str) -> &str {
    let template = template.strip_prefix('\n').unwrap_or(template);
    template.strip_suffix('\n').unwrap_or(template)
}

/// A parsed pipe table. Cells are trimmed; every row has `headers.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MarkdownTable {
    /// Parse the span between the first and last `|` of `text`.
    ///
    /// Separator rows are skipped, short rows are padded with `NaN` and rows
    /// with more cells than the header are skipped. Returns `None` when there
    /// is no header row.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find('|')?;
        let end = text.rfind('|')? + 1;
        let span = &text[start..end];

        let mut lines = span
            .lines()
            .map(str::trim)
            .filter(|line| line.contains('|'))
            .map(split_row);

        let headers = lines.next()?;
        if headers.iter().all(String::is_empty) {
            return None;
        }

        let rows = lines
            .filter(|cells| !is_separator(cells))
            .filter(|cells| cells.len() <= headers.len())
            .map(|mut cells| {
                cells.resize(headers.len(), MISSING_CELL.to_string());
                cells
            })
            .collect();

        Some(Self { headers, rows })
    }
}

fn split_row(line: &str) -> Vec<String> {
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_separator(cells: &[String]) -> bool {
    cells.iter().all(|c| SEPARATOR_CELL.is_match(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "| River | Heavy metals |\n|---|---|\n| Tigris | Cu |";

    #[test]
    fn fenced_table_keeps_fence_and_one_trailing_char() {
        let response = format!("```markdown\n{TABLE}\n```\nExplanation: row 1 is from table 2.");
        let (table, explanation) = split_table_explanation(&response);
        assert!(table.starts_with("```markdown\n| River"));
        assert!(table.ends_with("|\n```\n"));
        assert_eq!(explanation, "Explanation: row 1 is from table 2.");
    }

    #[test]
    fn fence_without_nearby_pipe_falls_back_to_pipe_rule() {
        let response = format!("```markdown\n{TABLE}\n\nsome trailing notes here\n```\nwhy");
        let (table, explanation) = split_table_explanation(&response);
        assert_eq!(table, TABLE);
        assert_eq!(explanation, "\n\nsome trailing notes here\n```\nwhy");
    }

    #[test]
    fn unfenced_response_uses_pipe_rule() {
        let response = format!("Here is the table:\n{TABLE}\n1. Tigris: table 1");
        let (table, explanation) = split_table_explanation(&response);
        assert_eq!(table, TABLE);
        assert_eq!(explanation, "\n1. Tigris: table 1");
    }

    #[test]
    fn response_without_pipes_yields_empty_table() {
        let (table, explanation) = split_table_explanation("I could not find any data.");
        assert!(table.is_empty());
        assert_eq!(explanation, "I could not find any data.");
    }

    #[test]
    fn split_is_character_indexed() {
        let response = "| Content (µg/L) |\n|---|\n| 40 |µµµ";
        let (table, explanation) = split_table_explanation(response);
        assert_eq!(table, "| Content (µg/L) |\n|---|\n| 40 |");
        assert_eq!(explanation, "µµµ");
    }

    #[test]
    fn longest_fenced_completion_wins_and_first_wins_ties() {
        let short = "```markdown\n| a |\n```".to_string();
        let long = "```markdown\n| a |\n| b |\n| c |\n```".to_string();
        let same_as_long = "```markdown\n| x |\n| y |\n| z |\n```".to_string();
        let responses = vec![short, long.clone(), same_as_long];
        assert_eq!(select_longest_fenced(&responses), Some(&long));
    }

    #[test]
    fn unfenced_completions_still_select_the_first() {
        let responses = vec!["| a |".to_string(), "| b | c |".to_string()];
        assert_eq!(fenced_span_len(&responses[0]), 0);
        assert_eq!(select_longest_fenced(&responses), Some(&responses[0]));
        assert_eq!(select_longest_fenced(&[]), None);
    }

    #[test]
    fn template_trims_exactly_one_newline_each_side() {
        assert_eq!(trim_template("\n| a |\n"), "| a |");
        assert_eq!(trim_template("\n\n| a |\n\n"), "\n| a |\n");
        assert_eq!(trim_template("| a |"), "| a |");
    }

    #[test]
    fn parse_pads_short_rows_and_skips_long_ones() {
        let text = "```markdown\n| River | Location | Content |\n|:---|---|---:|\n| Tigris | Turkey | 40 |\n| Tiete | Brazil |\n| Nile | Egypt | 3 | extra |\n```";
        let table = MarkdownTable::parse(text).unwrap();
        assert_eq!(table.headers, ["River", "Location", "Content"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], ["Tiete", "Brazil", "NaN"]);
    }

    #[test]
    fn parse_without_pipes_is_none() {
        assert!(MarkdownTable::parse("no table here").is_none());
    }
}

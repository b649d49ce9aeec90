//! Prompt text for every oracle call.
//!
//! Templates use `{{var}}` placeholders. `{{field}}` is filled once when the
//! [`PromptSet`] is built; everything else (`kind`, `topic`, fragments, the
//! column template) is filled per call.

use std::collections::HashMap;

use anyhow::Result;

use metasift_common::{ExtractionResult, Fragment, FragmentKind};

use crate::template::{resolve_vars, validate_template};

const FILTER_SYSTEM: &str = r#"
You are a specialist in {{field}} and you judge whether the {{kind}}s of a research paper hold data on a given topic.

Follow these rules:

1. **What to score**: You will receive several numbered first-level {{kind}}s, which may contain nested parts. Score each first-level {{kind}} as a whole. Return exactly one score per first-level {{kind}}.
2. **Scale**: Each score is a number from 0 to 1. A score of 0 means the {{kind}} has nothing to do with the topic; 1 means it is squarely about the topic.
3. **Be inclusive**: Give a score above 0.5 whenever any part of a {{kind}}, however small, holds data related to the topic. Missing a relevant {{kind}} is worse than keeping an irrelevant one.
4. **Format**: Answer with the list of scores only, in the order the {{kind}}s were given. No prose.

Example: {"scores": [0.8, 0.3, 0.9]}
"#;

const FILTER_QUERY: &str = r#"
Topic of interest: {{topic}}

{{fragments}}

Score whether each of the {{count}} {{kind}}s above holds data on the topic of interest.
Return exactly {{count}} numbers between 0 and 1 and nothing else.
"#;

const TRANSFORM_SYSTEM: &str = r#"
You are a specialist in {{field}} who reorganizes data from {{kind}}s into tables. You will convert **every data point** from the {{kind}}s of one research paper into a single integrated table that follows a column template supplied by the user. Nothing may be left out.

**Rules**:
1. **Complete coverage**: Every number and value in every {{kind}} belongs in the integrated table.
   - Do not skip any {{kind}}, row, column or cell.
   - When the same quantity appears in several {{kind}}s, keep every occurrence, even duplicates.
   - Keep all statistics (means, minima, maxima, ranges, percentiles and so on).
   - Keep values for every case or condition (seasons, sampling dates, sites and so on).
   - If a row or column is relevant, carry over all of it. If a whole {{kind}} is relevant, carry over all of it as multiple rows.
   - Write "NaN" for any cell the source does not provide. Rows may be incomplete, but no available value may be dropped.
   - Do not judge usefulness. Transform everything.
2. **One table**: Produce exactly one integrated table in Markdown.
3. **Layout**: Follow the columns of the user's template. Do not repeat the template's example rows.
4. **Numbers**: Write each numeric value as a plain integer or decimal, without symbols such as ">", "<", "~", "=", "+", "-", "±" or parentheses.
5. **Provenance**: After the table, explain where each value came from: which {{kind}} and which row and column.
"#;

const TRANSFORM_QUERY: &str = r#"
Topic of interest: {{topic}}
Integrated table template:
```markdown
{{template}}
```

{{fragments}}

Convert all of the data in the {{kind}}s above into one integrated table that follows the template, then explain the source of every value.
Example:
```markdown
| Column 1 | Column 2 |
|----------|----------|
| 10.5     | 20.3     |
| 15.2     | NaN      |
```

[The Start of Explanation]
1. 10.5: {{kind}} 2, row 3, column 2.
2. 20.3: {{kind}} 4, row 5, column 1.
3. ...
[The End of Explanation]
"#;

const REPAIR_BLOCK: &str = r#"
A reference answer and a reviewer's suggestion for this task are given below. Improve the reference answer so that it meets the task requirements, and keep to every rule listed under **Rules**.

[The Start of Reference Answer]
{{reference}}
[The End of Reference Answer]

[The Start of Suggestion for Reference Answer]
{{suggestion}}
[The End of Suggestion for Reference Answer]
"#;

const FRAGMENT_BLOCK: &str = r#"
[The Start of First-level {{kind}} {{index}}]
{{text}}
[The End of First-level {{kind}} {{index}}]
"#;

const CHECK_SYSTEM: &str = r#"
You are a specialist in {{field}} reviewing a student's table integration. The student was asked to transform source data completely, not to pick out highlights, so repeated values and NaN cells are expected and must not be penalized. Judge whether as much of the relevant source data as possible made it into the table.

Score three dimensions from 1 to 10:
1. **Data Accuracy**: values in the integrated table match the sources exactly.
2. **Semantic Consistency**: each value keeps the meaning it had in the source.
3. **Data Completeness**: as much relevant source data as possible was integrated. Score high when most or all of it is present; when something significant is missing, say exactly where it is.

Then:
- **Overall Score**: a single 1 to 10 rating derived from the three dimensions. An empty submission gets the minimum.
- **Suggestion**: concrete instructions phrased as "You should ...", naming exact locations, for example "You should add Column 3 of Table 2", "You should include Rows 5-10 of Table 1", or "You should verify the Income column of Table 3".
"#;

const CHECK_QUERY: &str = r#"
[The Start of Student's Task]
{{task}}
[The End of Student's Task]

[The Start of Student's Answer]
{{answer}}
[The End of Student's Answer]

[The Start of Student's Explanation]
{{explanation}}
[The End of Student's Explanation]

Return only a JSON object with the integer keys "Data Accuracy", "Semantic Consistency", "Data Completeness", "Overall Score" and the text key "Suggestion".
"#;

const NORMALIZE_SYSTEM: &str = r#"
You will receive a JSON list of records taken from a {{field}} meta-analysis table. Standardize the numeric fields:

1. **Numeric rules**:
   - Drop thousand separators ("1,000" becomes 1000).
   - Write percentages as decimals ("35%" becomes 0.35).
   - Replace a range by its midpoint ("10%~15%" becomes 0.125; "1800-2000 (kg/ha)" becomes 1900.0).
   - Replace an entry holding several numbers by their average ("32%,0.5" becomes 0.41).
   - Every numeric field must end up as a single number.
2. **Text fields**: Leave text exactly as it is. Never rename, add or remove keys.
3. **Unconvertible values**: Replace a numeric field that cannot become one number with the string "None" (for example "declined", an empty string, or mixed text and numbers).
4. **Output**: Return the complete JSON list with the same number of records, in the same order, and nothing else.
"#;

const NORMALIZE_QUERY: &str = r#"
[The Start of the List of Records]
{{records}}
[The End of the List of Records]
"#;

const SYSTEM_VARS: &[&str] = &["kind"];

/// Prompt templates pre-rendered for one research field.
#[derive(Debug, Clone)]
pub struct PromptSet {
    filter_system: String,
    transform_system: String,
    check_system: String,
    normalize_system: String,
}

impl PromptSet {
    pub fn new(field: &str) -> Result<Self> {
        let vars = HashMap::from([("field", field)]);
        let render = |template: &str| -> Result<String> {
            let rendered = resolve_vars(template.trim_start(), &vars);
            validate_template(&rendered, SYSTEM_VARS)?;
            Ok(rendered)
        };

        Ok(Self {
            filter_system: render(FILTER_SYSTEM)?,
            transform_system: render(TRANSFORM_SYSTEM)?,
            check_system: render(CHECK_SYSTEM)?,
            normalize_system: render(NORMALIZE_SYSTEM)?,
        })
    }

    pub fn filter_system(&self, kind: FragmentKind) -> String {
        with_kind(&self.filter_system, kind)
    }

    pub fn filter_query(&self, topic: &str, fragments: &[Fragment], kind: FragmentKind) -> String {
        let blocks = fragment_blocks(fragments, kind);
        let count = fragments.len().to_string();
        resolve_vars(
            FILTER_QUERY,
            &HashMap::from([
                ("topic", topic),
                ("fragments", blocks.as_str()),
                ("count", count.as_str()),
                ("kind", kind.as_str()),
            ]),
        )
    }

    pub fn transform_system(&self, kind: FragmentKind) -> String {
        with_kind(&self.transform_system, kind)
    }

    pub fn transform_query(
        &self,
        topic: &str,
        fragments: &[Fragment],
        template: &str,
        kind: FragmentKind,
    ) -> String {
        let blocks = fragment_blocks(fragments, kind);
        resolve_vars(
            TRANSFORM_QUERY,
            &HashMap::from([
                ("topic", topic),
                ("template", template),
                ("fragments", blocks.as_str()),
                ("kind", kind.as_str()),
            ]),
        )
    }

    /// The reference-answer-and-suggestion block appended to a repair query.
    pub fn repair_block(&self, reference: &str, suggestion: &str) -> String {
        resolve_vars(
            REPAIR_BLOCK,
            &HashMap::from([("reference", reference), ("suggestion", suggestion)]),
        )
    }

    pub fn check_system(&self) -> &str {
        &self.check_system
    }

    pub fn check_query(&self, result: &ExtractionResult) -> String {
        resolve_vars(
            CHECK_QUERY,
            &HashMap::from([
                ("task", result.query.as_str()),
                ("answer", result.integrated_table.as_str()),
                ("explanation", result.explanation.as_str()),
            ]),
        )
    }

    pub fn normalize_system(&self) -> &str {
        &self.normalize_system
    }

    pub fn normalize_query(&self, records_json: &str) -> String {
        resolve_vars(NORMALIZE_QUERY, &HashMap::from([("records", records_json)]))
    }
}

fn with_kind(template: &str, kind: FragmentKind) -> String {
    resolve_vars(template, &HashMap::from([("kind", kind.as_str())]))
}

fn fragment_blocks(fragments: &[Fragment], kind: FragmentKind) -> String {
    fragments
        .iter()
        .enumerate()
        .map(|(i, fragment)| {
            let index = (i + 1).to_string();
            resolve_vars(
                FRAGMENT_BLOCK,
                &HashMap::from([
                    ("kind", kind.as_str()),
                    ("index", index.as_str()),
                    ("text", fragment.text.as_str()),
                ]),
            )
        })
        .collect()
}

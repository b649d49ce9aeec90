//! Loading the corpus handed over by the conversion stage.
//!
//! Two layouts are understood:
//! - `corpus.json`: `{ "<paper id>": { "tables": [...], "sections": [...] } }`
//! - `converted_paper.json`: `{ "<paper id>": { "md_path", "converted_text_path" } }`,
//!   the raw output of PDF conversion, which [`convert_layout`] turns into a
//!   [`Corpus`].
//!
//! Sections are always passed through [`passes_numeric_gate`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use metasift_common::{Corpus, MetaSiftError, PaperContent};

pub const CORPUS_FILE: &str = "corpus.json";
pub const CONVERTED_FILE: &str = "converted_paper.json";

/// Paragraphs this short or shorter are dropped from markdown sections.
const MIN_PARAGRAPH_CHARS: usize = 100;
const MIN_SECTION_CHARS: usize = 20;
const MIN_DIGIT_PAIRS: usize = 2;

/// Heading for content that appears before the first heading.
const PREAMBLE_HEADING: &str = "text";
/// Heading under which converted figure descriptions are grouped.
const CONVERTED_TEXT_HEADING: &str = "images";

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,3}\s+(.+?)\s*#*\s*$").unwrap());
static IMAGE_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^!\[[^\]]*\]\([^)]*\)$").unwrap());

/// Number of positions where a digit is immediately followed by another digit.
pub fn count_adjacent_digit_pairs(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(2)
        .filter(|w| w[0].is_ascii_digit() && w[1].is_ascii_digit())
        .count()
}

/// A section is worth extracting from if it is at least 20 characters long
/// and holds at least two adjacent digit pairs.
pub fn passes_numeric_gate(section: &str) -> bool {
    section.chars().count() >= MIN_SECTION_CHARS
        && count_adjacent_digit_pairs(section) >= MIN_DIGIT_PAIRS
}

/// Load `corpus.json` from `data_dir`, gating sections. A missing file is fatal.
pub fn load_corpus(data_dir: &Path) -> Result<Corpus, MetaSiftError> {
    let path = data_dir.join(CORPUS_FILE);
    if !path.exists() {
        return Err(MetaSiftError::MissingArtifact(format!(
            "corpus file {}",
            path.display()
        )));
    }
    let body = std::fs::read_to_string(&path)?;
    let mut corpus: Corpus = serde_json::from_str(&body)?;

    let mut dropped = 0;
    for content in corpus.papers.values_mut() {
        let before = content.sections.len();
        content.sections.retain(|s| passes_numeric_gate(s));
        dropped += before - content.sections.len();
    }

    info!(
        papers = corpus.len(),
        sections_dropped = dropped,
        path = %path.display(),
        "Corpus loaded"
    );
    Ok(corpus)
}

pub fn save_corpus(data_dir: &Path, corpus: &Corpus) -> Result<PathBuf, MetaSiftError> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(CORPUS_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(corpus)?)?;
    Ok(path)
}

/// Split markdown into `(heading, paragraphs)` groups on h1–h3 headings.
///
/// Paragraphs are blank-line separated blocks; image-only blocks and blocks of
/// 100 characters or fewer are dropped. Content before the first heading is
/// grouped under `"text"`.
pub fn markdown_sections(markdown: &str) -> Vec<(String, Vec<String>)> {
    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    fn flush(block: &mut Vec<&str>, sections: &mut Vec<(String, Vec<String>)>) {
        if block.is_empty() {
            return;
        }
        let paragraph = block.join("\n");
        block.clear();
        let paragraph = paragraph.trim();
        if IMAGE_ONLY.is_match(paragraph) || paragraph.chars().count() <= MIN_PARAGRAPH_CHARS {
            return;
        }
        if sections.is_empty() {
            sections.push((PREAMBLE_HEADING.to_string(), Vec::new()));
        }
        if let Some((_, paragraphs)) = sections.last_mut() {
            paragraphs.push(paragraph.to_string());
        }
    }

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(caps) = HEADING.captures(trimmed) {
            flush(&mut block, &mut sections);
            let mut heading = caps[1].to_string();
            while sections.iter().any(|(h, _)| *h == heading) {
                heading.push(' ');
            }
            sections.push((heading, Vec::new()));
        } else if trimmed.is_empty() {
            flush(&mut block, &mut sections);
        } else {
            block.push(trimmed);
        }
    }
    flush(&mut block, &mut sections);

    sections
}

/// Render one heading group as a section fragment.
pub fn render_section(heading: &str, paragraphs: &[String]) -> String {
    format!("{heading}:\n{}", paragraphs.join("\n"))
}

#[derive(Debug, Deserialize)]
struct ConvertedPaper {
    md_path: PathBuf,
    converted_text_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ConvertedItem {
    #[serde(default)]
    converted_type: Option<String>,
    #[serde(default)]
    converted_content: String,
}

/// Build a [`Corpus`] from `converted_paper.json` under `data_dir`.
///
/// Markdown items from each paper's converted list become table fragments;
/// text items are grouped into one extra section. Relative paths resolve
/// against `data_dir`. Sections are gated.
pub fn convert_layout(data_dir: &Path) -> Result<Corpus, MetaSiftError> {
    let index_path = data_dir.join(CONVERTED_FILE);
    if !index_path.exists() {
        return Err(MetaSiftError::MissingArtifact(format!(
            "converted paper index {}",
            index_path.display()
        )));
    }
    let index: BTreeMap<String, ConvertedPaper> =
        serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;

    let resolve = |p: &Path| {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            data_dir.join(p)
        }
    };

    let mut papers = BTreeMap::new();
    for (id, paper) in index {
        let md_path = resolve(&paper.md_path);
        let markdown = std::fs::read_to_string(&md_path)
            .with_context(|| format!("reading markdown for paper {id}: {}", md_path.display()))?;

        let items_path = resolve(&paper.converted_text_path);
        let items: Vec<ConvertedItem> = match std::fs::read_to_string(&items_path) {
            Ok(body) => serde_json::from_str(&body)?,
            Err(e) => {
                warn!(paper = %id, path = %items_path.display(), error = %e, "Converted content missing, using markdown only");
                Vec::new()
            }
        };

        let mut groups = markdown_sections(&markdown);
        let mut tables = Vec::new();
        let mut converted_text = Vec::new();
        for item in items {
            match item.converted_type.as_deref() {
                Some("markdown") => tables.push(item.converted_content),
                Some("text") => converted_text.push(item.converted_content),
                _ => {}
            }
        }
        groups.push((CONVERTED_TEXT_HEADING.to_string(), converted_text));

        let sections: Vec<String> = groups
            .iter()
            .map(|(heading, paragraphs)| render_section(heading, paragraphs))
            .filter(|s| passes_numeric_gate(s))
            .collect();

        papers.insert(id, PaperContent { tables, sections });
    }

    info!(papers = papers.len(), "Converted layout loaded");
    Ok(Corpus { papers })
}

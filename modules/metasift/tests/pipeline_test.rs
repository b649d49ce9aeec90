//! End-to-end runs of the pipeline against a scripted oracle.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use metasift::corpus::{load_corpus, CORPUS_FILE};
use metasift::run_log::RunLog;
use metasift::testing::{verdict_json, ScriptedOracle};
use metasift::{Pipeline, PipelineSettings};
use metasift_common::MetaSiftError;

const TEMPLATE: &str = "\n| River | Cu (ug/L) |\n|---|---|\n| Danube | 3.1 |\n";

const TIGRIS_TABLE: &str = "| River | Cu (ug/L) |\n|---|---|\n| Tigris | 40 |";
const NILE_SECTION: &str = "Cu concentrations in the Nile reached 12.5 ug/L during the 2019 campaign.";

fn write_corpus(dir: &Path, corpus: Value) {
    std::fs::write(dir.join(CORPUS_FILE), corpus.to_string()).unwrap();
}

fn two_paper_corpus(dir: &Path) {
    write_corpus(
        dir,
        json!({
            "p1": { "tables": [TIGRIS_TABLE], "sections": [] },
            "p2": { "tables": [], "sections": [NILE_SECTION, "Too short 1"] },
        }),
    );
}

fn pipeline(dir: &Path, extraction: Arc<ScriptedOracle>, normalization: Arc<ScriptedOracle>) -> Pipeline {
    let settings = PipelineSettings::new("environmental science", "heavy metals in surface water", TEMPLATE, dir);
    Pipeline::new(extraction, normalization, settings).unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// p1 is accepted on the first check; p2 is rejected once and repaired.
fn scripted_extraction() -> ScriptedOracle {
    ScriptedOracle::new()
        .on_matching("filter", "Tigris", r#"{"scores": [0.9]}"#)
        .on_matching("filter", "Nile", r#"{"scores": [0.8]}"#)
        .on_matching(
            "transform",
            "Tigris",
            "| River | Cu (ug/L) |\n|---|---|\n| Tigris | 40 |\nCopied from Table 1.",
        )
        .on_matching("transform", "Nile", "| River | Cu (ug/L) |\n|---|---|\nNothing found.")
        .on_matching(
            "transform",
            "Nile",
            "| River | Cu (ug/L) |\n|---|---|\n| Nile | 12.5 |\nTaken from the results section.",
        )
        .on_matching("check", "Tigris", verdict_json(8, "You should keep it as is"))
        .on_matching("check", "Nile", verdict_json(2, "You should add the Nile row"))
        .on_matching("check", "Nile", verdict_json(9, "You should keep it as is"))
}

#[tokio::test]
async fn corpus_to_csv_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    two_paper_corpus(dir.path());

    let extraction = Arc::new(scripted_extraction());
    let normalization = Arc::new(ScriptedOracle::new().on(
        "normalize",
        json!([
            {"River": "Tigris", "Cu (ug/L)": 40, "Reference": "p1"},
            {"River": "Nile", "Cu (ug/L)": "12.5", "Reference": "p2"},
        ])
        .to_string(),
    ));
    let pipeline = pipeline(dir.path(), extraction.clone(), normalization.clone());

    let corpus = load_corpus(dir.path()).unwrap();
    assert_eq!(corpus.papers["p2"].sections, [NILE_SECTION]);

    let mut log = RunLog::new("run");
    let stats = pipeline.run(&corpus, &mut log).await.unwrap();

    assert_eq!(stats.papers, 2);
    assert_eq!(stats.records_written, 2);
    assert_eq!(stats.tables.accepted, 1);
    assert_eq!(stats.tables.no_data, 1);
    assert_eq!(stats.sections.accepted, 1);
    assert_eq!(stats.sections.no_data, 1);
    assert_eq!(stats.merged_rows, 2);
    assert!(stats.normalization.as_ref().unwrap().applied);
    assert_eq!(extraction.remaining(), 0);
    assert_eq!(extraction.call_count("transform"), 3);

    let p1 = read_json(&dir.path().join("results/p1.json"));
    assert_eq!(p1["text"], "None");
    assert!(p1["table"]["integrated_table"].as_str().unwrap().contains("Tigris"));

    let p2 = read_json(&dir.path().join("results/p2.json"));
    assert_eq!(p2["table"], "None");
    let repaired = &p2["text"];
    assert!(repaired["integrated_table"].as_str().unwrap().contains("| Nile | 12.5 |"));
    assert!(repaired["external_prompt"].as_str().unwrap().contains("You should add the Nile row"));
    assert!(!repaired["query"].as_str().unwrap().contains("You should add the Nile row"));

    let index = read_json(&dir.path().join("results_index.json"));
    assert_eq!(index, json!({"p1": "results/p1.json", "p2": "results/p2.json"}));

    let csv = std::fs::read_to_string(dir.path().join("meta_analysis.csv")).unwrap();
    assert_eq!(csv, "River,Cu (ug/L),Reference\nTigris,40.0,p1\nNile,12.5,p2\n");
}

#[tokio::test]
async fn irrelevant_fragments_record_no_data() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(
        dir.path(),
        json!({"p1": {"tables": [TIGRIS_TABLE, "| a | b |"], "sections": [NILE_SECTION]}}),
    );
    let extraction = Arc::new(
        ScriptedOracle::new()
            .on_matching("filter", "Tigris", r#"{"scores": [0.2, 0.49]}"#)
            .on_matching("filter", "Nile", r#"{"scores": [0.0]}"#),
    );
    let normalization = Arc::new(ScriptedOracle::new());
    let pipeline = pipeline(dir.path(), extraction.clone(), normalization.clone());

    let corpus = load_corpus(dir.path()).unwrap();
    let stats = pipeline.run(&corpus, &mut RunLog::new("run")).await.unwrap();

    assert_eq!(extraction.call_count("transform"), 0);
    assert_eq!(stats.tables.no_data, 1);
    assert_eq!(stats.sections.no_data, 1);

    let record = read_json(&dir.path().join("results/p1.json"));
    assert_eq!(record, json!({"table": "None", "text": "None"}));

    assert_eq!(normalization.call_count("normalize"), 0);
    let csv = std::fs::read_to_string(dir.path().join("meta_analysis.csv")).unwrap();
    assert_eq!(csv, "River,Cu (ug/L),Reference\n");
}

#[tokio::test]
async fn failed_transform_is_recorded_without_aborting_the_run() {
    let dir = tempfile::tempdir().unwrap();
    two_paper_corpus(dir.path());
    let extraction = Arc::new(
        ScriptedOracle::new()
            .on_matching("filter", "Tigris", r#"{"scores": [0.9]}"#)
            .on_matching("filter", "Nile", r#"{"scores": [0.9]}"#)
            .on_matching("transform", "Tigris", "No table in this one.")
            .on_matching(
                "transform",
                "Nile",
                "| River | Cu (ug/L) |\n|---|---|\n| Nile | 12.5 |",
            )
            .on_matching("check", "Nile", verdict_json(7, "You should keep it as is")),
    );
    let pipeline = pipeline(dir.path(), extraction, Arc::new(ScriptedOracle::new()));

    let corpus = load_corpus(dir.path()).unwrap();
    let stats = pipeline
        .run_extraction(&corpus, &mut RunLog::new("extract"))
        .await
        .unwrap();

    assert_eq!(stats.tables.failed, 1);
    assert_eq!(stats.sections.accepted, 1);
    assert_eq!(stats.records_written, 2);
    assert_eq!(read_json(&dir.path().join("results/p1.json"))["table"], "None");
}

#[tokio::test]
async fn normalization_failure_keeps_the_raw_table() {
    let dir = tempfile::tempdir().unwrap();
    two_paper_corpus(dir.path());
    let normalization = Arc::new(
        ScriptedOracle::new()
            .on_error("normalize", "rate limited")
            .on("normalize", "[]")
            .on_error("normalize", "rate limited"),
    );
    let pipeline = pipeline(dir.path(), Arc::new(scripted_extraction()), normalization.clone());

    let corpus = load_corpus(dir.path()).unwrap();
    let stats = pipeline.run(&corpus, &mut RunLog::new("run")).await.unwrap();

    let report = stats.normalization.unwrap();
    assert!(!report.applied);
    assert_eq!(report.attempts, 3);
    assert_eq!(normalization.call_count("normalize"), 3);

    let csv = std::fs::read_to_string(dir.path().join("meta_analysis.csv")).unwrap();
    assert_eq!(csv, "River,Cu (ug/L),Reference\nTigris,40,p1\nNile,12.5,p2\n");
}

#[tokio::test]
async fn merge_reruns_from_record_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    two_paper_corpus(dir.path());
    let first = pipeline(dir.path(), Arc::new(scripted_extraction()), Arc::new(ScriptedOracle::new()));
    let corpus = load_corpus(dir.path()).unwrap();
    first
        .run_extraction(&corpus, &mut RunLog::new("extract"))
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join(CORPUS_FILE)).unwrap();

    let extraction = Arc::new(ScriptedOracle::new());
    let normalization = Arc::new(ScriptedOracle::new().on(
        "normalize",
        json!([
            {"River": "Tigris", "Cu (ug/L)": "40", "Reference": "p1"},
            {"River": "Nile", "Cu (ug/L)": "12.5", "Reference": "p2"},
        ])
        .to_string(),
    ));
    let second = pipeline(dir.path(), extraction.clone(), normalization);
    let mut log = RunLog::new("merge");
    let stats = second.run_merge(&mut log).await.unwrap();

    assert_eq!(stats.merged_rows, 2);
    assert!(extraction.requests().is_empty());
    assert_eq!(log.len(), 3);
}

#[tokio::test]
async fn merge_without_records_is_a_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), Arc::new(ScriptedOracle::new()), Arc::new(ScriptedOracle::new()));
    let err = pipeline.run_merge(&mut RunLog::new("merge")).await.unwrap_err();
    assert!(matches!(err, MetaSiftError::MissingArtifact(_)));
    assert!(!dir.path().join("meta_analysis.csv").exists());
}

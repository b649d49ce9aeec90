//! Run log: a persisted JSON timeline of one metasift invocation.
//!
//! Each run produces `{data_dir}/runs/{run_id}.json` with the ordered events
//! and the final stats.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::normalize::NormalizationReport;
use crate::stats::{KindStats, RunStats};

pub struct RunLog {
    pub run_id: Uuid,
    pub command: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    CorpusLoaded {
        papers: usize,
    },
    PaperExtracted {
        paper: String,
        table: String,
        text: String,
    },
    PaperFailed {
        paper: String,
        error: String,
    },
    MergeComplete {
        papers: usize,
        rows: usize,
    },
    NormalizationComplete {
        batches: usize,
        attempts: u32,
        applied: bool,
    },
    OutputWritten {
        path: String,
    },
}

impl RunLog {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            command: command.into(),
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Write the log under `runs_dir` and return its path.
    pub fn save(&self, runs_dir: &Path, stats: &RunStats) -> Result<PathBuf> {
        std::fs::create_dir_all(runs_dir)?;
        let path = runs_dir.join(format!("{}.json", self.run_id));

        let output = SerializedRunLog {
            run_id: self.run_id,
            command: &self.command,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats: SerializedStats::from(stats),
            events: &self.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = self.events.len(), "Run log saved");
        Ok(path)
    }
}

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: Uuid,
    command: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: SerializedStats,
    events: &'a [RunEvent],
}

#[derive(Serialize)]
struct SerializedKindStats {
    accepted: u32,
    exhausted: u32,
    no_data: u32,
    failed: u32,
}

impl From<&KindStats> for SerializedKindStats {
    fn from(s: &KindStats) -> Self {
        Self {
            accepted: s.accepted,
            exhausted: s.exhausted,
            no_data: s.no_data,
            failed: s.failed,
        }
    }
}

#[derive(Serialize)]
struct SerializedStats {
    papers: u32,
    records_written: u32,
    tables: SerializedKindStats,
    sections: SerializedKindStats,
    merged_rows: usize,
    normalization: Option<NormalizationReport>,
}

impl From<&RunStats> for SerializedStats {
    fn from(s: &RunStats) -> Self {
        Self {
            papers: s.papers,
            records_written: s.records_written,
            tables: (&s.tables).into(),
            sections: (&s.sections).into(),
            merged_rows: s.merged_rows,
            normalization: s.normalization.clone(),
        }
    }
}

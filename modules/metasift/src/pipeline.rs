//! End-to-end orchestration: corpus → per-paper records → canonical CSV.
//!
//! Extraction and merge are separate entry points joined only by the record
//! files on disk, so either can be rerun on its own.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use metasift_common::{Corpus, FragmentKind, MetaSiftError, PaperContent, PaperRecord};

use crate::checker::Checker;
use crate::extractor::Extractor;
use crate::merger::merge_records;
use crate::normalize::Normalizer;
use crate::oracle::Oracle;
use crate::prompts::PromptSet;
use crate::repair::{ExtractionLoop, KindOutcome};
use crate::results::ResultStore;
use crate::run_log::{EventKind, RunLog};
use crate::settings::PipelineSettings;
use crate::stats::RunStats;

/// Both kind outcomes for one paper.
#[derive(Debug, Clone)]
pub struct PaperExtraction {
    pub table: KindOutcome,
    pub text: KindOutcome,
}

impl PaperExtraction {
    pub fn to_record(&self) -> PaperRecord {
        let mut record = PaperRecord::default();
        record.set(FragmentKind::Table, self.table.clone().into_result());
        record.set(FragmentKind::Section, self.text.clone().into_result());
        record
    }
}

pub struct Pipeline {
    settings: Arc<PipelineSettings>,
    extraction: ExtractionLoop,
    normalizer: Normalizer,
    store: ResultStore,
}

impl Pipeline {
    /// `extraction` serves filter/transform/check, `normalization` serves
    /// the merge stage; they usually differ only in model.
    pub fn new(
        extraction: Arc<dyn Oracle>,
        normalization: Arc<dyn Oracle>,
        settings: PipelineSettings,
    ) -> Result<Self, MetaSiftError> {
        let settings = Arc::new(settings);
        let prompts = Arc::new(PromptSet::new(&settings.field)?);

        let extractor = Arc::new(Extractor::new(
            extraction.clone(),
            prompts.clone(),
            settings.clone(),
        ));
        let checker = Arc::new(Checker::new(
            extraction,
            prompts.clone(),
            settings.extraction.check_threshold,
        ));
        let normalizer = Normalizer::new(
            normalization,
            prompts,
            settings.merge.batch_size,
            settings.merge.max_try,
            settings.merge.max_workers,
        );

        Ok(Self {
            extraction: ExtractionLoop::new(extractor, checker, settings.extraction.max_check_num),
            normalizer,
            store: ResultStore::new(settings.data_dir.clone()),
            settings,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run the table and section loops for one paper concurrently.
    pub async fn extract_paper(&self, paper: &str, content: &PaperContent) -> PaperExtraction {
        let tables = content.fragments(FragmentKind::Table);
        let sections = content.fragments(FragmentKind::Section);
        let (table, text) = tokio::join!(
            self.extraction.run(paper, FragmentKind::Table, &tables),
            self.extraction.run(paper, FragmentKind::Section, &sections),
        );
        PaperExtraction { table, text }
    }

    /// Extract every paper, write one record file each, then the index.
    ///
    /// A paper whose record cannot be written is logged and left out of the
    /// index; failing to write the index itself is fatal.
    pub async fn run_extraction(
        &self,
        corpus: &Corpus,
        log: &mut RunLog,
    ) -> Result<RunStats, MetaSiftError> {
        let mut stats = RunStats {
            papers: corpus.len() as u32,
            ..Default::default()
        };
        log.log(EventKind::CorpusLoaded {
            papers: corpus.len(),
        });
        info!(papers = corpus.len(), workers = self.settings.extraction.max_workers, "Extraction started");

        let mut extractions = stream::iter(corpus.iter())
            .map(|(id, content)| async move { (id, self.extract_paper(id, content).await) })
            .buffer_unordered(self.settings.extraction.max_workers.max(1));

        let mut indexed = Vec::with_capacity(corpus.len());
        while let Some((id, extraction)) = extractions.next().await {
            stats.kind_mut(FragmentKind::Table).record(&extraction.table);
            stats.kind_mut(FragmentKind::Section).record(&extraction.text);

            if let Err(e) = self.store.write_record(id, &extraction.to_record()) {
                warn!(paper = %id, error = %e, "Failed to write record");
                log.log(EventKind::PaperFailed {
                    paper: id.clone(),
                    error: e.to_string(),
                });
                continue;
            }
            stats.records_written += 1;
            log.log(EventKind::PaperExtracted {
                paper: id.clone(),
                table: extraction.table.label().to_string(),
                text: extraction.text.label().to_string(),
            });
            info!(
                paper = %id,
                table = extraction.table.label(),
                text = extraction.text.label(),
                "Paper extracted"
            );
            indexed.push(id.clone());
        }

        self.store.write_index(indexed)?;
        Ok(stats)
    }

    /// Merge every indexed record, normalize, and write the output CSV.
    pub async fn run_merge(&self, log: &mut RunLog) -> Result<RunStats, MetaSiftError> {
        let records = self.store.load_all()?;
        let mut table = merge_records(
            &self.settings.template,
            records.iter().map(|(id, record)| (id.as_str(), record)),
        )?;
        log.log(EventKind::MergeComplete {
            papers: records.len(),
            rows: table.len(),
        });
        info!(papers = records.len(), rows = table.len(), "Records merged");

        let report = self.normalizer.normalize(&mut table).await;
        log.log(EventKind::NormalizationComplete {
            batches: report.batches,
            attempts: report.attempts,
            applied: report.applied,
        });

        let path = self.settings.output_path();
        table.write_csv(&path)?;
        log.log(EventKind::OutputWritten {
            path: path.display().to_string(),
        });
        info!(path = %path.display(), rows = table.len(), "Meta-analysis table written");

        Ok(RunStats {
            merged_rows: table.len(),
            normalization: Some(report),
            ..Default::default()
        })
    }

    pub async fn run(&self, corpus: &Corpus, log: &mut RunLog) -> Result<RunStats, MetaSiftError> {
        let mut stats = self.run_extraction(corpus, log).await?;
        stats.absorb(self.run_merge(log).await?);
        Ok(stats)
    }
}

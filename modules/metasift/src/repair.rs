//! The check-and-repair loop around the two-level extractor.

use std::sync::Arc;

use tracing::{info, warn};

use metasift_common::{ExtractionResult, Fragment, FragmentKind, MetaSiftError};

use crate::checker::Checker;
use crate::extractor::{Extractor, RepairHint};

/// The result of the loop for one paper and fragment kind.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub result: ExtractionResult,
    /// True if the checker accepted `result`; false if the budget ran out.
    pub accepted: bool,
    pub transforms: u32,
    pub checks: u32,
}

/// What one paper/kind produced.
#[derive(Debug, Clone)]
pub enum KindOutcome {
    /// No fragments, or none passed the relevance filter.
    NoData,
    /// Filtering or the initial transform failed.
    Failed(String),
    Extracted(RepairOutcome),
}

impl KindOutcome {
    pub fn into_result(self) -> Option<ExtractionResult> {
        match self {
            KindOutcome::Extracted(outcome) => Some(outcome.result),
            KindOutcome::NoData | KindOutcome::Failed(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KindOutcome::NoData => "no_data",
            KindOutcome::Failed(_) => "failed",
            KindOutcome::Extracted(o) if o.accepted => "accepted",
            KindOutcome::Extracted(_) => "exhausted",
        }
    }
}

pub struct ExtractionLoop {
    extractor: Arc<Extractor>,
    checker: Arc<Checker>,
    max_check_num: u32,
}

impl ExtractionLoop {
    pub fn new(extractor: Arc<Extractor>, checker: Arc<Checker>, max_check_num: u32) -> Self {
        Self {
            extractor,
            checker,
            max_check_num,
        }
    }

    /// Filter, transform, then check and repair. Never panics or propagates:
    /// every failure is logged and folded into the outcome.
    pub async fn run(&self, paper: &str, kind: FragmentKind, fragments: &[Fragment]) -> KindOutcome {
        let selected = match self.extractor.filter(fragments, kind).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!(stage = "filter", paper, %kind, error = %e, "Relevance filter failed");
                return KindOutcome::Failed(e.to_string());
            }
        };
        if selected.is_empty() {
            info!(paper, %kind, total = fragments.len(), "No relevant fragments");
            return KindOutcome::NoData;
        }

        match self.check_and_repair(paper, kind, &selected).await {
            Ok(outcome) => KindOutcome::Extracted(outcome),
            Err(e) => {
                warn!(stage = "transform", paper, %kind, error = %e, "Initial transform failed");
                KindOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run the initial transform, then up to `max_check_num` rounds of
    /// check → repair. Errors only if the initial transform fails.
    pub async fn check_and_repair(
        &self,
        paper: &str,
        kind: FragmentKind,
        fragments: &[Fragment],
    ) -> Result<RepairOutcome, MetaSiftError> {
        let mut current = self.extractor.transform(fragments, kind, None).await?;
        let mut transforms = 1;
        let mut checks = 0;

        for round in 1..=self.max_check_num {
            checks += 1;
            let verdict = match self.checker.check(&current).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(stage = "check", paper, %kind, round, error = %e, "Check failed");
                    continue;
                }
            };

            if verdict.is_accepted() {
                info!(paper, %kind, round, score = verdict.overall_score, "Result accepted");
                return Ok(RepairOutcome {
                    result: current,
                    accepted: true,
                    transforms,
                    checks,
                });
            }

            info!(
                paper,
                %kind,
                round,
                score = verdict.overall_score,
                suggestion = %verdict.suggestion,
                "Result rejected, repairing"
            );
            let hint = RepairHint {
                reference_answer: &current.integrated_table,
                suggestion: &verdict.suggestion,
            };
            transforms += 1;
            match self.extractor.transform(fragments, kind, Some(hint)).await {
                Ok(repaired) => current = repaired,
                Err(e) => {
                    warn!(stage = "repair", paper, %kind, round, error = %e, "Repair failed, keeping current result");
                }
            }
        }

        info!(paper, %kind, transforms, checks, "Check budget exhausted");
        Ok(RepairOutcome {
            result: current,
            accepted: false,
            transforms,
            checks,
        })
    }
}

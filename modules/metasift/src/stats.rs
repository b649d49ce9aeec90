use metasift_common::FragmentKind;

use crate::normalize::NormalizationReport;
use crate::repair::KindOutcome;

/// Outcome counts for one fragment kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KindStats {
    pub accepted: u32,
    pub exhausted: u32,
    pub no_data: u32,
    pub failed: u32,
}

impl KindStats {
    pub fn record(&mut self, outcome: &KindOutcome) {
        match outcome {
            KindOutcome::NoData => self.no_data += 1,
            KindOutcome::Failed(_) => self.failed += 1,
            KindOutcome::Extracted(o) if o.accepted => self.accepted += 1,
            KindOutcome::Extracted(_) => self.exhausted += 1,
        }
    }
}

/// Stats from a metasift run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub papers: u32,
    pub records_written: u32,
    pub tables: KindStats,
    pub sections: KindStats,
    pub merged_rows: usize,
    pub normalization: Option<NormalizationReport>,
}

impl RunStats {
    pub fn kind_mut(&mut self, kind: FragmentKind) -> &mut KindStats {
        match kind {
            FragmentKind::Table => &mut self.tables,
            FragmentKind::Section => &mut self.sections,
        }
    }

    /// Fold the counts of a later stage into this one.
    pub fn absorb(&mut self, other: RunStats) {
        self.papers += other.papers;
        self.records_written += other.records_written;
        for (mine, theirs) in [
            (&mut self.tables, other.tables),
            (&mut self.sections, other.sections),
        ] {
            mine.accepted += theirs.accepted;
            mine.exhausted += theirs.exhausted;
            mine.no_data += theirs.no_data;
            mine.failed += theirs.failed;
        }
        if other.merged_rows > 0 || other.normalization.is_some() {
            self.merged_rows = other.merged_rows;
            self.normalization = other.normalization;
        }
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== MetaSift Run Complete ===")?;
        writeln!(f, "Papers processed:   {}", self.papers)?;
        writeln!(f, "Records written:    {}", self.records_written)?;
        for (label, kind) in [("Tables", &self.tables), ("Sections", &self.sections)] {
            writeln!(f, "\n{label}:")?;
            writeln!(f, "  Accepted:  {}", kind.accepted)?;
            writeln!(f, "  Exhausted: {}", kind.exhausted)?;
            writeln!(f, "  No data:   {}", kind.no_data)?;
            writeln!(f, "  Failed:    {}", kind.failed)?;
        }
        if let Some(report) = &self.normalization {
            writeln!(f, "\nMerge:")?;
            writeln!(f, "  Rows:      {}", self.merged_rows)?;
            writeln!(f, "  Batches:   {}", report.batches)?;
            writeln!(f, "  Attempts:  {}", report.attempts)?;
            if report.applied {
                writeln!(f, "  Normalized: yes")?;
            } else {
                writeln!(
                    f,
                    "  Normalized: no ({} batches failed, kept raw table)",
                    report.failed_batches.len()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reports_fallback() {
        let mut stats = RunStats {
            papers: 2,
            ..Default::default()
        };
        stats.kind_mut(FragmentKind::Table).record(&KindOutcome::NoData);
        stats.normalization = Some(NormalizationReport {
            batches: 3,
            attempts: 3,
            failed_batches: vec![1],
            applied: false,
        });
        let text = stats.to_string();
        assert!(text.contains("=== MetaSift Run Complete ==="));
        assert!(text.contains("No data:   1"));
        assert!(text.contains("1 batches failed"));
    }
}

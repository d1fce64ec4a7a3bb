use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    sources_uploaded: AtomicU64,
    ocr_completed: AtomicU64,
    ocr_skipped: AtomicU64,
    summaries_completed: AtomicU64,
    stage_failures: AtomicU64,
    titles_generated: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a source whose binary finished uploading.
    pub fn record_upload(&self) {
        self.sources_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful OCR stage.
    pub fn record_ocr(&self) {
        self.ocr_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a plain-text upload that bypassed OCR.
    pub fn record_ocr_skip(&self) {
        self.ocr_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful summarization stage.
    pub fn record_summary(&self) {
        self.summaries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stage that ended in `failed`.
    pub fn record_failure(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a project renamed from its themes.
    pub fn record_title(&self) {
        self.titles_generated.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sources_uploaded: self.sources_uploaded.load(Ordering::Relaxed),
            ocr_completed: self.ocr_completed.load(Ordering::Relaxed),
            ocr_skipped: self.ocr_skipped.load(Ordering::Relaxed),
            summaries_completed: self.summaries_completed.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            titles_generated: self.titles_generated.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Sources that reached `uploaded` since startup.
    pub sources_uploaded: u64,
    /// OCR stages that completed.
    pub ocr_completed: u64,
    /// Plain-text sources that skipped OCR.
    pub ocr_skipped: u64,
    /// Summarization stages that completed.
    pub summaries_completed: u64,
    /// Stages that moved a source to `failed`.
    pub stage_failures: u64,
    /// Project titles generated.
    pub titles_generated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_stage_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_upload();
        metrics.record_upload();
        metrics.record_ocr();
        metrics.record_ocr_skip();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sources_uploaded, 2);
        assert_eq!(snapshot.ocr_completed, 1);
        assert_eq!(snapshot.ocr_skipped, 1);
        assert_eq!(snapshot.stage_failures, 1);
        assert_eq!(snapshot.summaries_completed, 0);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().titles_generated, 0);
        assert_eq!(metrics.snapshot().sources_uploaded, 0);
    }
}

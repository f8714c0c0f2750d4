//! Page loop for multi-page documents and assembly of the final text.

use super::rotation::RotationPolicy;
use super::{ContentKind, ExtractionJob, ImagePayload, InferenceBackend, JobStatus};
use tracing::{info, warn};

/// Receives per-page progress while a document is processed.
#[async_trait::async_trait]
pub trait PageProgress: Send + Sync {
    async fn page_started(&self, _page_num: u32, _total: usize) {}
    async fn page_finished(&self, _job: &ExtractionJob) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

#[async_trait::async_trait]
impl PageProgress for NoProgress {}

/// Ordered job outputs of one user request.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub jobs: Vec<ExtractionJob>,
}

impl ExtractionResult {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Failed(_)))
            .count()
    }

    /// True if at least one job produced non-blank text.
    pub fn has_text(&self) -> bool {
        self.jobs.iter().any(ExtractionJob::has_text)
    }

    /// Reply text. Images yield the bare text; PDF pages are delimited with
    /// `--- Page N ---` headers, keeping markers for empty and failed pages.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for job in &self.jobs {
            match (job.page_num(), &job.status) {
                (None, _) => out.push_str(job.text.as_deref().unwrap_or_default().trim()),
                (Some(n), JobStatus::Failed(_)) => {
                    out.push_str(&format!("\n--- Page {}: Extraction failed ---\n", n));
                }
                (Some(n), _) if job.has_text() => {
                    let text = job.text.as_deref().unwrap_or_default().trim();
                    out.push_str(&format!("\n--- Page {} ---\n{}\n", n, text));
                }
                (Some(n), _) => {
                    out.push_str(&format!("\n--- Page {}: No text detected ---\n", n));
                }
            }
        }
        out
    }
}

/// Run every page through the rotation policy, in order, stopping after
/// `max_pages`. A page that fails is recorded and the loop moves on.
pub async fn extract_document(
    backend: &dyn InferenceBackend,
    policy: &RotationPolicy,
    pages: Vec<ImagePayload>,
    max_pages: usize,
    progress: &dyn PageProgress,
) -> ExtractionResult {
    let total = pages.len().min(max_pages);
    if pages.len() > max_pages {
        info!("Document has {} pages, processing the first {}", pages.len(), max_pages);
    }

    let mut result = ExtractionResult::default();

    for (index, payload) in pages.into_iter().take(max_pages).enumerate() {
        let page_num = index as u32 + 1;
        progress.page_started(page_num, total).await;

        let mut job = ExtractionJob::new(ContentKind::PdfPage(page_num), payload);
        let outcome = policy.extract_with_rotation(backend, &job.payload).await;
        if let Err(e) = &outcome {
            warn!("Page {}/{} failed: {}", page_num, total, e);
        }
        job.complete(outcome.map(|t| t.trim().to_string()));

        progress.page_finished(&job).await;
        result.jobs.push(job);
    }

    info!(
        "Document done: {} pages ok, {} failed",
        result.succeeded(),
        result.failed()
    );
    result
}

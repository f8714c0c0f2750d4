//! Model rotation: try candidate models in order, moving on only when the
//! current one is rate limited.

use super::{ExtractionError, ImagePayload, InferenceBackend, EXTRACTION_PROMPT};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ordered candidate models plus the delay applied between rotation steps.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    candidates: Vec<String>,
    backoff: Duration,
}

impl RotationPolicy {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            backoff: Duration::ZERO,
        }
    }

    /// Sleep `backoff * 2^(step-1)` before each rotation step.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Extract text from `image`, rotating through the candidates on rate limits.
    ///
    /// The cursor starts at the first candidate on every call and never wraps.
    /// Any error other than a rate limit is returned straight away.
    pub async fn extract_with_rotation(
        &self,
        backend: &dyn InferenceBackend,
        image: &ImagePayload,
    ) -> Result<String, ExtractionError> {
        let mut cursor = 0;

        while let Some(model) = self.candidates.get(cursor) {
            if cursor > 0 {
                self.pause_before_step(cursor).await;
            }

            debug!("{}: trying model {} ({}/{})", backend.name(), model, cursor + 1, self.candidates.len());

            match backend.generate(model, EXTRACTION_PROMPT, image).await {
                Ok(text) => {
                    info!("Model {} extracted {} chars", model, text.chars().count());
                    return Ok(text);
                }
                Err(e) if e.is_rate_limited() => {
                    warn!("Model {} rate limited, rotating: {}", model, e);
                    cursor += 1;
                }
                Err(e) => {
                    warn!("Model {} failed without rotation: {}", model, e);
                    return Err(e.into());
                }
            }
        }

        Err(ExtractionError::AllModelsExhausted { attempts: cursor })
    }

    async fn pause_before_step(&self, step: usize) {
        if self.backoff.is_zero() {
            return;
        }
        let factor = 1u32 << (step - 1).min(16);
        let delay = self.backoff.saturating_mul(factor);
        debug!("Backing off {:?} before rotation step {}", delay, step);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::testing::{png_payload, ScriptedBackend};
    use crate::ocr::InferenceError;

    fn policy(n: usize) -> RotationPolicy {
        RotationPolicy::new((1..=n).map(|i| format!("model-{}", i)).collect())
    }

    fn rate_limited() -> Result<String, InferenceError> {
        Err(InferenceError::RateLimited("429".into()))
    }

    #[tokio::test]
    async fn test_first_candidate_succeeds() {
        let backend = ScriptedBackend::new(vec![Ok("سلام".into())]);
        let text = policy(3).extract_with_rotation(&backend, &png_payload()).await.unwrap();
        assert_eq!(text, "سلام");
        assert_eq!(backend.models_called(), vec!["model-1"]);
    }

    #[tokio::test]
    async fn test_last_candidate_succeeds_after_rate_limits() {
        let backend = ScriptedBackend::new(vec![rate_limited(), rate_limited(), Ok("متن".into())]);
        let text = policy(3).extract_with_rotation(&backend, &png_payload()).await.unwrap();
        assert_eq!(text, "متن");
        assert_eq!(backend.models_called(), vec!["model-1", "model-2", "model-3"]);
    }

    #[tokio::test]
    async fn test_all_candidates_rate_limited() {
        let backend = ScriptedBackend::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            Ok("never reached".into()),
        ]);
        let err = policy(3).extract_with_rotation(&backend, &png_payload()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::AllModelsExhausted { attempts: 3 }));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_fails_fast() {
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::Auth("bad key".into())),
            Ok("never reached".into()),
        ]);
        let err = policy(3).extract_with_rotation(&backend, &png_payload()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::InferenceFailure(_)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_fails_fast() {
        let backend = ScriptedBackend::new(vec![
            rate_limited(),
            Err(InferenceError::InvalidInput("bad image".into())),
        ]);
        let err = policy(3).extract_with_rotation(&backend, &png_payload()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidInput(_)));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cursor_resets_between_requests() {
        let backend = ScriptedBackend::new(vec![rate_limited(), Ok("a".into()), Ok("b".into())]);
        let policy = policy(2);
        policy.extract_with_rotation(&backend, &png_payload()).await.unwrap();
        policy.extract_with_rotation(&backend, &png_payload()).await.unwrap();
        assert_eq!(backend.models_called(), vec!["model-1", "model-2", "model-1"]);
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let backend = ScriptedBackend::default();
        let err = RotationPolicy::new(vec![])
            .extract_with_rotation(&backend, &png_payload())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::AllModelsExhausted { attempts: 0 }));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_steps() {
        let backend = ScriptedBackend::new(vec![rate_limited(), rate_limited(), Ok("x".into())]);
        let start = tokio::time::Instant::now();
        policy(3)
            .with_backoff(Duration::from_millis(100))
            .extract_with_rotation(&backend, &png_payload())
            .await
            .unwrap();
        // 100ms before step 1, 200ms before step 2
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}

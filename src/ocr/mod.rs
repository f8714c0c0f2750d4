//! Text extraction on top of a pluggable multimodal inference backend.
//!
//! Defines the [`InferenceBackend`] trait and the job/result types shared by
//! the rotation policy ([`rotation`]), the page loop ([`document`]) and the
//! Gemini implementation ([`gemini`]).

pub mod document;
pub mod gemini;
pub mod payload;
pub mod rotation;

use thiserror::Error;

/// Instruction sent alongside every image.
pub const EXTRACTION_PROMPT: &str =
    "Extract and transcribe any Persian text in this image. Return ONLY the Persian text, no explanations.";

/// Image bytes ready to be sent to the model, with their mime type.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

/// What an [`ExtractionJob`] was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Image,
    /// 1-indexed page of a PDF.
    PdfPage(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Success,
    Failed(String),
}

/// One image or one PDF page submitted for recognition.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub kind: ContentKind,
    pub payload: ImagePayload,
    pub text: Option<String>,
    pub status: JobStatus,
}

impl ExtractionJob {
    pub fn new(kind: ContentKind, payload: ImagePayload) -> Self {
        Self {
            kind,
            payload,
            text: None,
            status: JobStatus::Pending,
        }
    }

    pub fn page_num(&self) -> Option<u32> {
        match self.kind {
            ContentKind::PdfPage(n) => Some(n),
            ContentKind::Image => None,
        }
    }

    pub fn complete(&mut self, outcome: Result<String, ExtractionError>) {
        match outcome {
            Ok(text) => {
                self.text = Some(text);
                self.status = JobStatus::Success;
            }
            Err(e) => {
                self.status = JobStatus::Failed(e.to_string());
            }
        }
    }

    /// True if the job succeeded with non-blank text.
    pub fn has_text(&self) -> bool {
        self.status == JobStatus::Success
            && self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Classified failure of a single inference call.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Quota, rate limit, overload or timeout. Triggers rotation.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("inference request failed: {0}")]
    Other(String),
}

impl InferenceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Outcome of an extraction after the rotation policy has run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("all {attempts} candidate models are rate limited")]
    AllModelsExhausted { attempts: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("inference failure: {0}")]
    InferenceFailure(String),
}

impl ExtractionError {
    /// Text shown to the Telegram user.
    pub fn user_message(&self) -> String {
        match self {
            Self::AllModelsExhausted { .. } => {
                "All models are busy right now. Please try again in a minute.".to_string()
            }
            // The reason is logged by the caller; backend wording stays out of the chat.
            Self::InvalidInput(_) => {
                "Could not process this file. Please send a clearer image or a different file."
                    .to_string()
            }
            Self::InferenceFailure(_) => {
                "Text extraction failed because of a service error. Please try again later."
                    .to_string()
            }
        }
    }
}

impl From<InferenceError> for ExtractionError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::InvalidInput(reason) => Self::InvalidInput(reason),
            // A lone rate-limit error outside rotation still means nothing answered.
            InferenceError::RateLimited(_) => Self::AllModelsExhausted { attempts: 1 },
            other => Self::InferenceFailure(other.to_string()),
        }
    }
}

/// Async trait implemented by each inference service.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Run `prompt` against `image` on the given `model`.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<String, InferenceError>;
}

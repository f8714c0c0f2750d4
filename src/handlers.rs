//! Request handlers: authorization, extraction, reply and email, independent
//! of the Telegram client so they can be driven from tests.
//!
//! Every failure stops at this boundary and becomes a chat message; nothing
//! here may take the process down.

use crate::auth::DENIAL_MESSAGE;
use crate::config::BotConfig;
use crate::delivery::{notify, Conversation, Delivery, MessageRef};
use crate::ocr::document::{extract_document, ExtractionResult, PageProgress};
use crate::ocr::payload::prepare_image;
use crate::ocr::rotation::RotationPolicy;
use crate::ocr::{ContentKind, ExtractionError, ExtractionJob, InferenceBackend, JobStatus};
use crate::pdf::{PageRasterizer, PdfError};
use crate::store::ExtractionStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const WELCOME_MESSAGE: &str = "Welcome to the Persian OCR Bot! Send me images or PDFs containing Persian text, \
and I'll extract the text for you.\n\
After each extraction, you'll see a button to send the result to your email.";

pub const HELP_MESSAGE: &str = "Send me an image or PDF containing Persian text and I'll extract it.\n\
Commands:\n\
/start - Start the bot\n\
/help - Get help information\n\n\
After each extraction, you'll see a button to send the result to your email.";

const EMAIL_OFFER: &str = "Would you like to send this text to your email?";

/// An attachment on an inbound message.
#[derive(Debug, Clone)]
pub enum Attachment {
    /// Largest size of a compressed photo.
    Photo { file_id: String },
    Document {
        file_id: String,
        file_name: Option<String>,
        mime_type: Option<String>,
    },
}

#[derive(Debug, Error)]
enum HandlerError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl HandlerError {
    fn user_message(&self) -> String {
        match self {
            Self::Extraction(e) => e.user_message(),
            Self::Pdf(e) => e.user_message(),
            Self::Transport(_) => {
                "Something went wrong while talking to Telegram. Please try again.".to_string()
            }
        }
    }
}

/// Everything a handler needs, built once at startup and shared by all updates.
pub struct OcrService {
    config: Arc<BotConfig>,
    backend: Arc<dyn InferenceBackend>,
    policy: RotationPolicy,
    rasterizer: Arc<dyn PageRasterizer>,
    delivery: Delivery,
    store: ExtractionStore,
}

impl OcrService {
    pub fn new(
        config: Arc<BotConfig>,
        backend: Arc<dyn InferenceBackend>,
        rasterizer: Arc<dyn PageRasterizer>,
        delivery: Delivery,
    ) -> Self {
        let policy = RotationPolicy::new(config.inference.models.clone())
            .with_backoff(config.inference.rotation_backoff);

        Self {
            config,
            backend,
            policy,
            rasterizer,
            delivery,
            store: ExtractionStore::new(),
        }
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        self.config.authorized_users.is_authorized(user_id)
    }

    pub async fn start(&self, user_id: u64, conversation: &dyn Conversation) {
        if !self.is_authorized(user_id) {
            notify(conversation, DENIAL_MESSAGE).await;
            return;
        }
        notify(conversation, WELCOME_MESSAGE).await;
    }

    /// Unauthorized users get no reply at all.
    pub async fn help(&self, user_id: u64, conversation: &dyn Conversation) {
        if self.is_authorized(user_id) {
            notify(conversation, HELP_MESSAGE).await;
        }
    }

    /// Entry point for photos and documents.
    pub async fn handle_attachment(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        attachment: Attachment,
    ) {
        if !self.is_authorized(user_id) {
            info!("Rejected attachment from unauthorized user {}", user_id);
            notify(conversation, DENIAL_MESSAGE).await;
            return;
        }

        match attachment {
            Attachment::Photo { file_id } => self.process_image(user_id, conversation, &file_id).await,
            Attachment::Document {
                file_id,
                file_name,
                mime_type,
            } => match classify_document(file_name.as_deref(), mime_type.as_deref()) {
                DocumentKind::Pdf => {
                    let name = file_name.unwrap_or_else(|| "document.pdf".to_string());
                    self.process_pdf(user_id, conversation, &file_id, &name).await
                }
                DocumentKind::Image => self.process_image(user_id, conversation, &file_id).await,
                DocumentKind::Unsupported => {
                    notify(conversation, "Please send a PDF document.").await;
                }
            },
        }
    }

    async fn process_image(&self, user_id: u64, conversation: &dyn Conversation, file_id: &str) {
        let status = notify(conversation, "Processing your image...").await;

        if let Err(e) = self.try_process_image(user_id, conversation, file_id).await {
            error!("Error processing image for user {}: {}", user_id, e);
            notify(conversation, &format!("Error processing image: {}", e.user_message())).await;
        }

        self.clear_status(conversation, status).await;
    }

    async fn try_process_image(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        file_id: &str,
    ) -> Result<(), HandlerError> {
        let data = conversation.download(file_id).await?;
        let mut job = ExtractionJob::new(ContentKind::Image, prepare_image(data)?);

        notify(conversation, "Extracting Persian text with Gemini...").await;
        let text = self
            .policy
            .extract_with_rotation(self.backend.as_ref(), &job.payload)
            .await?;
        job.complete(Ok(text));

        let result = ExtractionResult { jobs: vec![job] };
        if !result.has_text() {
            notify(conversation, "No Persian text detected in the image.").await;
            return Ok(());
        }

        self.deliver(user_id, conversation, "img", "✅ Extracted Persian Text:", &result.render())
            .await
    }

    async fn process_pdf(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        file_id: &str,
        file_name: &str,
    ) {
        let status = notify(conversation, "Processing your PDF...").await;

        if let Err(e) = self.try_process_pdf(user_id, conversation, file_id, file_name).await {
            error!("Error processing PDF for user {}: {}", user_id, e);
            notify(conversation, &format!("Error processing PDF: {}", e.user_message())).await;
        }

        self.clear_status(conversation, status).await;
    }

    async fn try_process_pdf(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        file_id: &str,
        file_name: &str,
    ) -> Result<(), HandlerError> {
        let data = conversation.download(file_id).await?;

        notify(conversation, &format!("Opening PDF... ({})", file_name)).await;
        let max_pages = self.config.pdf.max_pages;
        let rasterizer = self.rasterizer.clone();
        let rendered = tokio::task::spawn_blocking(move || rasterizer.rasterize(&data, max_pages))
            .await
            .map_err(|e| PdfError::Backend(format!("render task panicked: {}", e)))??;

        notify(
            conversation,
            &format!("Found {} pages. Processing...", rendered.total_pages),
        )
        .await;

        let progress = ChatProgress { conversation };
        let result = extract_document(
            self.backend.as_ref(),
            &self.policy,
            rendered.pages,
            max_pages,
            &progress,
        )
        .await;

        if !result.has_text() {
            notify(conversation, "No Persian text detected in the PDF.").await;
            return Ok(());
        }

        self.deliver(
            user_id,
            conversation,
            "pdf",
            "✅ Extracted Persian Text from PDF:",
            &result.render(),
        )
        .await
    }

    /// Send the text, remember it and offer the email button.
    async fn deliver(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        id_prefix: &str,
        header: &str,
        text: &str,
    ) -> Result<(), HandlerError> {
        notify(conversation, header).await;
        let last = self.delivery.send_reply(conversation, text).await?;

        let extraction_id = format!("{}_{}", id_prefix, last);
        self.store.store(user_id, &extraction_id, text.to_string()).await;
        conversation.send_email_offer(EMAIL_OFFER, &extraction_id).await?;
        Ok(())
    }

    /// "Send to Email" button. `button_message` is the message carrying the
    /// button, cleared after a successful send.
    pub async fn handle_email_request(
        &self,
        user_id: u64,
        conversation: &dyn Conversation,
        button_message: Option<MessageRef>,
        extraction_id: &str,
    ) {
        if !self.is_authorized(user_id) {
            notify(conversation, DENIAL_MESSAGE).await;
            return;
        }

        let Some(text) = self.store.get(user_id, extraction_id).await else {
            warn!("No stored extraction {} for user {}", extraction_id, user_id);
            notify(conversation, "❌ Could not find the extracted text.").await;
            return;
        };

        let recipient = &self.config.email.default_recipient;
        match self.delivery.send_email(recipient, &text).await {
            Ok(()) => {
                if let Some(message) = button_message {
                    if let Err(e) = conversation.clear_buttons(message).await {
                        warn!("Failed to clear email button: {}", e);
                    }
                }
                notify(conversation, &format!("✅ Text sent to {}", recipient)).await;
            }
            Err(e) => {
                error!("Email for extraction {} failed: {}", extraction_id, e);
                notify(conversation, "❌ Failed to send email. Please check the logs.").await;
            }
        }
    }

    async fn clear_status(&self, conversation: &dyn Conversation, status: Option<MessageRef>) {
        if let Some(message) = status {
            if let Err(e) = conversation.delete_message(message).await {
                warn!("Failed to delete status message: {}", e);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Image,
    Unsupported,
}

fn classify_document(file_name: Option<&str>, mime_type: Option<&str>) -> DocumentKind {
    let name = file_name.unwrap_or_default().to_lowercase();
    let mime = mime_type.unwrap_or_default();

    if mime == "application/pdf" || name.ends_with(".pdf") {
        DocumentKind::Pdf
    } else if mime.starts_with("image/")
        || [".png", ".jpg", ".jpeg", ".webp", ".bmp", ".gif", ".tif", ".tiff"]
            .iter()
            .any(|ext| name.ends_with(ext))
    {
        DocumentKind::Image
    } else {
        DocumentKind::Unsupported
    }
}

/// Per-page status lines in the chat.
struct ChatProgress<'a> {
    conversation: &'a dyn Conversation,
}

#[async_trait::async_trait]
impl<'a> PageProgress for ChatProgress<'a> {
    async fn page_started(&self, page_num: u32, total: usize) {
        notify(self.conversation, &format!("Processing page {}/{}...", page_num, total)).await;
    }

    async fn page_finished(&self, job: &ExtractionJob) {
        let n = job.page_num().unwrap_or_default();
        let line = match &job.status {
            JobStatus::Failed(_) => format!("Page {} extraction failed", n),
            _ if job.has_text() => format!("Page {} text extracted", n),
            _ => format!("No text found on page {}", n),
        };
        notify(self.conversation, &line).await;
    }
}

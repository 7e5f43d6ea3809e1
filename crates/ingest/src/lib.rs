//! File ingestion: turn an uploaded file into a summarized [`Document`].
//!
//! Two paths, decided by media type:
//! - images and PDFs go to the model as inline base64 binary with an
//!   analysis prompt
//! - everything else must be UTF-8 text; the model summarizes a preview and
//!   the stored summary keeps the full content appended
//!
//! The ingestion adapter owns the prompts; the provider only sees ordered
//! content parts.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use docuchat_core::document::Document;
use docuchat_core::error::{Error, IngestError};
use docuchat_core::provider::{ContentPart, GenerateRequest, Provider};
use std::sync::Arc;
use tracing::{debug, info};

/// Analysis prompt for uploaded images.
const IMAGE_PROMPT: &str = "Analyze this image and extract all relevant information including: \
objects, text, people, locations, dates, and any other important details. \
Provide a comprehensive structured summary.";

/// Analysis prompt for uploaded PDFs.
const PDF_PROMPT: &str = "Analyze this PDF document thoroughly and extract ALL information \
including: main topics, key points, important dates, names, locations, data, tables, and any \
other relevant details. Provide a comprehensive structured summary of the ENTIRE document.";

/// Maximum characters of a text document shown to the summarization model.
const TEXT_PREVIEW_CHARS: usize = 10_000;

/// An uploaded file, as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// How an upload is fed to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// Sent as inline base64 binary (images, PDFs).
    InlineBinary,
    /// Read as UTF-8 and summarized as text.
    Text,
}

/// Classify an upload by its MIME type.
pub fn classify(media_type: &str) -> MediaKind {
    if media_type.starts_with("image/") || media_type == "application/pdf" {
        MediaKind::InlineBinary
    } else {
        MediaKind::Text
    }
}

/// Drives upload analysis through the configured provider.
pub struct Ingestor {
    provider: Arc<dyn Provider>,
    model: String,
}

impl Ingestor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Summarize an upload and produce the document record to persist.
    pub async fn ingest(&self, user_id: &str, upload: Upload) -> Result<Document, Error> {
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload(upload.name).into());
        }

        let size_bytes = upload.bytes.len() as u64;
        let request = self.build_request(&upload)?;

        debug!(file = %upload.name, media_type = %upload.media_type, "Analyzing upload");
        let analysis = self.provider.generate(request).await.map_err(Error::Provider)?;

        let summary = match classify(&upload.media_type) {
            MediaKind::InlineBinary => analysis,
            MediaKind::Text => {
                // Text documents keep their full content alongside the summary
                let content = text_content(&upload)?;
                format!("SUMMARY:\n{analysis}\n\n---\n\nFULL CONTENT:\n{content}")
            }
        };

        info!(file = %upload.name, summary_len = summary.len(), "Upload summarized");
        Ok(Document::new(
            user_id,
            upload.name,
            upload.media_type,
            size_bytes,
            summary,
        ))
    }

    fn build_request(&self, upload: &Upload) -> Result<GenerateRequest, Error> {
        let parts = match classify(&upload.media_type) {
            MediaKind::InlineBinary => {
                let prompt = if upload.media_type.starts_with("image/") {
                    IMAGE_PROMPT
                } else {
                    PDF_PROMPT
                };
                vec![
                    ContentPart::text(prompt),
                    ContentPart::inline_data(&upload.media_type, BASE64.encode(&upload.bytes)),
                ]
            }
            MediaKind::Text => {
                let content = text_content(upload)?;
                let preview: String = content.chars().take(TEXT_PREVIEW_CHARS).collect();
                vec![ContentPart::text(format!(
                    "Provide a brief summary (2-3 sentences) of this document:\n\n{preview}"
                ))]
            }
        };

        Ok(GenerateRequest {
            model: self.model.clone(),
            parts,
        })
    }
}

fn text_content(upload: &Upload) -> Result<String, Error> {
    String::from_utf8(upload.bytes.clone())
        .map_err(|_| IngestError::NotText(upload.name.clone()).into())
}

//! Provider trait — the abstraction over the generative-AI backend.
//!
//! A Provider knows how to send an ordered list of content parts to an LLM
//! and get text back, either complete or as a stream of fragments.
//!
//! Two request shapes flow through this boundary:
//! - prompt + inline binary (image/PDF summarization)
//! - prompt-only text (plain-document summarization and chat turns)

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One part of a generation request, in API order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },

    /// Inline binary content (image or PDF), base64-encoded.
    InlineData { mime_type: String, data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, base64_data: impl Into<String>) -> Self {
        Self::InlineData {
            mime_type: mime_type.into(),
            data: base64_data.into(),
        }
    }
}

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The model to use (e.g. "gemini-2.5-flash")
    pub model: String,

    /// Ordered content parts forming the single user turn
    pub parts: Vec<ContentPart>,
}

impl GenerateRequest {
    /// Convenience constructor for a text-only request.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            parts: vec![ContentPart::text(prompt)],
        }
    }
}

/// A single fragment in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial text delta
    #[serde(default)]
    pub text: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

/// The generative-AI boundary.
///
/// Implementations must deliver stream fragments in arrival order; the
/// session layer relies on a single consuming task per stream and never
/// fans the receiver out.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "gemini").
    fn name(&self) -> &str;

    /// Send a request and collect the complete response text.
    ///
    /// Default implementation drains `stream()`.
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<String, ProviderError> {
        let mut rx = self.stream(request).await?;
        let mut full = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(text) = chunk.text {
                full.push_str(&text);
            }
            if chunk.done {
                break;
            }
        }
        Ok(full)
    }

    /// Send a request and get an ordered stream of response fragments.
    async fn stream(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    >;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProvider {
        fragments: Vec<&'static str>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            _request: GenerateRequest,
        ) -> std::result::Result<
            tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
            ProviderError,
        > {
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let fragments = self.fragments.clone();
            tokio::spawn(async move {
                for f in fragments {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            text: Some(f.to_string()),
                            done: false,
                        }))
                        .await;
                }
                let _ = tx.send(Ok(StreamChunk { text: None, done: true })).await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn generate_default_impl_concatenates_stream() {
        let provider = ScriptedProvider {
            fragments: vec!["Hel", "lo", " world"],
        };
        let text = provider
            .generate(GenerateRequest::text("test-model", "hi"))
            .await
            .unwrap();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn text_request_has_single_part() {
        let req = GenerateRequest::text("gemini-2.5-flash", "What is this?");
        assert_eq!(req.parts.len(), 1);
        assert!(matches!(req.parts[0], ContentPart::Text { .. }));
    }

    #[test]
    fn inline_data_part_serializes_mime_type() {
        let part = ContentPart::inline_data("image/png", "aGVsbG8=");
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("image/png"));
        assert!(json.contains("inline_data"));
    }
}

//! Document domain types.
//!
//! A `Document` is an uploaded file's metadata plus its AI-generated summary.
//! Created once on successful upload + summarization, deleted on explicit
//! user action, immutable otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An uploaded file's metadata plus the summary extracted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: DocumentId,

    /// Owning user
    pub user_id: String,

    /// Original file name, for display and prompt labelling
    pub name: String,

    /// MIME type of the uploaded file (e.g. "image/png", "application/pdf")
    pub media_type: String,

    /// Size of the original upload in bytes
    pub size_bytes: u64,

    /// AI-extracted summary text — the context that flows into chat prompts
    pub summary: String,

    /// Upload timestamp
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document record for a freshly summarized upload.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        media_type: impl Into<String>,
        size_bytes: u64,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            user_id: user_id.into(),
            name: name.into(),
            media_type: media_type.into(),
            size_bytes,
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_has_unique_id() {
        let a = Document::new("user_1", "a.txt", "text/plain", 10, "summary");
        let b = Document::new("user_1", "b.txt", "text/plain", 10, "summary");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn document_serialization_roundtrip() {
        let doc = Document::new("user_1", "report.pdf", "application/pdf", 2048, "A report");
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, doc.id);
        assert_eq!(parsed.name, "report.pdf");
        assert_eq!(parsed.size_bytes, 2048);
    }
}

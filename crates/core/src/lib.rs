//! # Docuchat Core
//!
//! Domain types, traits, and error definitions for the docuchat
//! document-chat service. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The provider boundary is a trait here; the Gemini implementation lives
//! in its own crate. This enables:
//! - Swapping the generative-AI backend via configuration
//! - Easy testing with mock/stub providers
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use document::{Document, DocumentId};
pub use error::{Error, IngestError, ProviderError, Result, SessionError, StoreError};
pub use message::{ChatId, ChatSummary, Message, Role, derive_title};
pub use provider::{ContentPart, GenerateRequest, Provider, StreamChunk};

//! Chat prompt assembly.
//!
//! The prompt for a chat turn is the concatenation of, for each selected
//! document in document-list order, its display name and summary, followed
//! by the user's question. Documents outside the selection never appear.

use crate::selection::SelectionSet;
use docuchat_core::document::Document;

/// Build the single-turn prompt sent to the chat model.
pub fn build_chat_prompt(
    documents: &[Document],
    selection: &SelectionSet,
    user_text: &str,
) -> String {
    let mut context = String::new();

    let selected: Vec<&Document> = documents
        .iter()
        .filter(|d| selection.contains(&d.id))
        .collect();

    if !selected.is_empty() {
        context.push_str("Context from uploaded files:\n\n");
        for doc in selected {
            context.push_str(&format!("File: {}\n", doc.name));
            context.push_str(&format!("Information: {}\n\n", doc.summary));
        }
    }

    format!("{context}\nUser question: {user_text}")
}

//! Chat session state machine.
//!
//! A session owns one chat: its transcript, its document selection, and the
//! phase of the current turn (`Idle` → `Sending` → `Streaming` → `Idle`).
//! One turn at a time — a send while another is in flight is refused with
//! [`SessionError::Busy`].
//!
//! Streaming grows a single assistant message in place; observers watch the
//! transcript via a `tokio::sync::watch` channel and see every delta. A
//! provider failure mid-stream leaves exactly one assistant turn containing
//! the error description, and the session returns to `Idle` either way.
//!
//! After every completed turn (success or failure) the full transcript is
//! persisted: the chat row and its document associations are created on the
//! first save, the recency timestamp is bumped on later ones.

use docuchat_context::prompt::build_chat_prompt;
use docuchat_context::selection::{SelectionSet, ToggleOutcome, Usage};
use docuchat_context::BudgetEngine;
use docuchat_core::document::{Document, DocumentId};
use docuchat_core::error::{Error, ProviderError, SessionError};
use docuchat_core::message::{derive_title, ChatId, Message, Role};
use docuchat_core::provider::{GenerateRequest, Provider};
use docuchat_store::Store;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the session is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Ready for the next user message.
    Idle,
    /// Request dispatched, no response fragments yet.
    Sending,
    /// Response fragments arriving.
    Streaming,
}

/// A point-in-time view of the session, published on every change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub phase: Phase,
    pub messages: Vec<Message>,
}

struct SessionState {
    phase: Phase,
    persisted: bool,
    selection: SelectionSet,
    messages: Vec<Message>,
}

/// One chat's live state: transcript, selection, and turn phase.
pub struct ChatSession {
    store: Arc<Store>,
    provider: Arc<dyn Provider>,
    engine: BudgetEngine,
    chat_model: String,
    user_id: String,
    chat_id: ChatId,
    state: Mutex<SessionState>,
    events: watch::Sender<Snapshot>,
}

impl ChatSession {
    /// Start a fresh chat. Nothing is persisted until the first turn
    /// completes.
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn Provider>,
        chat_model: impl Into<String>,
        context_budget: usize,
        user_id: impl Into<String>,
    ) -> Self {
        let (events, _) = watch::channel(Snapshot {
            phase: Phase::Idle,
            messages: Vec::new(),
        });
        Self {
            store,
            provider,
            engine: BudgetEngine::new(context_budget),
            chat_model: chat_model.into(),
            user_id: user_id.into(),
            chat_id: ChatId::new(),
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                persisted: false,
                selection: SelectionSet::new(),
                messages: Vec::new(),
            }),
            events,
        }
    }

    /// Resume a persisted chat: transcript and document selection are loaded
    /// from the store.
    pub async fn resume(
        store: Arc<Store>,
        provider: Arc<dyn Provider>,
        chat_model: impl Into<String>,
        context_budget: usize,
        user_id: impl Into<String>,
        chat_id: ChatId,
    ) -> Result<Self, Error> {
        let messages = store.load_messages(&chat_id).await.map_err(Error::Store)?;
        let doc_ids = store.chat_documents(&chat_id).await.map_err(Error::Store)?;
        let selection = SelectionSet::from_ids(doc_ids);

        let (events, _) = watch::channel(Snapshot {
            phase: Phase::Idle,
            messages: messages.clone(),
        });
        Ok(Self {
            store,
            provider,
            engine: BudgetEngine::new(context_budget),
            chat_model: chat_model.into(),
            user_id: user_id.into(),
            chat_id,
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                persisted: true,
                selection,
                messages,
            }),
            events,
        })
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Watch transcript and phase changes, delta by delta.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().messages.clone()
    }

    pub fn selection(&self) -> SelectionSet {
        self.lock_state().selection.clone()
    }

    /// Toggle a document in or out of the context selection.
    ///
    /// Over-budget additions are rejected and leave the selection unchanged;
    /// the outcome carries the numbers the caller needs for the alert.
    pub fn toggle_document(&self, id: &DocumentId, documents: &[Document]) -> ToggleOutcome {
        let mut state = self.lock_state();
        let outcome = self.engine.toggle(id, &state.selection, documents);
        state.selection = outcome.selection().clone();
        outcome
    }

    /// Current budget usage of the selection.
    pub fn usage(&self, documents: &[Document]) -> Usage {
        let state = self.lock_state();
        self.engine.usage(&state.selection, documents)
    }

    /// Send a user message and stream the assistant response.
    ///
    /// Returns the final assistant text. A provider failure is recorded in
    /// the transcript as a single `Error: …` assistant turn, persisted like
    /// any other turn, and propagated.
    pub async fn send(&self, text: &str, documents: &[Document]) -> Result<String, Error> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage.into());
        }

        let prompt = {
            let mut state = self.lock_state();
            if state.phase != Phase::Idle {
                return Err(SessionError::Busy.into());
            }
            state.phase = Phase::Sending;
            state.messages.push(Message::user(text));
            let prompt = build_chat_prompt(documents, &state.selection, text);
            self.publish(&state);
            prompt
        };

        debug!(chat = %self.chat_id, prompt_len = prompt.len(), "Dispatching chat turn");
        let request = GenerateRequest::text(&self.chat_model, prompt);

        let result = self.run_stream(request).await;

        // The turn is over either way; record the outcome and go idle
        match &result {
            Ok(reply) => info!(chat = %self.chat_id, reply_len = reply.len(), "Turn complete"),
            Err(e) => {
                warn!(chat = %self.chat_id, error = %e, "Turn failed");
                let mut state = self.lock_state();
                self.ensure_error_turn(&mut state, e);
                self.publish(&state);
            }
        }
        {
            let mut state = self.lock_state();
            state.phase = Phase::Idle;
            self.publish(&state);
        }

        self.persist().await?;
        result.map_err(Into::into)
    }

    /// Drive the provider stream, growing the trailing assistant message.
    async fn run_stream(&self, request: GenerateRequest) -> Result<String, ProviderError> {
        let mut rx = self.provider.stream(request).await?;

        {
            let mut state = self.lock_state();
            state.phase = Phase::Streaming;
            state.messages.push(Message::assistant(""));
            self.publish(&state);
        }

        let mut reply = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.text {
                reply.push_str(&delta);
                let mut state = self.lock_state();
                if let Some(last) = state.messages.last_mut() {
                    last.content.push_str(&delta);
                }
                self.publish(&state);
            }
            if chunk.done {
                break;
            }
        }
        Ok(reply)
    }

    /// Leave exactly one assistant turn describing the failure, replacing the
    /// partial streamed message if one was started.
    fn ensure_error_turn(&self, state: &mut SessionState, error: &ProviderError) {
        let text = format!("Error: {error}");
        match state.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content = text,
            _ => state.messages.push(Message::assistant(text)),
        }
    }

    /// Save the full transcript; create the chat row on first save.
    async fn persist(&self) -> Result<(), Error> {
        let (persisted, selection, messages) = {
            let state = self.lock_state();
            (
                state.persisted,
                state.selection.clone(),
                state.messages.clone(),
            )
        };

        if !persisted {
            let title = messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| derive_title(&m.content))
                .unwrap_or_else(|| "New Chat".into());
            let doc_ids: Vec<DocumentId> = selection.iter().cloned().collect();
            self.store
                .create_chat(&self.chat_id, &self.user_id, &title, &doc_ids)
                .await
                .map_err(Error::Store)?;
            self.lock_state().persisted = true;
        } else {
            self.store
                .touch_chat(&self.chat_id)
                .await
                .map_err(Error::Store)?;
        }

        self.store
            .replace_messages(&self.chat_id, &messages)
            .await
            .map_err(Error::Store)?;
        Ok(())
    }

    fn publish(&self, state: &SessionState) {
        let _ = self.events.send(Snapshot {
            phase: state.phase,
            messages: state.messages.clone(),
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // Poisoning only happens if a holder panicked; the state itself is
        // still consistent between mutations
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docuchat_core::provider::StreamChunk;
    use std::time::Duration;

    /// Streams scripted fragments with an optional delay between them.
    struct ScriptedProvider {
        fragments: Vec<Result<&'static str, ProviderError>>,
        delay: Duration,
        last_prompt: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        fn ok(fragments: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                fragments: fragments.into_iter().map(Ok).collect(),
                delay: Duration::ZERO,
                last_prompt: Mutex::new(None),
            })
        }

        fn slow(fragments: Vec<&'static str>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fragments: fragments.into_iter().map(Ok).collect(),
                delay,
                last_prompt: Mutex::new(None),
            })
        }

        fn failing_after(prefix: &'static str, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                fragments: vec![Ok(prefix), Err(error)],
                delay: Duration::ZERO,
                last_prompt: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            request: GenerateRequest,
        ) -> Result<
            tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>,
            ProviderError,
        > {
            if let Some(docuchat_core::provider::ContentPart::Text { text }) =
                request.parts.first()
            {
                *self.last_prompt.lock().unwrap() = Some(text.clone());
            }
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let fragments = self.fragments.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                for f in fragments {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let item = f.map(|text| StreamChunk {
                        text: Some(text.to_string()),
                        done: false,
                    });
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(Ok(StreamChunk { text: None, done: true })).await;
            });
            Ok(rx)
        }
    }

    async fn test_store() -> Arc<Store> {
        Arc::new(Store::open("sqlite::memory:").await.unwrap())
    }

    fn session(store: Arc<Store>, provider: Arc<dyn Provider>) -> ChatSession {
        ChatSession::new(store, provider, "gemini-2.5-flash", 200_000, "user_1")
    }

    #[tokio::test]
    async fn deltas_grow_a_single_assistant_turn() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["Hel", "lo", " world"]);
        let sess = session(store, provider);

        let reply = sess.send("Hi", &[]).await.unwrap();
        assert_eq!(reply, "Hello world");

        let messages = sess.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello world");
    }

    #[tokio::test]
    async fn observers_see_intermediate_deltas() {
        let store = test_store().await;
        let provider = ScriptedProvider::slow(
            vec!["Hel", "lo", " world"],
            Duration::from_millis(5),
        );
        let sess = Arc::new(session(store, provider));

        let mut rx = sess.subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let snap = rx.borrow().clone();
                if let Some(last) = snap.messages.last() {
                    if last.role == Role::Assistant {
                        seen.push(last.content.clone());
                    }
                }
                if snap.phase == Phase::Idle && !snap.messages.is_empty() {
                    break;
                }
            }
            seen
        });

        sess.send("Hi", &[]).await.unwrap();
        let seen = watcher.await.unwrap();

        // Prefix growth, never rewrites
        assert!(seen.contains(&"Hel".to_string()));
        assert!(seen.contains(&"Hello world".to_string()));
        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]) || pair[1] == pair[0]);
        }
    }

    #[tokio::test]
    async fn concurrent_send_is_refused() {
        let store = test_store().await;
        let provider = ScriptedProvider::slow(vec!["slow reply"], Duration::from_millis(50));
        let sess = Arc::new(session(store, provider));

        let first = {
            let sess = sess.clone();
            tokio::spawn(async move { sess.send("first", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = sess.send("second", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Busy)));

        first.await.unwrap().unwrap();
        // The refused send left no trace in the transcript
        let messages = sess.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
    }

    #[tokio::test]
    async fn failure_leaves_single_error_turn_and_goes_idle() {
        let store = test_store().await;
        let provider = ScriptedProvider::failing_after(
            "partial",
            ProviderError::StreamInterrupted("connection reset".into()),
        );
        let sess = session(store, provider);

        let err = sess.send("Hi", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        let messages = sess.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.starts_with("Error: "));
        assert!(messages[1].content.contains("connection reset"));

        // Back to idle: the next send works
        assert_eq!(sess.subscribe().borrow().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn first_turn_persists_chat_with_derived_title() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["Sure."]);
        let sess = session(store.clone(), provider);

        let long_question = "a".repeat(120);
        sess.send(&long_question, &[]).await.unwrap();

        let chats = store.list_chats("user_1").await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title.chars().count(), 50);

        let saved = store.load_messages(sess.chat_id()).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].content, "Sure.");
    }

    #[tokio::test]
    async fn later_turns_overwrite_the_stored_transcript() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["ok"]);
        let sess = session(store.clone(), provider);

        sess.send("one", &[]).await.unwrap();
        sess.send("two", &[]).await.unwrap();

        let saved = store.load_messages(sess.chat_id()).await.unwrap();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[0].content, "one");
        assert_eq!(saved[2].content, "two");

        // Still one chat row
        assert_eq!(store.list_chats("user_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selection_flows_into_the_prompt() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["answer"]);
        let sess = session(store.clone(), provider.clone());

        let docs = vec![
            Document::new("user_1", "report.pdf", "application/pdf", 10, "Q3 revenue up"),
            Document::new("user_1", "secret.txt", "text/plain", 10, "do not include"),
        ];
        store.insert_document(&docs[0]).await.unwrap();
        store.insert_document(&docs[1]).await.unwrap();
        let outcome = sess.toggle_document(&docs[0].id, &docs);
        assert!(matches!(outcome, ToggleOutcome::Added(_)));

        sess.send("What changed?", &docs).await.unwrap();

        let prompt = provider.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("File: report.pdf"));
        assert!(prompt.contains("Q3 revenue up"));
        assert!(!prompt.contains("do not include"));
        assert!(prompt.ends_with("User question: What changed?"));
    }

    #[tokio::test]
    async fn first_save_records_document_associations() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["ok"]);
        let sess = session(store.clone(), provider);

        let doc = Document::new("user_1", "a.txt", "text/plain", 10, "short");
        store.insert_document(&doc).await.unwrap();
        sess.toggle_document(&doc.id, std::slice::from_ref(&doc));

        sess.send("go", std::slice::from_ref(&doc)).await.unwrap();

        let linked = store.chat_documents(sess.chat_id()).await.unwrap();
        assert_eq!(linked, vec![doc.id]);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_side_effects() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["never"]);
        let sess = session(store.clone(), provider);

        let err = sess.send("   ", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::EmptyMessage)));
        assert!(sess.messages().is_empty());
        assert!(store.list_chats("user_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_restores_transcript_and_selection() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["continued"]);

        let doc = Document::new("user_1", "a.txt", "text/plain", 10, "short");
        store.insert_document(&doc).await.unwrap();

        let chat_id = {
            let sess = session(store.clone(), provider.clone());
            sess.toggle_document(&doc.id, std::slice::from_ref(&doc));
            sess.send("remember this", std::slice::from_ref(&doc))
                .await
                .unwrap();
            sess.chat_id().clone()
        };

        let resumed = ChatSession::resume(
            store,
            provider,
            "gemini-2.5-flash",
            200_000,
            "user_1",
            chat_id,
        )
        .await
        .unwrap();

        assert_eq!(resumed.messages().len(), 2);
        assert!(resumed.selection().contains(&doc.id));
    }

    #[tokio::test]
    async fn over_budget_toggle_is_rejected_and_selection_unchanged() {
        let store = test_store().await;
        let provider = ScriptedProvider::ok(vec!["ok"]);
        let sess = ChatSession::new(store, provider, "gemini-2.5-flash", 100, "user_1");

        let docs = vec![
            Document::new("user_1", "a.txt", "text/plain", 0, "x".repeat(240)),
            Document::new("user_1", "b.txt", "text/plain", 0, "x".repeat(200)),
        ];

        assert!(!sess.toggle_document(&docs[0].id, &docs).is_rejected());
        let outcome = sess.toggle_document(&docs[1].id, &docs);
        match outcome {
            ToggleOutcome::Rejected {
                would_total,
                budget,
                ..
            } => {
                assert_eq!(would_total, 110);
                assert_eq!(budget, 100);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(sess.selection().contains(&docs[0].id));
        assert!(!sess.selection().contains(&docs[1].id));

        let usage = sess.usage(&docs);
        assert_eq!(usage.used, 60);
    }
}

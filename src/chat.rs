//! Per-user session state and the document-grounded consultation chat.

use std::sync::atomic::AtomicBool;
use std::time::Instant;

use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::doc_processor::{self, DocumentKind, ExtractionError};
use crate::llm::{ChatMessage, Role};
use crate::summarizer::{Progress, SummarizeError, Summarizer, SummaryOutcome, SYSTEM_PROMPT};

pub const GREETING: &str = "Welcome. Upload a legal document to begin analysis.";
pub const CONTEXT_ACK: &str = "Context received.";

/// Characters of the document injected as grounding context per turn.
pub const CONTEXT_CHAR_LIMIT: usize = 15_000;
/// Most recent conversation messages sent per turn.
pub const HISTORY_WINDOW: usize = 6;

const PREVIEW_CHARS: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Error reading file: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Processing error: {0}")]
    Summarize(#[from] SummarizeError),
}

pub fn context_message(document: &str) -> ChatMessage {
    let excerpt: String = document.chars().take(CONTEXT_CHAR_LIMIT).collect();
    ChatMessage::user(format!("Context:\n\n{}\n\n(End Context)", excerpt))
}

/// System prompt, optional context + acknowledgment pair, then the last
/// `HISTORY_WINDOW` conversation messages oldest first.
pub fn build_chat_messages(conversation: &[ChatMessage], document: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    if let Some(document) = document {
        messages.push(context_message(document));
        messages.push(ChatMessage::assistant(CONTEXT_ACK));
    }

    let skip = conversation.len().saturating_sub(HISTORY_WINDOW);
    messages.extend(conversation[skip..].iter().cloned());
    messages
}

pub struct ChatSession {
    client: CompletionClient,
}

impl ChatSession {
    pub fn new(client: CompletionClient) -> Self {
        Self { client }
    }

    /// Produce the next assistant message. Appending it is up to the caller.
    pub async fn respond(&self, conversation: &[ChatMessage], document: Option<&str>) -> ChatMessage {
        let messages = build_chat_messages(conversation, document);
        tracing::debug!(
            outgoing = messages.len(),
            grounded = document.is_some(),
            "Consulting"
        );
        ChatMessage::assistant(self.client.complete(&messages).await.into_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: ChatMessage,
    pub elapsed_seconds: u64,
}

/// Conversation and document owned by one user. Only this type mutates them.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    conversation: Vec<ChatMessage>,
    document: Option<String>,
    document_name: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation: vec![ChatMessage::assistant(GREETING)],
            document: None,
            document_name: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    /// New Conversation: swap in a fresh session, dropping history and document together.
    pub fn reset(&mut self) {
        tracing::info!(session = %self.id, "Starting new conversation");
        *self = Session::new();
    }

    /// Register an upload by name. A different name discards the previous document text.
    pub fn select_upload(&mut self, name: &str) {
        if self.document_name.as_deref() != Some(name) {
            self.document_name = Some(name.to_string());
            self.document = None;
        }
    }

    /// Replace the document wholesale, e.g. for text pasted without a file.
    pub fn set_document(&mut self, name: &str, text: String) {
        self.document_name = Some(name.to_string());
        self.document = Some(text);
    }

    /// Extract, summarize, and append the report. The conversation is only
    /// touched once synthesis has finished.
    pub async fn summarize_document(
        &mut self,
        name: &str,
        payload: &[u8],
        kind: DocumentKind,
        summarizer: &Summarizer,
        cancel: &AtomicBool,
        on_progress: impl FnMut(Progress),
    ) -> Result<SummaryOutcome, SessionError> {
        self.select_upload(name);
        let parsed = doc_processor::parse_bytes(payload, kind)?;

        let outcome = {
            let text = self.document.insert(parsed.content);
            summarizer
                .summarize_cancellable(text, cancel, on_progress)
                .await?
        };

        self.conversation.push(ChatMessage::assistant(outcome.report()));
        tracing::info!(session = %self.id, document = name, "Executive summary added");
        Ok(outcome)
    }

    /// Append the question, ask the model with the current grounding, append the answer.
    pub async fn ask(&mut self, chat: &ChatSession, prompt: &str) -> Reply {
        self.conversation.push(ChatMessage::user(prompt));

        let started = Instant::now();
        let message = chat.respond(&self.conversation, self.document.as_deref()).await;
        let elapsed_seconds = started.elapsed().as_secs();

        self.conversation.push(message.clone());
        Reply {
            message,
            elapsed_seconds,
        }
    }

    /// Short labels for the user's past questions.
    pub fn history_preview(&self) -> Vec<String> {
        self.conversation
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| {
                let head: String = m.content.chars().take(PREVIEW_CHARS).collect();
                format!("{}...", head)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::FakeBackend;
    use crate::summarizer::SummarizerConfig;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn conversation(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("question {}", i))
                } else {
                    ChatMessage::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    fn chat(backend: Arc<FakeBackend>) -> ChatSession {
        ChatSession::new(CompletionClient::new(backend, "test-model"))
    }

    fn summarizer(backend: Arc<FakeBackend>) -> Summarizer {
        Summarizer::new(
            CompletionClient::new(backend, "test-model"),
            SummarizerConfig::new(4000, 200).unwrap(),
        )
    }

    #[test]
    fn test_new_session_starts_with_greeting() {
        let session = Session::new();
        assert_eq!(session.conversation(), &[ChatMessage::assistant(GREETING)]);
        assert!(session.document().is_none());
    }

    #[test]
    fn test_without_document_sends_system_and_last_six() {
        let history = conversation(9);
        let messages = build_chat_messages(&history, None);
        assert_eq!(messages.len(), 1 + HISTORY_WINDOW);
        assert_eq!(messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(&messages[1..], &history[3..]);
        assert!(messages.iter().all(|m| m.content != CONTEXT_ACK));
    }

    #[test]
    fn test_short_history_is_sent_whole() {
        let history = conversation(2);
        let messages = build_chat_messages(&history, None);
        assert_eq!(&messages[1..], &history[..]);
    }

    #[test]
    fn test_long_document_is_truncated() {
        let document = "x".repeat(20_000);
        let messages = build_chat_messages(&conversation(1), Some(&document));

        let label_len = "Context:\n\n".len() + "\n\n(End Context)".len();
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content.chars().count(), CONTEXT_CHAR_LIMIT + label_len);
        assert_eq!(messages[2], ChatMessage::assistant(CONTEXT_ACK));
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn test_context_limit_counts_characters() {
        let document = "§".repeat(CONTEXT_CHAR_LIMIT + 10);
        let message = context_message(&document);
        assert_eq!(message.content.matches('§').count(), CONTEXT_CHAR_LIMIT);
    }

    #[tokio::test]
    async fn test_ask_appends_question_and_reply() {
        let backend = FakeBackend::new(|_| Ok("A severability clause keeps the rest valid.".into()));
        let chat = chat(backend.clone());
        let mut session = Session::new();
        session.set_document("lease.txt", "The tenant shall pay rent.".into());

        let reply = session.ask(&chat, "What is severability?").await;

        assert_eq!(reply.message.role, Role::Assistant);
        assert_eq!(session.conversation().len(), 3);
        assert_eq!(session.conversation()[2], reply.message);

        let sent = &backend.calls.lock()[0];
        assert_eq!(sent[1].content, "Context:\n\nThe tenant shall pay rent.\n\n(End Context)");
        assert_eq!(sent.last().unwrap(), &ChatMessage::user("What is severability?"));
    }

    #[tokio::test]
    async fn test_failed_reply_is_inline_text() {
        let mut session = Session::new();
        let reply = session.ask(&chat(FakeBackend::failing()), "hello").await;
        assert!(reply.message.content.starts_with("Error: "));
        assert_eq!(session.conversation().len(), 3);
    }

    #[test]
    fn test_reset_drops_document_and_history() {
        let mut session = Session::new();
        let old_id = session.id();
        session.set_document("a.txt", "text".into());
        session.conversation.push(ChatMessage::user("hi"));

        session.reset();

        assert_ne!(session.id(), old_id);
        assert!(session.document().is_none());
        assert!(session.document_name().is_none());
        assert_eq!(session.conversation().len(), 1);
    }

    #[test]
    fn test_select_upload_only_clears_on_new_name() {
        let mut session = Session::new();
        session.set_document("a.txt", "text".into());
        session.select_upload("a.txt");
        assert_eq!(session.document(), Some("text"));
        session.select_upload("b.txt");
        assert!(session.document().is_none());
        assert_eq!(session.document_name(), Some("b.txt"));
    }

    #[tokio::test]
    async fn test_summarize_document_appends_single_report() {
        let backend = FakeBackend::new(|_| Ok("Rent is due monthly.".into()));
        let mut session = Session::new();
        let cancel = AtomicBool::new(false);
        let mut seen = 0;

        let outcome = session
            .summarize_document(
                "lease.txt",
                b"The tenant shall pay rent monthly.",
                DocumentKind::PlainText,
                &summarizer(backend.clone()),
                &cancel,
                |_| seen += 1,
            )
            .await
            .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(session.document(), Some("The tenant shall pay rent monthly."));
        assert_eq!(session.conversation().len(), 2);
        let report = &session.conversation()[1];
        assert_eq!(report.role, Role::Assistant);
        assert_eq!(report.content, outcome.report());
        assert!(report.content.starts_with("### Executive Summary"));
        assert!(report.content.ends_with("Rent is due monthly."));
    }

    #[tokio::test]
    async fn test_extraction_failure_leaves_session_untouched() {
        let backend = FakeBackend::echo();
        let mut session = Session::new();
        let cancel = AtomicBool::new(false);

        let result = session
            .summarize_document(
                "bad.txt",
                &[0xff, 0xfe],
                DocumentKind::PlainText,
                &summarizer(backend.clone()),
                &cancel,
                |_| {},
            )
            .await;

        assert!(matches!(result, Err(SessionError::Extraction(_))));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(session.conversation().len(), 1);
        assert!(session.document().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_summary_appends_nothing() {
        let backend = FakeBackend::echo();
        let mut session = Session::new();
        let cancel = AtomicBool::new(false);
        let text = "Clause. ".repeat(1200);

        let result = session
            .summarize_document(
                "long.txt",
                text.as_bytes(),
                DocumentKind::PlainText,
                &summarizer(backend),
                &cancel,
                |_| cancel.store(true, Ordering::SeqCst),
            )
            .await;

        assert!(matches!(
            result,
            Err(SessionError::Summarize(SummarizeError::Cancelled))
        ));
        assert_eq!(session.conversation().len(), 1);
    }

    #[test]
    fn test_history_preview_lists_user_messages() {
        let mut session = Session::new();
        session
            .conversation
            .push(ChatMessage::user("Explain the indemnification clause please"));
        session.conversation.push(ChatMessage::assistant("Sure."));
        session.conversation.push(ChatMessage::user("Thanks"));

        assert_eq!(
            session.history_preview(),
            vec!["Explain the indemnificati...", "Thanks..."]
        );
    }
}

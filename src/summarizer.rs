//! Map-reduce summarization: one completion per chunk, then one synthesis call
//! over the joined partial summaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::completion::CompletionClient;
use crate::doc_processor::{self, ChunkingError};
use crate::llm::ChatMessage;

pub const SYSTEM_PROMPT: &str = "\
You are ClauseEase, an expert legal language simplifier and translator.
Your primary goal is to analyze the provided text, regardless of the input language,
and produce a concise, legally accurate summary or explanation in **Plain English**.
Use bold text for key terms.";

pub const REDUCE_SYSTEM_PROMPT: &str = "You are an expert summarizer. Output in English.";

const CHUNK_INSTRUCTION: &str = "Analyze this section. Summarize key legal points in English:";
const REDUCE_INSTRUCTION: &str = "Create a cohesive executive summary from these notes:";

pub const DEFAULT_CHUNK_SIZE: usize = 4000;

/// Observed once per chunk, after its completion returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 1-based
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizerConfig {
    chunk_size: usize,
    overlap: usize,
}

impl SummarizerConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        doc_processor::validate_chunking(chunk_size, overlap)?;
        Ok(Self {
            chunk_size,
            overlap,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub summary: String,
    pub elapsed_seconds: u64,
    pub chunk_count: usize,
    pub failed_chunks: usize,
}

impl SummaryOutcome {
    pub fn report(&self) -> String {
        format_report(self.elapsed_seconds, &self.summary)
    }
}

/// Title line, processing-time note, then the summary body.
pub fn format_report(elapsed_seconds: u64, summary: &str) -> String {
    format!(
        "### Executive Summary\n\n*(Processed in {} seconds)*\n\n{}",
        elapsed_seconds, summary
    )
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("Invalid chunking parameters: {0}")]
    Chunking(#[from] ChunkingError),
    #[error("Summarization cancelled")]
    Cancelled,
}

pub fn chunk_messages(chunk: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("{}\n\n{}", CHUNK_INSTRUCTION, chunk)),
    ]
}

pub fn reduce_messages(combined: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REDUCE_SYSTEM_PROMPT),
        ChatMessage::user(format!("{}\n\n{}", REDUCE_INSTRUCTION, combined)),
    ]
}

pub struct Summarizer {
    client: CompletionClient,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(client: CompletionClient, config: SummarizerConfig) -> Self {
        Self { client, config }
    }

    pub async fn summarize(
        &self,
        text: &str,
        on_progress: impl FnMut(Progress),
    ) -> Result<SummaryOutcome, SummarizeError> {
        let never = AtomicBool::new(false);
        self.summarize_cancellable(text, &never, on_progress).await
    }

    /// `cancel` is checked before every chunk and before synthesis. Partial work is dropped.
    pub async fn summarize_cancellable(
        &self,
        text: &str,
        cancel: &AtomicBool,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<SummaryOutcome, SummarizeError> {
        let started = Instant::now();
        let chunks = doc_processor::chunk_text(text, self.config.chunk_size, self.config.overlap)?;
        let total_chunks = chunks.len();

        tracing::info!(
            chars = text.chars().count(),
            chunks = total_chunks,
            chunk_size = self.config.chunk_size,
            overlap = self.config.overlap,
            "Summarizing document"
        );

        let mut partial_summaries = Vec::with_capacity(total_chunks);
        let mut failed_chunks = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(completed = i, "Summarization cancelled");
                return Err(SummarizeError::Cancelled);
            }

            let completion = self.client.complete(&chunk_messages(&chunk.content)).await;
            if completion.is_failed() {
                failed_chunks += 1;
                tracing::warn!(chunk = i + 1, "Chunk summary failed, continuing");
            }
            partial_summaries.push(completion.into_text());

            on_progress(Progress {
                chunk_index: i + 1,
                total_chunks,
                elapsed_seconds: started.elapsed().as_secs(),
            });
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(SummarizeError::Cancelled);
        }

        let combined = partial_summaries.join("\n");
        let summary = self.client.complete(&reduce_messages(&combined)).await.into_text();
        let elapsed_seconds = started.elapsed().as_secs();

        tracing::info!(elapsed_seconds, failed_chunks, "Executive summary synthesized");

        Ok(SummaryOutcome {
            summary,
            elapsed_seconds,
            chunk_count: total_chunks,
            failed_chunks,
        })
    }
}

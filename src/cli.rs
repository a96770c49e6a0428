use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{ChatSession, Session};
use crate::completion::is_error_marker;
use crate::config::{self, AppConfig, Settings};
use crate::doc_processor::{self, DocumentKind};
use crate::summarizer::{Progress, Summarizer};

#[derive(Debug, Parser)]
#[command(name = "clause-ease", version, about = "Plain-English summaries of legal documents")]
pub struct Cli {
    /// Provider-prefixed model, e.g. ollama/llama3.2:3b or openai/gpt-4o
    #[arg(long, global = true)]
    pub model: Option<String>,
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,
    #[arg(long, global = true)]
    pub overlap: Option<usize>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize a PDF, DOCX or text file into an executive summary
    Summarize {
        file: PathBuf,
        /// MIME type overriding the file extension
        #[arg(long)]
        kind: Option<String>,
    },
    /// Interactive consultation, optionally grounded in a document
    Chat { file: Option<PathBuf> },
    /// Ask a single question
    Ask {
        question: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn load_document(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let parsed = doc_processor::parse_file(path)
        .with_context(|| format!("Error reading file {}", path.display()))?;
    session.set_document(&file_name(path), parsed.content);
    Ok(())
}

/// A one-shot command fails when its final text is a rendered completion failure.
fn delivered(text: &str) -> bool {
    !is_error_marker(text)
}

fn exit_code(text: &str) -> ExitCode {
    if delivered(text) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_progress(p: Progress) {
    eprintln!(
        "Analyzing Chunk {}/{} | Time: {}s",
        p.chunk_index, p.total_chunks, p.elapsed_seconds
    );
}

pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::from_env();
    let mut app_config = AppConfig::from_settings(&settings)?;
    cli.apply(&mut app_config);

    let summarizer_config = app_config.summarizer_config()?;
    let client = config::build_client(&app_config, &settings)?;
    let mut session = Session::new();

    match cli.command {
        Command::Summarize { file, kind } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("Error reading file {}", file.display()))?;
            let kind = match kind {
                Some(mime) => DocumentKind::from_mime(Some(&mime)),
                None => DocumentKind::from_path(&file),
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                flag.store(true, Ordering::SeqCst);
                eprintln!("Cancelling after the current request. Press Ctrl-C again to quit now.");
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });

            let summarizer = Summarizer::new(client, summarizer_config);
            let outcome = session
                .summarize_document(&file_name(&file), &payload, kind, &summarizer, &cancel, print_progress)
                .await?;
            println!("{}", outcome.report());
            if outcome.failed_chunks > 0 {
                eprintln!("{}/{} sections could not be analyzed", outcome.failed_chunks, outcome.chunk_count);
            }
            return Ok(exit_code(&outcome.summary));
        }
        Command::Ask { question, file } => {
            if let Some(path) = file {
                load_document(&mut session, &path)?;
            }
            let chat = ChatSession::new(client);
            let reply = session.ask(&chat, &question).await;
            println!("{}", reply.message.content);
            eprintln!("⏱ {}s", reply.elapsed_seconds);
            return Ok(exit_code(&reply.message.content));
        }
        Command::Chat { file } => {
            let chat = ChatSession::new(client);
            if let Some(path) = &file {
                load_document(&mut session, path)?;
            }
            println!("{}", session.conversation()[0].content);

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("> ");
                std::io::stdout().flush()?;
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    "/new" => {
                        session.reset();
                        if let Some(path) = &file {
                            load_document(&mut session, path)?;
                        }
                        println!("{}", session.conversation()[0].content);
                    }
                    "/history" => {
                        for entry in session.history_preview() {
                            println!("• {}", entry);
                        }
                    }
                    prompt => {
                        let reply = session.ask(&chat, prompt).await;
                        println!("{}", reply.message.content);
                        println!("⏱ {}s", reply.elapsed_seconds);
                    }
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summarize_with_overrides() {
        let cli = Cli::parse_from([
            "clause-ease",
            "summarize",
            "lease.pdf",
            "--kind",
            "application/pdf",
            "--overlap",
            "300",
        ]);
        let mut config = AppConfig::from_settings(&Settings::default()).unwrap();
        cli.apply(&mut config);
        assert_eq!(config.overlap, 300);
        assert_eq!(config.chunk_size, 4000);
        match cli.command {
            Command::Summarize { file, kind } => {
                assert_eq!(file, PathBuf::from("lease.pdf"));
                assert_eq!(kind.as_deref(), Some("application/pdf"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_failed_completion_is_not_delivered() {
        assert!(delivered("**Lien**: a claim on property."));
        assert!(!delivered("Error: API error: 503 - service unavailable"));
        // The marker only counts as a prefix.
        assert!(delivered("No Error: found in clause 4."));
    }

    #[test]
    fn test_parse_ask_with_model() {
        let cli = Cli::parse_from(["clause-ease", "--model", "claude/x", "ask", "What is a lien?"]);
        assert_eq!(cli.model.as_deref(), Some("claude/x"));
        assert!(matches!(cli.command, Command::Ask { file: None, .. }));
    }
}

pub mod chat;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod llm;
pub mod summarizer;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clause_ease_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::execute(cli::Cli::parse()).await
}

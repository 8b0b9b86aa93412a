use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "gist",
    version,
    about = "Fetches report PDFs, extracts their text, and writes LLM-generated summaries"
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "gist.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, extract, and summarize every candidate URL.
    Run {
        /// Candidate URLs to ingest.
        #[arg(value_name = "URL")]
        urls: Vec<String>,

        /// File with one candidate URL per line; `#` starts a comment.
        #[arg(long = "urls", value_name = "FILE")]
        urls_file: Option<PathBuf>,
    },

    /// Extract and summarize a local PDF, printing the summary to stdout.
    File {
        /// Path to the PDF.
        path: PathBuf,

        /// Page selection, `all` or `START..END`; overrides the config.
        #[arg(long)]
        pages: Option<String>,

        /// Also write the summary JSON into the output directory.
        #[arg(long)]
        save: bool,
    },
}

/// Candidate URLs from the command line plus an optional seeds file.
pub fn load_seeds(urls: &[String], file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let mut seeds: Vec<String> = urls.to_vec();
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        seeds.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned),
        );
    }
    Ok(seeds)
}

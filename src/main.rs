mod cli;
mod report;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::watch;

use gist_document::{Chunker, PageRange};
use gist_llm::openai::OpenAiClient;
use gist_pipeline::{
    Backoff, CandidateUrl, Config, DocumentOutcome, JsonDirSink, Pipeline, RateLimitedClient,
    Sink, Summarizer, prompts,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = cli::Cli::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("GIST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: cli::Cli) -> anyhow::Result<()> {
    let config = Config::load(&args.config)?;
    match args.command {
        cli::Command::Run { urls, urls_file } => {
            run_pipeline(&config, &urls, urls_file.as_deref()).await
        }
        cli::Command::File { path, pages, save } => {
            summarize_file(&config, &path, pages.as_deref(), save).await
        }
    }
}

async fn run_pipeline(
    config: &Config,
    urls: &[String],
    urls_file: Option<&Path>,
) -> anyhow::Result<()> {
    let seeds = cli::load_seeds(urls, urls_file)?;
    if seeds.is_empty() {
        bail!("no candidate URLs given (pass URLs or --urls FILE)");
    }

    let client = build_client(config)?;
    let sink = JsonDirSink::new(&config.output.dir);
    let shutdown_rx = spawn_signal_handler();

    let started = Instant::now();
    let mut pipeline = Pipeline::spawn(config, client, sink, shutdown_rx)?;
    for seed in seeds {
        if !pipeline.enqueue(CandidateUrl::new(&seed)).await {
            tracing::warn!(url = %seed, "candidate rejected");
        }
    }
    pipeline.close_intake();

    while let Some(outcome) = pipeline.next_result().await {
        match &outcome {
            DocumentOutcome::Summary(s) => tracing::info!(
                url = %s.document_url,
                status = ?s.status,
                attempts = s.attempts,
                "document finished"
            ),
            DocumentOutcome::Failure(f) => tracing::warn!(
                url = %f.url,
                stage = f.stage().as_str(),
                error = %f.error,
                "document failed"
            ),
        }
    }

    let report = pipeline.finish().await;
    println!("{}", report::render(&report, started.elapsed()));
    if let Some(fatal) = report.fatal {
        bail!("run aborted: {fatal}");
    }
    Ok(())
}

/// Extract and summarize a PDF already on disk, skipping the fetch stage.
async fn summarize_file(
    config: &Config,
    path: &Path,
    pages: Option<&str>,
    save: bool,
) -> anyhow::Result<()> {
    let range: PageRange = pages
        .unwrap_or(&config.extract.pages)
        .parse()
        .map_err(|e| anyhow::anyhow!("pages: {e}"))?;
    let client = build_client(config)?;
    let chunker = Chunker::new(config.chunk.budget(), config.chunk.overlap_tokens)?;
    let summarizer = Summarizer::new(
        Arc::new(RateLimitedClient::new(
            client,
            config.summarize.requests_per_second,
        )),
        chunker,
        &config.summarize,
        Backoff::from_config(&config.retry),
    );

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let size_bytes = bytes.len() as u64;
    let url = format!("file://{}", path.display());
    let document = gist_document::pdf::extract_in_background(url, bytes, range).await?;
    for warning in &document.warnings {
        tracing::warn!(path = %path.display(), warning, "extraction warning");
    }

    let shutdown = spawn_signal_handler();
    let mut result = summarizer.summarize(&document, &shutdown).await?;
    result.size_bytes = size_bytes;
    if result.empty {
        println!("(nothing to summarize: document has no extractable text)");
    } else {
        println!("{}", result.summary);
    }

    if save {
        let sink = JsonDirSink::new(&config.output.dir);
        let outcome = DocumentOutcome::Summary(result);
        sink.write(&outcome)
            .await
            .map_err(|e| anyhow::anyhow!("failed to save summary: {e}"))?;
        tracing::info!(dir = %config.output.dir, "summary saved");
    }
    Ok(())
}

fn build_client(config: &Config) -> anyhow::Result<OpenAiClient> {
    if config.llm.api_key.is_empty() {
        bail!("no API key configured (set llm.api_key or GIST_API_KEY)");
    }
    Ok(OpenAiClient::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    )
    .with_system(prompts::SYSTEM_PROMPT)
    .with_timeout(config.summarize.request_timeout()))
}

fn spawn_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal, draining");
        let _ = tx.send(true);
    });
    rx
}

//! Claimwise CLI: build retrieval indexes, adjudicate claims, inspect retrieval.

mod config;
mod display;
mod indexes;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use claimwise_ai::{ChatCompletionsClient, EngineConfig, RecommendationEngine};
use claimwise_core::meta;
use claimwise_pipeline::{ClaimOutcome, ClaimPipeline, PipelineConfig};
use claimwise_store::MetadataFilter;
use tokio_util::sync::CancellationToken;

use config::{Cli, Command, CorpusArgs, LlmArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    let _guard = logging::init(&cli.log_level, log_file)?;
    tracing::info!("claimwise v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Index { rebuild, corpus } => cmd_index(&cli, corpus, *rebuild).await,
        Command::Adjudicate {
            claims,
            output_dir,
            concurrency,
            quiet,
            llm,
            corpus,
        } => {
            cmd_adjudicate(
                &cli,
                claims,
                output_dir.as_deref(),
                *concurrency,
                *quiet,
                llm,
                corpus,
            )
            .await
        }
        Command::Retrieve {
            query,
            policy_number,
            top_k,
        } => cmd_retrieve(&cli, query, policy_number.as_deref(), *top_k).await,
    }
}

async fn cmd_index(cli: &Cli, corpus: &CorpusArgs, rebuild: bool) -> anyhow::Result<()> {
    let start = Instant::now();
    eprintln!(
        "Indexing {} into {}",
        cli.data_dir.display(),
        cli.index_path.display()
    );
    indexes::open(cli, corpus, rebuild).await?;
    eprintln!("  Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

async fn cmd_adjudicate(
    cli: &Cli,
    claims: &[PathBuf],
    output_dir: Option<&Path>,
    concurrency: usize,
    quiet: bool,
    llm: &LlmArgs,
    corpus: &CorpusArgs,
) -> anyhow::Result<()> {
    let client = language_model(llm)?;
    let engine = RecommendationEngine::new(
        Arc::new(client),
        EngineConfig {
            schema_retries: llm.schema_retries,
        },
    );
    let indexes = indexes::open(cli, corpus, false).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let pipeline = ClaimPipeline::new(
        engine,
        indexes.policy,
        indexes.declarations,
        PipelineConfig::default(),
    );
    let pipeline = if quiet {
        drop(tx);
        pipeline
    } else {
        pipeline.with_progress(tx)
    };
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{event}");
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("  Interrupted; stopping after the current stage");
                cancel.cancel();
            }
        })
    };

    let results = pipeline.run_batch(claims, concurrency, &cancel).await;
    drop(pipeline);
    interrupt.abort();
    let _ = printer.await;

    let mut failed = 0usize;
    for (path, result) in &results {
        match result {
            Ok(outcome) => {
                display::print_decision_card(outcome);
                if let Some(dir) = output_dir {
                    let written = write_decision(dir, outcome)?;
                    eprintln!("  Wrote {}", written.display());
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {}: {e}", path.display());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} claims failed", results.len());
    }
    Ok(())
}

async fn cmd_retrieve(
    cli: &Cli,
    query: &str,
    policy_number: Option<&str>,
    top_k: usize,
) -> anyhow::Result<()> {
    let indexes = indexes::open_persisted(cli).await?;

    let (index, hits) = match policy_number {
        Some(p) => {
            let filter = MetadataFilter::exact(meta::POLICY_NUMBER, p);
            let hits = indexes
                .declarations
                .retrieve_filtered(&filter, query, top_k)
                .await?;
            (indexes.declarations.name().to_string(), hits)
        }
        None => {
            let hits = indexes.policy.retrieve(query, top_k).await?;
            (indexes.policy.name().to_string(), hits)
        }
    };
    display::print_hits(&index, &hits);
    Ok(())
}

fn language_model(llm: &LlmArgs) -> anyhow::Result<ChatCompletionsClient> {
    let client = ChatCompletionsClient::new(
        &llm.base_url,
        llm.api_key.as_deref().unwrap_or_default(),
        &llm.model,
    )
    .context("configuring language model (is TOGETHER_API_KEY set?)")?;
    Ok(client
        .with_temperature(llm.temperature)
        .with_max_tokens(llm.max_tokens))
}

/// Write the decision as `<dir>/<claim_number>.decision.json`.
fn write_decision(dir: &Path, outcome: &ClaimOutcome) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!(
        "{}.decision.json",
        file_safe(&outcome.decision.claim_number)
    ));
    let json = serde_json::to_string_pretty(&outcome.decision)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

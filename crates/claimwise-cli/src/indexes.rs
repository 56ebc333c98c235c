//! Opening the two retrieval indexes, building them from the corpus when absent.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use claimwise_ai::{Embed, HashingEmbedder};
use claimwise_pipeline::{DECLARATIONS_INDEX, POLICY_INDEX};
use claimwise_store::{
    ChunkConfig, FlatIndex, LoadOptions, Retriever, load_declarations, load_policy_corpus,
};

use crate::config::{Backend, Cli, CorpusArgs};

pub struct Indexes {
    pub policy: Arc<dyn Retriever>,
    pub declarations: Arc<dyn Retriever>,
}

pub fn embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embed>> {
    match &cli.embed_model_dir {
        None => Ok(Arc::new(HashingEmbedder::default())),
        #[cfg(feature = "onnx")]
        Some(dir) => Ok(Arc::new(
            claimwise_ai::OnnxEmbedder::load(dir).context("loading embedding model")?,
        )),
        #[cfg(not(feature = "onnx"))]
        Some(dir) => anyhow::bail!(
            "--embed-model-dir {} needs a build with the `onnx` feature",
            dir.display()
        ),
    }
}

/// Load both indexes, building and persisting any that are missing.
/// With `rebuild`, persisted copies are discarded first.
pub async fn open(cli: &Cli, corpus: &CorpusArgs, rebuild: bool) -> anyhow::Result<Indexes> {
    let embedder = embedder(cli)?;
    let options = LoadOptions {
        extensions: corpus.extensions.clone(),
    };
    let chunking = ChunkConfig::default();
    let base = cli.index_path.as_path();
    let data = cli.data_dir.as_path();

    if rebuild {
        for name in [POLICY_INDEX, DECLARATIONS_INDEX] {
            let dir = base.join(name);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .with_context(|| format!("removing {}", dir.display()))?;
            }
        }
    }

    let start = Instant::now();
    let policy_docs = || load_policy_corpus(data, &options, &corpus.policy_files);
    let declarations_docs = || load_declarations(data, data, &options);

    let indexes = match cli.backend {
        Backend::Flat => {
            let policy = FlatIndex::load_or_create(
                base,
                POLICY_INDEX,
                Arc::clone(&embedder),
                &chunking,
                policy_docs,
            )
            .context("opening policy index")?;
            let declarations = FlatIndex::load_or_create(
                base,
                DECLARATIONS_INDEX,
                embedder,
                &chunking,
                declarations_docs,
            )
            .context("opening declarations index")?;
            eprintln!(
                "  {POLICY_INDEX}: {} nodes, {DECLARATIONS_INDEX}: {} nodes",
                policy.len(),
                declarations.len()
            );
            Indexes {
                policy: Arc::new(policy),
                declarations: Arc::new(declarations),
            }
        }
        #[cfg(feature = "lancedb")]
        Backend::Lance => {
            use claimwise_store::LanceIndex;
            let policy = LanceIndex::open_or_create(
                base,
                POLICY_INDEX,
                Arc::clone(&embedder),
                &chunking,
                policy_docs,
            )
            .await
            .context("opening policy index")?;
            let declarations = LanceIndex::open_or_create(
                base,
                DECLARATIONS_INDEX,
                embedder,
                &chunking,
                declarations_docs,
            )
            .await
            .context("opening declarations index")?;
            eprintln!(
                "  {POLICY_INDEX}: {} rows, {DECLARATIONS_INDEX}: {} rows",
                policy.count().await?,
                declarations.count().await?
            );
            Indexes {
                policy: Arc::new(policy),
                declarations: Arc::new(declarations),
            }
        }
        #[cfg(not(feature = "lancedb"))]
        Backend::Lance => anyhow::bail!("--backend lance needs a build with the `lancedb` feature"),
    };

    tracing::info!(
        base = %base.display(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "indexes ready"
    );
    Ok(indexes)
}

/// Open both indexes read-only. Fails when either has not been built;
/// nothing is written under the index path.
pub async fn open_persisted(cli: &Cli) -> anyhow::Result<Indexes> {
    let embedder = embedder(cli)?;
    let base = cli.index_path.as_path();
    let missing = |name: &str| {
        anyhow::anyhow!(
            "no index {name} under {}; run `claimwise index` first",
            base.display()
        )
    };

    match cli.backend {
        Backend::Flat => {
            let policy = FlatIndex::load(base, POLICY_INDEX, Arc::clone(&embedder))
                .context("opening policy index")?
                .ok_or_else(|| missing(POLICY_INDEX))?;
            let declarations = FlatIndex::load(base, DECLARATIONS_INDEX, embedder)
                .context("opening declarations index")?
                .ok_or_else(|| missing(DECLARATIONS_INDEX))?;
            Ok(Indexes {
                policy: Arc::new(policy),
                declarations: Arc::new(declarations),
            })
        }
        #[cfg(feature = "lancedb")]
        Backend::Lance => {
            use claimwise_store::LanceIndex;
            let policy = LanceIndex::open(base, POLICY_INDEX, Arc::clone(&embedder))
                .await
                .context("opening policy index")?
                .ok_or_else(|| missing(POLICY_INDEX))?;
            let declarations = LanceIndex::open(base, DECLARATIONS_INDEX, embedder)
                .await
                .context("opening declarations index")?
                .ok_or_else(|| missing(DECLARATIONS_INDEX))?;
            Ok(Indexes {
                policy: Arc::new(policy),
                declarations: Arc::new(declarations),
            })
        }
        #[cfg(not(feature = "lancedb"))]
        Backend::Lance => anyhow::bail!("--backend lance needs a build with the `lancedb` feature"),
    }
}

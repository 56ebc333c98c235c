//! In-process vector index persisted as Arrow IPC.
//!
//! On disk an index is a directory `<base>/<name>/` holding `nodes.arrow`
//! (one row per node, see [`claimwise_core::schema::index`]) and a
//! `manifest.json` recording the embedding model it was built with. Writes go
//! to a staging directory that is renamed into place, so a crashed build
//! never leaves a half-written index behind.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray, Float32Array, StringArray};
use arrow::datatypes::{DataType, Field};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claimwise_ai::{Embed, cosine_sim};
use claimwise_core::schema::index::{EMBEDDING, node_schema};
use claimwise_core::{Metadata, PolicyDocument, ScoredNode, TextNode, meta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ChunkConfig, MetadataFilter, Retriever, StoreError, split_document};

const NODES_FILE: &str = "nodes.arrow";
const MANIFEST_FILE: &str = "manifest.json";
const EMBED_BATCH_SIZE: usize = 64;

/// Backend tags recorded in the manifest.
pub(crate) const FLAT_BACKEND: &str = "flat";
#[cfg(feature = "lancedb")]
pub(crate) const LANCE_BACKEND: &str = "lancedb";

/// Sidecar describing how an index directory was built.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub name: String,
    pub backend: String,
    pub embedding_model: String,
    pub dim: usize,
    pub nodes: usize,
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new(name: &str, backend: &str, embedder: &dyn Embed, nodes: usize) -> Self {
        Self {
            name: name.to_string(),
            backend: backend.to_string(),
            embedding_model: embedder.model_name().to_string(),
            dim: embedder.dim(),
            nodes,
            created_at: Utc::now(),
        }
    }

    pub fn read(dir: &Path) -> Result<Option<Self>, StoreError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&std::fs::read_to_string(&path)?)?))
    }

    pub fn write(&self, dir: &Path) -> Result<(), StoreError> {
        std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Fails unless the index was written by `backend` and `embedder`
    /// produces the same vectors it holds.
    pub fn check(&self, backend: &str, embedder: &dyn Embed) -> Result<(), StoreError> {
        if self.backend != backend {
            return Err(StoreError::InvalidIndex {
                name: self.name.clone(),
                reason: format!(
                    "written by the {} backend, opened with {backend}",
                    self.backend
                ),
            });
        }
        if self.embedding_model != embedder.model_name() || self.dim != embedder.dim() {
            return Err(StoreError::EmbeddingMismatch {
                name: self.name.clone(),
                persisted: format!("{} ({} dims)", self.embedding_model, self.dim),
                current: format!("{} ({} dims)", embedder.model_name(), embedder.dim()),
            });
        }
        Ok(())
    }
}

/// Brute-force cosine-similarity index held fully in memory.
pub struct FlatIndex {
    name: String,
    nodes: Vec<TextNode>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn Embed>,
}

impl FlatIndex {
    /// Chunk and embed `documents` into a new, unpersisted index.
    pub fn build(
        name: &str,
        documents: &[PolicyDocument],
        embedder: Arc<dyn Embed>,
        chunking: &ChunkConfig,
    ) -> Result<Self, StoreError> {
        let nodes: Vec<TextNode> = documents
            .iter()
            .flat_map(|doc| split_document(doc, chunking))
            .collect();
        let vectors = embed_nodes(&nodes, embedder.as_ref())?;

        info!(
            index = name,
            documents = documents.len(),
            nodes = nodes.len(),
            model = embedder.model_name(),
            "built index"
        );
        Ok(Self {
            name: name.to_string(),
            nodes,
            vectors,
            embedder,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TextNode] {
        &self.nodes
    }

    /// Write the index to `<base>/<name>/`, replacing any previous copy.
    pub fn persist(&self, base: &Path) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(base)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(base)?;

        let batch = encode_nodes(&self.nodes, &self.vectors, self.embedder.dim())?;
        let file = File::create(staging.path().join(NODES_FILE))?;
        let mut writer = FileWriter::try_new(file, batch.schema().as_ref())?;
        writer.write(&batch)?;
        writer.finish()?;

        Manifest::new(&self.name, FLAT_BACKEND, self.embedder.as_ref(), self.nodes.len())
            .write(staging.path())?;

        let target = base.join(&self.name);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(staging.path(), &target)?;

        info!(
            index = %self.name,
            path = %target.display(),
            nodes = self.nodes.len(),
            "persisted index"
        );
        Ok(target)
    }

    /// Load a persisted index. `Ok(None)` when nothing has been persisted
    /// under `<base>/<name>/`.
    pub fn load(
        base: &Path,
        name: &str,
        embedder: Arc<dyn Embed>,
    ) -> Result<Option<Self>, StoreError> {
        let dir = base.join(name);
        let Some(manifest) = Manifest::read(&dir)? else {
            debug!(index = name, path = %dir.display(), "no persisted index");
            return Ok(None);
        };
        manifest.check(FLAT_BACKEND, embedder.as_ref())?;

        let reader = FileReader::try_new(File::open(dir.join(NODES_FILE))?, None)?;
        let mut nodes = Vec::with_capacity(manifest.nodes);
        let mut vectors = Vec::with_capacity(manifest.nodes);
        for batch in reader {
            let batch = batch?;
            nodes.extend(decode_nodes(&batch, name)?);
            vectors.extend(decode_vectors(&batch, name, manifest.dim)?);
        }
        if nodes.len() != manifest.nodes {
            return Err(StoreError::InvalidIndex {
                name: name.to_string(),
                reason: format!(
                    "manifest lists {} nodes, file holds {}",
                    manifest.nodes,
                    nodes.len()
                ),
            });
        }

        info!(index = name, nodes = nodes.len(), model = %manifest.embedding_model, "loaded index");
        Ok(Some(Self {
            name: name.to_string(),
            nodes,
            vectors,
            embedder,
        }))
    }

    /// Load `<base>/<name>/` if present, otherwise build from `documents()`
    /// and persist. The document source is only consulted on a build.
    pub fn load_or_create<F>(
        base: &Path,
        name: &str,
        embedder: Arc<dyn Embed>,
        chunking: &ChunkConfig,
        documents: F,
    ) -> Result<Self, StoreError>
    where
        F: FnOnce() -> Result<Vec<PolicyDocument>, StoreError>,
    {
        if let Some(index) = Self::load(base, name, Arc::clone(&embedder))? {
            return Ok(index);
        }
        info!(index = name, "building index");
        let docs = documents()?;
        let index = Self::build(name, &docs, embedder, chunking)?;
        index.persist(base)?;
        Ok(index)
    }

    /// Top `top_k` nodes by cosine similarity; ties keep node order.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, StoreError> {
        self.rank(query, top_k, |_| true)
    }

    pub fn search_filtered(
        &self,
        filter: &MetadataFilter,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, StoreError> {
        self.rank(query, top_k, |node| filter.matches(&node.metadata))
    }

    fn rank(
        &self,
        query: &str,
        top_k: usize,
        keep: impl Fn(&TextNode) -> bool,
    ) -> Result<Vec<ScoredNode>, StoreError> {
        let candidates: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| keep(&self.nodes[i]))
            .collect();
        if top_k == 0 || candidates.is_empty() {
            return Ok(Vec::new());
        }

        let q = self.embedder.embed(query).map_err(embedding_error)?;
        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|i| (i, cosine_sim(&q, &self.vectors[i])))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        debug!(index = %self.name, hits = scored.len(), "search complete");
        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredNode {
                node: self.nodes[i].clone(),
                score,
            })
            .collect())
    }
}

#[async_trait]
impl Retriever for FlatIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, StoreError> {
        self.search(query, top_k)
    }

    async fn retrieve_filtered(
        &self,
        filter: &MetadataFilter,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, StoreError> {
        self.search_filtered(filter, query, top_k)
    }
}

// ── Arrow encoding, shared with the LanceDB backend ──

pub(crate) fn embedding_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Embedding(e.to_string())
}

pub(crate) fn embed_nodes(
    nodes: &[TextNode],
    embedder: &dyn Embed,
) -> Result<Vec<Vec<f32>>, StoreError> {
    let mut vectors = Vec::with_capacity(nodes.len());
    for chunk in nodes.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<&str> = chunk.iter().map(|n| n.text.as_str()).collect();
        let batch = embedder.embed_batch(&texts).map_err(embedding_error)?;
        if batch.len() != texts.len() || batch.iter().any(|v| v.len() != embedder.dim()) {
            return Err(StoreError::Embedding(format!(
                "{} returned malformed vectors for {} inputs",
                embedder.model_name(),
                texts.len()
            )));
        }
        vectors.extend(batch);
    }
    Ok(vectors)
}

pub(crate) fn encode_nodes(
    nodes: &[TextNode],
    vectors: &[Vec<f32>],
    dim: usize,
) -> Result<RecordBatch, StoreError> {
    let dim_i32 = i32::try_from(dim)
        .map_err(|_| StoreError::Other(format!("embedding dimension {dim} too large")))?;
    let schema = Arc::new(node_schema(dim_i32));

    let metadata_json = nodes
        .iter()
        .map(|n| serde_json::to_string(&n.metadata))
        .collect::<Result<Vec<_>, _>>()?;
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let embeddings = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dim_i32,
        Arc::new(Float32Array::from(flat)),
        None,
    )?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(nodes.iter().map(|n| &n.id))),
        Arc::new(StringArray::from_iter_values(nodes.iter().map(|n| &n.doc_id))),
        Arc::new(StringArray::from_iter(
            nodes.iter().map(|n| n.metadata.get(meta::FILE_NAME)),
        )),
        Arc::new(StringArray::from_iter(
            nodes.iter().map(|n| n.metadata.get(meta::POLICY_NUMBER)),
        )),
        Arc::new(StringArray::from_iter_values(metadata_json)),
        Arc::new(StringArray::from_iter_values(nodes.iter().map(|n| &n.text))),
        Arc::new(embeddings),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    column: &str,
    index: &str,
) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(column)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::InvalidIndex {
            name: index.to_string(),
            reason: format!("missing or mistyped column `{column}`"),
        })
}

pub(crate) fn decode_nodes(batch: &RecordBatch, index: &str) -> Result<Vec<TextNode>, StoreError> {
    let ids = string_column(batch, "id", index)?;
    let doc_ids = string_column(batch, "doc_id", index)?;
    let metadata = string_column(batch, "metadata", index)?;
    let texts = string_column(batch, "text", index)?;

    (0..batch.num_rows())
        .map(|row| -> Result<TextNode, StoreError> {
            Ok(TextNode {
                id: ids.value(row).to_string(),
                doc_id: doc_ids.value(row).to_string(),
                text: texts.value(row).to_string(),
                metadata: serde_json::from_str::<Metadata>(metadata.value(row))?,
            })
        })
        .collect()
}

fn decode_vectors(
    batch: &RecordBatch,
    index: &str,
    dim: usize,
) -> Result<Vec<Vec<f32>>, StoreError> {
    let invalid = |reason: String| StoreError::InvalidIndex {
        name: index.to_string(),
        reason,
    };
    let list = batch
        .column_by_name(EMBEDDING)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| invalid(format!("missing or mistyped column `{EMBEDDING}`")))?;
    if list.value_length() as usize != dim {
        return Err(invalid(format!(
            "vectors have {} dims, manifest says {dim}",
            list.value_length()
        )));
    }

    (0..list.len())
        .map(|row| -> Result<Vec<f32>, StoreError> {
            let values = list.value(row);
            let values = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| invalid("embedding values are not float32".into()))?;
            Ok(values.values().to_vec())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimwise_ai::HashingEmbedder;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn embedder() -> Arc<dyn Embed> {
        Arc::new(HashingEmbedder::default())
    }

    fn doc(id: &str, content: &str, policy_number: Option<&str>) -> PolicyDocument {
        let mut metadata = Metadata::new();
        metadata.insert(meta::FILE_NAME.into(), id.into());
        if let Some(p) = policy_number {
            metadata.insert(meta::POLICY_NUMBER.into(), p.into());
        }
        PolicyDocument {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    fn policy_docs() -> Vec<PolicyDocument> {
        vec![
            doc(
                "collision.md",
                "COLLISION COVERAGE. We will pay for direct and accidental loss to your covered \
                 auto caused by collision with another vehicle or object.",
                None,
            ),
            doc(
                "towing.md",
                "TOWING AND LABOR. We will reimburse towing and labor costs up to $75 per disablement.",
                None,
            ),
            doc(
                "rental.md",
                "RENTAL REIMBURSEMENT. We will pay rental charges while your auto is being repaired.",
                None,
            ),
        ]
    }

    fn declarations_docs() -> Vec<PolicyDocument> {
        vec![
            doc(
                "john-declarations.md",
                "Declarations. Collision deductible $250.",
                Some("ABC123"),
            ),
            doc(
                "alice-declarations.md",
                "Declarations. Collision deductible $500. Collision coverage limit $30,000.",
                Some("ABC124"),
            ),
            doc(
                "unsigned-declarations.md",
                "Declarations. Collision deductible collision collision.",
                None,
            ),
        ]
    }

    #[test]
    fn search_ranks_relevant_clause_first() {
        let index =
            FlatIndex::build("policy", &policy_docs(), embedder(), &ChunkConfig::default())
                .unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.search("rear-end collision with another vehicle", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node.doc_id, "collision.md");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn top_k_bounds_results() {
        let index =
            FlatIndex::build("policy", &policy_docs(), embedder(), &ChunkConfig::default())
                .unwrap();
        assert_eq!(index.search("collision", 10).unwrap().len(), 3);
        assert!(index.search("collision", 0).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_node_order() {
        let docs = vec![
            doc("a.md", "identical clause text", None),
            doc("b.md", "identical clause text", None),
        ];
        let index = FlatIndex::build("ties", &docs, embedder(), &ChunkConfig::default()).unwrap();
        let hits = index.search("identical clause", 2).unwrap();
        assert_eq!(hits[0].node.doc_id, "a.md");
        assert_eq!(hits[1].node.doc_id, "b.md");
    }

    #[test]
    fn filtered_search_matches_exact_policy_number_only() {
        let index = FlatIndex::build(
            "declarations",
            &declarations_docs(),
            embedder(),
            &ChunkConfig::default(),
        )
        .unwrap();
        let filter = MetadataFilter::exact(meta::POLICY_NUMBER, "ABC123");
        let hits = index
            .search_filtered(&filter, "collision coverage limit", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.doc_id, "john-declarations.md");
        assert_eq!(hits[0].node.policy_number(), Some("ABC123"));
    }

    #[test]
    fn filter_on_absent_key_is_empty() {
        let index =
            FlatIndex::build("policy", &policy_docs(), embedder(), &ChunkConfig::default())
                .unwrap();
        let filter = MetadataFilter::exact(meta::POLICY_NUMBER, "ABC123");
        assert!(index.search_filtered(&filter, "collision", 3).unwrap().is_empty());
    }

    #[test]
    fn persist_then_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let built = FlatIndex::build(
            "declarations",
            &declarations_docs(),
            embedder(),
            &ChunkConfig::default(),
        )
        .unwrap();
        let path = built.persist(tmp.path()).unwrap();
        assert!(path.join(NODES_FILE).is_file());
        assert!(path.join(MANIFEST_FILE).is_file());

        let loaded = FlatIndex::load(tmp.path(), "declarations", embedder())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.nodes(), built.nodes());
        assert_eq!(loaded.nodes()[2].policy_number(), None);

        let before = built.search("collision deductible", 3).unwrap();
        let after = loaded.search("collision deductible", 3).unwrap();
        assert_eq!(before, after);

        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "staging directory left behind");
    }

    #[test]
    fn persist_replaces_previous_copy() {
        let tmp = TempDir::new().unwrap();
        FlatIndex::build("policy", &policy_docs(), embedder(), &ChunkConfig::default())
            .unwrap()
            .persist(tmp.path())
            .unwrap();
        FlatIndex::build("policy", &policy_docs()[..1], embedder(), &ChunkConfig::default())
            .unwrap()
            .persist(tmp.path())
            .unwrap();
        let loaded = FlatIndex::load(tmp.path(), "policy", embedder())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn load_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(FlatIndex::load(tmp.path(), "policy", embedder()).unwrap().is_none());
    }

    #[test]
    fn load_with_other_embedder_is_mismatch() {
        let tmp = TempDir::new().unwrap();
        FlatIndex::build("policy", &policy_docs(), embedder(), &ChunkConfig::default())
            .unwrap()
            .persist(tmp.path())
            .unwrap();
        let other: Arc<dyn Embed> = Arc::new(HashingEmbedder::new(64));
        let err = FlatIndex::load(tmp.path(), "policy", other).err().unwrap();
        assert!(matches!(err, StoreError::EmbeddingMismatch { .. }));
    }

    #[test]
    fn other_backend_directory_is_rejected_not_rebuilt() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("policy");
        std::fs::create_dir_all(&dir).unwrap();
        Manifest::new("policy", "lancedb", embedder().as_ref(), 7)
            .write(&dir)
            .unwrap();

        let err = FlatIndex::load_or_create(
            tmp.path(),
            "policy",
            embedder(),
            &ChunkConfig::default(),
            || -> Result<Vec<PolicyDocument>, StoreError> {
                panic!("an index written by another backend must not be rebuilt")
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::InvalidIndex { .. }));

        let kept = Manifest::read(&dir).unwrap().unwrap();
        assert_eq!(kept.backend, "lancedb");
        assert_eq!(kept.nodes, 7);
    }

    #[test]
    fn load_or_create_builds_once() {
        let tmp = TempDir::new().unwrap();
        let calls = Cell::new(0);
        let source = || -> Result<Vec<PolicyDocument>, StoreError> {
            calls.set(calls.get() + 1);
            Ok(policy_docs())
        };

        let first = FlatIndex::load_or_create(
            tmp.path(),
            "policy",
            embedder(),
            &ChunkConfig::default(),
            source,
        )
        .unwrap();
        let second = FlatIndex::load_or_create(
            tmp.path(),
            "policy",
            embedder(),
            &ChunkConfig::default(),
            || -> Result<Vec<PolicyDocument>, StoreError> {
                panic!("persisted index should have been loaded")
            },
        )
        .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(first.nodes(), second.nodes());
    }

    #[test]
    fn empty_corpus_persists_and_loads() {
        let tmp = TempDir::new().unwrap();
        FlatIndex::build("empty", &[], embedder(), &ChunkConfig::default())
            .unwrap()
            .persist(tmp.path())
            .unwrap();
        let loaded = FlatIndex::load(tmp.path(), "empty", embedder())
            .unwrap()
            .unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.search("anything", 3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn retriever_trait_delegates() {
        let index: Arc<dyn Retriever> = Arc::new(
            FlatIndex::build(
                "declarations",
                &declarations_docs(),
                embedder(),
                &ChunkConfig::default(),
            )
            .unwrap(),
        );
        assert_eq!(index.name(), "declarations");
        assert_eq!(index.retrieve("deductible", 2).await.unwrap().len(), 2);
        let filter = MetadataFilter::exact(meta::POLICY_NUMBER, "ABC124");
        let hits = index.retrieve_filtered(&filter, "deductible", 1).await.unwrap();
        assert_eq!(hits[0].node.doc_id, "alice-declarations.md");
    }
}

//! LanceDB retrieval backend.
//!
//! Each index is a LanceDB database at `<base>/<name>/` with a single `nodes`
//! table in the node schema, plus the same `manifest.json` sidecar the flat
//! index writes. Filters become SQL predicates on the lifted metadata columns.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float32Array, RecordBatchIterator};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use claimwise_ai::Embed;
use claimwise_core::schema::index::FILTERABLE;
use claimwise_core::{PolicyDocument, ScoredNode, TextNode};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, info};

use crate::index::{
    LANCE_BACKEND, Manifest, decode_nodes, embed_nodes, embedding_error, encode_nodes,
};
use crate::{ChunkConfig, MetadataFilter, Retriever, StoreError, split_document};

const NODES_TABLE: &str = "nodes";
const DISTANCE_COLUMN: &str = "_distance";

pub struct LanceIndex {
    name: String,
    table: lancedb::Table,
    embedder: Arc<dyn Embed>,
}

impl LanceIndex {
    /// Chunk, embed and write `documents` to `<base>/<name>/`, replacing any
    /// existing table.
    pub async fn create(
        base: &Path,
        name: &str,
        documents: &[PolicyDocument],
        embedder: Arc<dyn Embed>,
        chunking: &ChunkConfig,
    ) -> Result<Self, StoreError> {
        let dir = base.join(name);
        std::fs::create_dir_all(&dir)?;
        let db = connect(&dir).await?;

        let nodes: Vec<TextNode> = documents
            .iter()
            .flat_map(|doc| split_document(doc, chunking))
            .collect();
        let vectors = embed_nodes(&nodes, embedder.as_ref())?;
        let batch = encode_nodes(&nodes, &vectors, embedder.dim())?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let existing = db.table_names().execute().await?;
        if existing.iter().any(|t| t == NODES_TABLE) {
            db.drop_table(NODES_TABLE, &[]).await?;
        }
        let table = db
            .create_table(NODES_TABLE, Box::new(reader))
            .execute()
            .await?;
        Manifest::new(name, LANCE_BACKEND, embedder.as_ref(), nodes.len()).write(&dir)?;

        info!(
            index = name,
            rows = nodes.len(),
            path = %dir.display(),
            "created LanceDB index"
        );
        Ok(Self {
            name: name.to_string(),
            table,
            embedder,
        })
    }

    /// Open `<base>/<name>/`. `Ok(None)` when no index has been written there;
    /// an index written by another backend is an error, never rebuilt over.
    pub async fn open(
        base: &Path,
        name: &str,
        embedder: Arc<dyn Embed>,
    ) -> Result<Option<Self>, StoreError> {
        let dir = base.join(name);
        let Some(manifest) = Manifest::read(&dir)? else {
            debug!(index = name, path = %dir.display(), "no LanceDB index");
            return Ok(None);
        };
        manifest.check(LANCE_BACKEND, embedder.as_ref())?;

        let db = connect(&dir).await?;
        if !db
            .table_names()
            .execute()
            .await?
            .iter()
            .any(|t| t == NODES_TABLE)
        {
            return Err(StoreError::InvalidIndex {
                name: name.to_string(),
                reason: format!("manifest present but no `{NODES_TABLE}` table"),
            });
        }
        let table = db.open_table(NODES_TABLE).execute().await?;

        info!(index = name, rows = manifest.nodes, "opened LanceDB index");
        Ok(Some(Self {
            name: name.to_string(),
            table,
            embedder,
        }))
    }

    pub async fn open_or_create<F>(
        base: &Path,
        name: &str,
        embedder: Arc<dyn Embed>,
        chunking: &ChunkConfig,
        documents: F,
    ) -> Result<Self, StoreError>
    where
        F: FnOnce() -> Result<Vec<PolicyDocument>, StoreError>,
    {
        if let Some(index) = Self::open(base, name, Arc::clone(&embedder)).await? {
            return Ok(index);
        }
        let docs = documents()?;
        Self::create(base, name, &docs, embedder, chunking).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.table.count_rows(None).await?)
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        predicate: Option<String>,
    ) -> Result<Vec<ScoredNode>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).map_err(embedding_error)?;

        let mut search = self
            .table
            .vector_search(vector.as_slice())?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = predicate {
            search = search.only_if(predicate);
        }
        let batches: Vec<RecordBatch> = search.execute().await?.try_collect().await?;

        let mut hits = Vec::new();
        for batch in &batches {
            let nodes = decode_nodes(batch, &self.name)?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for (row, node) in nodes.into_iter().enumerate() {
                let distance = distances.map(|d| d.value(row)).unwrap_or(1.0);
                hits.push(ScoredNode {
                    node,
                    score: 1.0 - distance,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[async_trait]
impl Retriever for LanceIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, StoreError> {
        self.search(query, top_k, None).await
    }

    async fn retrieve_filtered(
        &self,
        filter: &MetadataFilter,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, StoreError> {
        self.search(query, top_k, Some(sql_predicate(filter)?)).await
    }
}

async fn connect(dir: &Path) -> Result<lancedb::Connection, StoreError> {
    let uri = dir
        .to_str()
        .ok_or_else(|| StoreError::Other("non-UTF8 index path".into()))?;
    Ok(lancedb::connect(uri).execute().await?)
}

/// `policy_number = 'ABC''123'`; only lifted columns can be filtered.
fn sql_predicate(filter: &MetadataFilter) -> Result<String, StoreError> {
    if !FILTERABLE.contains(&filter.key.as_str()) {
        return Err(StoreError::UnsupportedFilter(filter.key.clone()));
    }
    Ok(format!(
        "{} = '{}'",
        filter.key,
        filter.value.replace('\'', "''")
    ))
}

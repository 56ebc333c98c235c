//! ONNX Runtime embedding pipeline for sentence-transformers models.
//!
//! Mean-pooled embeddings from a model directory containing `model.onnx` and
//! `tokenizer.json` (e.g. all-MiniLM-L6-v2, 384 dimensions).

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::info;

use crate::embed::{Embed, normalize};

/// Sentence embedding generator using ONNX Runtime.
///
/// The session is behind a mutex so one embedder can serve concurrent
/// retrievals from several pipeline runs.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dim: usize,
    name: String,
}

impl OnnxEmbedder {
    /// Load an embedding model from a directory containing `model.onnx` and `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: 256,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dim,
            name,
        })
    }
}

impl Embed for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let inputs = PaddedBatch::from_encodings(&encodings);
        let shape = [inputs.rows as i64, inputs.width as i64];

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding session poisoned"))?;
        let ids = Tensor::from_array((shape, inputs.ids.into_boxed_slice()))?;
        let mask = Tensor::from_array((shape, inputs.mask.clone().into_boxed_slice()))?;
        let type_ids = Tensor::from_array((shape, inputs.type_ids.into_boxed_slice()))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask,
            "token_type_ids" => type_ids,
        ])?;

        let (out_shape, hidden) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = out_shape;
        let &[rows, tokens, dim] = dims else {
            anyhow::bail!("expected a rank-3 token embedding tensor, got {dims:?}");
        };
        anyhow::ensure!(
            rows as usize == inputs.rows && dim as usize == self.dim,
            "token embeddings shaped {dims:?}, expected [{}, _, {}]",
            inputs.rows,
            self.dim
        );

        Ok(mean_pool(
            hidden,
            &inputs.mask,
            inputs.width,
            tokens as usize,
            self.dim,
        ))
    }
}

/// Token ids, attention mask and segment ids for one batch, right-padded
/// with zeros to the longest encoding.
struct PaddedBatch {
    rows: usize,
    width: usize,
    ids: Vec<i64>,
    mask: Vec<i64>,
    type_ids: Vec<i64>,
}

impl PaddedBatch {
    fn from_encodings(encodings: &[tokenizers::Encoding]) -> Self {
        let rows: Vec<(&[u32], &[u32], &[u32])> = encodings
            .iter()
            .map(|e| (e.get_ids(), e.get_attention_mask(), e.get_type_ids()))
            .collect();
        Self::from_rows(&rows)
    }

    fn from_rows(rows: &[(&[u32], &[u32], &[u32])]) -> Self {
        let width = rows.iter().map(|(ids, _, _)| ids.len()).max().unwrap_or(0);
        let padded = |values: &[u32]| {
            values
                .iter()
                .map(|&v| i64::from(v))
                .chain(std::iter::repeat(0))
                .take(width)
                .collect::<Vec<i64>>()
        };
        Self {
            rows: rows.len(),
            width,
            ids: rows.iter().flat_map(|(ids, _, _)| padded(ids)).collect(),
            mask: rows.iter().flat_map(|(_, mask, _)| padded(mask)).collect(),
            type_ids: rows.iter().flat_map(|(_, types, _)| padded(types)).collect(),
        }
    }
}

/// Average each row's unmasked token vectors and L2-normalize the result.
///
/// `hidden` is `[rows, tokens, dim]`; `mask` is `[rows, width]` and may be
/// wider than `tokens` when the model truncates.
fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    width: usize,
    tokens: usize,
    dim: usize,
) -> Vec<Vec<f32>> {
    let rows = if width == 0 { 0 } else { mask.len() / width };
    (0..rows)
        .map(|row| {
            let mut sum = vec![0.0f32; dim];
            let mut weight = 0.0f32;
            let row_mask = &mask[row * width..(row + 1) * width];
            for (token, &m) in row_mask.iter().take(tokens).enumerate() {
                if m == 0 {
                    continue;
                }
                let start = (row * tokens + token) * dim;
                for (acc, &x) in sum.iter_mut().zip(&hidden[start..start + dim]) {
                    *acc += x * m as f32;
                }
                weight += m as f32;
            }
            if weight > 0.0 {
                sum.iter_mut().for_each(|x| *x /= weight);
            }
            normalize(&mut sum);
            sum
        })
        .collect()
}

/// Static size of the model output's trailing axis.
fn output_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    let ort::value::ValueType::Tensor { shape, .. } = output_type else {
        return None;
    };
    shape
        .last()
        .copied()
        .and_then(|d| usize::try_from(d).ok())
        .filter(|&d| d > 0)
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{CellValue, IndexedRow};

pub const DEFAULT_MODEL_ID: &str = "hash-bigram-384-v1";
pub const DEFAULT_MODEL_NAME: &str = "local-hash-bigram";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> EmbeddingModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    if resolved_id == DEFAULT_MODEL_ID {
        return EmbeddingModelConfig {
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIM,
            normalization: DEFAULT_NORMALIZATION.to_string(),
            backend: DEFAULT_BACKEND.to_string(),
        };
    }

    EmbeddingModelConfig {
        model_id: resolved_id.to_string(),
        model_name: resolved_id.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    config: EmbeddingModelConfig,
}

impl LocalHashEmbedder {
    pub fn new(config: EmbeddingModelConfig) -> Self {
        Self { config }
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new(resolve_model_config(DEFAULT_MODEL_ID))
    }
}

impl Embedder for LocalHashEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions.max(8)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        embed_text_local(text, self.config.dimensions)
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn row_payload_for_embedding(row: &IndexedRow) -> Option<String> {
    let parts = row
        .field_values
        .iter()
        .filter_map(|field| match &field.value {
            CellValue::Null => None,
            value => {
                let normalized = normalize_whitespace(&value.to_string());
                (!normalized.is_empty()).then_some(normalized)
            }
        })
        .collect::<Vec<String>>();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn squared_l2_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| {
            let delta = left_value - right_value;
            delta * delta
        })
        .sum::<f32>()
}

pub fn similarity_from_distance(distance: f32) -> f64 {
    let distance = f64::from(distance);
    if !distance.is_finite() {
        return f64::MIN_POSITIVE;
    }
    1.0 / (1.0 + distance.max(0.0))
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_len: usize) -> Option<Vec<f32>> {
    if expected_len == 0 || blob.len() != expected_len.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_len);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if out.len() == expected_len {
        Some(out)
    } else {
        None
    }
}

// Persisted vectors are compared against freshly embedded queries, so the
// token hash must not depend on the std hasher of the running build.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

//! Embedding capability seam.
//!
//! The engine never assumes a specific embedding vendor. It consumes an
//! [`Embedder`] with a pinned dimension; vectors are stored as little-endian
//! f32 BLOBs and compared by cosine similarity. [`HashingEmbedder`] is the
//! deterministic built-in used by tests and LLM-less deployments.

mod queue;

pub use queue::{spawn_embed_worker, EmbedRequest, EmbeddingQueue};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default pinned embedding dimension
pub const DEFAULT_DIMENSION: usize = 256;

/// Embedding error type
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Vector dimension differs from the pinned dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    /// Backend unavailable (model not loaded, remote down)
    #[error("embedding unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// EMBEDDING
// ============================================================================

/// A fixed-dimension embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Dimensions of the vector
    pub dimensions: usize,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Cosine similarity with another embedding; 0.0 on dimension mismatch
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.dimensions != other.dimensions {
            return 0.0;
        }
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Normalize to unit length in place
    pub fn normalize(&mut self) {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }

    /// Serialize to little-endian bytes for BLOB storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize from bytes; `None` if the length is not a multiple of 4
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

/// Cosine similarity between two raw vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ============================================================================
// EMBEDDER CAPABILITY
// ============================================================================

/// Capability trait the engine consumes for `embed(text) → vec[d]`
pub trait Embedder: Send + Sync {
    /// Pinned output dimension
    fn dimension(&self) -> usize;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Embed a batch; the default implementation loops
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

// ============================================================================
// HASHING EMBEDDER
// ============================================================================

/// Deterministic feature-hashing embedder.
///
/// Tokenizes on non-alphanumerics, lowercases, hashes each token into one of
/// `dimension` buckets with a sign bit, and L2-normalizes. Shared vocabulary
/// produces positive cosine similarity, which is all the retrieval and
/// clustering layers require of a stand-in.
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedder {
    /// Create with an explicit dimension
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn token_hash(token: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = Self::token_hash(&token.to_lowercase());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let mut embedding = Embedding::new(vector);
        embedding.normalize();
        Ok(embedding)
    }
}

// ============================================================================
// TESTS
// ============================================================================

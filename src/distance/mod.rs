//! Similarity functions for dense retrieval scoring
//!
//! Embeddings are compared by raw inner product; larger is more similar.

pub mod inner_product;

pub use inner_product::inner_product;

/// Similarity metric trait
pub trait SimilarityMetric: Send + Sync {
    /// Higher means more similar
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32;
}

/// Inner-product similarity (MIPS)
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerProduct;

impl SimilarityMetric for InnerProduct {
    #[inline]
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        inner_product(a, b)
    }
}

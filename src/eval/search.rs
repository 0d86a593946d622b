//! Exact inner-product search
//!
//! Brute force over a row-major `f32` matrix, either owned or borrowed from an
//! `EmbeddingMatrix`. Results are ordered by descending score; equal scores
//! keep the lower row first so repeated runs rank identically.

use crate::distance::{InnerProduct, SimilarityMetric};
use crate::{PrepError, Result};
use rayon::prelude::*;
use std::borrow::Cow;
use std::cmp::Ordering;

/// `(row, score)` of one neighbor
pub type Neighbor = (usize, f32);

#[derive(Debug, Clone)]
pub struct FlatIpIndex<'a> {
    dim: usize,
    data: Cow<'a, [f32]>,
}

impl<'a> FlatIpIndex<'a> {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(PrepError::InvalidArgument("dimension must be non-zero".into()));
        }
        Ok(Self {
            dim,
            data: Cow::Owned(Vec::new()),
        })
    }

    /// Search `rows` in place without copying
    pub fn view(dim: usize, rows: &'a [f32]) -> Result<Self> {
        if dim == 0 || rows.len() % dim != 0 {
            return Err(PrepError::InvalidData(format!(
                "{} values is not a whole number of {}-dim rows",
                rows.len(),
                dim
            )));
        }
        Ok(Self {
            dim,
            data: Cow::Borrowed(rows),
        })
    }

    /// Build from a flat row-major buffer
    pub fn from_rows(dim: usize, data: Vec<f32>) -> Result<Self> {
        FlatIpIndex::view(dim, &data)?;
        Ok(Self {
            dim,
            data: Cow::Owned(data),
        })
    }

    /// Append rows; `rows.len()` must be a multiple of the dimension
    pub fn add(&mut self, rows: &[f32]) -> Result<()> {
        if rows.len() % self.dim != 0 {
            return Err(PrepError::InvalidData(format!(
                "{} values is not a whole number of {}-dim rows",
                rows.len(),
                self.dim
            )));
        }
        self.data.to_mut().extend_from_slice(rows);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Top `k` rows for one query vector
    pub fn search_one(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(PrepError::InvalidData(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dim
            )));
        }
        let metric = InnerProduct;
        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(row, vector)| (row, metric.similarity(query, vector)))
            .collect();
        Ok(top_k(&mut scored, k))
    }

    /// Top `k` rows for every query in a row-major batch, parallel over queries
    pub fn search(&self, queries: &[f32], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        if queries.len() % self.dim != 0 {
            return Err(PrepError::InvalidData(format!(
                "{} query values is not a whole number of {}-dim rows",
                queries.len(),
                self.dim
            )));
        }
        queries
            .par_chunks_exact(self.dim)
            .map(|query| self.search_one(query, k))
            .collect()
    }
}

#[inline]
fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// Partial selection then sort of the survivors
fn top_k(scored: &mut Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    let k = k.min(scored.len());
    if k == 0 {
        return Vec::new();
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_unstable_by(rank_order);
    std::mem::take(scored)
}

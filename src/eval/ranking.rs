//! Ranked candidate lists and hole accounting
//!
//! A neighbor list may name the same passage several times (multi-row
//! passages). Only the first occurrence is ranked; ranks are dense from 1.

use super::qrels::Judged;
use crate::config::RANKED_LIST_CAPACITY;
use crate::types::Offset;
use ahash::AHashSet;
use std::ops::{Add, AddAssign};

/// Id occupying unfilled slots of the fixed-size list
pub const FILLER_ID: Offset = 0;

/// Deduplicated passage ids of one query, best first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedCandidateList {
    ids: Vec<Offset>,
}

impl RankedCandidateList {
    /// Keep the first occurrence of each id until `top_n` unique ids (at most
    /// `RANKED_LIST_CAPACITY`) are collected
    pub fn from_neighbors<I>(neighbors: I, top_n: usize) -> Self
    where
        I: IntoIterator<Item = Offset>,
    {
        let limit = top_n.min(RANKED_LIST_CAPACITY);
        let mut seen = AHashSet::new();
        let mut ids = Vec::new();
        for id in neighbors {
            if ids.len() == limit {
                break;
            }
            if seen.insert(id) {
                ids.push(id);
            }
        }
        Self { ids }
    }

    pub fn empty() -> Self {
        Self { ids: Vec::new() }
    }

    pub fn ids(&self) -> &[Offset] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(id, -rank)` pairs; rank 1 scores -1
    pub fn scored(&self) -> impl Iterator<Item = (Offset, f64)> + '_ {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, -((i + 1) as f64)))
    }

    /// Fixed-size slot view; unfilled slots hold `FILLER_ID`
    pub fn slots(&self) -> Vec<Offset> {
        let mut slots = vec![FILLER_ID; RANKED_LIST_CAPACITY];
        slots[..self.ids.len()].copy_from_slice(&self.ids);
        slots
    }

    /// Holes among the first `cutoff` ids (all ids with `None`)
    pub fn holes(&self, judged: Option<&Judged>, cutoff: Option<usize>) -> HoleCount {
        let considered = &self.ids[..cutoff.map_or(self.ids.len(), |k| k.min(self.ids.len()))];
        let unjudged = considered
            .iter()
            .filter(|&&id| judged.map_or(true, |j| !j.contains_key(&id)))
            .count();
        HoleCount {
            retrieved: considered.len(),
            unjudged,
        }
    }
}

/// Retrieved vs unjudged counts, summed across queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoleCount {
    pub retrieved: usize,
    pub unjudged: usize,
}

impl HoleCount {
    /// `None` when nothing was retrieved
    pub fn rate(&self) -> Option<f64> {
        if self.retrieved == 0 {
            None
        } else {
            Some(self.unjudged as f64 / self.retrieved as f64)
        }
    }
}

impl Add for HoleCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            retrieved: self.retrieved + rhs.retrieved,
            unjudged: self.unjudged + rhs.unjudged,
        }
    }
}

impl AddAssign for HoleCount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

//! Corpus preprocessing pipeline
//!
//! ```text
//! raw corpus ─▶ ShardSplitter (K workers) ─▶ <out>_split{s} ─▶ ShardMerger ─▶ store + IdIndex + _meta
//! ```

pub mod encoder;
pub mod merger;
pub mod preprocess;
pub mod splitter;
pub mod tokenizer;

pub use encoder::{PassageEncoder, QueryEncoder, RecordEncoder};
pub use merger::{MergeOutcome, RoundRobinReader, ShardMerger};
pub use preprocess::{PreprocessSummary, Preprocessor, QrelSplit};
pub use splitter::{ShardSet, ShardSplitter};
pub use tokenizer::{Tokenizer, VocabTokenizer};

use crate::types::{RecordId, RecordLayout};
use crate::Result;
use ahash::AHashSet;
use std::path::Path;

/// Split, encode, merge and clean up in one call
///
/// `capacity` must match the encoder's content capacity.
pub fn build_store<E: RecordEncoder + ?Sized>(
    encoder: &E,
    num_workers: usize,
    capacity: usize,
    input: &Path,
    store_path: &Path,
    qualifying: Option<&AHashSet<RecordId>>,
) -> Result<MergeOutcome> {
    let shards = ShardSplitter::new(encoder, num_workers)?.split(input, store_path)?;
    let outcome = ShardMerger::new(RecordLayout::new(capacity)).merge(&shards, store_path, qualifying)?;
    shards.cleanup()?;
    Ok(outcome)
}

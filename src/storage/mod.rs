//! Storage layer implementation
//!
//! Write-once fixed-width record stores, their id→offset indexes and the
//! memory-mapped random-access reader.

pub mod checksum;
pub mod embedding_cache;
pub mod id_index;
pub mod record_store;

pub use checksum::{Checksum, ChecksumBuilder};
pub use embedding_cache::EmbeddingCache;
pub use id_index::IdIndex;
pub use record_store::{RecordStoreWriter, StoreMeta, CONTENT_DTYPE};

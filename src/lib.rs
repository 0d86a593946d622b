//! annprep: corpus preprocessing and dense-retrieval evaluation
//!
//! ## 组成
//! - 预处理: round-robin shard split → parallel encode → ordered merge into a
//!   fixed-width token store with an id → offset index
//! - 存储: memory-mapped random access over finished stores
//! - 训练样本: pairwise / triplet examples with attention and segment masks
//! - 评测: exact inner-product search, dedup ranking, trec-style metrics
//!
//! ## 数据流
//! ```text
//! raw corpus ─▶ pipeline ─▶ RecordStore + IdIndex ─▶ EmbeddingCache ─┬─▶ training
//!                                                                    └─▶ (external embeddings) ─▶ eval
//! ```

pub mod config;
pub mod distance;
pub mod eval;
pub mod pipeline;
pub mod storage;
pub mod training;
pub mod types;

mod error;

pub use config::{EvalConfig, PrepConfig, RANKED_LIST_CAPACITY};
pub use error::{PrepError, Result};

pub use eval::{CheckpointLoader, EvalReport, RelevanceJudgments, RetrievalEvaluator};
pub use pipeline::{PassageEncoder, Preprocessor, QueryEncoder, RecordEncoder, Tokenizer, VocabTokenizer};
pub use storage::{EmbeddingCache, IdIndex, StoreMeta};
pub use training::{EncodedSequence, SegmentRole, TrainingExampleBuilder};
pub use types::{DataType, Offset, RecordId, RecordLayout};

//! Dense retrieval evaluation
//!
//! ```text
//! CheckpointLoader ─▶ EmbeddingMatrix ─┬─▶ FlatIpIndex (full corpus)
//! CandidateLoader  ─▶ CandidatePools ──┴─▶ FlatIpIndex per pool (rerank)
//!                                          └─▶ RankedCandidateList ─▶ metrics vs RelevanceJudgments
//! ```

pub mod candidates;
pub mod checkpoint;
pub mod evaluator;
pub mod metrics;
pub mod qrels;
pub mod ranking;
pub mod search;

pub use candidates::{read_query_ids, CandidateLoader, CandidatePools};
pub use checkpoint::{
    CheckpointEmbeddings, CheckpointLoader, CheckpointStatus, EmbeddingMatrix, EmbeddingShard,
};
pub use evaluator::{CheckpointReport, EvalReport, RetrievalEvaluator, SearchMode};
pub use metrics::{MetricSummary, QueryMetrics};
pub use qrels::RelevanceJudgments;
pub use ranking::{HoleCount, RankedCandidateList, FILLER_ID};
pub use search::FlatIpIndex;

//! Retrieval evaluation for one checkpoint
//!
//! Two search modes feed the same ranking/metric stage:
//!
//! ```text
//! full corpus: FlatIpIndex(all passages).search(queries, topN)
//! rerank:      per query, FlatIpIndex(rows of pooled ids).search(query, |pool|)
//!              → local rows mapped back to absolute rows
//! ```
//!
//! Neighbor rows become passage ids, are deduplicated into a
//! `RankedCandidateList`, and scored against the judgments.

use super::candidates::CandidatePools;
use super::checkpoint::{CheckpointEmbeddings, CheckpointStatus, EmbeddingMatrix};
use super::metrics::{evaluate_run, ms_marco_mrr, MetricSummary, QueryMetrics};
use super::qrels::RelevanceJudgments;
use super::ranking::{HoleCount, RankedCandidateList};
use super::search::FlatIpIndex;
use crate::config::EvalConfig;
use crate::types::Offset;
use crate::{PrepError, Result};
use ahash::AHashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    FullCorpus,
    Rerank,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullCorpus => write!(f, "full ranking"),
            Self::Rerank => write!(f, "reranking"),
        }
    }
}

/// Metrics and bookkeeping of one search mode
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub mode: SearchMode,
    pub top_n: usize,
    /// Query rows searched (including empty pools)
    pub queries: usize,
    pub metrics: MetricSummary,
    pub hole_rate_at_cutoff: Option<f64>,
    pub hole_rate: Option<f64>,
    pub ms_marco_mrr: Option<f64>,
    /// Queries whose candidate pool was missing or had no embedded passage
    pub empty_pools: Vec<Offset>,
    /// Pooled passage ids with no embedding row
    pub missing_passages: usize,
    #[serde(skip)]
    pub per_query: BTreeMap<Offset, QueryMetrics>,
    #[serde(skip)]
    pub rankings: BTreeMap<Offset, RankedCandidateList>,
}

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "undefined".to_string(), |v| format!("{:.6}", v))
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] evaluated {} of {} queries", self.mode, self.metrics.evaluated_queries, self.queries)?;
        writeln!(f, "  NDCG@10:        {}", show(self.metrics.ndcg))?;
        writeln!(f, "  map@10:         {}", show(self.metrics.map))?;
        writeln!(f, "  pytrec_mrr:     {}", show(self.metrics.mrr))?;
        writeln!(f, "  recall@{:<7} {}", format!("{}:", self.top_n), show(self.metrics.recall))?;
        writeln!(f, "  hole rate@10:   {}", show(self.hole_rate_at_cutoff))?;
        writeln!(f, "  hole rate:      {}", show(self.hole_rate))?;
        write!(f, "  ms_mrr:         {}", show(self.ms_marco_mrr))?;
        if !self.empty_pools.is_empty() {
            write!(f, "\n  empty pools:    {}", self.empty_pools.len())?;
        }
        Ok(())
    }
}

/// Both modes for one checkpoint
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    pub checkpoint: u64,
    pub status: CheckpointStatus,
    /// `None` without candidate pools
    pub rerank: Option<EvalReport>,
    /// `None` when the checkpoint has no data
    pub full: Option<EvalReport>,
}

/// Per-query rerank result before ranking
struct PoolSearch {
    query: Offset,
    neighbors: Vec<Offset>,
    missing: usize,
    empty: bool,
}

pub struct RetrievalEvaluator<'a> {
    config: EvalConfig,
    judgments: &'a RelevanceJudgments,
    pool: rayon::ThreadPool,
}

impl<'a> RetrievalEvaluator<'a> {
    pub fn new(config: EvalConfig, judgments: &'a RelevanceJudgments) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| PrepError::InvalidArgument(format!("cannot build search pool: {}", e)))?;
        Ok(Self {
            config,
            judgments,
            pool,
        })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Rerank (when pools are given) and full ranking for a loaded checkpoint
    pub fn evaluate_checkpoint(
        &self,
        embeddings: &CheckpointEmbeddings,
        pools: Option<&CandidatePools>,
    ) -> Result<CheckpointReport> {
        if !embeddings.has_data() {
            return Ok(CheckpointReport {
                checkpoint: embeddings.checkpoint,
                status: embeddings.status,
                rerank: None,
                full: None,
            });
        }

        let rerank = match pools {
            Some(pools) if !pools.is_empty() => {
                Some(self.rerank(&embeddings.queries, &embeddings.passages, pools)?)
            }
            _ => {
                warn!(
                    checkpoint = embeddings.checkpoint,
                    "rerank data set is empty; rerank metrics skipped"
                );
                None
            }
        };
        let full = self.full_corpus(&embeddings.queries, &embeddings.passages)?;

        Ok(CheckpointReport {
            checkpoint: embeddings.checkpoint,
            status: embeddings.status,
            rerank,
            full: Some(full),
        })
    }

    /// Exact search over every passage row
    pub fn full_corpus(&self, queries: &EmbeddingMatrix, passages: &EmbeddingMatrix) -> Result<EvalReport> {
        check_dims(queries, passages)?;
        let passage_ids = passages.ids();
        let lists: Vec<Vec<Offset>> = if passages.is_empty() {
            vec![Vec::new(); queries.len()]
        } else {
            let index = FlatIpIndex::view(passages.dim(), passages.data())?;
            self.pool
                .install(|| index.search(queries.data(), self.config.top_n))?
                .into_iter()
                .map(|hits| hits.into_iter().map(|(row, _)| passage_ids[row]).collect())
                .collect()
        };

        let searched = queries.ids().iter().copied().zip(lists).collect();
        Ok(self.build_report(SearchMode::FullCorpus, searched, Vec::new(), 0))
    }

    /// Exact search restricted to each query's candidate pool
    pub fn rerank(
        &self,
        queries: &EmbeddingMatrix,
        passages: &EmbeddingMatrix,
        pools: &CandidatePools,
    ) -> Result<EvalReport> {
        check_dims(queries, passages)?;
        let rows_by_id = passages.rows_by_id();

        let results: Vec<PoolSearch> = self.pool.install(|| {
            (0..queries.len())
                .into_par_iter()
                .map(|row| self.search_pool(queries, row, passages, &rows_by_id, pools))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut empty_pools = Vec::new();
        let mut missing = 0;
        let mut searched = Vec::with_capacity(results.len());
        for result in results {
            missing += result.missing;
            if result.empty {
                empty_pools.push(result.query);
            }
            searched.push((result.query, result.neighbors));
        }
        if !empty_pools.is_empty() {
            warn!(queries = empty_pools.len(), "queries without candidate pool");
        }
        if missing > 0 {
            warn!(passages = missing, "pooled passages not in passage embeddings");
        }
        Ok(self.build_report(SearchMode::Rerank, searched, empty_pools, missing))
    }

    fn search_pool(
        &self,
        queries: &EmbeddingMatrix,
        row: usize,
        passages: &EmbeddingMatrix,
        rows_by_id: &AHashMap<Offset, Vec<usize>>,
        pools: &CandidatePools,
    ) -> Result<PoolSearch> {
        let query = queries.ids()[row];
        let Some(pool) = pools.get(query) else {
            debug!(query, "query not in candidate pools");
            return Ok(PoolSearch {
                query,
                neighbors: Vec::new(),
                missing: 0,
                empty: true,
            });
        };

        // local row → absolute row
        let mut absolute = Vec::new();
        let mut missing = 0;
        for passage in pool {
            match rows_by_id.get(passage) {
                Some(rows) => absolute.extend_from_slice(rows),
                None => {
                    debug!(passage, "pooled passage not in passage embeddings");
                    missing += 1;
                }
            }
        }
        if absolute.is_empty() {
            return Ok(PoolSearch {
                query,
                neighbors: Vec::new(),
                missing,
                empty: true,
            });
        }

        let mut index = FlatIpIndex::new(passages.dim())?;
        for &abs in &absolute {
            index.add(passages.row(abs))?;
        }
        let neighbors = index
            .search_one(queries.row(row), absolute.len())?
            .into_iter()
            .map(|(local, _)| passages.ids()[absolute[local]])
            .collect();

        Ok(PoolSearch {
            query,
            neighbors,
            missing,
            empty: false,
        })
    }

    fn build_report(
        &self,
        mode: SearchMode,
        searched: Vec<(Offset, Vec<Offset>)>,
        empty_pools: Vec<Offset>,
        missing_passages: usize,
    ) -> EvalReport {
        let queries = searched.len();
        let mut rankings = BTreeMap::new();
        let mut holes_at_cutoff = HoleCount::default();
        let mut holes = HoleCount::default();

        for (query, neighbors) in searched {
            let list = RankedCandidateList::from_neighbors(neighbors, self.config.top_n);
            let judged = self.judgments.get(query);
            holes_at_cutoff += list.holes(judged, Some(self.config.hole_cutoff));
            holes += list.holes(judged, None);
            if rankings.insert(query, list).is_some() {
                warn!(query, "query appears in several rows; keeping the last ranking");
            }
        }

        let run: BTreeMap<Offset, Vec<Offset>> = rankings
            .iter()
            .map(|(query, list)| (*query, list.ids().to_vec()))
            .collect();
        let per_query = evaluate_run(&run, self.judgments, self.config.metric_cutoff, self.config.top_n);
        let metrics = MetricSummary::aggregate(per_query.values());

        let slots: BTreeMap<Offset, Vec<Offset>> = rankings
            .iter()
            .map(|(query, list)| (*query, list.slots()))
            .collect();
        let ms_marco = ms_marco_mrr(self.judgments, &slots, self.config.metric_cutoff);

        let report = EvalReport {
            mode,
            top_n: self.config.top_n,
            queries,
            metrics,
            hole_rate_at_cutoff: holes_at_cutoff.rate(),
            hole_rate: holes.rate(),
            ms_marco_mrr: ms_marco,
            empty_pools,
            missing_passages,
            per_query,
            rankings,
        };
        info!(
            mode = %mode,
            evaluated = report.metrics.evaluated_queries,
            ndcg = ?report.metrics.ndcg,
            ms_mrr = ?report.ms_marco_mrr,
            "evaluation finished"
        );
        report
    }
}

fn check_dims(queries: &EmbeddingMatrix, passages: &EmbeddingMatrix) -> Result<()> {
    if !queries.is_empty() && !passages.is_empty() && queries.dim() != passages.dim() {
        return Err(PrepError::InvalidData(format!(
            "query dimension {} differs from passage dimension {}",
            queries.dim(),
            passages.dim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::checkpoint::{CheckpointLoader, EmbeddingShard, PASSAGE_EMBEDDING_NAME, QUERY_EMBEDDING_NAME};
    use tempfile::TempDir;

    fn config(top_n: usize) -> EvalConfig {
        EvalConfig {
            top_n,
            num_threads: 2,
            ..EvalConfig::default()
        }
    }

    /// passage 1 lies along x, passage 2 along y, passage 3 has two rows
    fn passages() -> EmbeddingMatrix {
        EmbeddingMatrix::from_parts(
            2,
            vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5, 0.9, 0.1],
            vec![1, 2, 3, 3],
        )
        .unwrap()
    }

    #[test]
    fn test_full_corpus_ranking() {
        let judgments: RelevanceJudgments = [(10, 1, 1), (20, 2, 2)].into_iter().collect();
        let queries = EmbeddingMatrix::from_parts(2, vec![1.0, 0.0, 0.0, 1.0], vec![10, 20]).unwrap();
        let evaluator = RetrievalEvaluator::new(config(1000), &judgments).unwrap();

        let report = evaluator.full_corpus(&queries, &passages()).unwrap();
        // 查询 10: rows 0 (1.0), 3 (0.9), 2 (0.5), 1 (0.0) → ids 1, 3, 3, 2
        assert_eq!(report.rankings[&10].ids(), &[1, 3, 2]);
        assert_eq!(report.rankings[&20].ids(), &[2, 3, 1]);
        assert_eq!(report.metrics.evaluated_queries, 2);
        assert_eq!(report.metrics.mrr, Some(1.0));
        assert_eq!(report.metrics.ndcg, Some(1.0));
        assert_eq!(report.ms_marco_mrr, Some(1.0));
        // 每个查询 3 个结果，只有 1 个有判定
        assert_eq!(report.hole_rate, Some(4.0 / 6.0));
        assert!(report.empty_pools.is_empty());
    }

    #[test]
    fn test_rerank_restricts_to_pool() {
        let judgments: RelevanceJudgments = [(10, 2, 1), (20, 1, 1)].into_iter().collect();
        let queries = EmbeddingMatrix::from_parts(2, vec![1.0, 0.0, 0.0, 1.0], vec![10, 20]).unwrap();
        let pools: CandidatePools = [(10, 2), (10, 3), (10, 99)].into_iter().collect();
        let evaluator = RetrievalEvaluator::new(config(1000), &judgments).unwrap();

        let report = evaluator.rerank(&queries, &passages(), &pools).unwrap();
        // 3 (0.9) 优先于 2 (0.0)，passage 1 不在候选集合中
        assert_eq!(report.rankings[&10].ids(), &[3, 2]);
        assert!(report.rankings[&20].is_empty());
        assert_eq!(report.empty_pools, vec![20]);
        assert_eq!(report.missing_passages, 1);

        // 查询 20 排除在指标之外，但仍计入 MS MARCO 分母
        assert_eq!(report.metrics.evaluated_queries, 1);
        assert_eq!(report.metrics.mrr, Some(0.5));
        assert_eq!(report.ms_marco_mrr, Some(0.25));
    }

    #[test]
    fn test_no_judged_queries_is_undefined() {
        let judgments = RelevanceJudgments::new();
        let queries = EmbeddingMatrix::from_parts(2, vec![1.0, 0.0], vec![10]).unwrap();
        let evaluator = RetrievalEvaluator::new(config(2), &judgments).unwrap();

        let report = evaluator.full_corpus(&queries, &passages()).unwrap();
        assert_eq!(report.metrics.ndcg, None);
        assert_eq!(report.ms_marco_mrr, None);
        assert_eq!(report.hole_rate, Some(1.0));
        assert!(report.to_string().contains("undefined"));
    }

    #[test]
    fn test_top_n_bounds_unique_ids() {
        let judgments: RelevanceJudgments = [(10, 2, 1)].into_iter().collect();
        let queries = EmbeddingMatrix::from_parts(2, vec![1.0, 0.0], vec![10]).unwrap();
        let evaluator = RetrievalEvaluator::new(config(2), &judgments).unwrap();

        let report = evaluator.full_corpus(&queries, &passages()).unwrap();
        assert_eq!(report.rankings[&10].ids(), &[1, 3]);
        assert_eq!(report.metrics.recall, Some(0.0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let judgments = RelevanceJudgments::new();
        let queries = EmbeddingMatrix::from_parts(3, vec![1.0, 0.0, 0.0], vec![10]).unwrap();
        let evaluator = RetrievalEvaluator::new(config(2), &judgments).unwrap();
        assert!(evaluator.full_corpus(&queries, &passages()).is_err());
    }

    #[test]
    fn test_checkpoint_without_data_is_skipped() {
        let dir = TempDir::new().unwrap();
        let loader = CheckpointLoader::new(dir.path(), 8);
        let judgments: RelevanceJudgments = [(0, 0, 1)].into_iter().collect();
        let evaluator = RetrievalEvaluator::new(config(10), &judgments).unwrap();

        let report = evaluator.evaluate_checkpoint(&loader.load(1).unwrap(), None).unwrap();
        assert_eq!(report.status, CheckpointStatus::NoData);
        assert!(report.full.is_none() && report.rerank.is_none());

        loader
            .write_shard(QUERY_EMBEDDING_NAME, 2, 0, &EmbeddingShard { dim: 2, data: vec![1.0, 0.0] }, &[0])
            .unwrap();
        loader
            .write_shard(
                PASSAGE_EMBEDDING_NAME,
                2,
                0,
                &EmbeddingShard { dim: 2, data: vec![1.0, 0.0, 0.0, 1.0] },
                &[0, 1],
            )
            .unwrap();
        let pools: CandidatePools = [(0, 1)].into_iter().collect();
        let report = evaluator.evaluate_checkpoint(&loader.load(2).unwrap(), Some(&pools)).unwrap();
        assert!(matches!(report.status, CheckpointStatus::Degraded { shards: 1, .. }));
        assert_eq!(report.full.unwrap().metrics.mrr, Some(1.0));
        assert_eq!(report.rerank.unwrap().metrics.mrr, Some(0.0));
    }
}

//! Retrieval metrics following trec_eval conventions
//!
//! - A query is evaluated only when it has judgments and a non-empty run.
//! - A passage is relevant when its grade is at least 1.
//! - Per-query values are plain `f64`; means over queries are `Option<f64>`
//!   and `None` when no query was evaluated.
//!
//! # References
//!
//! - Järvelin & Kekäläinen (2002). "Cumulated gain-based evaluation of IR techniques"
//! - Voorhees & Harman (2005). "TREC: Experiment and Evaluation in Information Retrieval"

use super::qrels::{Judged, RelevanceJudgments};
use crate::types::Offset;
use serde::Serialize;
use std::collections::BTreeMap;

/// Smallest grade counted as relevant
pub const RELEVANT_GRADE: i32 = 1;

#[inline]
fn is_relevant(judged: &Judged, id: &Offset) -> bool {
    judged.get(id).is_some_and(|&grade| grade >= RELEVANT_GRADE)
}

fn num_relevant(judged: &Judged) -> usize {
    judged.values().filter(|&&grade| grade >= RELEVANT_GRADE).count()
}

// ============================================================================
// NDCG
// ============================================================================

/// NDCG@k with linear gain
///
/// ```text
/// DCG@k  = Σ grade_i / log₂(i + 1)   for i in 1..=k
/// NDCG@k = DCG@k / IDCG@k
/// ```
///
/// The ideal ranking is built from every judged grade. Returns 0.0 when the
/// ideal DCG is 0.
pub fn ndcg_at_k(ranking: &[Offset], judged: &Judged, k: usize) -> f64 {
    let dcg: f64 = ranking
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, id)| gain(judged.get(id).copied().unwrap_or(0)) / discount(i + 1))
        .sum();

    let mut ideal: Vec<i32> = judged.values().copied().filter(|&g| g > 0).collect();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, &grade)| gain(grade) / discount(i + 1))
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

#[inline]
fn gain(grade: i32) -> f64 {
    grade.max(0) as f64
}

/// log₂(position + 1), position starting at 1
#[inline]
fn discount(position: usize) -> f64 {
    ((position + 1) as f64).log2()
}

// ============================================================================
// MAP / MRR / Recall
// ============================================================================

/// Average precision over the first `k` ranks
///
/// Precision is summed at each relevant rank ≤ k and divided by the total
/// number of relevant judged passages, not just those retrieved.
pub fn average_precision_at_k(ranking: &[Offset], judged: &Judged, k: usize) -> f64 {
    let total_relevant = num_relevant(judged);
    if total_relevant == 0 {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (i, id) in ranking.iter().take(k).enumerate() {
        if is_relevant(judged, id) {
            hits += 1;
            precision_sum += hits as f64 / (i + 1) as f64;
        }
    }
    precision_sum / total_relevant as f64
}

/// 1 / rank of the first relevant passage anywhere in the run
pub fn reciprocal_rank(ranking: &[Offset], judged: &Judged) -> f64 {
    ranking
        .iter()
        .position(|id| is_relevant(judged, id))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Relevant passages in the first `k` ranks / total relevant
pub fn recall_at_k(ranking: &[Offset], judged: &Judged, k: usize) -> f64 {
    let total_relevant = num_relevant(judged);
    if total_relevant == 0 {
        return 0.0;
    }
    let found = ranking.iter().take(k).filter(|id| is_relevant(judged, id)).count();
    found as f64 / total_relevant as f64
}

// ============================================================================
// Per-query and aggregate
// ============================================================================

/// Metrics of one evaluated query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub ndcg: f64,
    pub map: f64,
    pub recip_rank: f64,
    pub recall: f64,
}

impl QueryMetrics {
    /// `metric_cutoff` bounds NDCG and MAP, `recall_cutoff` bounds recall
    pub fn compute(ranking: &[Offset], judged: &Judged, metric_cutoff: usize, recall_cutoff: usize) -> Self {
        Self {
            ndcg: ndcg_at_k(ranking, judged, metric_cutoff),
            map: average_precision_at_k(ranking, judged, metric_cutoff),
            recip_rank: reciprocal_rank(ranking, judged),
            recall: recall_at_k(ranking, judged, recall_cutoff),
        }
    }
}

/// Arithmetic means over evaluated queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub evaluated_queries: usize,
    pub ndcg: Option<f64>,
    pub map: Option<f64>,
    pub mrr: Option<f64>,
    pub recall: Option<f64>,
}

impl MetricSummary {
    pub fn aggregate<'a, I>(per_query: I) -> Self
    where
        I: IntoIterator<Item = &'a QueryMetrics>,
    {
        let mut n = 0usize;
        let mut sum = [0.0f64; 4];
        for m in per_query {
            n += 1;
            sum[0] += m.ndcg;
            sum[1] += m.map;
            sum[2] += m.recip_rank;
            sum[3] += m.recall;
        }
        let mean = |s: f64| if n == 0 { None } else { Some(s / n as f64) };
        Self {
            evaluated_queries: n,
            ndcg: mean(sum[0]),
            map: mean(sum[1]),
            mrr: mean(sum[2]),
            recall: mean(sum[3]),
        }
    }
}

/// Evaluate every query present in both the run and the judgments
pub fn evaluate_run(
    run: &BTreeMap<Offset, Vec<Offset>>,
    judgments: &RelevanceJudgments,
    metric_cutoff: usize,
    recall_cutoff: usize,
) -> BTreeMap<Offset, QueryMetrics> {
    run.iter()
        .filter(|(_, ranking)| !ranking.is_empty())
        .filter_map(|(&query, ranking)| {
            let judged = judgments.get(query)?;
            Some((query, QueryMetrics::compute(ranking, judged, metric_cutoff, recall_cutoff)))
        })
        .collect()
}

// ============================================================================
// MS MARCO MRR@10
// ============================================================================

/// MS MARCO MRR over fixed-size candidate slot lists
///
/// Relevant ids are judged ids greater than 0 at any grade, so filler slots
/// never match. The sum runs over queries present in both maps; the
/// denominator is the number of judged queries. `None` when no query is both
/// judged and ranked.
pub fn ms_marco_mrr(
    judgments: &RelevanceJudgments,
    candidates: &BTreeMap<Offset, Vec<Offset>>,
    cutoff: usize,
) -> Option<f64> {
    let mut matched = 0usize;
    let mut total = 0.0;
    for (query, slots) in candidates {
        let Some(judged) = judgments.get(*query) else {
            continue;
        };
        matched += 1;
        if let Some(i) = slots
            .iter()
            .take(cutoff)
            .position(|id| *id > 0 && judged.contains_key(id))
        {
            total += 1.0 / (i + 1) as f64;
        }
    }
    if matched == 0 {
        None
    } else {
        Some(total / judgments.num_queries() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judged(pairs: &[(Offset, i32)]) -> Judged {
        pairs.iter().copied().collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_ndcg_linear_gain() {
        let j = judged(&[(1, 2), (2, 1)]);
        assert!(approx(ndcg_at_k(&[1, 2], &j, 10), 1.0));

        // 交换顺序后的 DCG 与理想 DCG
        let dcg = 1.0 / 1.0 + 2.0 / 3f64.log2();
        let idcg = 2.0 / 1.0 + 1.0 / 3f64.log2();
        assert!(approx(ndcg_at_k(&[2, 1], &j, 10), dcg / idcg));

        assert_eq!(ndcg_at_k(&[1, 2], &judged(&[(1, 0)]), 10), 0.0);
    }

    #[test]
    fn test_ndcg_ideal_uses_unretrieved_judgments() {
        let j = judged(&[(1, 1), (9, 1)]);
        let expected = 1.0 / (1.0 + 1.0 / 3f64.log2());
        assert!(approx(ndcg_at_k(&[1, 5], &j, 10), expected));
    }

    #[test]
    fn test_map_divides_by_all_relevant() {
        let j = judged(&[(1, 1), (3, 1), (7, 1), (8, 0)]);
        // hits at ranks 1 and 3: (1/1 + 2/3) / 3
        let ap = average_precision_at_k(&[1, 8, 3, 4], &j, 10);
        assert!(approx(ap, (1.0 + 2.0 / 3.0) / 3.0));
        // relevant at rank 3 excluded by k = 2
        assert!(approx(average_precision_at_k(&[1, 8, 3], &j, 2), 1.0 / 3.0));
        assert_eq!(average_precision_at_k(&[1], &judged(&[(1, 0)]), 10), 0.0);
    }

    #[test]
    fn test_reciprocal_rank_and_recall() {
        let j = judged(&[(4, 1), (6, 2), (5, 0)]);
        assert!(approx(reciprocal_rank(&[5, 1, 4, 6], &j), 1.0 / 3.0));
        assert_eq!(reciprocal_rank(&[5, 1], &j), 0.0);

        assert!(approx(recall_at_k(&[5, 1, 4, 6], &j, 3), 0.5));
        assert!(approx(recall_at_k(&[5, 1, 4, 6], &j, 1000), 1.0));
        assert_eq!(recall_at_k(&[1], &judged(&[]), 10), 0.0);
    }

    #[test]
    fn test_evaluate_run_skips_unjudged_and_empty() {
        let judgments: RelevanceJudgments = [(0, 1, 1), (2, 5, 1), (3, 9, 1)].into_iter().collect();
        let run: BTreeMap<Offset, Vec<Offset>> =
            [(0, vec![1, 2]), (1, vec![4]), (2, vec![]), (3, vec![8, 9])].into_iter().collect();

        let per_query = evaluate_run(&run, &judgments, 10, 1000);
        assert_eq!(per_query.keys().copied().collect::<Vec<_>>(), vec![0, 3]);
        assert!(approx(per_query[&3].recip_rank, 0.5));

        let summary = MetricSummary::aggregate(per_query.values());
        assert_eq!(summary.evaluated_queries, 2);
        assert!(approx(summary.mrr.unwrap(), 0.75));
        assert!(approx(summary.recall.unwrap(), 1.0));
    }

    #[test]
    fn test_empty_aggregate_is_undefined() {
        let summary = MetricSummary::aggregate(std::iter::empty());
        assert_eq!(summary.evaluated_queries, 0);
        assert!(summary.ndcg.is_none() && summary.map.is_none());
        assert!(summary.mrr.is_none() && summary.recall.is_none());
    }

    #[test]
    fn test_ms_marco_mrr() {
        // 查询 0 的相关 passage 在第 2 位；查询 1 有判定但没有命中；查询 2 未出现在候选中
        let judgments: RelevanceJudgments =
            [(0, 7, 1), (1, 3, 0), (2, 4, 1)].into_iter().collect();
        let mut slots0 = vec![0; 1000];
        slots0[0] = 5;
        slots0[1] = 7;
        let mut slots1 = vec![0; 1000];
        slots1[10] = 3;
        let candidates: BTreeMap<Offset, Vec<Offset>> =
            [(0, slots0), (1, slots1), (9, vec![0; 1000])].into_iter().collect();

        let mrr = ms_marco_mrr(&judgments, &candidates, 10).unwrap();
        assert!(approx(mrr, 0.5 / 3.0));
    }

    #[test]
    fn test_ms_marco_filler_never_matches() {
        let judgments: RelevanceJudgments = [(0, 0, 1)].into_iter().collect();
        let candidates: BTreeMap<Offset, Vec<Offset>> = [(0, vec![0; 1000])].into_iter().collect();
        assert_eq!(ms_marco_mrr(&judgments, &candidates, 10), Some(0.0));
        assert_eq!(ms_marco_mrr(&judgments, &BTreeMap::new(), 10), None);
    }
}

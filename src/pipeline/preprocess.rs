//! End-to-end corpus preprocessing
//!
//! Output directory layout:
//!
//! ```text
//! passages, passages_meta          passage/document store
//! pid2offset.bin                   passage id → offset
//! {split}-query, {split}-query_meta   queries that have judgments
//! {split}-qid2offset.bin           query id → offset
//! {split}-qrel.tsv                 query_offset \t passage_offset \t grade
//! ```
//!
//! Query stores are merged with the judged query ids as the qualifying set,
//! so every stored query has at least one judgment.

use super::encoder::{PassageEncoder, QueryEncoder};
use super::tokenizer::Tokenizer;
use super::{build_store, MergeOutcome};
use crate::config::PrepConfig;
use crate::storage::{EmbeddingCache, IdIndex, StoreMeta};
use crate::types::{DataType, RecordId};
use crate::{PrepError, Result};
use ahash::AHashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const PASSAGE_STORE: &str = "passages";
pub const PASSAGE_INDEX: &str = "pid2offset.bin";

/// One query set with its raw relevance judgments
#[derive(Debug, Clone)]
pub struct QrelSplit {
    /// Output prefix, e.g. `train` or `dev`
    pub name: String,
    /// Raw queries: `id \t text`
    pub queries: PathBuf,
    /// Raw judgments: `query_id unused passage_id grade`
    pub qrels: PathBuf,
}

impl QrelSplit {
    pub fn new(name: impl Into<String>, queries: impl Into<PathBuf>, qrels: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            queries: queries.into(),
            qrels: qrels.into(),
        }
    }

    pub fn store_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}-query", self.name))
    }

    pub fn index_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}-qid2offset.bin", self.name))
    }

    pub fn qrel_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}-qrel.tsv", self.name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessSummary {
    /// True when an existing passage store made the run a no-op
    pub skipped: bool,
    pub passages: usize,
    /// `(split name, stored queries, qrel lines written)`
    pub splits: Vec<(String, usize, usize)>,
}

/// One raw judgment line: `(query_id, passage_id, grade)`
///
/// The grade is kept verbatim for the offset-space qrel file.
pub fn parse_raw_qrel(line: &str, data_type: DataType, line_no: usize) -> Result<(RecordId, RecordId, String)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(PrepError::parse(
            line_no,
            format!("judgment line has {} fields, expected 4", fields.len()),
        ));
    }
    let query_id = fields[0]
        .parse()
        .map_err(|_| PrepError::parse(line_no, format!("invalid query id {:?}", fields[0])))?;
    let passage_id = data_type
        .parse_passage_id(fields[2])
        .ok_or_else(|| PrepError::parse(line_no, format!("invalid passage id {:?}", fields[2])))?;
    Ok((query_id, passage_id, fields[3].to_string()))
}

pub struct Preprocessor<T: Tokenizer> {
    config: PrepConfig,
    tokenizer: Arc<T>,
}

impl<T: Tokenizer> Preprocessor<T> {
    pub fn new(config: PrepConfig, tokenizer: Arc<T>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, tokenizer })
    }

    pub fn config(&self) -> &PrepConfig {
        &self.config
    }

    /// Build the passage store and every query split under `out_dir`
    pub fn run(&self, corpus: &Path, splits: &[QrelSplit], out_dir: &Path) -> Result<PreprocessSummary> {
        std::fs::create_dir_all(out_dir)?;
        let passage_store = out_dir.join(PASSAGE_STORE);
        if StoreMeta::sidecar_path(&passage_store).exists() {
            info!(store = %passage_store.display(), "preprocessed data already exists, skipping");
            return Ok(PreprocessSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let passages = self.build_passages(corpus, &passage_store)?;
        passages.index.save(&out_dir.join(PASSAGE_INDEX))?;

        let mut summary = PreprocessSummary {
            skipped: false,
            passages: passages.meta.total_number,
            splits: Vec::with_capacity(splits.len()),
        };
        for split in splits {
            let (stored, qrels) = self.build_queries(split, &passages.index, out_dir)?;
            summary.splits.push((split.name.clone(), stored, qrels));
        }
        Ok(summary)
    }

    pub fn build_passages(&self, corpus: &Path, store_path: &Path) -> Result<MergeOutcome> {
        info!(corpus = %corpus.display(), data_type = self.config.data_type.name(), "building passage store");
        let encoder = PassageEncoder::new(
            self.tokenizer.clone(),
            self.config.data_type,
            self.config.max_seq_length,
            self.config.max_doc_character,
        );
        let outcome = build_store(
            &encoder,
            self.config.num_workers,
            self.config.max_seq_length,
            corpus,
            store_path,
            None,
        )?;
        log_first_record(store_path)?;
        Ok(outcome)
    }

    /// Build one query store and its offset-space qrel file
    ///
    /// Returns `(stored queries, qrel lines written)`.
    pub fn build_queries(&self, split: &QrelSplit, passages: &IdIndex, out_dir: &Path) -> Result<(usize, usize)> {
        let judgments = self.read_raw_qrels(&split.qrels)?;
        let judged: AHashSet<RecordId> = judgments.iter().map(|(q, _, _)| *q).collect();
        info!(split = %split.name, judged_queries = judged.len(), "building query store");

        let encoder = QueryEncoder::new(self.tokenizer.clone(), self.config.max_query_length);
        let store_path = split.store_path(out_dir);
        let outcome = build_store(
            &encoder,
            self.config.num_workers,
            self.config.max_query_length,
            &split.queries,
            &store_path,
            Some(&judged),
        )?;
        outcome.index.save(&split.index_path(out_dir))?;
        log_first_record(&store_path)?;

        let written = write_offset_qrels(&judgments, &outcome.index, passages, &split.qrel_path(out_dir))?;
        info!(split = %split.name, lines = written, "wrote qrels");
        Ok((outcome.meta.total_number, written))
    }

    fn read_raw_qrels(&self, path: &Path) -> Result<Vec<(RecordId, RecordId, String)>> {
        if !path.exists() {
            return Err(PrepError::FileNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut judgments = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            judgments.push(parse_raw_qrel(&line, self.config.data_type, line_no)?);
        }
        Ok(judgments)
    }
}

/// Rewrite judgments into offset space; an unknown id on either side is fatal
fn write_offset_qrels(
    judgments: &[(RecordId, RecordId, String)],
    queries: &IdIndex,
    passages: &IdIndex,
    out_path: &Path,
) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(out_path)?);
    for (query_id, passage_id, grade) in judgments {
        let query_offset = queries.offset_of("query", *query_id)?;
        let passage_offset = passages.offset_of("passage", *passage_id)?;
        writeln!(writer, "{}\t{}\t{}", query_offset, passage_offset, grade)?;
    }
    writer.flush()?;
    Ok(judgments.len())
}

fn log_first_record(store_path: &Path) -> Result<()> {
    let cache = EmbeddingCache::open(store_path)?;
    if !cache.is_empty() {
        let (length, content) = cache.read(0)?;
        debug!(store = %store_path.display(), length, head = ?&content[..content.len().min(8)], "first record");
    }
    Ok(())
}

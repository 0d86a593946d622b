//! Preprocessing and evaluation configuration
//!
//! Plain serde structs with presets for the two corpus flavours. Both can be
//! loaded from / saved to JSON so a run can be reproduced exactly.

use crate::types::DataType;
use crate::{PrepError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Capacity of the fixed ranked-candidate list per query
pub const RANKED_LIST_CAPACITY: usize = 1000;

/// 预处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Corpus flavour (column layout, id format)
    pub data_type: DataType,

    /// Token capacity of passage/document records
    pub max_seq_length: usize,

    /// Token capacity of query records
    pub max_query_length: usize,

    /// Characters kept before tokenization (bounds tokenizer latency)
    pub max_doc_character: usize,

    /// Degree of parallelism K for split/encode
    pub num_workers: usize,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self::passages()
    }
}

impl PrepConfig {
    /// Preset for MS MARCO-style passage corpora
    pub fn passages() -> Self {
        Self {
            data_type: DataType::Passage,
            max_seq_length: 512,
            max_query_length: 64,
            max_doc_character: 10_000,
            num_workers: 32,
        }
    }

    /// Preset for long-document corpora
    pub fn documents() -> Self {
        Self {
            data_type: DataType::Document,
            max_seq_length: 2048,
            ..Self::passages()
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(PrepError::InvalidArgument("num_workers must be >= 1".into()));
        }
        if self.max_seq_length == 0 || self.max_query_length == 0 {
            return Err(PrepError::InvalidArgument(
                "sequence capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }
}

/// 评测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Neighbors retrieved per query (100 documents, 1000 passages)
    pub top_n: usize,

    /// Highest number of embedding shards probed per checkpoint
    pub max_checkpoint_shards: usize,

    /// Worker threads for per-query reranking
    pub num_threads: usize,

    /// Cutoff for `hole_rate@k`
    pub hole_cutoff: usize,

    /// Cutoff for NDCG / MAP / MS MARCO MRR
    pub metric_cutoff: usize,
}

impl EvalConfig {
    pub fn for_data_type(data_type: DataType) -> Self {
        Self {
            top_n: data_type.top_n(),
            max_checkpoint_shards: 8,
            num_threads: 16,
            hole_cutoff: 10,
            metric_cutoff: 10,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(PrepError::InvalidArgument("top_n must be >= 1".into()));
        }
        if self.num_threads == 0 {
            return Err(PrepError::InvalidArgument("num_threads must be >= 1".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self::for_data_type(DataType::Passage)
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PrepError::FileNotFound(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

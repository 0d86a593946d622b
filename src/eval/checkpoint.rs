//! Per-checkpoint embedding shards
//!
//! An embedding producer writes, per checkpoint and per worker `i`:
//!
//! ```text
//! <dir>/<name>_<checkpoint>__emb_p__data_obj_<i>.bin     EmbeddingShard (bincode)
//! <dir>/<name>_<checkpoint>__embid_p__data_obj_<i>.bin   Vec<u64>       (bincode)
//! ```
//!
//! with `name` one of `dev_query` / `passage`. Shards are concatenated in
//! ascending `i` and loading stops at the first index whose files are not all
//! present. A short checkpoint is reported, never fatal.

use crate::storage::Checksum;
use crate::types::RecordId;
use crate::{PrepError, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const QUERY_EMBEDDING_NAME: &str = "dev_query";
pub const PASSAGE_EMBEDDING_NAME: &str = "passage";

/// One worker's block of row-major vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingShard {
    pub dim: usize,
    pub data: Vec<f32>,
}

impl EmbeddingShard {
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }
}

/// Row-major vectors with the external id of every row
///
/// Ids may repeat: a passage split into several vectors owns several rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<RecordId>,
}

impl EmbeddingMatrix {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn from_parts(dim: usize, data: Vec<f32>, ids: Vec<RecordId>) -> Result<Self> {
        let mut matrix = Self::new(dim);
        matrix.append(EmbeddingShard { dim, data }, ids)?;
        Ok(matrix)
    }

    /// Append a shard and its id array; dimensions and row counts must agree
    pub fn append(&mut self, shard: EmbeddingShard, ids: Vec<RecordId>) -> Result<()> {
        if shard.dim == 0 || shard.data.len() % shard.dim != 0 {
            return Err(PrepError::InvalidData(format!(
                "shard of {} values does not hold whole {}-dim rows",
                shard.data.len(),
                shard.dim
            )));
        }
        if self.ids.is_empty() && self.data.is_empty() {
            self.dim = shard.dim;
        } else if shard.dim != self.dim {
            return Err(PrepError::InvalidData(format!(
                "shard dimension {} differs from {}",
                shard.dim, self.dim
            )));
        }
        if shard.rows() != ids.len() {
            return Err(PrepError::InvalidData(format!(
                "{} vectors but {} ids",
                shard.rows(),
                ids.len()
            )));
        }
        self.data.extend(shard.data);
        self.ids.extend(ids);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// id → every row holding it, rows ascending
    pub fn rows_by_id(&self) -> AHashMap<RecordId, Vec<usize>> {
        let mut rows: AHashMap<RecordId, Vec<usize>> = AHashMap::new();
        for (row, id) in self.ids.iter().enumerate() {
            rows.entry(*id).or_default().push(row);
        }
        rows
    }
}

/// How much of a checkpoint could be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Every probed shard index was present
    Complete { shards: usize },
    /// Loading stopped at `missing_shard`
    Degraded { shards: usize, missing_shard: usize },
    /// Shard 0 was missing
    NoData,
}

pub struct CheckpointEmbeddings {
    pub checkpoint: u64,
    pub queries: EmbeddingMatrix,
    pub passages: EmbeddingMatrix,
    pub status: CheckpointStatus,
}

impl CheckpointEmbeddings {
    pub fn has_data(&self) -> bool {
        !matches!(self.status, CheckpointStatus::NoData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardKind {
    Vectors,
    Ids,
}

pub struct CheckpointLoader {
    dir: PathBuf,
    max_shards: usize,
}

impl CheckpointLoader {
    pub fn new(dir: impl Into<PathBuf>, max_shards: usize) -> Self {
        Self {
            dir: dir.into(),
            max_shards,
        }
    }

    fn shard_path(&self, name: &str, checkpoint: u64, kind: ShardKind, index: usize) -> PathBuf {
        let tag = match kind {
            ShardKind::Vectors => "emb",
            ShardKind::Ids => "embid",
        };
        self.dir
            .join(format!("{}_{}__{}_p__data_obj_{}.bin", name, checkpoint, tag, index))
    }

    fn shard_complete(&self, checkpoint: u64, index: usize) -> bool {
        [QUERY_EMBEDDING_NAME, PASSAGE_EMBEDDING_NAME].iter().all(|name| {
            [ShardKind::Vectors, ShardKind::Ids]
                .iter()
                .all(|kind| self.shard_path(name, checkpoint, *kind, index).exists())
        })
    }

    /// Load all consecutive shards of `checkpoint`
    ///
    /// A missing shard only shortens the result. Unreadable shard files are
    /// errors.
    pub fn load(&self, checkpoint: u64) -> Result<CheckpointEmbeddings> {
        let mut queries = EmbeddingMatrix::default();
        let mut passages = EmbeddingMatrix::default();
        let mut loaded = 0;

        while loaded < self.max_shards && self.shard_complete(checkpoint, loaded) {
            for (name, matrix) in [
                (QUERY_EMBEDDING_NAME, &mut queries),
                (PASSAGE_EMBEDDING_NAME, &mut passages),
            ] {
                let shard: EmbeddingShard =
                    read_bincode(&self.shard_path(name, checkpoint, ShardKind::Vectors, loaded))?;
                let ids: Vec<RecordId> =
                    read_bincode(&self.shard_path(name, checkpoint, ShardKind::Ids, loaded))?;
                debug!(checkpoint, shard = loaded, name, rows = ids.len(), "loaded embedding shard");
                matrix.append(shard, ids)?;
            }
            loaded += 1;
        }

        let status = if loaded == 0 {
            warn!(checkpoint, dir = %self.dir.display(), "no data found for checkpoint");
            CheckpointStatus::NoData
        } else if loaded < self.max_shards {
            warn!(checkpoint, shards = loaded, missing_shard = loaded, "checkpoint is incomplete");
            CheckpointStatus::Degraded {
                shards: loaded,
                missing_shard: loaded,
            }
        } else {
            CheckpointStatus::Complete { shards: loaded }
        };
        info!(
            checkpoint,
            queries = queries.len(),
            passages = passages.len(),
            "loaded checkpoint embeddings"
        );

        Ok(CheckpointEmbeddings {
            checkpoint,
            queries,
            passages,
            status,
        })
    }

    /// Write one shard pair for `name`; returns the CRC32 of the vector file
    pub fn write_shard(
        &self,
        name: &str,
        checkpoint: u64,
        index: usize,
        shard: &EmbeddingShard,
        ids: &[RecordId],
    ) -> Result<u32> {
        if shard.rows() != ids.len() {
            return Err(PrepError::InvalidArgument(format!(
                "{} vectors but {} ids",
                shard.rows(),
                ids.len()
            )));
        }
        std::fs::create_dir_all(&self.dir)?;
        let bytes = bincode::serialize(shard)?;
        write_atomic(&self.shard_path(name, checkpoint, ShardKind::Vectors, index), &bytes)?;
        write_atomic(
            &self.shard_path(name, checkpoint, ShardKind::Ids, index),
            &bincode::serialize(ids)?,
        )?;
        Ok(Checksum::compute(&bytes))
    }
}

fn read_bincode<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    bincode::deserialize_from(reader)
        .map_err(|e| PrepError::Corruption(format!("{}: {}", path.display(), e)))
}

/// tmp + rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("bin.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_full_shard(loader: &CheckpointLoader, checkpoint: u64, index: usize) {
        let base = index as u64 * 10;
        let queries = EmbeddingShard { dim: 2, data: vec![index as f32, 1.0] };
        loader
            .write_shard(QUERY_EMBEDDING_NAME, checkpoint, index, &queries, &[base])
            .unwrap();
        let passages = EmbeddingShard {
            dim: 2,
            data: vec![1.0, 0.0, 0.0, 1.0],
        };
        loader
            .write_shard(PASSAGE_EMBEDDING_NAME, checkpoint, index, &passages, &[base, base + 1])
            .unwrap();
    }

    #[test]
    fn test_missing_shard_degrades() {
        let dir = TempDir::new().unwrap();
        let loader = CheckpointLoader::new(dir.path(), 8);
        write_full_shard(&loader, 200000, 0);
        write_full_shard(&loader, 200000, 1);
        // 跳过 shard 2，后续 shard 不应被读取
        write_full_shard(&loader, 200000, 3);

        let loaded = loader.load(200000).unwrap();
        assert_eq!(
            loaded.status,
            CheckpointStatus::Degraded { shards: 2, missing_shard: 2 }
        );
        assert!(loaded.has_data());
        assert_eq!(loaded.queries.ids(), &[0, 10]);
        assert_eq!(loaded.passages.ids(), &[0, 1, 10, 11]);
        assert_eq!(loaded.queries.row(1), &[1.0, 1.0]);
    }

    #[test]
    fn test_complete_and_no_data() {
        let dir = TempDir::new().unwrap();
        let loader = CheckpointLoader::new(dir.path(), 2);
        write_full_shard(&loader, 5, 0);
        write_full_shard(&loader, 5, 1);

        assert_eq!(loader.load(5).unwrap().status, CheckpointStatus::Complete { shards: 2 });

        let missing = loader.load(6).unwrap();
        assert_eq!(missing.status, CheckpointStatus::NoData);
        assert!(!missing.has_data());
        assert!(missing.passages.is_empty());
    }

    #[test]
    fn test_partial_shard_files_stop_loading() {
        let dir = TempDir::new().unwrap();
        let loader = CheckpointLoader::new(dir.path(), 8);
        write_full_shard(&loader, 1, 0);
        // shard 1 只有 query 文件
        loader
            .write_shard(QUERY_EMBEDDING_NAME, 1, 1, &EmbeddingShard { dim: 2, data: vec![0.0; 2] }, &[99])
            .unwrap();

        let loaded = loader.load(1).unwrap();
        assert_eq!(loaded.queries.len(), 1);
        assert_eq!(loaded.passages.len(), 2);
    }

    #[test]
    fn test_corrupt_shard_is_error() {
        let dir = TempDir::new().unwrap();
        let loader = CheckpointLoader::new(dir.path(), 8);
        write_full_shard(&loader, 1, 0);
        std::fs::write(loader.shard_path(PASSAGE_EMBEDDING_NAME, 1, ShardKind::Ids, 0), b"xx").unwrap();
        assert!(matches!(loader.load(1), Err(PrepError::Corruption(_))));
    }

    #[test]
    fn test_matrix_validation() {
        let mut matrix = EmbeddingMatrix::new(2);
        assert!(matrix
            .append(EmbeddingShard { dim: 2, data: vec![1.0; 4] }, vec![1])
            .is_err());
        matrix
            .append(EmbeddingShard { dim: 2, data: vec![1.0; 4] }, vec![1, 1])
            .unwrap();
        assert!(matrix
            .append(EmbeddingShard { dim: 3, data: vec![1.0; 3] }, vec![2])
            .is_err());
        assert_eq!(matrix.rows_by_id().get(&1), Some(&vec![0, 1]));
    }

    #[test]
    fn test_shard_file_names() {
        let loader = CheckpointLoader::new("/ckpt", 8);
        assert_eq!(
            loader.shard_path(PASSAGE_EMBEDDING_NAME, 200000, ShardKind::Vectors, 3),
            PathBuf::from("/ckpt/passage_200000__emb_p__data_obj_3.bin")
        );
        assert_eq!(
            loader.shard_path(QUERY_EMBEDDING_NAME, 7, ShardKind::Ids, 0),
            PathBuf::from("/ckpt/dev_query_7__embid_p__data_obj_0.bin")
        );
    }
}

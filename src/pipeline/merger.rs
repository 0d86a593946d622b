//! Shard merger: rebuild global order from K shard files
//!
//! Shard `s` holds corpus lines `{s, s+K, …}` in order, so the `j`-th global
//! record is the `(j div K)`-th record of shard `j mod K`. Reading one record
//! from each shard in turn reproduces the corpus order with O(1) memory.
//! Reading stops at the first exhausted shard; at that point every shard must
//! be exhausted, otherwise records were lost.

use super::splitter::ShardSet;
use crate::storage::{IdIndex, RecordStoreWriter, StoreMeta};
use crate::types::{RecordId, RecordLayout};
use crate::{PrepError, Result};
use ahash::AHashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Round-robin reader over K shard files
///
/// All K handles are opened together and released together when the reader
/// is dropped.
pub struct RoundRobinReader {
    readers: Vec<BufReader<File>>,
    paths: Vec<PathBuf>,
    record_size: usize,
    next_shard: usize,
    exhausted: bool,
}

impl RoundRobinReader {
    pub fn open(paths: &[PathBuf], record_size: usize) -> Result<Self> {
        if paths.is_empty() {
            return Err(PrepError::InvalidArgument("no shard files to merge".into()));
        }
        if record_size == 0 {
            return Err(PrepError::InvalidArgument("record size must be non-zero".into()));
        }
        let readers = paths
            .iter()
            .map(|p| File::open(p).map(BufReader::new))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self {
            readers,
            paths: paths.to_vec(),
            record_size,
            next_shard: 0,
            exhausted: false,
        })
    }

    /// Read one full record from `shard`; `Ok(None)` on clean EOF
    fn read_from(&mut self, shard: usize) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.record_size];
        let mut filled = 0;
        while filled < self.record_size {
            let n = self.readers[shard].read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(None),
            n if n == self.record_size => Ok(Some(buf)),
            n => Err(PrepError::Corruption(format!(
                "{}: truncated record ({} of {} bytes)",
                self.paths[shard].display(),
                n,
                self.record_size
            ))),
        }
    }

    /// Verify no shard still holds records after the round-robin stopped
    pub fn ensure_drained(&mut self) -> Result<()> {
        for shard in 0..self.readers.len() {
            if self.read_from(shard)?.is_some() {
                return Err(PrepError::Corruption(format!(
                    "{}: trailing records after merge stopped; shard lengths are inconsistent",
                    self.paths[shard].display()
                )));
            }
        }
        Ok(())
    }
}

impl Iterator for RoundRobinReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let shard = self.next_shard;
        match self.read_from(shard) {
            Ok(Some(record)) => {
                self.next_shard = (shard + 1) % self.readers.len();
                Some(Ok(record))
            }
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Result of a merge
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub index: IdIndex,
    pub meta: StoreMeta,
    /// Records read from the shards
    pub records_read: usize,
    /// Records dropped by the qualifying-id filter
    pub records_dropped: usize,
}

pub struct ShardMerger {
    layout: RecordLayout,
}

impl ShardMerger {
    pub fn new(layout: RecordLayout) -> Self {
        Self { layout }
    }

    /// Merge `shards` into a content-only store at `store_path`
    ///
    /// With `qualifying`, records whose id is not in the set are dropped and
    /// get no offset.
    pub fn merge(
        &self,
        shards: &ShardSet,
        store_path: &Path,
        qualifying: Option<&AHashSet<RecordId>>,
    ) -> Result<MergeOutcome> {
        if shards.record_size != self.layout.shard_record_size() {
            return Err(PrepError::InvalidArgument(format!(
                "shard record size {} does not match layout ({} bytes)",
                shards.record_size,
                self.layout.shard_record_size()
            )));
        }
        self.merge_files(&shards.shard_paths, store_path, qualifying)
    }

    pub fn merge_files(
        &self,
        shard_paths: &[PathBuf],
        store_path: &Path,
        qualifying: Option<&AHashSet<RecordId>>,
    ) -> Result<MergeOutcome> {
        let mut reader = RoundRobinReader::open(shard_paths, self.layout.shard_record_size())?;
        let mut writer = RecordStoreWriter::create(store_path, self.layout.capacity)?;
        let mut index = IdIndex::new();
        let mut records_read = 0usize;
        let mut records_dropped = 0usize;

        for record in reader.by_ref() {
            let record = record?;
            records_read += 1;
            let (id, store_record) = self.layout.split_id(&record)?;

            if let Some(set) = qualifying {
                if !set.contains(&id) {
                    records_dropped += 1;
                    continue;
                }
            }

            let offset = writer.len() as u64;
            writer.append_raw(store_record)?;
            if let Some(previous) = index.insert(id, offset) {
                warn!(id, previous, offset, "duplicate id; keeping the later offset");
            }
            if offset < 3 {
                debug!(offset, id, "merged record");
            }
        }
        reader.ensure_drained()?;
        drop(reader);

        let meta = writer.finish()?;
        info!(
            store = %store_path.display(),
            written = meta.total_number,
            read = records_read,
            dropped = records_dropped,
            "merged shards"
        );

        Ok(MergeOutcome {
            index,
            meta,
            records_read,
            records_dropped,
        })
    }
}

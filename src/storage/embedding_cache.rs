//! Random-access reader over a finished record store
//!
//! The record file is memory-mapped once on open and unmapped on drop. All
//! reads go through `&self` with no cursor, so one cache can be shared across
//! threads and any number of independent caches may map the same store.

use super::id_index::IdIndex;
use super::record_store::StoreMeta;
use super::checksum::Checksum;
use crate::types::{Offset, RecordId, RecordLayout};
use crate::{PrepError, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

pub struct EmbeddingCache {
    path: PathBuf,
    meta: StoreMeta,
    layout: RecordLayout,
    /// None for an empty store (zero-length files are not mapped)
    mmap: Option<Mmap>,
}

impl EmbeddingCache {
    /// Open `store_path` using its `_meta` sidecar
    pub fn open(store_path: impl AsRef<Path>) -> Result<Self> {
        let path = store_path.as_ref().to_path_buf();
        let meta = StoreMeta::load(&path)?;
        let layout = meta.layout();

        if !path.exists() {
            return Err(PrepError::FileNotFound(path));
        }
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let expected = (meta.total_number as u64) * (layout.store_stride() as u64);
        if file_len != expected {
            return Err(PrepError::Corruption(format!(
                "{}: file is {} bytes, metadata expects {} records × {} bytes",
                path.display(),
                file_len,
                meta.total_number,
                layout.store_stride()
            )));
        }

        let mmap = if file_len == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map(&file)? })
        };

        Ok(Self {
            path,
            meta,
            layout,
            mmap,
        })
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content capacity of every record
    pub fn embedding_size(&self) -> usize {
        self.meta.embedding_size
    }

    pub fn len(&self) -> usize {
        self.meta.total_number
    }

    pub fn is_empty(&self) -> bool {
        self.meta.total_number == 0
    }

    /// Raw `length || content` bytes of the record at `offset`
    pub fn record_bytes(&self, offset: Offset) -> Result<&[u8]> {
        let out_of_range = PrepError::OffsetOutOfRange {
            offset,
            total: self.meta.total_number,
        };
        if offset >= self.meta.total_number as u64 {
            return Err(out_of_range);
        }
        let mmap = self.mmap.as_ref().ok_or(out_of_range)?;
        let stride = self.layout.store_stride();
        let start = offset as usize * stride;
        Ok(&mmap[start..start + stride])
    }

    /// `(length, content)` of the record at `offset`
    pub fn read(&self, offset: Offset) -> Result<(u32, Vec<i32>)> {
        self.layout.decode_store(self.record_bytes(offset)?)
    }

    /// Resolve an external id through `index`, then read
    pub fn read_by_id(&self, index: &IdIndex, kind: &'static str, id: RecordId) -> Result<(u32, Vec<i32>)> {
        let offset = index.offset_of(kind, id)?;
        self.read(offset)
    }

    /// All records in offset order
    pub fn iter(&self) -> impl Iterator<Item = Result<(u32, Vec<i32>)>> + '_ {
        (0..self.len() as u64).map(move |offset| self.read(offset))
    }

    /// Recompute the CRC32 of the mapped file against the sidecar
    ///
    /// Returns `Ok(false)` when the sidecar carries no checksum.
    pub fn verify_checksum(&self) -> Result<bool> {
        let Some(expected) = self.meta.checksum else {
            return Ok(false);
        };
        let data: &[u8] = self.mmap.as_deref().unwrap_or(&[]);
        Checksum::verify(data, expected)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record_store::RecordStoreWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build_store(dir: &Path, records: &[(u32, Vec<i32>)], capacity: usize) -> PathBuf {
        let path = dir.join("store");
        let mut writer = RecordStoreWriter::create(&path, capacity).unwrap();
        for (length, content) in records {
            writer.append(*length, content).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_random_access() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(u32, Vec<i32>)> = (0..50)
            .map(|i| ((i % 4) as u32, vec![i, i + 1, i + 2, -1]))
            .collect();
        let path = build_store(dir.path(), &records, 4);

        let cache = EmbeddingCache::open(&path).unwrap();
        assert_eq!(cache.len(), 50);
        assert_eq!(cache.embedding_size(), 4);
        for offset in [0u64, 17, 49, 3] {
            assert_eq!(cache.read(offset).unwrap(), records[offset as usize]);
        }
        assert!(matches!(
            cache.read(50),
            Err(PrepError::OffsetOutOfRange { offset: 50, total: 50 })
        ));
        assert!(cache.verify_checksum().unwrap());
    }

    #[test]
    fn test_read_by_id() {
        let dir = TempDir::new().unwrap();
        let path = build_store(dir.path(), &[(1, vec![9, 0]), (2, vec![8, 7])], 2);
        let cache = EmbeddingCache::open(&path).unwrap();
        let index: IdIndex = [(100, 1), (200, 0)].into_iter().collect();

        assert_eq!(cache.read_by_id(&index, "passage", 100).unwrap(), (2, vec![8, 7]));
        assert!(matches!(
            cache.read_by_id(&index, "passage", 300),
            Err(PrepError::IdNotFound { id: 300, .. })
        ));
    }

    #[test]
    fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = build_store(dir.path(), &[], 8);
        let cache = EmbeddingCache::open(&path).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.iter().count(), 0);
        assert!(cache.read(0).is_err());
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = build_store(dir.path(), &[(1, vec![1, 2])], 2);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(EmbeddingCache::open(&path), Err(PrepError::Corruption(_))));
    }

    #[test]
    fn test_checksum_detects_tamper() {
        let dir = TempDir::new().unwrap();
        let path = build_store(dir.path(), &[(2, vec![5, 6])], 2);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let cache = EmbeddingCache::open(&path).unwrap();
        assert!(cache.verify_checksum().is_err());
    }

    #[test]
    fn test_checksum_absent_is_not_corruption() {
        let dir = TempDir::new().unwrap();
        let path = build_store(dir.path(), &[(2, vec![5, 6])], 2);
        let mut meta = StoreMeta::load(&path).unwrap();
        meta.checksum = None;
        meta.save(&path).unwrap();

        let cache = EmbeddingCache::open(&path).unwrap();
        assert!(!cache.verify_checksum().unwrap());
    }

    #[test]
    fn test_concurrent_readers() {
        let dir = TempDir::new().unwrap();
        let records: Vec<(u32, Vec<i32>)> = (0..200).map(|i| (1, vec![i])).collect();
        let path = build_store(dir.path(), &records, 1);

        let shared = Arc::new(EmbeddingCache::open(&path).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for offset in (t..200u64).step_by(4) {
                        let (_, content) = cache.read(offset).unwrap();
                        assert_eq!(content, vec![offset as i32]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 独立打开的第二个 reader 互不影响
        let other = EmbeddingCache::open(&path).unwrap();
        assert_eq!(other.read(199).unwrap(), (1, vec![199]));
    }
}

//! External id → dense offset index
//!
//! Offsets are assigned by the merger in the order records survive filtering,
//! so for a store of `n` records the index values cover `0..n` (modulo
//! duplicate ids, where the later offset wins).

use crate::types::{Offset, RecordId};
use crate::{PrepError, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdIndex {
    offsets: AHashMap<RecordId, Offset>,
}

impl IdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` at `offset`, returning the offset it replaces
    pub fn insert(&mut self, id: RecordId, offset: Offset) -> Option<Offset> {
        self.offsets.insert(id, offset)
    }

    pub fn get(&self, id: RecordId) -> Option<Offset> {
        self.offsets.get(&id).copied()
    }

    /// Lookup that treats a missing id as a data-integrity failure
    pub fn offset_of(&self, kind: &'static str, id: RecordId) -> Result<Offset> {
        self.get(id).ok_or(PrepError::IdNotFound { kind, id })
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.offsets.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, Offset)> + '_ {
        self.offsets.iter().map(|(&id, &offset)| (id, offset))
    }

    /// Persist with bincode
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PrepError::FileNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

impl FromIterator<(RecordId, Offset)> for IdIndex {
    fn from_iter<I: IntoIterator<Item = (RecordId, Offset)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_lookup() {
        let mut index = IdIndex::new();
        assert_eq!(index.insert(10, 0), None);
        assert_eq!(index.insert(30, 1), None);
        assert_eq!(index.get(10), Some(0));
        assert_eq!(index.get(20), None);
        assert_eq!(index.len(), 2);

        // 重复 id：后写入的 offset 覆盖
        assert_eq!(index.insert(10, 2), Some(0));
        assert_eq!(index.get(10), Some(2));
    }

    #[test]
    fn test_offset_of_missing_is_fatal() {
        let index: IdIndex = [(1, 0)].into_iter().collect();
        assert_eq!(index.offset_of("passage", 1).unwrap(), 0);
        match index.offset_of("passage", 2) {
            Err(PrepError::IdNotFound { kind, id }) => {
                assert_eq!(kind, "passage");
                assert_eq!(id, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pid2offset.bin");
        let index: IdIndex = (0..1000u64).map(|i| (i * 7 + 3, i)).collect();
        index.save(&path).unwrap();

        let loaded = IdIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.get(3), Some(0));
        assert_eq!(loaded.get(7 * 999 + 3), Some(999));
    }
}

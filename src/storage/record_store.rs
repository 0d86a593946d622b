//! Fixed-width record store
//!
//! ```text
//! <store_path>        [length: u32 BE][content: i32 LE × embedding_size] × total_number
//! <store_path>_meta   {"type":"int32","total_number":N,"embedding_size":M,"checksum":C}
//! ```
//!
//! The store is write-once: `RecordStoreWriter::finish` fsyncs the record file
//! and only then writes the sidecar. A store without a sidecar is incomplete
//! and cannot be opened by `EmbeddingCache`.

use super::checksum::ChecksumBuilder;
use crate::types::{RecordLayout, LENGTH_BYTES};
use crate::{PrepError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Element type tag written to the sidecar
pub const CONTENT_DTYPE: &str = "int32";

/// Metadata sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(rename = "type")]
    pub dtype: String,
    pub total_number: usize,
    pub embedding_size: usize,
    /// CRC32 of the record file, absent for stores written by older tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

impl StoreMeta {
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.embedding_size)
    }

    /// `<store_path>_meta`
    pub fn sidecar_path(store_path: &Path) -> PathBuf {
        let mut name = OsString::from(store_path.as_os_str());
        name.push("_meta");
        PathBuf::from(name)
    }

    pub fn load(store_path: &Path) -> Result<Self> {
        let path = Self::sidecar_path(store_path);
        if !path.exists() {
            return Err(PrepError::FileNotFound(path));
        }
        let meta: StoreMeta = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        if meta.dtype != CONTENT_DTYPE {
            return Err(PrepError::InvalidData(format!(
                "unsupported store dtype: {}",
                meta.dtype
            )));
        }
        Ok(meta)
    }

    pub fn save(&self, store_path: &Path) -> Result<()> {
        let path = Self::sidecar_path(store_path);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Sequential writer for a new record store
pub struct RecordStoreWriter {
    path: PathBuf,
    layout: RecordLayout,
    writer: BufWriter<File>,
    checksum: ChecksumBuilder,
    count: usize,
}

impl RecordStoreWriter {
    /// Create (or truncate) the record file at `path`
    pub fn create(path: impl AsRef<Path>, embedding_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // 旧的 sidecar 先删除，避免新数据与旧元数据混用
        let sidecar = StoreMeta::sidecar_path(&path);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            layout: RecordLayout::new(embedding_size),
            writer: BufWriter::new(file),
            checksum: ChecksumBuilder::new(),
            count: 0,
        })
    }

    /// Append an already-encoded store record (`length || content`)
    pub fn append_raw(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.layout.store_stride() {
            return Err(PrepError::InvalidData(format!(
                "record is {} bytes, store stride is {}",
                record.len(),
                self.layout.store_stride()
            )));
        }
        let length = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        if length as usize > self.layout.capacity {
            return Err(PrepError::InvalidData(format!(
                "record length {} exceeds capacity {}",
                length, self.layout.capacity
            )));
        }
        self.writer.write_all(record)?;
        self.checksum.update(record);
        self.count += 1;
        Ok(())
    }

    /// Append `(length, content)`; content must be exactly `embedding_size` long
    pub fn append(&mut self, length: u32, content: &[i32]) -> Result<()> {
        if content.len() != self.layout.capacity {
            return Err(PrepError::InvalidData(format!(
                "content has {} tokens, capacity is {}",
                content.len(),
                self.layout.capacity
            )));
        }
        let mut record = Vec::with_capacity(self.layout.store_stride());
        record.extend_from_slice(&length.to_be_bytes());
        for token in content {
            record.extend_from_slice(&token.to_le_bytes());
        }
        debug_assert_eq!(record.len(), LENGTH_BYTES + content.len() * 4);
        self.append_raw(&record)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, fsync and write the sidecar
    pub fn finish(mut self) -> Result<StoreMeta> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        let meta = StoreMeta {
            dtype: CONTENT_DTYPE.to_string(),
            total_number: self.count,
            embedding_size: self.layout.capacity,
            checksum: Some(self.checksum.finalize()),
        };
        meta.save(&self.path)?;
        Ok(meta)
    }
}

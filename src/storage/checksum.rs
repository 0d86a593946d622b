//! Checksum 验证模块
//!
//! CRC32 over whole record files. The writer feeds every appended record into
//! a `ChecksumBuilder`; readers recompute over the mapped bytes to detect
//! truncated or bit-flipped stores.

use crate::{PrepError, Result};
use crc32fast::Hasher;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

/// Checksum 计算器
pub struct Checksum;

impl Checksum {
    /// 计算数据的 checksum
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// 验证数据的 checksum
    pub fn verify(data: &[u8], expected: u32) -> Result<()> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(PrepError::Corruption(format!(
                "checksum mismatch: expected {:#010x}, got {:#010x} (data_len={})",
                expected,
                actual,
                data.len()
            )));
        }
        Ok(())
    }

    /// Stream a file through the hasher
    pub fn of_file(path: &Path) -> Result<u32> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut builder = ChecksumBuilder::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            builder.update(&buf[..n]);
        }
        Ok(builder.finalize())
    }
}

/// Checksum 增量构建器（用于流式数据）
pub struct ChecksumBuilder {
    hasher: Hasher,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ChecksumBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

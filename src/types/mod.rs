//! Core data types shared by the pipeline, the store and the evaluator

use crate::{PrepError, Result};
use serde::{Deserialize, Serialize};

/// External corpus id (passage, document or query id)
pub type RecordId = u64;

/// Dense position of a record in a finalized store
pub type Offset = u64;

/// Size of the big-endian id prefix carried by shard records
pub const ID_BYTES: usize = 8;

/// Size of the big-endian length field
pub const LENGTH_BYTES: usize = 4;

/// Size of one token id in the content area
pub const TOKEN_BYTES: usize = 4;

/// Corpus flavour: switches raw column layout, delimiters and `topN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `id(D-prefixed) \t url \t title \t body`
    Document,
    /// `id \t text`
    Passage,
}

impl DataType {
    /// Number of ranked results requested per query during evaluation
    pub fn top_n(&self) -> usize {
        match self {
            Self::Document => 100,
            Self::Passage => 1000,
        }
    }

    /// Parse a passage/document id as written in raw files
    ///
    /// Document ids carry a one-character `D` prefix.
    pub fn parse_passage_id(&self, raw: &str) -> Option<RecordId> {
        let raw = raw.trim();
        match self {
            Self::Document => raw.get(1..)?.parse().ok(),
            Self::Passage => raw.parse().ok(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Passage => "passage",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "doc" | "document" => Ok(Self::Document),
            "1" | "passage" => Ok(Self::Passage),
            other => Err(PrepError::InvalidArgument(format!("unknown data type: {}", other))),
        }
    }
}

/// Fixed-width record layout for a given content capacity
///
/// Shard record: `[id: u64 BE][length: u32 BE][content: i32 LE × capacity]`.
/// Store record: the same without the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub capacity: usize,
}

impl RecordLayout {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Bytes of one record in the merged store (no id)
    #[inline]
    pub fn store_stride(&self) -> usize {
        LENGTH_BYTES + TOKEN_BYTES * self.capacity
    }

    /// Bytes of one record in a shard file (with id)
    #[inline]
    pub fn shard_record_size(&self) -> usize {
        ID_BYTES + self.store_stride()
    }

    /// Encode one shard record; `tokens` longer than the capacity are truncated
    /// and shorter ones are padded with `pad_token`.
    pub fn encode(&self, id: RecordId, tokens: &[i32], pad_token: i32) -> Vec<u8> {
        let length = tokens.len().min(self.capacity);
        let mut buf = Vec::with_capacity(self.shard_record_size());
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&(length as u32).to_be_bytes());
        for &token in &tokens[..length] {
            buf.extend_from_slice(&token.to_le_bytes());
        }
        for _ in length..self.capacity {
            buf.extend_from_slice(&pad_token.to_le_bytes());
        }
        buf
    }

    /// Split a shard record into its id and the store portion
    pub fn split_id<'a>(&self, record: &'a [u8]) -> Result<(RecordId, &'a [u8])> {
        if record.len() != self.shard_record_size() {
            return Err(PrepError::Corruption(format!(
                "shard record is {} bytes, expected {}",
                record.len(),
                self.shard_record_size()
            )));
        }
        let (id_bytes, rest) = record.split_at(ID_BYTES);
        let mut id = [0u8; ID_BYTES];
        id.copy_from_slice(id_bytes);
        Ok((u64::from_be_bytes(id), rest))
    }

    /// Decode a store record into `(length, content)`
    pub fn decode_store(&self, bytes: &[u8]) -> Result<(u32, Vec<i32>)> {
        if bytes.len() != self.store_stride() {
            return Err(PrepError::Corruption(format!(
                "store record is {} bytes, expected {}",
                bytes.len(),
                self.store_stride()
            )));
        }
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if length as usize > self.capacity {
            return Err(PrepError::Corruption(format!(
                "record length {} exceeds capacity {}",
                length, self.capacity
            )));
        }
        let content = bytes[LENGTH_BYTES..]
            .chunks_exact(TOKEN_BYTES)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok((length, content))
    }
}

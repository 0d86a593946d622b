//! Record encoders: raw corpus line → fixed-size shard record
//!
//! A `RecordEncoder` must be deterministic and side-effect free, and must
//! return exactly `record_size()` bytes for every line it accepts. The merger
//! relies on one record per assigned line, so a line that cannot be parsed is
//! an error, never skipped.

use super::tokenizer::Tokenizer;
use crate::types::{DataType, RecordId, RecordLayout};
use crate::{PrepError, Result};
use std::sync::Arc;

pub trait RecordEncoder: Send + Sync {
    /// Exact size of every record produced by `encode`
    fn record_size(&self) -> usize;

    /// Encode one raw line into `[id BE][length BE][content]`
    fn encode(&self, raw_line: &str) -> Result<Vec<u8>>;
}

/// Keep at most `max_chars` characters
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn parse_id(raw: &str, data_type: DataType) -> Result<RecordId> {
    data_type
        .parse_passage_id(raw)
        .ok_or_else(|| PrepError::InvalidData(format!("invalid {} id: {:?}", data_type.name(), raw)))
}

/// Encoder for passage (`id \t text`) or document (`id \t url \t title \t body`) corpora
pub struct PassageEncoder<T: Tokenizer> {
    tokenizer: Arc<T>,
    data_type: DataType,
    layout: RecordLayout,
    max_doc_character: usize,
}

impl<T: Tokenizer> PassageEncoder<T> {
    pub fn new(
        tokenizer: Arc<T>,
        data_type: DataType,
        max_seq_length: usize,
        max_doc_character: usize,
    ) -> Self {
        Self {
            tokenizer,
            data_type,
            layout: RecordLayout::new(max_seq_length),
            max_doc_character,
        }
    }

    fn full_text(&self, raw_line: &str) -> Result<(RecordId, String)> {
        match self.data_type {
            DataType::Document => {
                let fields: Vec<&str> = raw_line.split('\t').collect();
                if fields.len() < 4 {
                    return Err(PrepError::InvalidData(format!(
                        "document line has {} columns, expected 4",
                        fields.len()
                    )));
                }
                let id = parse_id(fields[0], DataType::Document)?;
                let sep = self.tokenizer.sep_token();
                let text = format!(
                    "{} {} {} {} {}",
                    fields[1].trim_end(),
                    sep,
                    fields[2].trim_end(),
                    sep,
                    fields[3].trim_end()
                );
                Ok((id, truncate_chars(&text, self.max_doc_character).to_string()))
            }
            DataType::Passage => {
                let mut fields = raw_line.trim().split('\t');
                let raw_id = fields.next().unwrap_or_default();
                let text = fields.next().ok_or_else(|| {
                    PrepError::InvalidData("passage line has no text column".into())
                })?;
                let id = parse_id(raw_id, DataType::Passage)?;
                Ok((id, truncate_chars(text.trim_end(), self.max_doc_character).to_string()))
            }
        }
    }
}

impl<T: Tokenizer> RecordEncoder for PassageEncoder<T> {
    fn record_size(&self) -> usize {
        self.layout.shard_record_size()
    }

    fn encode(&self, raw_line: &str) -> Result<Vec<u8>> {
        let (id, text) = self.full_text(raw_line)?;
        let tokens = self.tokenizer.encode(&text, self.layout.capacity);
        Ok(self.layout.encode(id, &tokens, self.tokenizer.pad_token_id()))
    }
}

/// Encoder for query files (`id \t text`)
pub struct QueryEncoder<T: Tokenizer> {
    tokenizer: Arc<T>,
    layout: RecordLayout,
}

impl<T: Tokenizer> QueryEncoder<T> {
    pub fn new(tokenizer: Arc<T>, max_query_length: usize) -> Self {
        Self {
            tokenizer,
            layout: RecordLayout::new(max_query_length),
        }
    }
}

impl<T: Tokenizer> RecordEncoder for QueryEncoder<T> {
    fn record_size(&self) -> usize {
        self.layout.shard_record_size()
    }

    fn encode(&self, raw_line: &str) -> Result<Vec<u8>> {
        let mut fields = raw_line.split('\t');
        let raw_id = fields.next().unwrap_or_default();
        let text = fields
            .next()
            .ok_or_else(|| PrepError::InvalidData("query line has no text column".into()))?;
        let id = parse_id(raw_id, DataType::Passage)?;
        let tokens = self.tokenizer.encode(text.trim_end(), self.layout.capacity);
        Ok(self.layout.encode(id, &tokens, self.tokenizer.pad_token_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tokenizer::test_tokenizer;

    fn decode(layout: RecordLayout, record: &[u8]) -> (u64, u32, Vec<i32>) {
        let (id, store) = layout.split_id(record).unwrap();
        let (length, content) = layout.decode_store(store).unwrap();
        (id, length, content)
    }

    #[test]
    fn test_document_line() {
        let encoder = PassageEncoder::new(Arc::new(test_tokenizer()), DataType::Document, 8, 10_000);
        let record = encoder.encode("D1\tu\tt\ttext1").unwrap();
        assert_eq!(record.len(), encoder.record_size());

        let (id, length, content) = decode(RecordLayout::new(8), &record);
        assert_eq!(id, 1);
        // [CLS] u [SEP] t [SEP] text1 [SEP]
        assert_eq!(length, 7);
        assert_eq!(content, vec![2, 10, 3, 11, 3, 4, 3, 0]);
    }

    #[test]
    fn test_passage_line() {
        let encoder = PassageEncoder::new(Arc::new(test_tokenizer()), DataType::Passage, 4, 10_000);
        let (id, length, content) = decode(RecordLayout::new(4), &encoder.encode("42\thello\n").unwrap());
        assert_eq!((id, length), (42, 3));
        assert_eq!(content, vec![2, 7, 3, 0]);
    }

    #[test]
    fn test_character_truncation() {
        let encoder = PassageEncoder::new(Arc::new(test_tokenizer()), DataType::Passage, 8, 5);
        // "hello world" → "hello"
        let (_, length, _) = decode(RecordLayout::new(8), &encoder.encode("1\thello world").unwrap());
        assert_eq!(length, 3);
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn test_query_line() {
        let encoder = QueryEncoder::new(Arc::new(test_tokenizer()), 6);
        let (id, length, content) = decode(RecordLayout::new(6), &encoder.encode("1048585\thello world").unwrap());
        assert_eq!(id, 1048585);
        assert_eq!(length, 4);
        assert_eq!(content, vec![2, 7, 8, 3, 0, 0]);
    }

    #[test]
    fn test_malformed_lines() {
        let tokenizer = Arc::new(test_tokenizer());
        let docs = PassageEncoder::new(tokenizer.clone(), DataType::Document, 8, 100);
        assert!(docs.encode("D1\tonly-two").is_err());
        assert!(docs.encode("X\tu\tt\tbody").is_err());

        let passages = PassageEncoder::new(tokenizer.clone(), DataType::Passage, 8, 100);
        assert!(passages.encode("not-a-number\ttext").is_err());
        assert!(passages.encode("").is_err());

        let queries = QueryEncoder::new(tokenizer, 8);
        assert!(queries.encode("12").is_err());
    }
}

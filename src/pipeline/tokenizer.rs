//! 分词器接口
//!
//! Tokenization is an external capability: anything that maps text to token
//! ids with special tokens can implement `Tokenizer`. `VocabTokenizer` is a
//! small built-in (lower-cased whitespace/punctuation split over a
//! `vocab.txt`) so the pipeline runs without a model toolkit.

use crate::{PrepError, Result};
use ahash::AHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub trait Tokenizer: Send + Sync {
    /// Token ids for `text` including special tokens, at most `max_length` long
    fn encode(&self, text: &str, max_length: usize) -> Vec<i32>;

    /// Id used to pad records up to their capacity
    fn pad_token_id(&self) -> i32;

    /// Separator token text, used to join document fields
    fn sep_token(&self) -> &str;

    fn name(&self) -> &str;
}

/// Whitespace + punctuation tokenizer over a fixed vocabulary
///
/// Input ids are `[CLS] tokens… [SEP]`; out-of-vocabulary words map to `[UNK]`.
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    vocab: AHashMap<String, i32>,
    cls_id: i32,
    sep_id: i32,
    pad_id: i32,
    unk_id: i32,
}

impl VocabTokenizer {
    pub const CLS: &'static str = "[CLS]";
    pub const SEP: &'static str = "[SEP]";
    pub const PAD: &'static str = "[PAD]";
    pub const UNK: &'static str = "[UNK]";

    /// Build from tokens in id order
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocab: AHashMap<String, i32> = tokens
            .into_iter()
            .enumerate()
            .map(|(id, token)| (token.into(), id as i32))
            .collect();

        let special = |token: &str| {
            vocab.get(token).copied().ok_or_else(|| {
                PrepError::InvalidData(format!("vocabulary is missing special token {}", token))
            })
        };
        let cls_id = special(Self::CLS)?;
        let sep_id = special(Self::SEP)?;
        let pad_id = special(Self::PAD)?;
        let unk_id = special(Self::UNK)?;

        Ok(Self {
            vocab,
            cls_id,
            sep_id,
            pad_id,
            unk_id,
        })
    }

    /// Load a `vocab.txt` with one token per line
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PrepError::FileNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let tokens = reader
            .lines()
            .map(|line| line.map(|l| l.trim_end().to_string()))
            .collect::<std::io::Result<Vec<_>>>()?;
        Self::from_tokens(tokens)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn words(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split_whitespace().flat_map(|chunk| {
            // 特殊 token 原样保留
            if chunk == Self::SEP || chunk == Self::CLS {
                return vec![chunk.to_string()];
            }
            let mut words = Vec::new();
            let mut current = String::new();
            for c in chunk.chars() {
                if c.is_ascii_punctuation() {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                    words.push(c.to_string());
                } else {
                    current.extend(c.to_lowercase());
                }
            }
            if !current.is_empty() {
                words.push(current);
            }
            words
        })
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str, max_length: usize) -> Vec<i32> {
        if max_length == 0 {
            return Vec::new();
        }
        let mut ids = Vec::with_capacity(max_length.min(512));
        ids.push(self.cls_id);
        // 预留 [SEP] 的位置
        let body_budget = max_length.saturating_sub(2);
        for word in Self::words(text).take(body_budget) {
            ids.push(self.vocab.get(&word).copied().unwrap_or(self.unk_id));
        }
        if max_length >= 2 {
            ids.push(self.sep_id);
        }
        ids
    }

    fn pad_token_id(&self) -> i32 {
        self.pad_id
    }

    fn sep_token(&self) -> &str {
        Self::SEP
    }

    fn name(&self) -> &str {
        "vocab"
    }
}

#[cfg(test)]
pub(crate) fn test_tokenizer() -> VocabTokenizer {
    VocabTokenizer::from_tokens([
        "[PAD]", "[UNK]", "[CLS]", "[SEP]", "text1", "text2", "text3", "hello", "world", ".",
        "u", "t",
    ])
    .unwrap()
}

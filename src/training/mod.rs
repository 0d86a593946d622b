//! Training example construction
//!
//! Input lines look like `query_id \t positive_id \t neg_id,neg_id,…`. Ids are
//! resolved through the query/passage `IdIndex` and the records read from the
//! matching `EmbeddingCache`. Both example streams are lazy: a line is parsed
//! and its records fetched only when the previous line's examples have been
//! consumed.
//!
//! Masks derived from a stored `(length, content)`:
//!
//! ```text
//! position        0 .. length        length .. capacity
//! attention_mask  1                  0
//! token_type_ids  0 query / 1 passage   0
//! ```

use crate::storage::{EmbeddingCache, IdIndex};
use crate::types::{Offset, RecordId};
use crate::{PrepError, Result};
use std::io::BufRead;
use std::vec::IntoIter;

/// Which side of the pair a sequence encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Query,
    Passage,
}

impl SegmentRole {
    fn segment_id(&self) -> u8 {
        match self {
            Self::Query => 0,
            Self::Passage => 1,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Passage => "passage",
        }
    }
}

/// Padded model input for one stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSequence {
    pub input_ids: Vec<i32>,
    pub attention_mask: Vec<u8>,
    pub token_type_ids: Vec<u8>,
}

impl EncodedSequence {
    pub fn from_record(length: u32, content: Vec<i32>, role: SegmentRole) -> Self {
        let length = (length as usize).min(content.len());
        let pad = content.len() - length;

        let mut attention_mask = vec![1u8; length];
        attention_mask.resize(length + pad, 0);
        let mut token_type_ids = vec![role.segment_id(); length];
        token_type_ids.resize(length + pad, 0);

        Self {
            input_ids: content,
            attention_mask,
            token_type_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// `(query, passage, label)`; label 1 for the positive, 0 for negatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledExample {
    pub query: EncodedSequence,
    pub passage: EncodedSequence,
    pub label: u8,
}

/// `(query, positive, negative)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripletExample {
    pub query: EncodedSequence,
    pub positive: EncodedSequence,
    pub negative: EncodedSequence,
}

/// One parsed training line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingLine {
    pub query_id: RecordId,
    pub positive_id: RecordId,
    pub negative_ids: Vec<RecordId>,
}

impl TrainingLine {
    pub fn parse(line: &str, line_no: usize) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < 3 {
            return Err(PrepError::parse(
                line_no,
                format!("training line has {} columns, expected 3", fields.len()),
            ));
        }
        let id = |raw: &str| -> Result<RecordId> {
            raw.trim()
                .parse()
                .map_err(|_| PrepError::parse(line_no, format!("invalid id {:?}", raw)))
        };
        Ok(Self {
            query_id: id(fields[0])?,
            positive_id: id(fields[1])?,
            negative_ids: fields[2].split(',').map(id).collect::<Result<Vec<_>>>()?,
        })
    }
}

/// Lines of a reader as crate results
pub fn read_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<String>> {
    reader.lines().map(|line| line.map_err(PrepError::from))
}

/// Resolves training ids to encoded sequences
pub struct TrainingExampleBuilder<'a> {
    query_cache: &'a EmbeddingCache,
    query_index: &'a IdIndex,
    passage_cache: &'a EmbeddingCache,
    passage_index: &'a IdIndex,
}

impl<'a> TrainingExampleBuilder<'a> {
    pub fn new(
        query_cache: &'a EmbeddingCache,
        query_index: &'a IdIndex,
        passage_cache: &'a EmbeddingCache,
        passage_index: &'a IdIndex,
    ) -> Self {
        Self {
            query_cache,
            query_index,
            passage_cache,
            passage_index,
        }
    }

    /// Fetch and mask one record; an id missing from the index is fatal
    pub fn sequence(&self, id: RecordId, role: SegmentRole) -> Result<EncodedSequence> {
        let (cache, index) = match role {
            SegmentRole::Query => (self.query_cache, self.query_index),
            SegmentRole::Passage => (self.passage_cache, self.passage_index),
        };
        let (length, content) = cache.read_by_id(index, role.kind(), id)?;
        Ok(EncodedSequence::from_record(length, content, role))
    }

    /// Labeled pairwise stream: `1 + |negatives|` examples per line
    pub fn pairwise<L>(&'a self, lines: L) -> PairwiseExamples<'a, L>
    where
        L: Iterator<Item = Result<String>>,
    {
        PairwiseExamples {
            builder: self,
            lines,
            line_no: 0,
            current: None,
            failed: false,
        }
    }

    /// Triplet stream: one `(query, positive, negative)` per negative
    pub fn triplets<L>(&'a self, lines: L) -> TripletExamples<'a, L>
    where
        L: Iterator<Item = Result<String>>,
    {
        TripletExamples {
            builder: self,
            lines,
            line_no: 0,
            current: None,
            failed: false,
        }
    }

    fn open_line(&self, line: &str, line_no: usize) -> Result<LineState> {
        let parsed = TrainingLine::parse(line, line_no)?;
        Ok(LineState {
            query: self.sequence(parsed.query_id, SegmentRole::Query)?,
            positive: Some(self.sequence(parsed.positive_id, SegmentRole::Passage)?),
            negatives: parsed.negative_ids.into_iter(),
        })
    }
}

/// Per-line cursor shared by both streams
struct LineState {
    query: EncodedSequence,
    /// Taken once by the pairwise stream
    positive: Option<EncodedSequence>,
    negatives: IntoIter<RecordId>,
}

/// Pull the next line into `current`; `Ok(false)` when input is exhausted
fn advance<L: Iterator<Item = Result<String>>>(
    builder: &TrainingExampleBuilder<'_>,
    lines: &mut L,
    line_no: &mut usize,
    current: &mut Option<LineState>,
) -> Result<bool> {
    loop {
        let Some(line) = lines.next() else {
            return Ok(false);
        };
        let line = line?;
        let no = *line_no;
        *line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        *current = Some(builder.open_line(&line, no)?);
        return Ok(true);
    }
}

pub struct PairwiseExamples<'a, L> {
    builder: &'a TrainingExampleBuilder<'a>,
    lines: L,
    line_no: usize,
    current: Option<LineState>,
    failed: bool,
}

impl<'a, L: Iterator<Item = Result<String>>> PairwiseExamples<'a, L> {
    fn step(&mut self) -> Result<Option<LabeledExample>> {
        loop {
            if let Some(state) = self.current.as_mut() {
                if let Some(positive) = state.positive.take() {
                    return Ok(Some(LabeledExample {
                        query: state.query.clone(),
                        passage: positive,
                        label: 1,
                    }));
                }
                if let Some(negative_id) = state.negatives.next() {
                    return Ok(Some(LabeledExample {
                        query: state.query.clone(),
                        passage: self.builder.sequence(negative_id, SegmentRole::Passage)?,
                        label: 0,
                    }));
                }
                self.current = None;
            }
            if !advance(self.builder, &mut self.lines, &mut self.line_no, &mut self.current)? {
                return Ok(None);
            }
        }
    }
}

impl<'a, L: Iterator<Item = Result<String>>> Iterator for PairwiseExamples<'a, L> {
    type Item = Result<LabeledExample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.step().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

pub struct TripletExamples<'a, L> {
    builder: &'a TrainingExampleBuilder<'a>,
    lines: L,
    line_no: usize,
    current: Option<LineState>,
    failed: bool,
}

impl<'a, L: Iterator<Item = Result<String>>> TripletExamples<'a, L> {
    fn step(&mut self) -> Result<Option<TripletExample>> {
        loop {
            if let Some(state) = self.current.as_mut() {
                if let Some(negative_id) = state.negatives.next() {
                    let positive = state
                        .positive
                        .clone()
                        .ok_or_else(|| PrepError::InvalidData("positive already consumed".into()))?;
                    return Ok(Some(TripletExample {
                        query: state.query.clone(),
                        positive,
                        negative: self.builder.sequence(negative_id, SegmentRole::Passage)?,
                    }));
                }
                self.current = None;
            }
            if !advance(self.builder, &mut self.lines, &mut self.line_no, &mut self.current)? {
                return Ok(None);
            }
        }
    }
}

impl<'a, L: Iterator<Item = Result<String>>> Iterator for TripletExamples<'a, L> {
    type Item = Result<TripletExample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.step().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Every record of a store as `(offset, sequence)`, for embedding inference
pub fn inference_sequences(
    cache: &EmbeddingCache,
    role: SegmentRole,
) -> impl Iterator<Item = Result<(Offset, EncodedSequence)>> + '_ {
    (0..cache.len() as Offset).map(move |offset| {
        let (length, content) = cache.read(offset)?;
        Ok((offset, EncodedSequence::from_record(length, content, role)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordStoreWriter;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        queries: EmbeddingCache,
        query_index: IdIndex,
        passages: EmbeddingCache,
        passage_index: IdIndex,
    }

    /// query 7 → offset 0; passages 100/200/300 → offsets 0/1/2
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = |name: &str, records: &[(u32, Vec<i32>)], capacity: usize| {
            let path = dir.path().join(name);
            let mut writer = RecordStoreWriter::create(&path, capacity).unwrap();
            for (length, content) in records {
                writer.append(*length, content).unwrap();
            }
            writer.finish().unwrap();
            EmbeddingCache::open(Path::new(&path)).unwrap()
        };

        let queries = store("queries", &[(2, vec![101, 7, 0, 0])], 4);
        let passages = store(
            "passages",
            &[
                (3, vec![101, 1, 102, 0, 0, 0]),
                (6, vec![101, 2, 2, 2, 2, 102]),
                (0, vec![0, 0, 0, 0, 0, 0]),
            ],
            6,
        );
        Fixture {
            _dir: dir,
            queries,
            query_index: [(7, 0)].into_iter().collect(),
            passages,
            passage_index: [(100, 0), (200, 1), (300, 2)].into_iter().collect(),
        }
    }

    fn lines(raw: &[&str]) -> impl Iterator<Item = Result<String>> {
        raw.iter().map(|s| Ok(s.to_string())).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_masks_from_length() {
        let query = EncodedSequence::from_record(2, vec![101, 7, 0, 0], SegmentRole::Query);
        assert_eq!(query.attention_mask, vec![1, 1, 0, 0]);
        assert_eq!(query.token_type_ids, vec![0, 0, 0, 0]);

        let passage = EncodedSequence::from_record(3, vec![101, 1, 102, 0, 0], SegmentRole::Passage);
        assert_eq!(passage.attention_mask, vec![1, 1, 1, 0, 0]);
        // padding 始终为 segment 0
        assert_eq!(passage.token_type_ids, vec![1, 1, 1, 0, 0]);

        let full = EncodedSequence::from_record(2, vec![5, 6], SegmentRole::Passage);
        assert_eq!(full.attention_mask, vec![1, 1]);
        assert_eq!(full.token_type_ids, vec![1, 1]);

        let empty = EncodedSequence::from_record(0, vec![0, 0], SegmentRole::Passage);
        assert_eq!(empty.attention_mask, vec![0, 0]);
        assert_eq!(empty.token_type_ids, vec![0, 0]);
    }

    #[test]
    fn test_parse_training_line() {
        let line = TrainingLine::parse("7\t100\t200,300\n", 0).unwrap();
        assert_eq!(line.query_id, 7);
        assert_eq!(line.positive_id, 100);
        assert_eq!(line.negative_ids, vec![200, 300]);

        assert!(TrainingLine::parse("7\t100", 3).is_err());
        assert!(TrainingLine::parse("7\t100\t", 3).is_err());
        assert!(TrainingLine::parse("7\tx\t200", 3).is_err());
    }

    #[test]
    fn test_pairwise_examples() {
        let f = fixture();
        let builder = TrainingExampleBuilder::new(&f.queries, &f.query_index, &f.passages, &f.passage_index);

        let examples: Vec<LabeledExample> = builder
            .pairwise(lines(&["7\t100\t200,300", "", "7\t300\t100"]))
            .collect::<Result<_>>()
            .unwrap();

        // (1 + 2) + (1 + 1)
        assert_eq!(examples.len(), 5);
        let labels: Vec<u8> = examples.iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![1, 0, 0, 1, 0]);
        assert_eq!(examples[0].passage.input_ids, vec![101, 1, 102, 0, 0, 0]);
        assert_eq!(examples[0].passage.token_type_ids, vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(examples[1].passage.attention_mask, vec![1; 6]);
        assert_eq!(examples[2].passage.attention_mask, vec![0; 6]);
        assert!(examples.iter().all(|e| e.query.attention_mask == vec![1, 1, 0, 0]));
    }

    #[test]
    fn test_triplet_examples() {
        let f = fixture();
        let builder = TrainingExampleBuilder::new(&f.queries, &f.query_index, &f.passages, &f.passage_index);

        let triplets: Vec<TripletExample> = builder
            .triplets(lines(&["7\t100\t200,300"]))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(triplets.len(), 2);
        for t in &triplets {
            assert_eq!(t.positive.input_ids, vec![101, 1, 102, 0, 0, 0]);
            assert_eq!(t.query.token_type_ids, vec![0; 4]);
        }
        assert_eq!(triplets[0].negative.input_ids, vec![101, 2, 2, 2, 2, 102]);
        assert_eq!(triplets[1].negative.input_ids, vec![0; 6]);
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let f = fixture();
        let builder = TrainingExampleBuilder::new(&f.queries, &f.query_index, &f.passages, &f.passage_index);

        let mut stream = builder.pairwise(lines(&["7\t100\t999,200", "7\t100\t200"]));
        assert_eq!(stream.next().unwrap().unwrap().label, 1);
        assert!(matches!(
            stream.next(),
            Some(Err(PrepError::IdNotFound { kind: "passage", id: 999 }))
        ));
        // 失败后停止
        assert!(stream.next().is_none());

        let mut stream = builder.triplets(lines(&["8\t100\t200"]));
        assert!(matches!(
            stream.next(),
            Some(Err(PrepError::IdNotFound { kind: "query", id: 8 }))
        ));
    }

    #[test]
    fn test_streams_are_lazy() {
        let f = fixture();
        let builder = TrainingExampleBuilder::new(&f.queries, &f.query_index, &f.passages, &f.passage_index);
        // 第二行无效，但只取第一行的样本时不会触发
        let first: Vec<_> = builder
            .triplets(lines(&["7\t100\t200", "bad line"]))
            .take(1)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_inference_sequences() {
        let f = fixture();
        let all: Vec<_> = inference_sequences(&f.passages, SegmentRole::Passage)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].0, 1);
        assert_eq!(all[0].1.attention_mask, vec![1, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_read_lines() {
        let input = std::io::Cursor::new("7\t100\t200\n7\t100\t300\n");
        let f = fixture();
        let builder = TrainingExampleBuilder::new(&f.queries, &f.query_index, &f.passages, &f.passage_index);
        assert_eq!(builder.pairwise(read_lines(input)).count(), 4);
    }
}

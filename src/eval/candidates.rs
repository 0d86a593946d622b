//! Lexical top-k candidate pools
//!
//! Documents: `qid Q0 D<pid> rank score run` (space separated).
//! Passages:  `qid \t pid \t query \t passage`.
//!
//! Ids are mapped to store offsets through the query/passage indexes. Only
//! queries in the optional allow-list that also have a query offset get a
//! pool; candidate ids without a passage offset are counted and skipped.

use crate::storage::IdIndex;
use crate::types::{DataType, Offset, RecordId};
use crate::{PrepError, Result};
use ahash::AHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// query offset → candidate passage offsets
#[derive(Debug, Clone, Default)]
pub struct CandidatePools {
    pools: BTreeMap<Offset, BTreeSet<Offset>>,
    /// Candidate lines whose passage id has no offset
    pub unknown_passages: usize,
    /// Candidate lines skipped because the query is filtered out or unindexed
    pub skipped_lines: usize,
}

impl CandidatePools {
    pub fn get(&self, query: Offset) -> Option<&BTreeSet<Offset>> {
        self.pools.get(&query)
    }

    pub fn insert(&mut self, query: Offset, passage: Offset) {
        self.pools.entry(query).or_default().insert(passage);
    }

    pub fn num_queries(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl FromIterator<(Offset, Offset)> for CandidatePools {
    fn from_iter<I: IntoIterator<Item = (Offset, Offset)>>(iter: I) -> Self {
        let mut pools = Self::default();
        for (query, passage) in iter {
            pools.insert(query, passage);
        }
        pools
    }
}

/// Query ids listed in a `qid \t text` file
pub fn read_query_ids(path: &Path) -> Result<AHashSet<RecordId>> {
    if !path.exists() {
        return Err(PrepError::FileNotFound(path.to_path_buf()));
    }
    let mut ids = AHashSet::new();
    for (line_no, line) in BufReader::new(File::open(path)?).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw = line.split('\t').next().unwrap_or_default().trim();
        let id = raw
            .parse()
            .map_err(|_| PrepError::parse(line_no, format!("invalid query id {:?}", raw)))?;
        ids.insert(id);
    }
    Ok(ids)
}

pub struct CandidateLoader<'a> {
    data_type: DataType,
    query_index: &'a IdIndex,
    passage_index: &'a IdIndex,
    allowed_queries: Option<&'a AHashSet<RecordId>>,
}

impl<'a> CandidateLoader<'a> {
    pub fn new(data_type: DataType, query_index: &'a IdIndex, passage_index: &'a IdIndex) -> Self {
        Self {
            data_type,
            query_index,
            passage_index,
            allowed_queries: None,
        }
    }

    /// Only build pools for these query ids
    pub fn with_query_filter(mut self, allowed: &'a AHashSet<RecordId>) -> Self {
        self.allowed_queries = Some(allowed);
        self
    }

    /// `(query id, passage id)` of one candidate line
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<(RecordId, RecordId)> {
        let (qid, pid) = match self.data_type {
            DataType::Document => {
                let fields: Vec<&str> = line.trim_end().split(' ').collect();
                if fields.len() != 6 {
                    return Err(PrepError::parse(
                        line_no,
                        format!("document run line has {} fields, expected 6", fields.len()),
                    ));
                }
                (fields[0], fields[2])
            }
            DataType::Passage => {
                let fields: Vec<&str> = line.splitn(4, '\t').collect();
                if fields.len() != 4 {
                    return Err(PrepError::parse(
                        line_no,
                        format!("passage run line has {} columns, expected 4", fields.len()),
                    ));
                }
                (fields[0], fields[1])
            }
        };
        let query_id = qid
            .trim()
            .parse()
            .map_err(|_| PrepError::parse(line_no, format!("invalid query id {:?}", qid)))?;
        let passage_id = self
            .data_type
            .parse_passage_id(pid)
            .ok_or_else(|| PrepError::parse(line_no, format!("invalid passage id {:?}", pid)))?;
        Ok((query_id, passage_id))
    }

    pub fn load(&self, path: &Path) -> Result<CandidatePools> {
        if !path.exists() {
            return Err(PrepError::FileNotFound(path.to_path_buf()));
        }
        self.read_from(BufReader::new(File::open(path)?))
    }

    pub fn read_from<R: BufRead>(&self, reader: R) -> Result<CandidatePools> {
        let mut pools = CandidatePools::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (query_id, passage_id) = self.parse_line(&line, line_no)?;

            if self.allowed_queries.is_some_and(|allowed| !allowed.contains(&query_id)) {
                pools.skipped_lines += 1;
                continue;
            }
            let Some(query) = self.query_index.get(query_id) else {
                pools.skipped_lines += 1;
                continue;
            };
            match self.passage_index.get(passage_id) {
                Some(passage) => pools.insert(query, passage),
                None => {
                    if pools.unknown_passages == 0 {
                        warn!(passage_id, line = line_no, "candidate passage not in passage index");
                    }
                    pools.unknown_passages += 1;
                }
            }
        }
        info!(
            queries = pools.num_queries(),
            unknown_passages = pools.unknown_passages,
            skipped = pools.skipped_lines,
            "loaded candidate pools"
        );
        Ok(pools)
    }
}

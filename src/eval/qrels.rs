//! Relevance judgments in offset space
//!
//! Loaded from the `<split>-qrel.tsv` files written by preprocessing:
//! `query_offset \t passage_offset \t grade`.

use crate::types::Offset;
use crate::{PrepError, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Judged passages of one query with their grades
pub type Judged = BTreeMap<Offset, i32>;

/// query offset → judged passage offsets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelevanceJudgments {
    by_query: BTreeMap<Offset, Judged>,
}

impl RelevanceJudgments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a judgment; a repeated pair keeps the last grade
    pub fn insert(&mut self, query: Offset, passage: Offset, grade: i32) {
        self.by_query.entry(query).or_default().insert(passage, grade);
    }

    pub fn get(&self, query: Offset) -> Option<&Judged> {
        self.by_query.get(&query)
    }

    pub fn contains_query(&self, query: Offset) -> bool {
        self.by_query.contains_key(&query)
    }

    pub fn num_queries(&self) -> usize {
        self.by_query.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_query.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Offset, &Judged)> {
        self.by_query.iter().map(|(q, judged)| (*q, judged))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PrepError::FileNotFound(path.to_path_buf()));
        }
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut judgments = Self::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            if fields.len() != 3 {
                return Err(PrepError::parse(
                    line_no,
                    format!("qrel line has {} columns, expected 3", fields.len()),
                ));
            }
            let number = |raw: &str| -> Result<i64> {
                raw.trim()
                    .parse()
                    .map_err(|_| PrepError::parse(line_no, format!("invalid number {:?}", raw)))
            };
            let query = number(fields[0])?;
            let passage = number(fields[1])?;
            if query < 0 || passage < 0 {
                return Err(PrepError::parse(line_no, "negative offset"));
            }
            judgments.insert(query as Offset, passage as Offset, number(fields[2])? as i32);
        }
        Ok(judgments)
    }
}

impl FromIterator<(Offset, Offset, i32)> for RelevanceJudgments {
    fn from_iter<I: IntoIterator<Item = (Offset, Offset, i32)>>(iter: I) -> Self {
        let mut judgments = Self::new();
        for (query, passage, grade) in iter {
            judgments.insert(query, passage, grade);
        }
        judgments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_load_offset_qrels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dev-qrel.tsv");
        std::fs::write(&path, "0\t5\t1\n0\t7\t2\n\n3\t1\t0\n").unwrap();

        let judgments = RelevanceJudgments::load(&path).unwrap();
        assert_eq!(judgments.num_queries(), 2);
        assert_eq!(judgments.get(0).unwrap().get(&7), Some(&2));
        assert_eq!(judgments.get(3).unwrap().get(&1), Some(&0));
        assert!(!judgments.contains_query(1));
    }

    #[test]
    fn test_malformed_qrel_line() {
        let err = RelevanceJudgments::from_reader(Cursor::new("0\t1\t1\n0 1 1\n")).unwrap_err();
        assert!(matches!(err, PrepError::Parse { line: 1, .. }));

        let err = RelevanceJudgments::from_reader(Cursor::new("a\t1\t1\n")).unwrap_err();
        assert!(matches!(err, PrepError::Parse { line: 0, .. }));
    }

    #[test]
    fn test_missing_file() {
        let result = RelevanceJudgments::load(Path::new("/nonexistent/dev-qrel.tsv"));
        assert!(matches!(result, Err(PrepError::FileNotFound(_))));
    }
}

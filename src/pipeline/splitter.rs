//! Shard splitter: distribute a corpus across K workers and encode in parallel
//!
//! Line `i` goes to shard `i mod K`. Each shard therefore holds lines
//! `{s, s+K, s+2K, …}` in increasing order, which is what lets the merger
//! rebuild global order by plain round-robin reads.
//!
//! ```text
//! corpus ──distribute──▶ <out>_input_split{s} ──encode (rayon, K workers)──▶ <out>_split{s}
//! ```

use super::encoder::RecordEncoder;
use crate::{PrepError, Result};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `<base><suffix><shard>`
fn suffixed(base: &Path, suffix: &str, shard: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!("{}{}", suffix, shard));
    PathBuf::from(name)
}

/// Encoded shard files produced by one split run
#[derive(Debug, Clone)]
pub struct ShardSet {
    /// Encoded shard files, index = shard ordinal
    pub shard_paths: Vec<PathBuf>,
    /// Raw per-shard line files
    pub input_paths: Vec<PathBuf>,
    /// Size of every record in the shard files
    pub record_size: usize,
    /// Total corpus lines
    pub total_lines: usize,
}

impl ShardSet {
    pub fn num_shards(&self) -> usize {
        self.shard_paths.len()
    }

    /// Remove all intermediate files (best effort for already-missing ones)
    pub fn cleanup(&self) -> Result<()> {
        for path in self.input_paths.iter().chain(self.shard_paths.iter()) {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed split file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub struct ShardSplitter<'a, E: RecordEncoder + ?Sized> {
    encoder: &'a E,
    num_shards: usize,
}

impl<'a, E: RecordEncoder + ?Sized> ShardSplitter<'a, E> {
    pub fn new(encoder: &'a E, num_shards: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(PrepError::InvalidArgument("number of shards must be >= 1".into()));
        }
        Ok(Self { encoder, num_shards })
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Split `input` and encode every shard; shard files are written next to `out_base`
    pub fn split(&self, input: &Path, out_base: &Path) -> Result<ShardSet> {
        if !input.exists() {
            return Err(PrepError::FileNotFound(input.to_path_buf()));
        }
        let (input_paths, total_lines) = self.distribute(input, out_base)?;
        info!(
            input = %input.display(),
            lines = total_lines,
            shards = self.num_shards,
            "distributed corpus lines"
        );

        let shard_paths: Vec<PathBuf> = (0..self.num_shards)
            .map(|s| suffixed(out_base, "_split", s))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_shards)
            .build()
            .map_err(|e| PrepError::InvalidArgument(format!("cannot build worker pool: {}", e)))?;

        let counts: Vec<usize> = pool.install(|| {
            (0..self.num_shards)
                .into_par_iter()
                .map(|s| self.encode_shard(s, &input_paths[s], &shard_paths[s]))
                .collect::<Result<Vec<usize>>>()
        })?;
        debug!(?counts, "encoded shards");

        Ok(ShardSet {
            shard_paths,
            input_paths,
            record_size: self.encoder.record_size(),
            total_lines,
        })
    }

    /// Write line `i` of `input` to `<out_base>_input_split{i mod K}`
    fn distribute(&self, input: &Path, out_base: &Path) -> Result<(Vec<PathBuf>, usize)> {
        let paths: Vec<PathBuf> = (0..self.num_shards)
            .map(|s| suffixed(out_base, "_input_split", s))
            .collect();
        let mut writers = paths
            .iter()
            .map(|p| File::create(p).map(BufWriter::new))
            .collect::<std::io::Result<Vec<_>>>()?;

        let reader = BufReader::new(File::open(input)?);
        let mut total = 0usize;
        for line in reader.lines() {
            let line = line?;
            let writer = &mut writers[total % self.num_shards];
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            total += 1;
        }
        for mut writer in writers {
            writer.flush()?;
        }
        Ok((paths, total))
    }

    /// Encode one input split; any bad line aborts the shard
    fn encode_shard(&self, shard: usize, input: &Path, output: &Path) -> Result<usize> {
        let reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(output)?);
        let record_size = self.encoder.record_size();

        let mut count = 0usize;
        for line in reader.lines() {
            let line = line?;
            let global_line = shard + count * self.num_shards;
            let record = self
                .encoder
                .encode(&line)
                .map_err(|e| PrepError::parse(global_line, e.to_string()))?;
            if record.len() != record_size {
                return Err(PrepError::parse(
                    global_line,
                    format!("encoder produced {} bytes, expected {}", record.len(), record_size),
                ));
            }
            writer.write_all(&record)?;
            count += 1;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(count)
    }
}

//! annprep 命令行工具
//!
//! ```bash
//! # Build passage store, query stores and offset qrels
//! annprep-cli preprocess --data-type passage --corpus collection.tsv --vocab vocab.txt \
//!     --split train:queries.train.tsv:qrels.train.tsv --split dev:queries.dev.small.tsv:qrels.dev.small.tsv \
//!     --out processed/
//!
//! # Evaluate checkpoints (full ranking, plus reranking with --candidates)
//! annprep-cli eval --processed-dir processed/ --checkpoint-dir ann_data/ --checkpoint 200000 \
//!     --candidates top1000.dev --queries queries.dev.small.tsv
//!
//! # Look at a store
//! annprep-cli inspect processed/passages --offset 0 --verify
//! ```

use annprep::eval::{read_query_ids, CandidateLoader, CandidatePools};
use annprep::pipeline::preprocess::PASSAGE_INDEX;
use annprep::pipeline::{PreprocessSummary, QrelSplit};
use annprep::{
    CheckpointLoader, DataType, EmbeddingCache, EvalConfig, IdIndex, PrepConfig, Preprocessor, RelevanceJudgments,
    RetrievalEvaluator, VocabTokenizer,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PREP_CONFIG_FILE: &str = "prep_config.json";

#[derive(Parser)]
#[command(name = "annprep-cli", version, about = "Corpus preprocessing and dense retrieval evaluation")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tokenize a corpus into fixed-width stores with id → offset indexes
    Preprocess {
        /// `document` (0) or `passage` (1)
        #[arg(long, default_value = "passage")]
        data_type: DataType,

        /// Raw corpus TSV
        #[arg(long)]
        corpus: PathBuf,

        /// One token per line; line number is the token id
        #[arg(long)]
        vocab: PathBuf,

        /// Query split as `name:queries.tsv:qrels.tsv` (repeatable)
        #[arg(long = "split", value_parser = parse_split)]
        splits: Vec<QrelSplit>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Parallel workers (overrides the config file)
        #[arg(long)]
        workers: Option<usize>,

        /// JSON `PrepConfig`
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Evaluate checkpoint embeddings against offset qrels
    Eval {
        #[arg(long, default_value = "passage")]
        data_type: DataType,

        /// Directory written by `preprocess`
        #[arg(long)]
        processed_dir: PathBuf,

        /// Directory holding the embedding shards
        #[arg(long)]
        checkpoint_dir: PathBuf,

        /// Checkpoint numbers to evaluate
        #[arg(long, required = true, num_args = 1..)]
        checkpoint: Vec<u64>,

        /// Query split whose qrels and qid index are used
        #[arg(long, default_value = "dev")]
        split: String,

        /// Lexical top-k run file for reranking
        #[arg(long)]
        candidates: Option<PathBuf>,

        /// Query file restricting which candidate queries are pooled
        #[arg(long)]
        queries: Option<PathBuf>,

        /// JSON `EvalConfig`
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show store metadata and records
    Inspect {
        /// Store path (the `_meta` sidecar must exist next to it)
        store: PathBuf,

        /// Record offsets to print
        #[arg(long)]
        offset: Vec<u64>,

        /// Recompute the CRC32 and compare with the sidecar
        #[arg(long)]
        verify: bool,
    },
}

fn parse_split(raw: &str) -> std::result::Result<QrelSplit, String> {
    let parts: Vec<&str> = raw.splitn(3, ':').collect();
    match parts.as_slice() {
        [name, queries, qrels] if !name.is_empty() => Ok(QrelSplit::new(*name, *queries, *qrels)),
        _ => Err(format!("expected name:queries:qrels, got {:?}", raw)),
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Preprocess {
            data_type,
            corpus,
            vocab,
            splits,
            out,
            workers,
            config,
        } => {
            let mut prep_config = match config {
                Some(path) => PrepConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
                None => match data_type {
                    DataType::Document => PrepConfig::documents(),
                    DataType::Passage => PrepConfig::passages(),
                },
            };
            if let Some(workers) = workers {
                prep_config = prep_config.with_workers(workers);
            }

            let tokenizer = VocabTokenizer::from_file(&vocab).with_context(|| format!("loading {}", vocab.display()))?;
            let summary = Preprocessor::new(prep_config.clone(), Arc::new(tokenizer))?
                .run(&corpus, &splits, &out)
                .context("preprocessing failed")?;
            if !save_prep_config(&prep_config, &summary, &out)? {
                println!("{} already preprocessed", out.display());
            } else {
                println!("passages: {}", summary.passages);
                for (name, queries, qrels) in &summary.splits {
                    println!("{}: {} queries, {} qrels", name, queries, qrels);
                }
            }
            Ok(())
        }

        Command::Eval {
            data_type,
            processed_dir,
            checkpoint_dir,
            checkpoint,
            split,
            candidates,
            queries,
            config,
            json,
        } => {
            let eval_config = match config {
                Some(path) => EvalConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
                None => EvalConfig::for_data_type(data_type),
            };
            let split = QrelSplit::new(split, PathBuf::new(), PathBuf::new());
            let judgments = RelevanceJudgments::load(&split.qrel_path(&processed_dir))?;
            info!(queries = judgments.num_queries(), "loaded judgments");

            let pools = match candidates {
                Some(path) => Some(load_pools(data_type, &processed_dir, &split, &path, queries)?),
                None => None,
            };

            let loader = CheckpointLoader::new(&checkpoint_dir, eval_config.max_checkpoint_shards);
            let evaluator = RetrievalEvaluator::new(eval_config, &judgments)?;
            let mut failures = 0;
            for ckpt in checkpoint {
                let result = loader
                    .load(ckpt)
                    .and_then(|embeddings| evaluator.evaluate_checkpoint(&embeddings, pools.as_ref()));
                let report = match result {
                    Ok(report) => report,
                    Err(e) => {
                        error!(checkpoint = ckpt, error = %e, "checkpoint evaluation failed");
                        failures += 1;
                        continue;
                    }
                };

                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    continue;
                }
                println!("checkpoint {} ({:?})", report.checkpoint, report.status);
                match (&report.rerank, &report.full) {
                    (None, None) => println!("  no data found"),
                    (rerank, full) => {
                        for r in rerank.iter().chain(full.iter()) {
                            println!("{}", r);
                        }
                    }
                }
            }
            if failures > 0 {
                bail!("{} checkpoint(s) failed", failures);
            }
            Ok(())
        }

        Command::Inspect { store, offset, verify } => {
            let cache = EmbeddingCache::open(&store).with_context(|| format!("opening {}", store.display()))?;
            let meta = cache.meta();
            println!("{}", serde_json::to_string_pretty(meta)?);
            for o in offset {
                let (length, content) = cache.read(o)?;
                println!("[{}] length={} content={:?}", o, length, &content[..length as usize]);
            }
            if verify {
                println!("{}", checksum_status(&cache, &store)?);
            }
            Ok(())
        }
    }
}

/// Record the config next to a freshly built store; a skipped run leaves
/// the existing `prep_config.json` alone.
fn save_prep_config(config: &PrepConfig, summary: &PreprocessSummary, out: &Path) -> Result<bool> {
    if summary.skipped {
        return Ok(false);
    }
    config.save(&out.join(PREP_CONFIG_FILE))?;
    Ok(true)
}

fn checksum_status(cache: &EmbeddingCache, store: &Path) -> Result<&'static str> {
    // 不匹配时 verify_checksum 直接返回 Corruption
    let verified = cache
        .verify_checksum()
        .with_context(|| format!("{}: checksum mismatch", store.display()))?;
    Ok(if verified { "checksum ok" } else { "no checksum recorded" })
}

fn load_pools(
    data_type: DataType,
    processed_dir: &Path,
    split: &QrelSplit,
    candidates: &Path,
    queries: Option<PathBuf>,
) -> Result<CandidatePools> {
    let query_index = IdIndex::load(&split.index_path(processed_dir))?;
    let passage_index = IdIndex::load(&processed_dir.join(PASSAGE_INDEX))?;
    let allowed = queries.as_deref().map(read_query_ids).transpose()?;

    let mut loader = CandidateLoader::new(data_type, &query_index, &passage_index);
    if let Some(allowed) = allowed.as_ref() {
        loader = loader.with_query_filter(allowed);
    }
    let pools = loader.load(candidates)?;
    info!(queries = pools.num_queries(), "candidate pools ready");
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use annprep::storage::record_store::RecordStoreWriter;
    use annprep::StoreMeta;
    use tempfile::TempDir;

    #[test]
    fn test_skipped_run_keeps_prep_config() {
        let dir = TempDir::new().unwrap();
        let original = PrepConfig::passages();
        let fresh = PreprocessSummary::default();
        assert!(save_prep_config(&original, &fresh, dir.path()).unwrap());
        let saved = std::fs::read_to_string(dir.path().join(PREP_CONFIG_FILE)).unwrap();

        let skipped = PreprocessSummary {
            skipped: true,
            ..Default::default()
        };
        let rerun = PrepConfig::documents().with_workers(3);
        assert!(!save_prep_config(&rerun, &skipped, dir.path()).unwrap());
        assert_eq!(std::fs::read_to_string(dir.path().join(PREP_CONFIG_FILE)).unwrap(), saved);
    }

    #[test]
    fn test_checksum_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        let mut writer = RecordStoreWriter::create(&path, 2).unwrap();
        writer.append(2, &[5, 6]).unwrap();
        writer.finish().unwrap();

        let cache = EmbeddingCache::open(&path).unwrap();
        assert_eq!(checksum_status(&cache, &path).unwrap(), "checksum ok");

        // 旧格式的 sidecar 没有 checksum
        let mut meta = StoreMeta::load(&path).unwrap();
        meta.checksum = None;
        meta.save(&path).unwrap();
        let cache = EmbeddingCache::open(&path).unwrap();
        assert_eq!(checksum_status(&cache, &path).unwrap(), "no checksum recorded");

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
        let cache = EmbeddingCache::open(&path).unwrap();
        assert!(checksum_status(&cache, &path).is_err());
    }
}

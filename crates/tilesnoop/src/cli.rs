//! `tilesnoop` command line: tile hashing, dictionary checks and trace replay.

use crate::builder::{DictionaryBuilder, DictionaryImage};
use crate::capture::WriteEvent;
use crate::config::SnoopConfig;
use crate::dictionary::DictionaryIndex;
use crate::filter::MembershipFilter;
use crate::fingerprint::fingerprint;
use crate::handoff;
use crate::pipeline::SnoopPipeline;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Command-line interface of the `tilesnoop` binary.
#[derive(Parser)]
#[command(name = "tilesnoop")]
#[command(about = "Recognize known tiles in a video memory write stream", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json); built-in defaults when absent
    #[arg(short, long, env = "TILESNOOP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Fingerprint a tile given as hex and show where it would live
    Hash {
        /// Tile bytes as hex, whitespace allowed
        tile: String,
    },
    /// Place a dictionary image and report overflows
    CheckDictionary {
        /// JSON dictionary image
        image: PathBuf,
        /// Fail when any record overflows its chain
        #[arg(long)]
        strict: bool,
    },
    /// Run a recorded write trace through a pipeline
    Replay {
        /// JSON dictionary image
        #[arg(short, long)]
        dictionary: PathBuf,
        /// Write trace, one JSON write event per line
        #[arg(short, long)]
        trace: PathBuf,
        /// Idle ticks allowed after the trace to finish in-flight lookups
        #[arg(long, default_value = "4096")]
        drain_ticks: usize,
    },
}

impl Cli {
    /// Load the configuration named on the command line, or the defaults.
    pub fn load_config(&self) -> Result<SnoopConfig> {
        match &self.config {
            Some(path) => SnoopConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(SnoopConfig::default()),
        }
    }

    /// Execute the selected subcommand.
    pub async fn run(self, config: SnoopConfig) -> Result<()> {
        match self.command {
            Command::Hash { ref tile } => hash(&config, tile),
            Command::CheckDictionary { ref image, strict } => {
                check_dictionary(&config, image, strict)
            }
            Command::Replay {
                ref dictionary,
                ref trace,
                drain_ticks,
            } => replay(config, dictionary, trace, drain_ticks).await,
        }
    }
}

/// Parse hex tile bytes, ignoring whitespace.
pub fn parse_tile(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&compact).context("tile must be hex")?;
    if bytes.is_empty() {
        anyhow::bail!("tile is empty");
    }
    Ok(bytes)
}

/// Read a write trace: one JSON [`WriteEvent`] per line, blank lines skipped.
pub fn read_trace(path: &Path) -> Result<Vec<WriteEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading trace {}", path.display()))?;
    parse_trace(&text)
}

fn parse_trace(text: &str) -> Result<Vec<WriteEvent>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("trace line {}", n + 1))
        })
        .collect()
}

fn hash(config: &SnoopConfig, tile: &str) -> Result<()> {
    let bytes = parse_tile(tile)?;
    if bytes.len() != config.capture.block_size {
        warn!(
            len = bytes.len(),
            block_size = config.capture.block_size,
            "tile length differs from configured block size"
        );
    }
    let fp = fingerprint(&bytes);
    let filter = MembershipFilter::new(&config.filter);
    let index = DictionaryIndex::new(&config.dictionary);
    let bucket = index.bucket_of(fp);

    println!("Fingerprint: {}", fp);
    println!("Filter bits: {:?}", filter.bit_addresses(fp));
    println!(
        "Bucket: {} (slots {}..{})",
        bucket,
        index.slot_address(bucket, 0),
        index.slot_address(bucket, index.chain_depth())
    );
    Ok(())
}

fn check_dictionary(config: &SnoopConfig, image: &Path, strict: bool) -> Result<()> {
    let image = DictionaryImage::from_file(image)
        .with_context(|| format!("loading dictionary {}", image.display()))?;
    let mut builder = DictionaryBuilder::new(config)?;
    builder.add_image(&image)?;
    let fp_rate = builder.expected_false_positive_rate();
    let plan = builder.build();

    let mut pipeline = SnoopPipeline::new(config.clone())?;
    pipeline.apply(&plan)?;
    let block_size = config.capture.block_size;
    let mut reachable = 0;
    for record in &image.records {
        let fp = record.checked_key(block_size)?;
        if pipeline.lookup_now(fp) == Some(record.payload()) {
            reachable += 1;
        }
    }

    println!("Records: {}", image.records.len());
    println!("Placed: {}", plan.placed());
    println!("Reachable: {}", reachable);
    println!("Filter bits set: {}", plan.filter_loads.len());
    println!("Expected false positive rate: {:.6}", fp_rate);
    for overflow in &plan.overflows {
        println!(
            "Overflow: fingerprint {} in bucket {}",
            overflow.fingerprint, overflow.bucket
        );
    }

    if strict && !plan.is_complete() {
        anyhow::bail!("{} record(s) overflowed their chain", plan.overflows.len());
    }
    Ok(())
}

#[instrument(skip(config))]
async fn replay(
    config: SnoopConfig,
    dictionary: &Path,
    trace: &Path,
    drain_ticks: usize,
) -> Result<()> {
    let image = DictionaryImage::from_file(dictionary)
        .with_context(|| format!("loading dictionary {}", dictionary.display()))?;
    let mut builder = DictionaryBuilder::new(&config)?;
    builder.add_image(&image)?;
    let plan = builder.build();
    let events = read_trace(trace)?;

    let (publisher, mut subscriber) = handoff::channel();
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        let mut missed = 0u64;
        while let Ok(r) = subscriber.next().await {
            received += 1;
            missed += r.missed;
            let result = r.delivery.result;
            if result.match_found {
                println!(
                    "tick {}: match char={:#04x} ptr={:#06x}",
                    r.delivery.tick, result.character_code, result.translation_pointer
                );
            } else {
                println!("tick {}: no match", r.delivery.tick);
            }
        }
        (received, missed)
    });

    let mut pipeline = SnoopPipeline::new(config)?.with_publisher(publisher);
    pipeline.apply(&plan)?;
    info!(events = events.len(), "replaying trace");
    for event in events {
        pipeline.tick(Some(event));
        tokio::task::yield_now().await;
    }
    let mut budget = drain_ticks;
    while !pipeline.is_quiescent() && budget > 0 {
        pipeline.tick(None);
        tokio::task::yield_now().await;
        budget -= 1;
    }
    if !pipeline.is_quiescent() {
        warn!(drain_ticks, "pipeline still busy after drain");
    }

    let metrics = pipeline.metrics();
    let ticks = pipeline.ticks();
    drop(pipeline);
    let (received, missed) = consumer.await?;

    println!("Ticks: {}", ticks);
    println!("Results received: {} (missed {})", received, missed);
    print!("{}", metrics.metrics().to_prometheus());
    Ok(())
}

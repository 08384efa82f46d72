//! Binary entry point for the cbtree stress and inspection CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use cbtree::logging::init_logging;
use cbtree::primitives::io::FileIo;
use cbtree::primitives::store::SpaceInfo;
use cbtree::types::NodeTag;
use cbtree::{BTree, BTreeOptions, BTreeStatsSnapshot, BlockSpace, BlockStore, StoreOptions};

#[derive(Parser, Debug)]
#[command(
    name = "cbtree",
    version,
    about = "Stress and inspect concurrent B-tree stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "CBTREE_LOG",
        default_value = "cbtree=info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Run a concurrent mixed workload and print tree diagnostics")]
    Stress(StressCmd),

    #[command(about = "Report height, entry count and header fields of a store file")]
    Inspect(InspectCmd),
}

#[derive(Args, Debug)]
struct StressCmd {
    #[arg(long, value_name = "FILE", help = "Store file; in-memory when omitted")]
    db: Option<PathBuf>,

    #[arg(long, env = "CBTREE_BLOCK_SIZE", default_value_t = 4096, help = "Block size for new stores")]
    block_size: u32,

    #[arg(long, env = "CBTREE_THREADS", default_value_t = 8, help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 50_000, help = "Operations per thread")]
    ops: u64,

    #[arg(long, default_value_t = 100_000, help = "Keys are drawn from 0..key-space")]
    key_space: u64,

    #[arg(long, default_value_t = 0x5eed, help = "Base seed for the per-thread generators")]
    seed: u64,

    #[arg(long, default_value_t = 64, help = "Root restarts per call before warning")]
    restart_warn_threshold: u64,
}

#[derive(Args, Debug)]
struct InspectCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct StressReport {
    threads: usize,
    ops_per_thread: u64,
    elapsed_ms: f64,
    ops_per_sec: f64,
    entries: usize,
    height: usize,
    stats: BTreeStatsSnapshot,
    space: SpaceInfo,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    path: String,
    root: Option<String>,
    height: usize,
    entries: usize,
    space: SpaceInfo,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    match cli.command {
        Command::Stress(cmd) => {
            let options = StoreOptions::default().block_size(cmd.block_size);
            let report = match &cmd.db {
                Some(path) => stress(Arc::new(BlockSpace::open(path, options)?), &cmd)?,
                None => stress(Arc::new(BlockSpace::in_memory(options)?), &cmd)?,
            };
            emit(&cli.format, &report, || print_stress_text(&report))?;
        }
        Command::Inspect(cmd) => {
            let report = inspect(&cmd.db_path)?;
            emit(&cli.format, &report, || print_inspect_text(&report))?;
        }
    }
    Ok(())
}

fn stress<F: FileIo>(space: Arc<BlockSpace<F>>, cmd: &StressCmd) -> Result<StressReport, Box<dyn Error>> {
    if cmd.threads == 0 || cmd.key_space == 0 {
        return Err("threads and key-space must be positive".into());
    }
    let store: Arc<dyn BlockStore> = space.clone();
    let options = BTreeOptions {
        restart_warn_threshold: cmd.restart_warn_threshold,
        ..BTreeOptions::default()
    };
    let tree = Arc::new(BTree::<u64, u64>::open(store, options)?);
    let barrier = Arc::new(Barrier::new(cmd.threads));
    let started = Instant::now();

    let handles: Vec<_> = (0..cmd.threads as u64)
        .map(|thread_id| {
            let tree = Arc::clone(&tree);
            let barrier = Arc::clone(&barrier);
            let (ops, key_space, seed) = (cmd.ops, cmd.key_space, cmd.seed);
            thread::spawn(move || -> cbtree::Result<()> {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(thread_id));
                barrier.wait();
                for step in 0..ops {
                    let key = rng.gen_range(0..key_space);
                    match rng.gen_range(0..20) {
                        0..=11 => {
                            tree.put(key, step)?;
                        }
                        12..=16 => {
                            tree.remove(&key)?;
                        }
                        _ => {
                            tree.get(&key)?;
                        }
                    }
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().map_err(|_| "stress worker panicked")??;
    }
    let elapsed = started.elapsed();
    tree.flush()?;
    tree.stats().emit_tracing();

    let total_ops = cmd.ops as f64 * cmd.threads as f64;
    Ok(StressReport {
        threads: cmd.threads,
        ops_per_thread: cmd.ops,
        elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
        ops_per_sec: total_ops / elapsed.as_secs_f64().max(f64::EPSILON),
        entries: tree.len()?,
        height: tree.height()?,
        stats: tree.diagnostics(),
        space: space.info()?,
    })
}

/// Keys are walked as raw encoded bytes; every built-in key codec preserves order
/// under byte comparison.
fn inspect(path: &PathBuf) -> Result<InspectReport, Box<dyn Error>> {
    let space = Arc::new(BlockSpace::open(path, StoreOptions::default().create_if_missing(false))?);
    let info = space.info()?;
    let store: Arc<dyn BlockStore> = space;
    let tree = BTree::<Vec<u8>, Vec<u8>>::open(store, BTreeOptions::default())?;
    Ok(InspectReport {
        path: path.display().to_string(),
        root: NodeTag::from_raw(info.user_header).map(|tag| tag.to_string()),
        height: tree.height()?,
        entries: tree.len()?,
        space: info,
    })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_stress_text(report: &StressReport) {
    println!(
        "Workload: threads={} ops_per_thread={} elapsed={:.2} ms ({:.0} ops/s)",
        report.threads, report.ops_per_thread, report.elapsed_ms, report.ops_per_sec
    );
    println!("Tree: entries={} height={}", report.entries, report.height);
    let s = &report.stats;
    println!(
        "Ops: gets={} inserts={} updates={} removals={} comparisons={}",
        s.gets, s.inserts, s.updates, s.removals, s.comparisons
    );
    println!(
        "Restarts: total={} failed={} max_depth={}",
        s.restarts, s.failed_restarts, s.max_restarts
    );
    println!(
        "Structure: leaf_splits={} branch_splits={} height+={} height-={} allocations={} frees={}",
        s.leaf_splits, s.branch_splits, s.height_increases, s.height_decreases, s.allocations, s.frees
    );
    print_space(&report.space);
}

fn print_inspect_text(report: &InspectReport) {
    println!("Store: {}", report.path);
    println!(
        "Tree: root={} height={} entries={}",
        report.root.as_deref().unwrap_or("none"),
        report.height,
        report.entries
    );
    print_space(&report.space);
}

fn print_space(space: &SpaceInfo) {
    println!(
        "Space: block_size={} high_water={} free_blocks={} user_header=0x{:016x}",
        space.block_size, space.high_water, space.free_blocks, space.user_header
    );
}

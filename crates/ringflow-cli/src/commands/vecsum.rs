//! vecsum command - stream random vector pairs through the `vecsum` kernel
//!
//! Source, kernel stage and checking sink run in-process: the source
//! produces `[A, B, timestamp]` items, the pipeline computes `C = A + B` on
//! the accelerator and the sink verifies every result and samples latency.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use ringflow_device::{EmulatorBackend, EmulatorOptions};
use ringflow_stream::{
    AsyncPipeline, Item, PipelineConfig, RingStats, SharedStats, SyncPipeline,
};
use tracing::{info, warn};

use crate::sink::CheckSink;
use crate::source::RandomVecSource;
use crate::vecsum::{descriptors, kernels, VecSumAdapter, DEFAULT_VEC_SIZE, KERNEL_NAME};

/// Options of the vecsum command
#[derive(Debug, Clone, Args)]
pub struct VecsumArgs {
    /// Number of items to stream
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub items: u64,

    /// Capacity of the vector arguments (items hold 1..vec-size elements)
    #[arg(long, default_value_t = DEFAULT_VEC_SIZE)]
    pub vec_size: usize,

    /// Buffers per ring and items in flight (overrides RINGFLOW_DEGREE)
    #[arg(short, long)]
    pub degree: Option<usize>,

    /// Use the synchronous driver
    #[arg(long)]
    pub sync: bool,

    /// Append per-item device timings to this file
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Directory receiving metric_<name>.json files
    #[arg(long, default_value = ".")]
    pub metrics_dir: PathBuf,

    /// Accelerator platform name
    #[arg(long, default_value = "Xilinx")]
    pub platform: String,

    /// Precompiled kernel binary
    #[arg(long)]
    pub kernel_binary: Option<PathBuf>,

    /// Simulated latency of every emulated device command, in microseconds
    #[arg(long, default_value_t = 0)]
    pub op_latency_us: u64,

    /// Seed for the vector source
    #[arg(long)]
    pub seed: Option<u64>,

    /// Disable the software emulator
    #[arg(long)]
    pub no_emulation: bool,
}

enum Driver {
    Sync(SyncPipeline<EmulatorBackend>),
    Async(AsyncPipeline<EmulatorBackend>),
}

impl Driver {
    fn process(&mut self, item: Item) {
        match self {
            Driver::Sync(pipeline) => pipeline.process(item),
            Driver::Async(pipeline) => pipeline.process(item),
        }
    }

    fn finish(&mut self) -> ringflow_stream::Result<()> {
        match self {
            Driver::Sync(pipeline) => pipeline.finish(),
            Driver::Async(pipeline) => pipeline.finish(),
        }
    }

    fn stats(&self) -> SharedStats {
        match self {
            Driver::Sync(pipeline) => pipeline.stats(),
            Driver::Async(pipeline) => pipeline.stats(),
        }
    }

    fn ring_stats(&self) -> Vec<RingStats> {
        match self {
            Driver::Sync(pipeline) => pipeline.ring_stats(),
            Driver::Async(pipeline) => pipeline.ring_stats(),
        }
    }
}

/// Build the pipeline configuration from the command options
pub fn build_config(args: &VecsumArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env(KERNEL_NAME)?
        .with_platform(args.platform.as_str())
        .with_emulation(!args.no_emulation);
    if let Some(degree) = args.degree {
        config = config.with_degree(degree);
    }
    if args.sync {
        config = config.with_degree(1);
    }
    if let Some(path) = &args.kernel_binary {
        config = config.with_kernel_binary(path);
    }
    if let Some(path) = &args.profile {
        config = config.with_profile_path(path);
    }
    config.validate()?;
    Ok(config)
}

/// Execute the vecsum command
pub fn execute(args: VecsumArgs) -> Result<()> {
    if args.vec_size < 2 {
        bail!("--vec-size must be at least 2");
    }
    std::fs::create_dir_all(&args.metrics_dir).with_context(|| {
        format!("Failed to create metrics directory {}", args.metrics_dir.display())
    })?;

    let config = build_config(&args)?;
    let options = EmulatorOptions::default()
        .with_op_latency(Duration::from_micros(args.op_latency_us));
    let backend = config
        .discover(kernels(), options)
        .with_context(|| format!("No accelerator on platform {}", config.platform_name))?;

    let epoch = Instant::now();
    let sink = Arc::new(CheckSink::new(epoch));
    let adapter = Arc::new(VecSumAdapter);
    let degree = config.degree;

    let mut driver = if args.sync {
        Driver::Sync(SyncPipeline::new(
            backend,
            config,
            descriptors(args.vec_size),
            adapter,
            Arc::clone(&sink) as _,
        )?)
    } else {
        Driver::Async(AsyncPipeline::new(
            backend,
            config,
            descriptors(args.vec_size),
            adapter,
            Arc::clone(&sink) as _,
        )?)
    };

    info!(
        items = args.items,
        vec_size = args.vec_size,
        degree,
        sync = args.sync,
        "Streaming vector pairs"
    );

    let source = match args.seed {
        Some(seed) => RandomVecSource::seeded(seed, args.vec_size, epoch),
        None => RandomVecSource::new(args.vec_size, epoch),
    };
    for item in source.take(args.items as usize) {
        driver.process(item);
    }
    driver.finish().context("Pipeline did not drain")?;

    let elapsed = epoch.elapsed();
    let stats = driver.stats().summary();
    let checks = sink.summary();
    let latency = sink.latency();
    if latency.is_empty() {
        warn!("No results reached the sink");
    }
    let metric_path = latency.dump(&args.metrics_dir)?;

    println!("Vector Sum");
    println!("{}", "=".repeat(50));
    println!("  Driver:          {}", if args.sync { "sync" } else { "async" });
    println!("  Degree:          {}", degree);
    println!("  Items:           {}", stats.submitted);
    println!("  Emitted:         {}", stats.emitted);
    println!("  Acked:           {}", checks.acked);
    println!("  Failed:          {}", checks.failed);
    println!("  Checked:         {}", checks.checked);
    println!("  Wrong Results:   {}", checks.wrong);
    println!("  Peak In-Flight:  {}", stats.peak_in_flight);
    println!(
        "  Throughput:      {:.1} items/s",
        stats.submitted as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!(
        "  Avg Latency:     {:.3} ms",
        stats.complete_avg_latency.as_secs_f64() * 1000.0
    );
    for ring in driver.ring_stats() {
        println!(
            "  Ring {:<10} {} buffers, high water {}",
            format!("{}:", ring.name),
            ring.degree,
            ring.high_water
        );
    }
    println!(
        "  Metrics:         {} ({} samples)",
        metric_path.display(),
        latency.len()
    );
    if let Some(path) = &args.profile {
        println!("  Profile:         {}", path.display());
    }

    if checks.wrong > 0 || stats.failed > 0 {
        warn!(wrong = checks.wrong, failed = stats.failed, "Run finished with errors");
        bail!(
            "{} wrong results, {} failed items",
            checks.wrong,
            stats.failed
        );
    }
    Ok(())
}

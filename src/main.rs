use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use llm_bench::gpu::DeviceSpec;
use llm_bench::utils::{setup_logging, LogConfig};
use llm_bench::{
    build_jobs, load_config, BenchmarkBuilder, CancellationToken, Features, JobStatus, Registry, ResultRecord,
    RunControl, RunOptions,
};

#[derive(Parser)]
#[command(name = "llm-bench", version, about = "Run LLM benchmark experiments")]
struct Cli {
    /// Minimum log level
    #[arg(long, global = true, default_value = "info", env = "LLM_BENCH_LOG_LEVEL")]
    log_level: Level,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every job of an experiment
    Run(RunArgs),
    /// Print the job plan of an experiment
    Jobs {
        config: PathBuf,
    },
    /// List registered tasks and templates
    List,
}

#[derive(Args)]
struct RunArgs {
    /// Experiment YAML file
    config: PathBuf,

    /// Process only the first batch of each job
    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// cpu, cuda, cuda:N or auto
    #[arg(long, default_value = "auto")]
    device: DeviceSpec,

    /// Limit in seconds for each generation call
    #[arg(long)]
    timeout: Option<u64>,

    /// Report failing jobs and keep going
    #[arg(long)]
    continue_on_error: bool,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(LogConfig {
        level: cli.log_level,
        file_path: cli.log_file.clone(),
        ..Default::default()
    })?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Jobs { config } => jobs(&config),
        Command::List => {
            list();
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let mut control = RunControl::default().with_cancellation(token.clone());
    if let Some(seconds) = args.timeout {
        control = control.with_timeout(Duration::from_secs(seconds));
    }

    let benchmark = BenchmarkBuilder::new()
        .with_config_file(&args.config)
        .with_device(args.device)
        .with_options(RunOptions {
            dry_run: args.dry_run,
            continue_on_error: args.continue_on_error,
            control,
            show_progress: !args.no_progress,
        })
        .build()
        .with_context(|| format!("failed to set up experiment from {}", args.config.display()))?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });

    let output_dir = args.output_dir.join(&benchmark.config().experiment);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let summary = benchmark
        .run_all(|outcome| {
            let path = output_dir.join(format!("{}.jsonl", outcome.output_stem()));
            write_records(&path, &outcome.records)?;
            info!("Wrote {} records to {}", outcome.records.len(), path.display());
            Ok(())
        })
        .await?;

    for job in &summary.jobs {
        match &job.status {
            JobStatus::Completed => println!("{}: {} records", job.label, job.records),
            JobStatus::DryRunStopped => println!("{}: {} records (dry run)", job.label, job.records),
            JobStatus::Failed { stage, message } => println!("{}: failed during {:?}: {}", job.label, stage, message),
        }
    }

    let metrics = benchmark.metrics();
    info!(
        "Generated {} tokens in {} batches ({:.1} tokens/s, p95 batch latency {:?})",
        metrics.generated_tokens, metrics.batches, metrics.tokens_per_second, metrics.p95_batch_latency
    );

    if summary.failed() > 0 {
        bail!("{} of {} jobs failed", summary.failed(), summary.jobs.len());
    }
    Ok(())
}

fn jobs(path: &Path) -> anyhow::Result<()> {
    let registry = Registry::default();
    let config = load_config(path, &registry).with_context(|| format!("invalid experiment {}", path.display()))?;

    println!("experiment: {}", config.experiment);
    for job in build_jobs(&config) {
        println!(
            "{:>3}  {:<40} shots={} batch_size={}",
            job.index,
            job.label(),
            job.task.num_shots,
            job.model.generate.batch_size
        );
    }
    Ok(())
}

fn list() {
    let registry = Registry::default();
    println!("tasks:");
    for name in registry.tasks.names() {
        println!("  {}", name);
    }
    println!("templates:");
    for name in registry.templates.names() {
        println!("  {}", name);
    }
    print!("{}", Features::detect());
}

fn write_records(path: &Path, records: &[ResultRecord]) -> llm_bench::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

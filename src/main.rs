use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use emt_common::Parameters;
use emt_engine::batch::{run_batch, BatchConfig, RunOutcome};
use emt_engine::Simulation;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "EMT cell-chain simulation engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulation to `t_end` and save its snapshots
    Run {
        /// Parameter file (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overrides `general.random_seed`
        #[arg(short, long)]
        seed: Option<String>,

        /// Output path without extension
        #[arg(short, long, default_value = "emt_run")]
        output: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Run a parameter sweep
    Batch {
        /// Base parameter file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sweep definition (TOML)
        #[arg(short, long)]
        batch: PathBuf,

        /// Overrides the worker count of the sweep file
        #[arg(short, long)]
        threads: Option<usize>,

        #[arg(short, long, default_value = "emt_batch")]
        output: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Bincode,
    Messagepack,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bin",
            OutputFormat::Messagepack => "msgpack",
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Run { config, seed, output, format } => run_single(config.as_deref(), seed, &output, format),
        Command::Batch { config, batch, threads, output, format } => {
            run_sweep(config.as_deref(), &batch, threads, &output, format)
        }
    }
}

fn load_params(path: Option<&Path>) -> Result<Parameters> {
    match path {
        Some(path) => Parameters::load(path).with_context(|| format!("loading parameters from {}", path.display())),
        None => {
            info!("No parameter file given, using defaults.");
            let params = Parameters::default();
            params.validate()?;
            Ok(params)
        }
    }
}

fn run_single(config: Option<&Path>, seed: Option<String>, output: &str, format: OutputFormat) -> Result<()> {
    let mut params = load_params(config)?;
    if let Some(seed) = seed {
        params.general.random_seed = seed;
    }
    info!("Starting simulation engine...");
    let mut sim = Simulation::new(params)?;
    let total_steps = sim.sim_params().total_steps;
    info!(
        "Initialised {} cells; running {} steps to t = {}.",
        sim.current_cell_count(),
        total_steps,
        sim.params().general.t_end
    );

    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    while !sim.is_complete() {
        let step_start_time = Instant::now();
        sim.step().with_context(|| format!("simulation step {} failed", sim.state().step_count + 1))?;
        trace!(
            "Step {} completed in {:.2} ms",
            sim.state().step_count,
            step_start_time.elapsed().as_secs_f64() * 1000.0
        );

        if previous_print_time.elapsed().as_secs_f64() >= 5.0 {
            info!(
                "Step [{}/{}] (t = {:.2}) | Cells: {} | Elapsed: {:.2} s",
                sim.state().step_count,
                total_steps,
                sim.time(),
                sim.current_cell_count(),
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = Instant::now();
        }
    }
    info!(
        "Simulation finished in {:.3} seconds with {} cells.",
        start_time.elapsed().as_secs_f64(),
        sim.current_cell_count()
    );

    let snapshots = sim.recorded_snapshots();
    if snapshots.is_empty() {
        warn!("No snapshots recorded (snapshot_interval is 0), nothing to save.");
        return Ok(());
    }
    let path = write_output(&format!("{output}_snapshots"), format, &snapshots)?;
    info!("{} snapshots saved to {}", snapshots.len(), path.display());
    Ok(())
}

fn run_sweep(
    config: Option<&Path>,
    batch_path: &Path,
    threads: Option<usize>,
    output: &str,
    format: OutputFormat,
) -> Result<()> {
    let params = load_params(config)?;
    let mut batch = BatchConfig::load(batch_path)?;
    if let Some(threads) = threads {
        batch.threads = threads;
    }
    debug!("Batch definition: {:#?}", batch);

    let total = batch.work_items().len() as u64;
    let progress_bar = ProgressBar::new(total);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs ({percent}%) [{eta}] {msg}")?
            .progress_chars("#>-"),
    );

    let cancel = AtomicBool::new(false);
    let result = run_batch(&params, &batch, &cancel, |done, _, overrides| {
        progress_bar.set_position(done as u64);
        let current: Vec<String> = overrides.iter().map(|(p, v)| format!("{p}={v:.4}")).collect();
        progress_bar.set_message(current.join(" "));
    })?;
    progress_bar.finish_with_message("done");

    let snapshots: Vec<_> = result.snapshots().collect();
    let path = write_output(&format!("{output}_snapshots"), format, &snapshots)?;
    info!("{} snapshots saved to {}", snapshots.len(), path.display());

    let summary: Vec<_> = result
        .runs
        .iter()
        .map(|r| RunSummary {
            run_index: r.item.run_index,
            seed: &r.item.seed,
            overrides: &r.item.overrides,
            status: match &r.outcome {
                RunOutcome::Completed(_) => "completed",
                RunOutcome::Failed(_) => "failed",
                RunOutcome::Canceled => "canceled",
            },
            error: match &r.outcome {
                RunOutcome::Failed(reason) => Some(reason.as_str()),
                _ => None,
            },
        })
        .collect();
    let path = write_output(&format!("{output}_runs"), OutputFormat::Json, &summary)?;
    info!(
        "Batch {:?}: {} completed, {} failed, {} canceled. Summary in {}",
        result.status,
        result.completed_count(),
        result.failed_count(),
        result.canceled_count(),
        path.display()
    );
    Ok(())
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_index: usize,
    seed: &'a str,
    overrides: &'a [(String, f64)],
    status: &'static str,
    error: Option<&'a str>,
}

fn write_output<T: Serialize + ?Sized>(base: &str, format: OutputFormat, data: &T) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{base}.{}", format.extension()));
    let file = File::create(&path).with_context(|| format!("creating output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    match format {
        OutputFormat::Json => serde_json::to_writer(&mut writer, data).context("serializing to JSON")?,
        OutputFormat::Bincode => bincode::serialize_into(&mut writer, data).context("serializing to bincode")?,
        OutputFormat::Messagepack => {
            rmp_serde::encode::write(&mut writer, data).context("serializing to MessagePack")?
        }
    }
    writer.flush()?;
    Ok(path)
}

//! Parameter sweeps: many independent (configuration, seed) runs, executed
//! sequentially or on a rayon pool with identical results.

use crate::error::{SimError, SimResult};
use crate::rng::SeededRng;
use crate::simulation::Simulation;
use emt_common::{ConfigError, Parameters, Snapshot};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

/// Tolerance when comparing simulated time against a sample time.
const SAMPLE_EPSILON: f64 = 1e-9;

/// One swept parameter: `steps` evenly spaced values over `[min, max]` in
/// grid mode, uniform draws from it in random mode.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ParamRange {
    /// Dotted parameter path, e.g. `cell_types.emt.k_apical`.
    pub path: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_steps")]
    pub steps: usize,
}

fn default_steps() -> usize {
    1
}

impl ParamRange {
    /// Grid points, `min` and `max` included.
    pub fn values(&self) -> Vec<f64> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![self.min],
            n => (0..n)
                .map(|i| self.min + (self.max - self.min) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SweepMode {
    /// Cartesian product of every range's grid points.
    #[default]
    Grid,
    /// `n_configs` configurations, each range drawn independently.
    Random { n_configs: usize },
}

/// Simulated times at which each run is sampled.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SampleWindow {
    pub t_start: f64,
    /// Defaults to the run's `general.t_end`.
    pub t_end: Option<f64>,
    pub interval: f64,
}

impl Default for SampleWindow {
    fn default() -> Self {
        SampleWindow { t_start: 0.0, t_end: None, interval: 1.0 }
    }
}

impl SampleWindow {
    /// Sample times up to `min(t_end, run_end)`.
    pub fn sample_times(&self, run_end: f64) -> Vec<f64> {
        let end = self.t_end.map_or(run_end, |t| t.min(run_end));
        if self.t_start > end + SAMPLE_EPSILON {
            return Vec::new();
        }
        let count = ((end - self.t_start) / self.interval + SAMPLE_EPSILON).floor() as usize + 1;
        (0..count).map(|i| self.t_start + i as f64 * self.interval).collect()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub ranges: Vec<ParamRange>,
    pub sweep: SweepMode,
    pub window: SampleWindow,
    pub seeds_per_config: usize,
    /// Seed texts are `seed_offset + k` for `k in 0..seeds_per_config`.
    pub seed_offset: u64,
    /// Worker threads: 0 lets rayon decide, 1 runs sequentially.
    pub threads: usize,
    /// Seed of the draws made in random sweep mode.
    pub sweep_seed: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            ranges: Vec::new(),
            sweep: SweepMode::Grid,
            window: SampleWindow::default(),
            seeds_per_config: 1,
            seed_offset: 0,
            threads: 0,
            sweep_seed: "sweep".to_string(),
        }
    }
}

/// One (configuration, seed) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub run_index: usize,
    pub config_index: usize,
    pub seed: String,
    pub overrides: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Snapshots at every sample time.
    Completed(Vec<Snapshot>),
    /// The run errored or panicked; the rest of the batch went on.
    Failed(String),
    /// Never started because the batch was canceled.
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub item: WorkItem,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Completed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub status: BatchStatus,
    /// One report per work item, in work-item order.
    pub runs: Vec<RunReport>,
}

impl BatchResult {
    fn count(&self, pred: impl Fn(&RunOutcome) -> bool) -> usize {
        self.runs.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn completed_count(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Completed(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Failed(_)))
    }

    pub fn canceled_count(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Canceled))
    }

    /// Snapshots of every completed run, in work-item order.
    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.runs
            .iter()
            .filter_map(|r| match &r.outcome {
                RunOutcome::Completed(snapshots) => Some(snapshots),
                _ => None,
            })
            .flatten()
    }
}

impl BatchConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let display = path.as_ref().display().to_string();
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|source| SimError::Io { path: display.clone(), source })?;
        toml::from_str(&text).map_err(|source| SimError::Parse { path: display, source })
    }

    /// Checks the sweep definition against `base`: every path must name a
    /// numeric parameter and every range must be well formed.
    pub fn validate(&self, base: &Parameters) -> SimResult<()> {
        if self.seeds_per_config == 0 {
            return Err(SimError::InvalidSweep("seeds_per_config must be at least 1".into()));
        }
        if !(self.window.interval.is_finite() && self.window.interval > 0.0) {
            return Err(SimError::InvalidSweep("sample interval must be positive".into()));
        }
        if !self.window.t_start.is_finite() || self.window.t_start < 0.0 {
            return Err(SimError::InvalidSweep("sample window must start at t >= 0".into()));
        }
        for range in &self.ranges {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(SimError::InvalidSweep(format!(
                    "range `{}` must satisfy min <= max, got [{}, {}]",
                    range.path, range.min, range.max
                )));
            }
            if range.steps == 0 && self.sweep == SweepMode::Grid {
                return Err(SimError::InvalidSweep(format!("range `{}` has zero steps", range.path)));
            }
            if let Err(ConfigError::UnknownPath(path)) = base.with_overrides(&[(range.path.as_str(), range.min)]) {
                return Err(SimError::InvalidSweep(format!("unknown parameter path `{path}`")));
            }
        }
        Ok(())
    }

    /// Override sets, one per configuration.
    pub fn configurations(&self) -> Vec<Vec<(String, f64)>> {
        match self.sweep {
            SweepMode::Grid => {
                let mut configs: Vec<Vec<(String, f64)>> = vec![Vec::new()];
                for range in &self.ranges {
                    let values = range.values();
                    configs = configs
                        .iter()
                        .flat_map(|prefix| {
                            values.iter().map(move |&v| {
                                let mut config = prefix.clone();
                                config.push((range.path.clone(), v));
                                config
                            })
                        })
                        .collect();
                }
                configs
            }
            SweepMode::Random { n_configs } => {
                let mut rng = SeededRng::from_seed_str(&self.sweep_seed);
                (0..n_configs)
                    .map(|_| {
                        self.ranges
                            .iter()
                            .map(|r| (r.path.clone(), rng.uniform_range(r.min, r.max)))
                            .collect()
                    })
                    .collect()
            }
        }
    }

    /// Every (configuration, seed) pair, configuration-major.
    pub fn work_items(&self) -> Vec<WorkItem> {
        let seeds: Vec<String> = (0..self.seeds_per_config as u64)
            .map(|k| (self.seed_offset + k).to_string())
            .collect();
        self.configurations()
            .into_iter()
            .enumerate()
            .flat_map(|(config_index, overrides)| {
                let per_config = seeds.len();
                seeds.iter().enumerate().map(move |(k, seed)| WorkItem {
                    run_index: config_index * per_config + k,
                    config_index,
                    seed: seed.clone(),
                    overrides: overrides.clone(),
                })
            })
            .collect()
    }
}

/// Runs every work item of `batch` on top of `base`.
///
/// `progress(done, total, overrides)` is called once per finished run, always
/// from the calling thread. `cancel` is polled before each run starts; runs
/// already in flight finish, the rest are reported as canceled.
pub fn run_batch<F>(
    base: &Parameters,
    batch: &BatchConfig,
    cancel: &AtomicBool,
    mut progress: F,
) -> SimResult<BatchResult>
where
    F: FnMut(usize, usize, &[(String, f64)]),
{
    base.validate()?;
    batch.validate(base)?;
    let items = batch.work_items();
    let total = items.len();
    info!(
        "Running {} work items ({} seeds per configuration) on {} thread(s).",
        total,
        batch.seeds_per_config,
        if batch.threads == 0 { rayon::current_num_threads() } else { batch.threads }
    );

    let outcomes: Vec<RunOutcome> = if batch.threads == 1 {
        let mut outcomes = Vec::with_capacity(total);
        for item in &items {
            if cancel.load(Ordering::SeqCst) {
                outcomes.push(RunOutcome::Canceled);
                continue;
            }
            outcomes.push(run_item(base, item, &batch.window));
            progress(outcomes.len(), total, &item.overrides);
        }
        outcomes
    } else {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(batch.threads).build()?;
        let (tx, rx) = mpsc::channel::<(usize, RunOutcome)>();
        let mut committed: Vec<Option<RunOutcome>> = (0..total).map(|_| None).collect();
        std::thread::scope(|scope| {
            let items = &items;
            let worker = scope.spawn(move || {
                pool.install(|| {
                    items.par_iter().enumerate().for_each_with(tx, |tx, (index, item)| {
                        let outcome = if cancel.load(Ordering::SeqCst) {
                            RunOutcome::Canceled
                        } else {
                            run_item(base, item, &batch.window)
                        };
                        // the receiver outlives every sender
                        let _ = tx.send((index, outcome));
                    })
                })
            });
            // Outcomes are committed here in completion order. Anything that
            // arrives once the flag is up is dropped as canceled.
            let mut done = 0;
            for (index, outcome) in rx {
                if cancel.load(Ordering::SeqCst) || outcome == RunOutcome::Canceled {
                    committed[index] = Some(RunOutcome::Canceled);
                    continue;
                }
                committed[index] = Some(outcome);
                done += 1;
                progress(done, total, &items[index].overrides);
            }
            worker.join().map_err(|_| SimError::WorkerPanic)
        })?;
        committed.into_iter().map(|o| o.unwrap_or(RunOutcome::Canceled)).collect()
    };

    let runs: Vec<RunReport> = items
        .into_iter()
        .zip(outcomes)
        .map(|(item, outcome)| RunReport { item, outcome })
        .collect();
    let result = BatchResult {
        status: if runs.iter().any(|r| r.outcome == RunOutcome::Canceled) {
            BatchStatus::Canceled
        } else {
            BatchStatus::Completed
        },
        runs,
    };
    info!(
        "Batch finished: {} completed, {} failed, {} canceled.",
        result.completed_count(),
        result.failed_count(),
        result.canceled_count()
    );
    Ok(result)
}

/// Runs one item to the end of its window. Errors and panics become
/// [`RunOutcome::Failed`].
fn run_item(base: &Parameters, item: &WorkItem, window: &SampleWindow) -> RunOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| sample_run(base, item, window))) {
        Ok(Ok(snapshots)) => RunOutcome::Completed(snapshots),
        Ok(Err(e)) => {
            warn!("Run {} (seed '{}') failed: {}", item.run_index, item.seed, e);
            RunOutcome::Failed(e.to_string())
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "run panicked".to_string());
            warn!("Run {} (seed '{}') panicked: {}", item.run_index, item.seed, message);
            RunOutcome::Failed(message)
        }
    }
}

fn sample_run(base: &Parameters, item: &WorkItem, window: &SampleWindow) -> SimResult<Vec<Snapshot>> {
    let params = base.with_overrides(&item.overrides)?;
    let run_end = params.general.t_end;
    let mut sim = Simulation::with_seed(params, &item.seed)?;
    sim.set_recording(false);

    let times = window.sample_times(run_end);
    let mut snapshots = Vec::with_capacity(times.len());
    for t in times {
        while sim.time() < t - SAMPLE_EPSILON {
            sim.step()?;
        }
        snapshots.push(sim.snapshot(item.run_index, &item.overrides));
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_params() -> Parameters {
        let mut params = Parameters::default();
        params.general.n_init = 6;
        params.general.n_emt = 2;
        params.general.w_init = 6.0;
        params.general.t_end = 1.0;
        params
    }

    fn k_rep_sweep(threads: usize) -> BatchConfig {
        BatchConfig {
            ranges: vec![ParamRange { path: "cell_prop.k_rep".into(), min: 5.0, max: 15.0, steps: 3 }],
            window: SampleWindow { t_start: 0.0, t_end: None, interval: 0.5 },
            seeds_per_config: 2,
            threads,
            ..BatchConfig::default()
        }
    }

    #[test]
    fn linspace_includes_both_ends() {
        let r = ParamRange { path: "x".into(), min: 1.0, max: 2.0, steps: 5 };
        assert_eq!(r.values(), vec![1.0, 1.25, 1.5, 1.75, 2.0]);
        let single = ParamRange { steps: 1, ..r };
        assert_eq!(single.values(), vec![1.0]);
    }

    #[test]
    fn sample_times_cover_the_window() {
        let w = SampleWindow { t_start: 0.0, t_end: None, interval: 0.5 };
        assert_eq!(w.sample_times(1.0), vec![0.0, 0.5, 1.0]);
        let w = SampleWindow { t_start: 0.3, t_end: Some(10.0), interval: 0.1 };
        assert_eq!(w.sample_times(0.5).len(), 3);
    }

    #[test]
    fn grid_sweep_runs_every_pair() {
        let cancel = AtomicBool::new(false);
        let mut calls = Vec::new();
        let result = run_batch(&small_params(), &k_rep_sweep(2), &cancel, |done, total, _| {
            calls.push((done, total));
        })
        .unwrap();

        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.completed_count(), 6);
        assert_eq!(calls.len(), 6);
        assert_eq!(calls.last(), Some(&(6, 6)));

        let pairs: HashSet<(u64, String)> = result
            .runs
            .iter()
            .map(|r| (r.item.overrides[0].1.to_bits(), r.item.seed.clone()))
            .collect();
        assert_eq!(pairs.len(), 6);

        for report in &result.runs {
            let RunOutcome::Completed(snapshots) = &report.outcome else { panic!("run failed") };
            assert_eq!(snapshots.len(), 3);
            assert!(snapshots.iter().all(|s| s.run_index == report.item.run_index));
            assert!((snapshots[2].time - 1.0).abs() < 1e-9);
        }
        assert_eq!(result.snapshots().count(), 18);
    }

    #[test]
    fn cancel_after_two_runs() {
        let cancel = AtomicBool::new(false);
        let result = run_batch(&small_params(), &k_rep_sweep(1), &cancel, |done, _, _| {
            if done == 2 {
                cancel.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert_eq!(result.status, BatchStatus::Canceled);
        assert_eq!(result.completed_count(), 2);
        assert_eq!(result.canceled_count(), 4);
        assert_eq!(result.runs.len(), 6);
    }

    #[test]
    fn cancel_after_two_runs_on_a_pool() {
        let cancel = AtomicBool::new(false);
        let mut seen = 0;
        let result = run_batch(&small_params(), &k_rep_sweep(3), &cancel, |done, _, _| {
            seen = done;
            if done == 2 {
                cancel.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(result.status, BatchStatus::Canceled);
        assert_eq!(result.completed_count(), 2);
        assert_eq!(result.canceled_count(), 4);
        assert_eq!(result.snapshots().count(), 2 * 3);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let cancel = AtomicBool::new(false);
        let sequential = run_batch(&small_params(), &k_rep_sweep(1), &cancel, |_, _, _| {}).unwrap();
        let parallel = run_batch(&small_params(), &k_rep_sweep(3), &cancel, |_, _, _| {}).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn random_sweep_is_seeded() {
        let batch = BatchConfig {
            ranges: vec![
                ParamRange { path: "cell_types.emt.k_apical".into(), min: 1.0, max: 3.0, steps: 1 },
                ParamRange { path: "general.n_init".into(), min: 4.0, max: 8.0, steps: 1 },
            ],
            sweep: SweepMode::Random { n_configs: 4 },
            ..BatchConfig::default()
        };
        let items = batch.work_items();
        assert_eq!(items.len(), 4);
        assert_eq!(items, batch.work_items());
        for item in &items {
            assert!((1.0..3.0).contains(&item.overrides[0].1));
            assert!((4.0..8.0).contains(&item.overrides[1].1));
        }
    }

    #[test]
    fn failing_items_do_not_stop_the_batch() {
        let batch = BatchConfig {
            // r_hard above r_soft is rejected by validation
            ranges: vec![ParamRange { path: "cell_prop.r_hard".into(), min: 0.2, max: 2.0, steps: 2 }],
            threads: 1,
            ..BatchConfig::default()
        };
        let cancel = AtomicBool::new(false);
        let result = run_batch(&small_params(), &batch, &cancel, |_, _, _| {}).unwrap();
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.completed_count(), 1);
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn rejects_bad_sweeps() {
        let base = small_params();
        let unknown = BatchConfig {
            ranges: vec![ParamRange { path: "general.bogus".into(), min: 0.0, max: 1.0, steps: 2 }],
            ..BatchConfig::default()
        };
        assert!(matches!(unknown.validate(&base), Err(SimError::InvalidSweep(_))));
        let no_seeds = BatchConfig { seeds_per_config: 0, ..BatchConfig::default() };
        assert!(no_seeds.validate(&base).is_err());
    }

    #[test]
    fn batch_file_parses() {
        let text = r#"
            seeds_per_config = 3
            seed_offset = 10
            threads = 1

            [sweep]
            mode = "random"
            n_configs = 5

            [window]
            t_start = 1.0
            interval = 2.0

            [[ranges]]
            path = "cell_types.emt.running_speed"
            min = 0.1
            max = 0.9
        "#;
        let batch: BatchConfig = toml::from_str(text).unwrap();
        assert_eq!(batch.sweep, SweepMode::Random { n_configs: 5 });
        assert_eq!(batch.ranges[0].steps, 1);
        let items = batch.work_items();
        assert_eq!(items.len(), 15);
        assert_eq!(items[0].seed, "10");
        assert_eq!(items[2].seed, "12");
    }
}

use crate::cell::{create_cell, Cell, CellType};
use crate::error::{SimError, SimResult};
use crate::geometry::BasalGeometry;
use crate::rng::SeededRng;
use crate::sim_params::SimParams;
use crate::state::{ApicalLink, BasalLink, SimulationState};
use crate::timestep::Integrator;
use emt_common::{CellRow, Parameters, Snapshot, Vec2};
use log::{debug, info};

/// Tolerance on `t >= t_end`, absorbing the rounding of `step_count * dt`.
const TIME_EPSILON: f64 = 1e-9;

/// One simulation instance: parameters, the membrane derived from them, a
/// private RNG and the state it mutates.
///
/// `(parameters, seed)` fully determines the trajectory. Nothing is shared
/// between instances, so batch workers each own one.
pub struct Simulation {
    params: Parameters,
    sim_params: SimParams,
    geometry: BasalGeometry,
    seed: String,
    rng: SeededRng,
    state: SimulationState,
    integrator: Integrator,
    /// Whether `step` records snapshots every `snapshot_interval`.
    record: bool,
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Validates `params` and initialises a run seeded from
    /// `general.random_seed`.
    pub fn new(params: Parameters) -> SimResult<Self> {
        let seed = params.general.random_seed.clone();
        Self::with_seed(params, &seed)
    }

    /// Same as [`Simulation::new`] with an explicit seed text.
    pub fn with_seed(params: Parameters, seed: &str) -> SimResult<Self> {
        params.validate()?;
        let sim_params = SimParams::from_params(&params);
        let geometry = BasalGeometry::from_config(&params.general);
        debug!("Simulation parameters: {:#?}", sim_params);

        let mut sim = Self {
            record: sim_params.snapshot_every.is_some(),
            params,
            sim_params,
            geometry,
            seed: seed.to_string(),
            rng: SeededRng::from_seed_str(seed),
            state: SimulationState::default(),
            integrator: Integrator::new(),
            recorded_snapshots: Vec::new(),
        };
        sim.init();
        Ok(sim)
    }

    /// Re-seeds the RNG and rebuilds the initial population.
    ///
    /// Nuclei are drawn uniformly in a band of arc-length width `w_init`
    /// centred on the origin and height `h_init` above the membrane, then
    /// sorted along the membrane. The middle `n_emt` cells are EMT cells.
    /// Adjacent cells are joined by one apical and one basal link.
    pub fn init(&mut self) {
        self.rng = SeededRng::from_seed_str(&self.seed);
        self.state = SimulationState::default();
        self.recorded_snapshots.clear();

        let g = &self.params.general;
        let (n, n_emt) = (g.n_init, g.n_emt);
        let mut placed: Vec<(f64, Vec2)> = Vec::with_capacity(n);
        for _ in 0..n {
            let l = self.rng.uniform_range(-0.5 * g.w_init, 0.5 * g.w_init);
            let h = self.rng.uniform_range(0.0, g.h_init);
            let pos = self.geometry.to_cartesian(l, h);
            placed.push((self.geometry.arc_length_refined(pos), pos));
        }
        placed.sort_by(|a, b| a.0.total_cmp(&b.0));

        let emt_start = (n - n_emt) / 2;
        for (i, (_, pos)) in placed.into_iter().enumerate() {
            let cell_type = if (emt_start..emt_start + n_emt).contains(&i) {
                CellType::Emt
            } else {
                CellType::Control
            };
            let cell = create_cell(&self.params, &self.geometry, &mut self.rng, &mut self.state, pos, cell_type, None);
            self.state.push_cell(cell);
        }

        for i in 1..n {
            let rest_length = self.state.cells[i - 1].apical.distance(self.state.cells[i].apical);
            self.state.apical_links.push(ApicalLink { l: i - 1, r: i, rest_length });
            self.state.basal_links.push(BasalLink { l: i - 1, r: i });
        }

        info!(
            "Initialised {} cells ({} EMT) on a {} membrane with seed '{}'.",
            n,
            n_emt,
            self.geometry.kind(),
            self.seed
        );
        if self.record {
            self.record_snapshot();
        }
    }

    /// Advances one full step and records a snapshot when due.
    ///
    /// Fails when the state stops being finite; the state is left as is.
    pub fn step(&mut self) -> SimResult<()> {
        self.integrator
            .step(&mut self.state, &self.params, &self.sim_params, &self.geometry, &mut self.rng);

        if !self.state.is_finite() {
            return Err(SimError::NonFinite { step: self.state.step_count, t: self.state.t });
        }
        if let (true, Some(every)) = (self.record, self.sim_params.snapshot_every) {
            if self.state.step_count % every == 0 {
                self.record_snapshot();
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state.t >= self.params.general.t_end - TIME_EPSILON
    }

    pub fn run_to_end(&mut self) -> SimResult<()> {
        while !self.is_complete() {
            self.step()?;
        }
        Ok(())
    }

    /// Restarts from `init` with the current seed.
    pub fn reset(&mut self) {
        self.init();
    }

    pub fn reset_with_seed(&mut self, seed: &str) {
        self.seed = seed.to_string();
        self.init();
    }

    /// Swaps in new parameters without touching the current state. The
    /// membrane and step constants are rebuilt from them.
    pub fn set_params(&mut self, params: Parameters) -> SimResult<()> {
        params.validate()?;
        self.sim_params = SimParams::from_params(&params);
        self.geometry = BasalGeometry::from_config(&params.general);
        self.params = params;
        Ok(())
    }

    /// Turns per-interval recording on or off. Turning it off drops what was
    /// recorded so far.
    pub fn set_recording(&mut self, record: bool) {
        self.record = record && self.sim_params.snapshot_every.is_some();
        if !self.record {
            self.recorded_snapshots.clear();
        }
    }

    /// Read-only view for renderers and statistics.
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn sim_params(&self) -> &SimParams {
        &self.sim_params
    }

    pub fn geometry(&self) -> &BasalGeometry {
        &self.geometry
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn time(&self) -> f64 {
        self.state.t
    }

    pub fn current_cell_count(&self) -> usize {
        self.state.cell_count()
    }

    /// Export record of the current state.
    pub fn snapshot(&self, run_index: usize, overrides: &[(String, f64)]) -> Snapshot {
        let t = self.state.t;
        Snapshot {
            run_index,
            seed: self.seed.clone(),
            time: t,
            overrides: overrides.to_vec(),
            cells: self.state.cells.iter().map(|c| cell_row(c, t)).collect(),
        }
    }

    fn record_snapshot(&mut self) {
        let snapshot = self.snapshot(0, &[]);
        self.recorded_snapshots.push(snapshot);
    }

    pub fn recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }

    pub fn take_recorded_snapshots(&mut self) -> Vec<Snapshot> {
        std::mem::take(&mut self.recorded_snapshots)
    }
}

fn cell_row(cell: &Cell, t: f64) -> CellRow {
    CellRow {
        id: cell.id,
        cell_type: cell.cell_type.name().to_string(),
        nucleus: cell.nucleus,
        apical: cell.apical,
        basal: cell.basal,
        phase: cell.phase.name().to_string(),
        has_apical: cell.has_apical,
        has_basal: cell.has_basal,
        running: cell.running,
        age: cell.age(t),
        eta_a: cell.eta_a,
        eta_b: cell.eta_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scenario_params() -> Parameters {
        let mut params = Parameters::default();
        let g = &mut params.general;
        g.n_init = 10;
        g.n_emt = 2;
        g.random_seed = "test".to_string();
        g.dt = 0.1;
        g.n_substeps = 4;
        g.t_end = 10.0;
        g.w_init = 10.0;
        // every control division resets in place
        params.cell_types.control.prob_out_div = 1.0;
        params
    }

    #[test]
    fn hundred_steps_keep_every_cell() {
        let mut sim = Simulation::new(scenario_params()).unwrap();
        let mut last_t = sim.time();
        for _ in 0..100 {
            sim.step().unwrap();
            assert!(sim.time() >= last_t);
            last_t = sim.time();
        }
        assert_eq!(sim.state().cells.len(), 10);
        assert!((sim.time() - 10.0).abs() < 1e-9);
        assert!(sim.is_complete());

        let ids: HashSet<u64> = sim.state().cells.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 10);
        assert!(sim.state().links_are_valid());
    }

    #[test]
    fn divisions_grow_one_chain_over_a_full_run() {
        let mut params = Parameters::default();
        params.general.n_init = 10;
        params.general.n_emt = 2;
        params.general.random_seed = "test".to_string();
        params.general.w_init = 10.0;
        // longer than any backdated control lifespan
        params.general.t_end = 30.0;
        let mut sim = Simulation::new(params).unwrap();
        sim.run_to_end().unwrap();

        let state = sim.state();
        // each of the 8 control cells splits at least once
        assert!(state.cells.len() >= 18, "cells = {}", state.cells.len());
        let ids: HashSet<u64> = state.cells.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), state.cells.len());
        assert!(state.links_are_valid());
        assert_eq!(state.apical_links.len(), state.cells.len() - 1);
        assert_eq!(state.basal_links.len(), state.cells.len() - 1);

        // walking the apical chain from its head visits every cell once
        let head = (0..state.cells.len()).find(|i| state.apical_links.iter().all(|l| l.r != *i)).unwrap();
        let mut visited = vec![head];
        while visited.len() <= state.cells.len() {
            let Some(link) = state.apical_links.iter().find(|l| l.l == *visited.last().unwrap()) else { break };
            visited.push(link.r);
        }
        assert_eq!(visited.len(), state.cells.len());
    }

    #[test]
    fn init_places_a_sorted_chain_with_middle_emt_block() {
        let mut params = scenario_params();
        params.general.n_init = 9;
        params.general.n_emt = 3;
        let sim = Simulation::new(params).unwrap();
        let state = sim.state();

        let types: Vec<CellType> = state.cells.iter().map(|c| c.cell_type).collect();
        let emt: Vec<usize> = (0..9).filter(|&i| types[i] == CellType::Emt).collect();
        assert_eq!(emt, vec![3, 4, 5]);

        let arcs: Vec<f64> = state.cells.iter().map(|c| sim.geometry().arc_length(c.nucleus)).collect();
        assert!(arcs.windows(2).all(|w| w[0] <= w[1]));
        assert!(arcs.iter().all(|s| s.abs() <= 5.0));

        assert_eq!(state.apical_links.len(), 8);
        assert_eq!(state.basal_links.len(), 8);
        assert!(state.apical_links.iter().enumerate().all(|(i, l)| l.l == i && l.r == i + 1));
        assert!(state.cells.iter().all(|c| c.basal.y == 0.0));
    }

    #[test]
    fn same_seed_same_trajectory() {
        let run = |seed: &str| {
            let mut sim = Simulation::with_seed(scenario_params(), seed).unwrap();
            for _ in 0..30 {
                sim.step().unwrap();
            }
            (sim.state().clone(), sim.snapshot(0, &[]))
        };
        let (a, snap_a) = run("alpha");
        let (b, snap_b) = run("alpha");
        assert_eq!(a, b);
        assert_eq!(snap_a, snap_b);
        let (c, _) = run("beta");
        assert_ne!(a, c);
    }

    #[test]
    fn reset_replays_the_run() {
        let mut sim = Simulation::new(scenario_params()).unwrap();
        for _ in 0..15 {
            sim.step().unwrap();
        }
        let first = sim.snapshot(0, &[]);
        sim.reset();
        assert_eq!(sim.time(), 0.0);
        for _ in 0..15 {
            sim.step().unwrap();
        }
        assert_eq!(sim.snapshot(0, &[]), first);

        sim.reset_with_seed("other");
        assert_eq!(sim.seed(), "other");
        assert_eq!(sim.state().step_count, 0);
    }

    #[test]
    fn records_snapshots_on_interval() {
        let mut params = scenario_params();
        params.general.t_end = 2.0;
        params.general.snapshot_interval = 0.5;
        let mut sim = Simulation::new(params).unwrap();
        sim.run_to_end().unwrap();
        let times: Vec<f64> = sim.recorded_snapshots().iter().map(|s| s.time).collect();
        assert_eq!(times.len(), 5);
        for (t, expected) in times.iter().zip([0.0, 0.5, 1.0, 1.5, 2.0]) {
            assert!((t - expected).abs() < 1e-9);
        }
        let rows = &sim.recorded_snapshots()[4].cells;
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.phase.len() <= 2 && r.age >= 0.0));

        sim.set_recording(false);
        assert!(sim.recorded_snapshots().is_empty());
    }

    #[test]
    fn invalid_parameters_are_rejected_up_front() {
        let mut params = scenario_params();
        params.general.dt = 0.0;
        assert!(matches!(Simulation::new(params), Err(SimError::Config(_))));

        let mut sim = Simulation::new(scenario_params()).unwrap();
        let mut bad = scenario_params();
        bad.cell_prop.r_hard = 2.0;
        assert!(sim.set_params(bad).is_err());
    }

    #[test]
    fn curved_membranes_keep_attached_cells_on_the_curve() {
        for (k1, k2) in [(0.05, 0.05), (0.04, 0.08)] {
            let mut params = scenario_params();
            params.general.curvature_1 = k1;
            params.general.curvature_2 = k2;
            let mut sim = Simulation::new(params).unwrap();
            for _ in 0..20 {
                sim.step().unwrap();
            }
            let geometry = sim.geometry();
            for cell in sim.state().cells.iter().filter(|c| c.has_basal) {
                assert!(geometry.project(cell.basal).distance(cell.basal) < 1e-6);
            }
        }
    }

    #[test]
    fn set_params_rebuilds_the_membrane() {
        let mut sim = Simulation::new(scenario_params()).unwrap();
        sim.step().unwrap();
        let mut curved = scenario_params();
        curved.general.curvature_1 = 0.1;
        curved.general.curvature_2 = 0.1;
        sim.set_params(curved).unwrap();
        assert_eq!(sim.geometry().kind(), "circle");
        assert_eq!(sim.state().step_count, 1);
        assert_eq!(sim.current_cell_count(), 10);
    }
}

use crate::broadphase::SweepAndPrune;
use crate::cell::{update_cell_phase, Cell, Phase};
use crate::constraints::apply_constraints;
use crate::events::{process_divisions, process_events};
use crate::forces::{compute_forces, update_rest_lengths, Forces};
use crate::geometry::BasalGeometry;
use crate::rng::SeededRng;
use crate::sim_params::SimParams;
use crate::state::SimulationState;
use emt_common::{Parameters, RunningMode, Vec2};
use log::trace;

/// Scratch buffers reused across steps.
#[derive(Debug, Default)]
pub struct Integrator {
    sweep: SweepAndPrune,
    forces: Forces,
    positions: Vec<Vec2>,
}

impl Integrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances `state` by one full step of `sp.dt`.
    ///
    /// Discrete updates (phases, divisions, events, rest lengths) happen
    /// once; forces, integration and constraints run `n_substeps` times.
    pub fn step(
        &mut self,
        state: &mut SimulationState,
        params: &Parameters,
        sp: &SimParams,
        geometry: &BasalGeometry,
        rng: &mut SeededRng,
    ) {
        update_phases(state, params);
        let appended = process_divisions(state, params, geometry, rng);
        if appended > 0 {
            trace!("step {}: {} divisions, {} cells", state.step_count, appended, state.cells.len());
        }
        process_events(state, rng);
        update_rest_lengths(state, params, sp.dt);

        for _ in 0..sp.n_substeps {
            state.t += sp.dt_sub;
            self.positions.clear();
            self.positions.extend(state.cells.iter().map(|c| c.nucleus));
            let pairs = self.sweep.pairs_within(&self.positions, sp.interaction_cutoff);
            compute_forces(state, params, pairs, &mut self.forces);
            integrate(state, &self.forces, sp, geometry, rng);
            apply_constraints(state, params, geometry, &mut self.sweep);
        }

        state.step_count += 1;
        state.t = state.step_count as f64 * sp.dt;
    }
}

/// Moves the phase machine forward. An INM cell leaving G1 releases its
/// basal spring until the cycle restarts.
fn update_phases(state: &mut SimulationState, params: &Parameters) {
    let t = state.t;
    for cell in &mut state.cells {
        let tp = cell.cell_type.params(&params.cell_types);
        let next = update_cell_phase(cell, t, tp);
        if tp.inm && cell.phase == Phase::G1 && next != Phase::G1 {
            cell.stiffness.basal = 0.0;
        }
        cell.phase = next;
    }
}

/// Explicit Euler on all three points, `dx = dt_sub * F / mu`, plus
/// Gaussian noise on the nucleus. Running basal points move kinematically.
fn integrate(
    state: &mut SimulationState,
    forces: &Forces,
    sp: &SimParams,
    geometry: &BasalGeometry,
    rng: &mut SeededRng,
) {
    let scale = sp.dt_sub * sp.inv_mu;
    for (i, cell) in state.cells.iter_mut().enumerate() {
        cell.nucleus += forces.nucleus[i] * scale;
        cell.apical += forces.apical[i] * scale;
        if cell.running {
            cell.basal = running_basal(cell, geometry, sp.dt_sub);
        } else {
            cell.basal += forces.basal[i] * scale;
        }
        if sp.noise_std > 0.0 {
            cell.nucleus += Vec2::new(rng.gaussian(0.0, sp.noise_std), rng.gaussian(0.0, sp.noise_std));
        }
    }
}

/// Next basal position of a running cell, at most `running_speed * dt`
/// along the membrane.
fn running_basal(cell: &Cell, geometry: &BasalGeometry, dt: f64) -> Vec2 {
    let max_step = cell.running_speed * dt;
    let s = geometry.arc_length_refined(cell.basal);
    let step = match cell.running_mode {
        RunningMode::Directed => cell.running_direction * max_step,
        RunningMode::FollowNucleus => {
            let target = geometry.arc_length_refined(cell.nucleus);
            geometry.arc_distance(s, target).clamp(-max_step, max_step)
        }
    };
    geometry.point_at_arc_length(s + step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{create_cell, CellType};

    fn single_cell(params: &Parameters, geometry: &BasalGeometry) -> (SimulationState, SeededRng) {
        let mut rng = SeededRng::from_seed_str("timestep");
        let mut state = SimulationState::default();
        let cell = create_cell(params, geometry, &mut rng, &mut state, Vec2::new(0.0, 1.0), CellType::Emt, None);
        state.push_cell(cell);
        (state, rng)
    }

    #[test]
    fn time_advances_by_whole_steps() {
        let params = Parameters::default();
        let sp = SimParams::from_params(&params);
        let geometry = BasalGeometry::from_config(&params.general);
        let (mut state, mut rng) = single_cell(&params, &geometry);
        let mut integrator = Integrator::new();
        for k in 1..=25u64 {
            integrator.step(&mut state, &params, &sp, &geometry, &mut rng);
            assert_eq!(state.step_count, k);
            assert_eq!(state.t, k as f64 * params.general.dt);
        }
    }

    #[test]
    fn directed_runner_slides_along_membrane() {
        let mut params = Parameters::default();
        params.cell_prop.diffusion = 0.0;
        let sp = SimParams::from_params(&params);
        let geometry = BasalGeometry::new(0.1, 0.1, 360);
        let (mut state, _) = single_cell(&params, &geometry);
        let cell = &mut state.cells[0];
        cell.running = true;
        cell.running_direction = -1.0;
        cell.running_speed = 0.5;
        let s0 = geometry.arc_length(cell.basal);
        let next = running_basal(cell, &geometry, 0.2);
        let s1 = geometry.arc_length(next);
        assert!((geometry.arc_distance(s0, s1) + 0.1).abs() < 1e-9);
        assert!((geometry.project(next) - next).length() < 1e-9);
        assert!(sp.noise_std == 0.0);
    }

    #[test]
    fn follower_chases_its_nucleus() {
        let params = Parameters::default();
        let geometry = BasalGeometry::new(0.0, 0.0, 360);
        let (mut state, _) = single_cell(&params, &geometry);
        let cell = &mut state.cells[0];
        cell.running = true;
        cell.running_mode = RunningMode::FollowNucleus;
        cell.running_speed = 1.0;
        cell.nucleus = Vec2::new(0.05, 1.0);
        assert!((running_basal(cell, &geometry, 0.1).x - 0.05).abs() < 1e-12);
        cell.nucleus = Vec2::new(3.0, 1.0);
        assert!((running_basal(cell, &geometry, 0.1).x - 0.1).abs() < 1e-12);
    }

    #[test]
    fn inm_releases_basal_spring_after_g1() {
        let params = Parameters::default();
        let geometry = BasalGeometry::from_config(&params.general);
        let (mut state, _) = single_cell(&params, &geometry);
        let tp = &params.cell_types.emt;
        state.cells[0].division_time = 10.0;
        state.t = 10.0 - tp.mitosis_duration - tp.g2_duration + 0.01;
        update_phases(&mut state, &params);
        assert_eq!(state.cells[0].phase, Phase::G2);
        assert_eq!(state.cells[0].stiffness.basal, 0.0);
    }
}

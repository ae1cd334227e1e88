//! Force laws acting on the three points of every cell, and the per-step
//! evolution of the rest lengths those laws depend on.
//!
//! All forces are accumulated into [`Forces`] in a fixed order (cells by
//! index, then pairs in broad-phase order, then links) so that a run is
//! reproducible bit for bit.

use crate::cell::{relaxed_rest_length, Phase};
use crate::state::SimulationState;
use emt_common::{Parameters, Vec2};

/// Per-point force accumulators, indexed like `SimulationState::cells`.
#[derive(Debug, Default, Clone)]
pub struct Forces {
    pub nucleus: Vec<Vec2>,
    pub apical: Vec<Vec2>,
    pub basal: Vec<Vec2>,
}

impl Forces {
    /// Zeroes the accumulators and sizes them for `n` cells.
    pub fn reset(&mut self, n: usize) {
        for buf in [&mut self.nucleus, &mut self.apical, &mut self.basal] {
            buf.clear();
            buf.resize(n, Vec2::zero());
        }
    }
}

/// Hookean spring between `from` and `to`: positive deviation pulls `from`
/// towards `to`. Returns the force on `from`.
#[inline(always)]
fn spring(from: Vec2, to: Vec2, stiffness: f64, rest: f64) -> Vec2 {
    let d = to - from;
    let len = d.length();
    d.normalize_or_zero() * (stiffness * (len - rest))
}

/// Accumulates every force for the current positions.
///
/// `pairs` must hold the broad-phase candidates for soft repulsion.
pub fn compute_forces(
    state: &SimulationState,
    params: &Parameters,
    pairs: &[(usize, usize)],
    forces: &mut Forces,
) {
    forces.reset(state.cells.len());
    add_cytoskeleton_springs(state, params, forces);
    add_repulsion(state, params, pairs, forces);
    add_straightness(state, forces);
    add_junctions(state, forces);
}

/// Apical-nucleus and basal-nucleus springs.
///
/// The basal point only feels `basal_damping_ratio` of the reaction, and
/// none at all while running, since it then moves kinematically.
fn add_cytoskeleton_springs(state: &SimulationState, params: &Parameters, forces: &mut Forces) {
    let damping = params.cell_prop.basal_damping_ratio;
    for (i, cell) in state.cells.iter().enumerate() {
        let k = &cell.stiffness;

        let f_apical = spring(cell.nucleus, cell.apical, k.apical, cell.r_soft + cell.eta_a);
        forces.nucleus[i] += f_apical;
        forces.apical[i] -= f_apical;

        let f_basal = spring(cell.nucleus, cell.basal, k.basal, cell.r_soft + cell.eta_b);
        forces.nucleus[i] += f_basal;
        if !cell.running {
            forces.basal[i] -= f_basal * damping;
        }
    }
}

/// Linear soft-sphere repulsion between overlapping nuclei.
fn add_repulsion(
    state: &SimulationState,
    params: &Parameters,
    pairs: &[(usize, usize)],
    forces: &mut Forces,
) {
    let k_rep = params.cell_prop.k_rep;
    for &(i, j) in pairs {
        let (a, b) = (&state.cells[i], &state.cells[j]);
        let d = a.nucleus - b.nucleus;
        let reach = a.r_soft + b.r_soft;
        let dist = d.length();
        if dist >= reach {
            continue;
        }
        let f = d.normalize() * (k_rep * (reach - dist));
        forces.nucleus[i] += f;
        forces.nucleus[j] -= f;
    }
}

/// Pulls each apical point towards the midpoint of its two apical
/// neighbours; the neighbours share the reaction equally.
fn add_straightness(state: &SimulationState, forces: &mut Forces) {
    let neighbors = state.apical_neighbors();
    for (i, cell) in state.cells.iter().enumerate() {
        if !cell.has_straightness || !cell.has_apical {
            continue;
        }
        let (Some(l), Some(r)) = neighbors[i] else { continue };
        let (left, right) = (&state.cells[l], &state.cells[r]);
        if !left.has_apical || !right.has_apical {
            continue;
        }
        let mid = (left.apical + right.apical) * 0.5;
        let f = (mid - cell.apical) * cell.stiffness.straightness;
        forces.apical[i] += f;
        forces.apical[l] -= f * 0.5;
        forces.apical[r] -= f * 0.5;
    }
}

/// Springs along apical links between two apically adherent cells.
fn add_junctions(state: &SimulationState, forces: &mut Forces) {
    for link in &state.apical_links {
        let (a, b) = (&state.cells[link.l], &state.cells[link.r]);
        if !a.has_apical || !b.has_apical {
            continue;
        }
        let k = 0.5 * (a.stiffness.apical_junction + b.stiffness.apical_junction);
        let f = spring(a.apical, b.apical, k, link.rest_length);
        forces.apical[link.l] += f;
        forces.apical[link.r] -= f;
    }
}

/// Relaxes cytoskeleton rest lengths towards their targets and decays the
/// apical junction rest lengths. Called once per full step.
pub fn update_rest_lengths(state: &mut SimulationState, params: &Parameters, dt: f64) {
    let prop = &params.cell_prop;
    let relax = 1.0 - (-prop.k_cytos * dt).exp();

    for cell in &mut state.cells {
        let tp = cell.cell_type.params(&params.cell_types);
        let target_a = if cell.phase == Phase::Mitosis && tp.inm {
            0.0
        } else {
            relaxed_rest_length(cell.apical.distance(cell.nucleus), cell.r_soft)
        };
        let target_b = relaxed_rest_length(cell.basal.distance(cell.nucleus), cell.r_soft);

        cell.eta_a += (target_a - cell.eta_a) * relax;
        cell.eta_b += (target_b - cell.eta_b) * relax;

        let total = cell.eta_a + cell.eta_b;
        if total > prop.max_cytoskeleton_length {
            let scale = prop.max_cytoskeleton_length / total;
            cell.eta_a *= scale;
            cell.eta_b *= scale;
        }
    }

    for link in &mut state.apical_links {
        let k = 0.5
            * (state.cells[link.l].stiffness.apical_junction
                + state.cells[link.r].stiffness.apical_junction);
        link.rest_length *= (-k * dt).exp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{create_cell, CellType};
    use crate::geometry::BasalGeometry;
    use crate::rng::SeededRng;
    use crate::state::ApicalLink;

    fn line_of_cells(params: &Parameters, xs: &[f64]) -> SimulationState {
        let geometry = BasalGeometry::from_config(&params.general);
        let mut rng = SeededRng::from_seed_str("forces");
        let mut state = SimulationState::default();
        for &x in xs {
            let cell = create_cell(params, &geometry, &mut rng, &mut state, Vec2::new(x, 1.0), CellType::Control, None);
            state.push_cell(cell);
        }
        state
    }

    fn total(forces: &Forces) -> Vec2 {
        forces
            .nucleus
            .iter()
            .chain(&forces.apical)
            .chain(&forces.basal)
            .fold(Vec2::zero(), |acc, &f| acc + f)
    }

    #[test]
    fn relaxed_cells_feel_no_spring() {
        let params = Parameters::default();
        let state = line_of_cells(&params, &[0.0]);
        let mut forces = Forces::default();
        compute_forces(&state, &params, &[], &mut forces);
        assert!(forces.nucleus[0].length() < 1e-12);
        assert!(forces.apical[0].length() < 1e-12);
    }

    #[test]
    fn repulsion_pushes_overlapping_nuclei_apart() {
        let params = Parameters::default();
        let state = line_of_cells(&params, &[0.0, 0.6]);
        let mut forces = Forces::default();
        compute_forces(&state, &params, &[(0, 1)], &mut forces);
        assert!(forces.nucleus[0].x < 0.0);
        assert!(forces.nucleus[1].x > 0.0);
        assert!((forces.nucleus[0] + forces.nucleus[1]).length() < 1e-12);
    }

    #[test]
    fn straightness_and_junctions_conserve_momentum() {
        let mut params = Parameters::default();
        params.cell_prop.basal_damping_ratio = 1.0;
        let mut state = line_of_cells(&params, &[0.0, 1.0, 2.0]);
        state.cells[1].apical.y += 0.5;
        for i in 0..2 {
            state.apical_links.push(ApicalLink { l: i, r: i + 1, rest_length: 0.5 });
        }
        let mut forces = Forces::default();
        compute_forces(&state, &params, &[], &mut forces);
        assert!(forces.apical[1].y < 0.0);
        assert!(total(&forces).length() < 1e-9);
    }

    #[test]
    fn rest_lengths_relax_and_respect_cap() {
        let mut params = Parameters::default();
        params.cell_prop.max_cytoskeleton_length = 1.0;
        let mut state = line_of_cells(&params, &[0.0, 1.0]);
        state.apical_links.push(ApicalLink { l: 0, r: 1, rest_length: 1.0 });

        update_rest_lengths(&mut state, &params, 0.1);
        for cell in &state.cells {
            assert!(cell.eta_a + cell.eta_b <= 1.0 + 1e-12);
            assert!(cell.eta_a >= 0.0 && cell.eta_b >= 0.0);
        }
        let k = params.cell_types.control.k_apical_junction;
        assert!((state.apical_links[0].rest_length - (-k * 0.1f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn mitotic_inm_cells_retract_apically() {
        let params = Parameters::default();
        let mut state = line_of_cells(&params, &[0.0]);
        state.cells[0].phase = Phase::Mitosis;
        let before = state.cells[0].eta_a;
        update_rest_lengths(&mut state, &params, 0.5);
        assert!(state.cells[0].eta_a < before);
    }
}

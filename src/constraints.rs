//! Positional corrections applied after every substep, in order:
//! hard-sphere separation, basal ordering, maximum basal spacing and
//! projection back onto the membrane. Each is a single sequential pass.

use crate::broadphase::SweepAndPrune;
use crate::geometry::BasalGeometry;
use crate::state::SimulationState;
use emt_common::{Parameters, Vec2};

/// Minimum arc-length lead the right end of a basal link keeps over the left.
const ORDER_EPSILON: f64 = 1e-6;

pub fn apply_constraints(
    state: &mut SimulationState,
    params: &Parameters,
    geometry: &BasalGeometry,
    sweep: &mut SweepAndPrune,
) {
    let max_hard = state.cells.iter().map(|c| c.r_hard).fold(0.0, f64::max);
    let positions: Vec<Vec2> = state.cells.iter().map(|c| c.nucleus).collect();
    let pairs = sweep.pairs_within(&positions, 2.0 * max_hard);
    project_hard_spheres(state, pairs);
    project_basal_order(state, geometry);
    project_max_basal_distance(state, geometry, params.cell_prop.max_basal_junction_dist);
    project_basal_curve(state, geometry);
}

/// Separates every overlapping pair of nuclei to exactly their combined hard
/// radius, each moving half the penetration depth.
pub fn project_hard_spheres(state: &mut SimulationState, pairs: &[(usize, usize)]) {
    for &(i, j) in pairs {
        let d = state.cells[i].nucleus - state.cells[j].nucleus;
        let min_dist = state.cells[i].r_hard + state.cells[j].r_hard;
        let dist = d.length();
        if dist >= min_dist {
            continue;
        }
        let correction = d.normalize() * (0.5 * (min_dist - dist));
        state.cells[i].nucleus += correction;
        state.cells[j].nucleus -= correction;
    }
}

/// Keeps the right end of every basal link strictly ahead of its left end
/// along the membrane. On closed membranes "ahead" is measured the short way
/// round, so a link straddling the wrap point is not flipped.
pub fn project_basal_order(state: &mut SimulationState, geometry: &BasalGeometry) {
    for k in 0..state.basal_links.len() {
        let link = state.basal_links[k];
        let Some((s_l, s_r, gap)) = basal_gap(state, geometry, link.l, link.r) else { continue };
        if gap > 0.0 {
            continue;
        }
        let shift = 0.5 * (ORDER_EPSILON - gap);
        state.cells[link.l].basal = geometry.point_at_arc_length(s_l - shift);
        state.cells[link.r].basal = geometry.point_at_arc_length(s_r + shift);
    }
}

/// Pulls linked basal points together when they drift further apart along
/// the membrane than `max_dist`.
pub fn project_max_basal_distance(state: &mut SimulationState, geometry: &BasalGeometry, max_dist: f64) {
    for k in 0..state.basal_links.len() {
        let link = state.basal_links[k];
        let Some((s_l, s_r, gap)) = basal_gap(state, geometry, link.l, link.r) else { continue };
        if gap <= max_dist {
            continue;
        }
        let shift = 0.5 * (gap - max_dist);
        state.cells[link.l].basal = geometry.point_at_arc_length(s_l + shift);
        state.cells[link.r].basal = geometry.point_at_arc_length(s_r - shift);
    }
}

/// Puts every basally adherent cell's basal point back on the membrane.
pub fn project_basal_curve(state: &mut SimulationState, geometry: &BasalGeometry) {
    for cell in state.cells.iter_mut().filter(|c| c.has_basal) {
        cell.basal = geometry.project(cell.basal);
    }
}

/// Arc lengths of both ends and their signed separation, or `None` unless
/// both cells are attached to the membrane.
fn basal_gap(state: &SimulationState, geometry: &BasalGeometry, l: usize, r: usize) -> Option<(f64, f64, f64)> {
    let (left, right) = (&state.cells[l], &state.cells[r]);
    if !left.has_basal || !right.has_basal {
        return None;
    }
    let s_l = geometry.arc_length_refined(left.basal);
    let s_r = geometry.arc_length_refined(right.basal);
    Some((s_l, s_r, geometry.arc_distance(s_l, s_r)))
}

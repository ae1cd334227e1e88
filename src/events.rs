//! Discrete events: adhesion loss, onset of running, and division with
//! link rewiring.

use crate::cell::{create_cell, CellType, EventTimers, Phase};
use crate::geometry::BasalGeometry;
use crate::rng::SeededRng;
use crate::state::{ApicalLink, BasalLink, SimulationState};
use emt_common::Parameters;
use log::debug;

/// Nuclei of a dividing pair are pushed apart by this fraction of `r_soft`.
pub const DIVISION_OFFSET_FRACTION: f64 = 0.1;

/// Fires every event whose timer has been crossed. Each event fires at most
/// once per cell.
pub fn process_events(state: &mut SimulationState, rng: &mut SeededRng) {
    let t = state.t;
    for cell in &mut state.cells {
        let timers = cell.timers;
        if cell.has_apical && t >= timers.time_a {
            cell.has_apical = false;
            debug!("t={:.2}: cell {} lost apical adhesion", t, cell.id);
        }
        if cell.has_basal && t >= timers.time_b {
            cell.has_basal = false;
            debug!("t={:.2}: cell {} lost basal adhesion", t, cell.id);
        }
        if cell.has_straightness && t >= timers.time_s {
            cell.has_straightness = false;
            debug!("t={:.2}: cell {} lost straightness", t, cell.id);
        }
        if cell.will_run && !cell.running && t >= timers.time_p {
            cell.running = true;
            cell.running_direction = if rng.bool(0.5) { 1.0 } else { -1.0 };
            debug!(
                "t={:.2}: cell {} started running ({:?}, direction {})",
                t, cell.id, cell.running_mode, cell.running_direction
            );
        }
    }
}

/// Handles every cell that has reached [`Phase::Division`]. Daughters
/// appended here are not revisited in the same step.
///
/// Returns the number of cells appended.
pub fn process_divisions(
    state: &mut SimulationState,
    params: &Parameters,
    geometry: &BasalGeometry,
    rng: &mut SeededRng,
) -> usize {
    let t = state.t;
    let existing = state.cells.len();
    let mut appended = 0;
    for i in 0..existing {
        if state.cells[i].phase != Phase::Division {
            continue;
        }
        let cell_type = state.cells[i].cell_type;
        let tp = cell_type.params(&params.cell_types);
        if !cell_type.can_divide() || rng.bool(tp.prob_out_div) {
            let cell = &mut state.cells[i];
            cell.restart_cycle(tp, t, rng);
            cell.timers = EventTimers::sample(tp, t, rng);
            debug!("t={:.2}: cell {} divided out", t, cell.id);
        } else {
            let daughter = divide(state, params, geometry, rng, i);
            debug!("t={:.2}: cell {} divided into {}", t, state.cells[i].id, state.cells[daughter].id);
            appended += 1;
        }
    }
    appended
}

/// Splits cell `parent` in two along the membrane tangent. The parent keeps
/// its index and left-side links, the daughter is appended, takes over the
/// parent's right-side links and is linked to the parent.
///
/// Returns the daughter's index.
pub fn divide(
    state: &mut SimulationState,
    params: &Parameters,
    geometry: &BasalGeometry,
    rng: &mut SeededRng,
    parent: usize,
) -> usize {
    let t = state.t;
    let template = state.cells[parent].clone();
    let cell_type: CellType = template.cell_type;
    let offset = geometry.tangent(template.basal) * (DIVISION_OFFSET_FRACTION * template.r_soft);

    let daughter = create_cell(
        params,
        geometry,
        rng,
        state,
        template.nucleus + offset,
        cell_type,
        Some(&template),
    );
    let daughter_apical = daughter.apical;
    let d = state.push_cell(daughter);

    let tp = cell_type.params(&params.cell_types);
    let cell = &mut state.cells[parent];
    cell.shift(-offset);
    cell.restart_cycle(tp, t, rng);
    let parent_apical = cell.apical;

    for link in state.apical_links.iter_mut().filter(|l| l.l == parent) {
        link.l = d;
    }
    for link in state.basal_links.iter_mut().filter(|l| l.l == parent) {
        link.l = d;
    }
    state.apical_links.push(ApicalLink {
        l: parent,
        r: d,
        rest_length: parent_apical.distance(daughter_apical),
    });
    state.basal_links.push(BasalLink { l: parent, r: d });
    d
}

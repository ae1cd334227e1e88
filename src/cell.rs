//! Cell agents: creation, phase machine and in-place cycle restarts.

use crate::geometry::BasalGeometry;
use crate::rng::SeededRng;
use crate::state::SimulationState;
use emt_common::{CellTypeParams, CellTypesConfig, Parameters, RunningMode, SampleRange, Vec2};
use serde::{Deserialize, Serialize};

/// Probability that a heterogeneous cell has each adhesion-loss timer disabled.
pub const HETERO_DISABLE_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Control,
    Emt,
}

impl CellType {
    pub fn name(self) -> &'static str {
        match self {
            CellType::Control => "control",
            CellType::Emt => "emt",
        }
    }

    #[inline(always)]
    pub fn params(self, types: &CellTypesConfig) -> &CellTypeParams {
        match self {
            CellType::Control => &types.control,
            CellType::Emt => &types.emt,
        }
    }

    /// Only control cells truly split; EMT cells always restart in place.
    pub fn can_divide(self) -> bool {
        matches!(self, CellType::Control)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    G1,
    G2,
    Mitosis,
    Division,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::G1 => "G1",
            Phase::G2 => "G2",
            Phase::Mitosis => "M",
            Phase::Division => "D",
        }
    }
}

/// Absolute simulation times at which one-shot events fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventTimers {
    /// Loss of apical adhesion.
    pub time_a: f64,
    /// Loss of basal adhesion.
    pub time_b: f64,
    /// Loss of straightness.
    pub time_s: f64,
    /// Onset of running.
    pub time_p: f64,
}

impl EventTimers {
    /// Samples every timer as `t + U(range)`, then lets heterogeneous types
    /// disable each adhesion-loss timer independently.
    pub fn sample(tp: &CellTypeParams, t: f64, rng: &mut SeededRng) -> Self {
        let mut draw = |range: SampleRange| t + rng.uniform_range(range.min(), range.max());
        let mut timers = EventTimers {
            time_a: draw(tp.time_a),
            time_b: draw(tp.time_b),
            time_s: draw(tp.time_s),
            time_p: draw(tp.time_p),
        };
        if tp.hetero {
            for timer in [&mut timers.time_a, &mut timers.time_b, &mut timers.time_s] {
                if rng.bool(HETERO_DISABLE_PROBABILITY) {
                    *timer = f64::INFINITY;
                }
            }
        }
        timers
    }
}

/// Stiffness coefficients copied from the type at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stiffness {
    pub apical_junction: f64,
    pub apical: f64,
    pub basal: f64,
    pub straightness: f64,
}

impl Stiffness {
    pub fn from_type(tp: &CellTypeParams) -> Self {
        Stiffness {
            apical_junction: tp.k_apical_junction,
            apical: tp.k_apical,
            basal: tp.k_basal,
            straightness: tp.k_straightness,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: u64,
    pub cell_type: CellType,
    pub nucleus: Vec2,
    pub apical: Vec2,
    pub basal: Vec2,
    pub r_soft: f64,
    pub r_hard: f64,
    /// Apical cytoskeleton rest length (excluding the soft radius).
    pub eta_a: f64,
    /// Basal cytoskeleton rest length (excluding the soft radius).
    pub eta_b: f64,
    pub has_apical: bool,
    pub has_basal: bool,
    pub has_straightness: bool,
    /// Decided at birth: whether the cell starts running at `time_p`.
    pub will_run: bool,
    pub running: bool,
    pub running_mode: RunningMode,
    /// Arc-length speed of the basal point while running.
    pub running_speed: f64,
    /// +1 or -1 along the arc for directed running.
    pub running_direction: f64,
    pub phase: Phase,
    pub birth_time: f64,
    pub division_time: f64,
    pub stiffness: Stiffness,
    pub timers: EventTimers,
}

impl Cell {
    pub fn age(&self, t: f64) -> f64 {
        t - self.birth_time
    }

    pub fn is_finite(&self) -> bool {
        self.nucleus.is_finite() && self.apical.is_finite() && self.basal.is_finite()
    }

    /// Restarts the cycle in place after a division: new lifespan starting
    /// now, stiffness re-read from the type.
    pub fn restart_cycle(&mut self, tp: &CellTypeParams, t: f64, rng: &mut SeededRng) {
        let lifespan = rng.uniform_range(tp.lifespan.min(), tp.lifespan.max());
        self.phase = Phase::G1;
        self.birth_time = t;
        self.division_time = t + lifespan;
        self.stiffness = Stiffness::from_type(tp);
    }

    /// Translates all three points.
    pub fn shift(&mut self, delta: Vec2) {
        self.nucleus += delta;
        self.apical += delta;
        self.basal += delta;
    }
}

/// Rest length of a spring of current extension `length`.
#[inline(always)]
pub fn relaxed_rest_length(length: f64, r_soft: f64) -> f64 {
    (length - r_soft).max(0.0)
}

/// Creates a cell whose nucleus sits at `position`.
///
/// Fresh cells are projected onto the membrane, get an apical point raised
/// by `cell_height` along the normal, are backdated by a random fraction of
/// their lifespan and sample their event timers. Daughters (`parent` given)
/// inherit geometry, adhesion and timers from the parent, translated so the
/// nucleus lands on `position`.
pub fn create_cell(
    params: &Parameters,
    geometry: &BasalGeometry,
    rng: &mut SeededRng,
    state: &mut SimulationState,
    position: Vec2,
    cell_type: CellType,
    parent: Option<&Cell>,
) -> Cell {
    let t = state.t;
    let id = state.next_id();
    let tp = cell_type.params(&params.cell_types);
    let lifespan = rng.uniform_range(tp.lifespan.min(), tp.lifespan.max());

    if let Some(parent) = parent {
        let mut cell = parent.clone();
        cell.shift(position - parent.nucleus);
        cell.id = id;
        cell.cell_type = cell_type;
        cell.phase = Phase::G1;
        cell.birth_time = t;
        cell.division_time = t + lifespan;
        cell.stiffness = Stiffness::from_type(tp);
        return cell;
    }

    let prop = &params.cell_prop;
    let birth_time = t - rng.uniform() * lifespan;
    let timers = EventTimers::sample(tp, t, rng);
    let will_run = rng.bool(tp.prob_running);

    let basal = geometry.project(position);
    let apical = basal + geometry.normal(position) * prop.cell_height;

    Cell {
        id,
        cell_type,
        nucleus: position,
        apical,
        basal,
        r_soft: prop.r_soft,
        r_hard: prop.r_hard,
        eta_a: relaxed_rest_length(apical.distance(position), prop.r_soft),
        eta_b: relaxed_rest_length(basal.distance(position), prop.r_soft),
        has_apical: true,
        has_basal: true,
        has_straightness: true,
        will_run,
        running: false,
        running_mode: tp.running_mode,
        running_speed: tp.running_speed,
        running_direction: 1.0,
        phase: Phase::G1,
        birth_time,
        division_time: birth_time + lifespan,
        stiffness: Stiffness::from_type(tp),
        timers,
    }
}

/// Phase implied by the current time, counting back from `division_time`.
pub fn update_cell_phase(cell: &Cell, t: f64, tp: &CellTypeParams) -> Phase {
    let mitosis_start = cell.division_time - tp.mitosis_duration;
    let g2_start = mitosis_start - tp.g2_duration;
    if t >= cell.division_time {
        Phase::Division
    } else if t >= mitosis_start {
        Phase::Mitosis
    } else if t >= g2_start {
        Phase::G2
    } else {
        Phase::G1
    }
}

use crate::vecmath::Vec2;
use serde::{Deserialize, Serialize};

/// One row per cell of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRow {
    pub id: u64,
    /// Cell type name, `"control"` or `"emt"`.
    pub cell_type: String,
    pub nucleus: Vec2,
    pub apical: Vec2,
    pub basal: Vec2,
    /// Phase name, `"G1"`, `"G2"`, `"M"` or `"D"`.
    pub phase: String,
    pub has_apical: bool,
    pub has_basal: bool,
    pub running: bool,
    /// Simulated time since birth.
    pub age: f64,
    pub eta_a: f64,
    pub eta_b: f64,
}

/// A point-in-time export record of one run.
///
/// This is the only contract with the statistics/export layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Index of the run within its batch, 0 for single runs.
    pub run_index: usize,
    /// Seed text the run's RNG was derived from.
    pub seed: String,
    /// The simulation time at which the snapshot was taken.
    pub time: f64,
    /// Parameter-path overrides used for this run.
    pub overrides: Vec<(String, f64)>,
    pub cells: Vec<CellRow>,
}

impl Snapshot {
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

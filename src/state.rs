use crate::cell::Cell;
use serde::{Deserialize, Serialize};

/// Apical adjacency `l -> r`. The rest length decays every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApicalLink {
    pub l: usize,
    pub r: usize,
    pub rest_length: f64,
}

/// Basal adjacency `l -> r`, used only by the ordering and spacing constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasalLink {
    pub l: usize,
    pub r: usize,
}

/// Everything one simulation instance mutates. Owned by exactly one engine;
/// batch workers each build their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub cells: Vec<Cell>,
    pub apical_links: Vec<ApicalLink>,
    pub basal_links: Vec<BasalLink>,
    /// Simulated time, always `step_count * dt`.
    pub t: f64,
    pub step_count: u64,
    /// Id handed to the next created cell.
    pub next_cell_id: u64,
}

impl SimulationState {
    /// Returns a fresh id and advances the counter.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_cell_id;
        self.next_cell_id += 1;
        id
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Appends a cell and returns its index.
    pub fn push_cell(&mut self, cell: Cell) -> usize {
        self.cells.push(cell);
        self.cells.len() - 1
    }

    /// False as soon as any point or rest length stopped being a number.
    pub fn is_finite(&self) -> bool {
        self.t.is_finite()
            && self.cells.iter().all(|c| c.is_finite() && c.eta_a.is_finite() && c.eta_b.is_finite())
            && self.apical_links.iter().all(|l| l.rest_length.is_finite())
    }

    /// Left and right apical neighbours of every cell, by index.
    pub fn apical_neighbors(&self) -> Vec<(Option<usize>, Option<usize>)> {
        let mut neighbors = vec![(None, None); self.cells.len()];
        for link in &self.apical_links {
            neighbors[link.l].1 = Some(link.r);
            neighbors[link.r].0 = Some(link.l);
        }
        neighbors
    }

    /// Checks that every link references an existing cell.
    pub fn links_are_valid(&self) -> bool {
        let n = self.cells.len();
        self.apical_links.iter().all(|l| l.l < n && l.r < n && l.l != l.r)
            && self.basal_links.iter().all(|l| l.l < n && l.r < n && l.l != l.r)
    }
}

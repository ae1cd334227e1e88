//! Deterministic simulation of a one-dimensional epithelial cell chain on a
//! curved basal membrane, with epithelial-to-mesenchymal transition events,
//! division, and a parallel parameter-sweep runner.

pub mod batch;
pub mod broadphase;
pub mod cell;
pub mod constraints;
pub mod error;
pub mod events;
pub mod forces;
pub mod geometry;
pub mod rng;
pub mod sim_params;
pub mod simulation;
pub mod state;
pub mod timestep;

pub use batch::{run_batch, BatchConfig, BatchResult, BatchStatus, RunOutcome};
pub use cell::{Cell, CellType, Phase};
pub use error::{SimError, SimResult};
pub use geometry::BasalGeometry;
pub use simulation::Simulation;
pub use state::SimulationState;

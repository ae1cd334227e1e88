pub mod config;
pub mod error;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    CellPropConfig, CellTypeParams, CellTypesConfig, GeneralConfig, Parameters, RunningMode,
    SampleRange,
};
pub use error::{ConfigError, ConfigResult};
pub use snapshot::{CellRow, Snapshot};
pub use vecmath::Vec2;

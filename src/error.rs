use emt_common::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A position or rest length became NaN or infinite.
    #[error("simulation state became non-finite at step {step} (t = {t})")]
    NonFinite { step: u64, t: f64 },

    /// A batch sweep definition the runner cannot expand.
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("failed to read batch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse batch file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("batch worker thread panicked")]
    WorkerPanic,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type SimResult<T> = Result<T, SimError>;

use thiserror::Error;

/// Everything that can go wrong while setting up or running a simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HhError {
    /// Rejected before the run starts: bad capacitance, conductance, dt, initial state or stimulus.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Rejected before the run starts: the chain or its schedule does not line up.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// The state went non-finite. `cell` is the chain index, 0 for single-cell runs.
    #[error("diverged at step {step} (t = {time} ms) in cell {cell}")]
    Diverged { step: usize, time: f64, cell: usize },

    /// `advance` was called on an integrator that already completed or diverged.
    #[error("run already finished after {0} steps")]
    RunFinished(usize),

    #[error("malformed configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for HhError {
    fn from(e: serde_json::Error) -> Self {
        HhError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HhError>;

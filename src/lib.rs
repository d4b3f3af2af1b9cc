//! Hodgkin-Huxley membrane integration for single cells and resistively
//! coupled chains of cells.

pub mod channels;
pub mod compartments;
pub mod config;
pub mod error;
pub mod integrator;
pub mod stimulus;
pub mod sweep;
pub mod trajectory;

#[cfg(feature = "python")]
mod python;

pub use channels::{ChannelParameters, Gate, GatingKinetics, RateConvention};
pub use compartments::{Compartment, Compartments};
pub use config::{ChainConfig, CouplingOrder, Recording, Scheme, SimulationConfig, StepBudget};
pub use error::{HhError, Result};
pub use integrator::{CellState, InitialState, Integrator, Phase, StepOutcome, simulate, step};
pub use stimulus::Stimulus;
pub use trajectory::{RunStatus, SimulationRun, Trace, Trajectory};

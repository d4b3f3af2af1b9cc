use pyo3::prelude::*;

use crate::error::HhError;
use crate::trajectory::{RunStatus, SimulationRun};

fn to_py_err(e: HhError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(e.to_string())
}

fn diverged_at(run: &SimulationRun) -> Option<usize> {
    match run.status {
        RunStatus::Completed => None,
        RunStatus::Diverged { step, .. } => Some(step),
    }
}

/// Python module. Results come back as plain lists for the plotting side.
#[pymodule]
pub mod hodgkin_rs {
    use pyo3::prelude::*;

    use super::{diverged_at, to_py_err};
    use crate::channels::ChannelParameters;
    use crate::compartments::Compartments;
    use crate::config::{ChainConfig, CouplingOrder, Recording, SimulationConfig};
    use crate::integrator::{self, InitialState};
    use crate::stimulus::Stimulus;

    /// Single cell under constant drive.
    /// Returns `(times, V, diverged_step)`; `diverged_step` is None for a full run.
    #[pyfunction]
    #[pyo3(signature = (amplitude=0.0, dt=0.01, duration=50.0, v0=-65.0))]
    fn simulate_cell(
        amplitude: f64,
        dt: f64,
        duration: f64,
        v0: f64,
    ) -> PyResult<(Vec<f64>, Vec<f64>, Option<usize>)> {
        let config = SimulationConfig {
            recording: Recording::PotentialOnly,
            ..SimulationConfig::with_duration(dt, duration)
        };
        let run = integrator::simulate(
            ChannelParameters::default(),
            InitialState::SteadyState { v: v0 },
            config,
            &Stimulus::Constant(amplitude),
        )
        .map_err(to_py_err)?;
        let diverged = diverged_at(&run);
        let mut trajectory = run.trajectory;
        let v = trajectory.cells.swap_remove(0).v;
        Ok((trajectory.times, v, diverged))
    }

    /// Chain of identical cells, the first driven by `drive`.
    /// Returns `(times, [V per cell], diverged_step)`.
    #[pyfunction]
    #[pyo3(signature = (n_cells=2, drive=10.0, gain=0.5, dt=0.01, steps=1000, sequential=true))]
    fn simulate_chain(
        n_cells: usize,
        drive: f64,
        gain: f64,
        dt: f64,
        steps: usize,
        sequential: bool,
    ) -> PyResult<(Vec<f64>, Vec<Vec<f64>>, Option<usize>)> {
        let order = if sequential {
            CouplingOrder::Sequential
        } else {
            CouplingOrder::Simultaneous
        };
        let mut chain = Compartments::uniform(
            n_cells,
            ChannelParameters::default(),
            InitialState::Conventional { v: -65.0 },
            ChainConfig { gain, order },
        )
        .map_err(to_py_err)?;
        chain
            .attach_stimuli(0, Stimulus::Constant(drive))
            .map_err(to_py_err)?;

        let config = SimulationConfig {
            recording: Recording::PotentialOnly,
            ..SimulationConfig::with_steps(dt, steps)
        };
        let run = chain.simulate(&config).map_err(to_py_err)?;
        let diverged = diverged_at(&run);
        let traces = run.trajectory.cells.into_iter().map(|c| c.v).collect();
        Ok((run.trajectory.times, traces, diverged))
    }
}

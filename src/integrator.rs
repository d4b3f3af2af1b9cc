//! Single-cell Hodgkin-Huxley integration.
//!
//! ```text
//! C dV/dt = I_ext - gNa m³h (V - ENa) - gK n⁴ (V - EK) - gL (V - EL)
//! dx/dt   = alpha_x(V) (1 - x) - beta_x(V) x        x in {m, h, n}
//! ```
//!
//! The state is caller-owned: [`step`] is a pure function of the previous
//! state, and [`Integrator`] wraps one cell's state with its run bookkeeping.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelParameters, Gate, GatingKinetics, RateConvention};
use crate::config::{Scheme, SimulationConfig};
use crate::error::{HhError, Result};
use crate::stimulus::Stimulus;
use crate::trajectory::{RunStatus, SimulationRun, Trajectory};

/// Membrane potential (mV) and the three gating variables. Gates are not
/// clamped to [0, 1]; leaving that range means the step size is too large.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub v: f64,
    pub m: f64,
    pub h: f64,
    pub n: f64,
}

impl CellState {
    /// `(m, h, n)` used by the chained-cell scripts regardless of the starting V.
    /// An accepted initialization policy, not a steady state.
    pub const CONVENTIONAL_GATES: (f64, f64, f64) = (0.05, 0.6, 0.32);

    pub fn new(v: f64, m: f64, h: f64, n: f64) -> CellState {
        CellState { v, m, h, n }
    }

    /// Gates at `alpha / (alpha + beta)` for the given V.
    pub fn steady_state<K: GatingKinetics>(v: f64, kinetics: &K) -> CellState {
        CellState {
            v,
            m: kinetics.steady_state(Gate::M, v),
            h: kinetics.steady_state(Gate::H, v),
            n: kinetics.steady_state(Gate::N, v),
        }
    }

    pub fn conventional(v: f64) -> CellState {
        let (m, h, n) = Self::CONVENTIONAL_GATES;
        CellState { v, m, h, n }
    }

    pub fn is_finite(&self) -> bool {
        self.v.is_finite() && self.m.is_finite() && self.h.is_finite() && self.n.is_finite()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(HhError::InvalidParameter(format!("initial state is not finite: {self:?}")))
        }
    }

    fn advanced(&self, d: &Derivatives, dt: f64) -> CellState {
        CellState {
            v: self.v + d.dv * dt,
            m: self.m + d.dm * dt,
            h: self.h + d.dh * dt,
            n: self.n + d.dn * dt,
        }
    }
}

/// How a run picks its starting state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    Explicit(CellState),
    /// Gates at steady state for `v`.
    SteadyState { v: f64 },
    /// Gates at [`CellState::CONVENTIONAL_GATES`].
    Conventional { v: f64 },
}

impl Default for InitialState {
    fn default() -> Self {
        InitialState::SteadyState { v: -65.0 }
    }
}

impl InitialState {
    pub fn resolve<K: GatingKinetics>(&self, kinetics: &K) -> Result<CellState> {
        let state = match *self {
            InitialState::Explicit(state) => state,
            InitialState::SteadyState { v } => {
                if !v.is_finite() {
                    return Err(HhError::InvalidParameter(format!("initial V is not finite: {v}")));
                }
                CellState::steady_state(v, kinetics)
            }
            InitialState::Conventional { v } => CellState::conventional(v),
        };
        state.validate()?;
        Ok(state)
    }
}

/// Time derivatives of the four state variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivatives {
    pub dv: f64,
    pub dm: f64,
    pub dh: f64,
    pub dn: f64,
}

impl Derivatives {
    // (a + 2b + 2c + d) / 6
    fn rk4_blend(a: &Self, b: &Self, c: &Self, d: &Self) -> Derivatives {
        let blend = |a: f64, b: f64, c: f64, d: f64| (a + 2.0 * b + 2.0 * c + d) / 6.0;
        Derivatives {
            dv: blend(a.dv, b.dv, c.dv, d.dv),
            dm: blend(a.dm, b.dm, c.dm, d.dm),
            dh: blend(a.dh, b.dh, c.dh, d.dh),
            dn: blend(a.dn, b.dn, c.dn, d.dn),
        }
    }
}

pub fn derivatives<K: GatingKinetics>(
    state: &CellState,
    params: &ChannelParameters,
    kinetics: &K,
    i_ext: f64,
) -> Derivatives {
    let CellState { v, m, h, n } = *state;
    let i = params.currents(v, m, h, n);
    Derivatives {
        dv: (i_ext - i.na - i.k - i.leak) / params.c,
        dm: kinetics.derivative(Gate::M, v, m),
        dh: kinetics.derivative(Gate::H, v, h),
        dn: kinetics.derivative(Gate::N, v, n),
    }
}

/// Advances `state` by one step of `dt` with `i_ext` held constant.
pub fn step<K: GatingKinetics>(
    state: &CellState,
    params: &ChannelParameters,
    kinetics: &K,
    i_ext: f64,
    dt: f64,
    scheme: Scheme,
) -> CellState {
    match scheme {
        Scheme::Euler => state.advanced(&derivatives(state, params, kinetics, i_ext), dt),
        Scheme::StaggeredEuler => {
            let d = derivatives(state, params, kinetics, i_ext);
            let v = state.v + d.dv * dt;
            CellState {
                v,
                m: state.m + kinetics.derivative(Gate::M, v, state.m) * dt,
                h: state.h + kinetics.derivative(Gate::H, v, state.h) * dt,
                n: state.n + kinetics.derivative(Gate::N, v, state.n) * dt,
            }
        }
        Scheme::RungeKutta4 => {
            let k1 = derivatives(state, params, kinetics, i_ext);
            let k2 = derivatives(&state.advanced(&k1, dt / 2.0), params, kinetics, i_ext);
            let k3 = derivatives(&state.advanced(&k2, dt / 2.0), params, kinetics, i_ext);
            let k4 = derivatives(&state.advanced(&k3, dt), params, kinetics, i_ext);
            state.advanced(&Derivatives::rk4_blend(&k1, &k2, &k3, &k4), dt)
        }
    }
}

/// Lifecycle of an [`Integrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial state resolved, no step taken yet.
    Ready,
    Running,
    Completed,
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Advanced(CellState),
    /// The step produced a non-finite state, which was discarded.
    Diverged { step: usize, time: f64 },
}

/// One cell, its parameters, and where it is in its run.
#[derive(Debug, Clone)]
pub struct Integrator<K = RateConvention> {
    params: ChannelParameters,
    kinetics: K,
    config: SimulationConfig,
    state: CellState,
    steps: usize,
    taken: usize,
    phase: Phase,
}

impl<K: GatingKinetics> Integrator<K> {
    /// Validates everything up front; nothing is created on failure.
    pub fn new(
        params: ChannelParameters,
        kinetics: K,
        initial: InitialState,
        config: SimulationConfig,
    ) -> Result<Self> {
        params.validate()?;
        config.validate()?;
        let state = initial.resolve(&kinetics)?;
        let steps = config.step_count();
        Ok(Integrator {
            params,
            kinetics,
            config,
            state,
            steps,
            taken: 0,
            phase: if steps == 0 { Phase::Completed } else { Phase::Ready },
        })
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps_taken(&self) -> usize {
        self.taken
    }

    pub fn step_count(&self) -> usize {
        self.steps
    }

    /// Time of the current state (ms).
    pub fn time(&self) -> f64 {
        self.config.time_before(self.taken)
    }

    /// Takes one step with external current `i_ext`.
    pub fn advance(&mut self, i_ext: f64) -> Result<StepOutcome> {
        if matches!(self.phase, Phase::Completed | Phase::Diverged) {
            return Err(HhError::RunFinished(self.taken));
        }
        let next = step(
            &self.state,
            &self.params,
            &self.kinetics,
            i_ext,
            self.config.dt,
            self.config.scheme,
        );
        let step_idx = self.taken;
        let time = self.config.time_after(step_idx);
        if !next.is_finite() {
            self.phase = Phase::Diverged;
            warn!("Cell diverged at step {} (t = {:.4} ms): {:?}", step_idx, time, next);
            return Ok(StepOutcome::Diverged { step: step_idx, time });
        }
        self.state = next;
        self.taken += 1;
        self.phase = if self.taken == self.steps { Phase::Completed } else { Phase::Running };
        Ok(StepOutcome::Advanced(next))
    }

    /// Runs the remaining steps, sampling `stimulus` at the start of each.
    pub fn run(mut self, stimulus: &Stimulus) -> Result<SimulationRun> {
        if self.phase == Phase::Diverged {
            return Err(HhError::RunFinished(self.taken));
        }
        stimulus.validate(self.steps)?;
        let remaining = self.steps - self.taken;
        debug!(
            "Running {} steps of dt = {} ms with {:?}",
            remaining, self.config.dt, self.config.scheme
        );

        let mut trajectory = Trajectory::new(1, remaining, self.config.recording);
        let mut status = RunStatus::Completed;
        while !matches!(self.phase, Phase::Completed | Phase::Diverged) {
            let i_ext = stimulus.current(self.taken, self.time());
            match self.advance(i_ext)? {
                StepOutcome::Advanced(state) => {
                    trajectory.push(self.config.time_before(self.taken), &[state]);
                }
                StepOutcome::Diverged { step, time } => {
                    status = RunStatus::Diverged { step, time, cell: 0 };
                }
            }
        }

        if status == RunStatus::Completed {
            info!("Completed {} steps, final V = {:.3} mV", self.taken, self.state.v);
        }
        Ok(SimulationRun {
            dt: self.config.dt,
            steps_requested: self.steps,
            status,
            trajectory,
            final_states: vec![self.state],
        })
    }
}

/// Single-cell run with the physiological rate convention.
pub fn simulate(
    params: ChannelParameters,
    initial: InitialState,
    config: SimulationConfig,
    stimulus: &Stimulus,
) -> Result<SimulationRun> {
    Integrator::new(params, RateConvention::Physiological, initial, config)?.run(stimulus)
}

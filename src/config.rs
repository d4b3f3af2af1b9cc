//! Run configuration. Plain serde structs so a run can be described in JSON
//! next to the data it produced.

use serde::{Deserialize, Serialize};

use crate::error::{HhError, Result};

/// Relative slack used when `duration / dt` lands a rounding error away from an integer.
const STEP_ROUNDING_SLACK: f64 = 1e-9;

/// Longest run `validate` accepts, in steps.
pub const MAX_STEPS: usize = u32::MAX as usize;

/// How long a run lasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepBudget {
    Steps(usize),
    /// Total time (ms); the run takes `floor(duration / dt)` steps.
    Duration(f64),
}

impl Default for StepBudget {
    fn default() -> Self {
        StepBudget::Duration(50.0)
    }
}

/// Fixed-step integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// All four derivatives from one snapshot, then all states advance.
    #[default]
    Euler,
    /// V advances first, gates are then driven by the new V.
    StaggeredEuler,
    /// Classic fourth-order Runge-Kutta, current held constant over the step.
    RungeKutta4,
}

/// What goes into the trajectory for each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recording {
    PotentialOnly,
    #[default]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Step size (ms)
    pub dt: f64,
    pub budget: StepBudget,
    pub scheme: Scheme,
    pub recording: Recording,
    /// Time of the initial state (ms)
    pub t0: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            dt: 0.01,
            budget: StepBudget::default(),
            scheme: Scheme::default(),
            recording: Recording::default(),
            t0: 0.0,
        }
    }
}

impl SimulationConfig {
    pub fn with_steps(dt: f64, steps: usize) -> Self {
        SimulationConfig {
            dt,
            budget: StepBudget::Steps(steps),
            ..Default::default()
        }
    }

    pub fn with_duration(dt: f64, duration: f64) -> Self {
        SimulationConfig {
            dt,
            budget: StepBudget::Duration(duration),
            ..Default::default()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: SimulationConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(HhError::InvalidParameter(format!(
                "dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if !self.t0.is_finite() {
            return Err(HhError::InvalidParameter(format!("t0 must be finite, got {}", self.t0)));
        }
        if let StepBudget::Duration(t) = self.budget {
            if !(t.is_finite() && t >= 0.0) {
                return Err(HhError::InvalidParameter(format!(
                    "duration must be non-negative and finite, got {t}"
                )));
            }
            if !(t / self.dt).is_finite() {
                return Err(HhError::InvalidParameter(format!(
                    "duration {t} / dt {} is not a representable step count",
                    self.dt
                )));
            }
        }
        let steps = self.step_count();
        if steps > MAX_STEPS {
            return Err(HhError::InvalidParameter(format!(
                "run of {steps} steps exceeds the limit of {MAX_STEPS}"
            )));
        }
        Ok(())
    }

    /// Number of steps the run will take.
    ///
    /// `floor(duration / dt)`, except that a quotient within rounding error of
    /// an integer counts as that integer (0.3 / 0.1 gives 3 steps, not 2).
    pub fn step_count(&self) -> usize {
        match self.budget {
            StepBudget::Steps(n) => n,
            StepBudget::Duration(t) => {
                let ratio = t / self.dt;
                let nearest = ratio.round();
                if (ratio - nearest).abs() <= STEP_ROUNDING_SLACK * nearest.max(1.0) {
                    nearest as usize
                } else {
                    ratio.floor() as usize
                }
            }
        }
    }

    /// Time at the end of step `step` (0-based).
    #[inline]
    pub fn time_after(&self, step: usize) -> f64 {
        self.t0 + (step + 1) as f64 * self.dt
    }

    /// Time at the start of step `step`, used to sample stimuli.
    #[inline]
    pub fn time_before(&self, step: usize) -> f64 {
        self.t0 + step as f64 * self.dt
    }
}

/// Evaluation order of the chain within one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouplingOrder {
    /// Cell i sees cell i-1's potential from this step (Gauss-Seidel).
    #[default]
    Sequential,
    /// Every cell sees its upstream neighbour's potential from the previous
    /// step (Jacobi). Adds one step of delay per link.
    Simultaneous,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Current per mV of upstream/downstream potential difference
    pub gain: f64,
    pub order: CouplingOrder,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            gain: 0.5,
            order: CouplingOrder::default(),
        }
    }
}

impl ChainConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: ChainConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gain.is_finite() {
            return Err(HhError::ConfigurationMismatch(format!(
                "coupling gain must be finite, got {}",
                self.gain
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_count_from_duration() {
        assert_eq!(SimulationConfig::with_duration(0.01, 50.0).step_count(), 5000);
        assert_eq!(SimulationConfig::with_duration(0.1, 0.3).step_count(), 3);
        assert_eq!(SimulationConfig::with_duration(0.1, 0.35).step_count(), 3);
        assert_eq!(SimulationConfig::with_duration(0.5, 0.2).step_count(), 0);
        assert_eq!(SimulationConfig::with_steps(0.5, 7).step_count(), 7);
    }

    #[test]
    fn test_validate_dt_and_duration() {
        assert!(SimulationConfig::with_steps(0.0, 10).validate().is_err());
        assert!(SimulationConfig::with_steps(f64::NAN, 10).validate().is_err());
        assert!(SimulationConfig::with_duration(0.01, -1.0).validate().is_err());
        assert!(SimulationConfig::with_duration(0.01, f64::INFINITY).validate().is_err());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_step_counts() {
        for config in [
            SimulationConfig::with_duration(1e-300, 1e300),
            SimulationConfig::with_duration(1e-9, 1e6),
            SimulationConfig::with_steps(0.01, usize::MAX),
            SimulationConfig::with_steps(0.01, MAX_STEPS + 1),
        ] {
            assert!(
                matches!(config.validate(), Err(HhError::InvalidParameter(_))),
                "{config:?}"
            );
        }
        assert!(SimulationConfig::with_steps(0.01, MAX_STEPS).validate().is_ok());
    }

    #[test]
    fn test_times() {
        let config = SimulationConfig {
            t0: 5.0,
            ..SimulationConfig::with_steps(0.5, 4)
        };
        assert_eq!(config.time_before(0), 5.0);
        assert_eq!(config.time_after(0), 5.5);
        assert_eq!(config.time_after(3), 7.0);
    }

    #[test]
    fn test_config_from_json() {
        let config = SimulationConfig::from_json_str(
            r#"{ "dt": 0.025, "budget": { "steps": 400 }, "scheme": "runge_kutta4" }"#,
        )
        .unwrap();
        assert_eq!(config.step_count(), 400);
        assert_eq!(config.scheme, Scheme::RungeKutta4);
        assert_eq!(config.recording, Recording::Full);

        assert!(SimulationConfig::from_json_str(r#"{ "dt": -1.0 }"#).is_err());

        let chain = ChainConfig::from_json_str(r#"{ "order": "simultaneous" }"#).unwrap();
        assert_eq!(chain.gain, 0.5);
        assert_eq!(chain.order, CouplingOrder::Simultaneous);
    }

    #[test]
    fn test_chain_gain_must_be_finite() {
        let bad = ChainConfig { gain: f64::NAN, ..Default::default() };
        assert!(matches!(bad.validate(), Err(HhError::ConfigurationMismatch(_))));
    }
}

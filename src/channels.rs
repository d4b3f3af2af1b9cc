//! The channels define the dynamics that take place within a single compartment:
//! the Na/K/leak conductances and the rate functions of the m, h, n gates.
//! Based on: https://nrn.readthedocs.io/en/9.0.0/tutorials/scripting-neuron-basics.html#Biophysical-mechanisms

use serde::{Deserialize, Serialize};

use crate::error::{HhError, Result};

/// Exponent arguments are clipped to this magnitude before `exp`.
pub const EXP_CLIP: f64 = 50.0;

/// Below this |x/k| the removable singularity of `x / (1 - exp(-x/k))` is
/// replaced by its series expansion.
const SINGULAR_EPS: f64 = 1e-6;

/// Membrane and channel constants for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParameters {
    /// Membrane capacitance (μF/cm²)
    pub c: f64,
    /// Maximal conductances (mS/cm²)
    pub g_na: f64,
    pub g_k: f64,
    pub g_l: f64,
    /// Reversal potentials (mV)
    pub e_na: f64,
    pub e_k: f64,
    pub e_l: f64,
}

impl Default for ChannelParameters {
    fn default() -> Self {
        ChannelParameters {
            c: 1.0,
            g_na: 120.0,
            g_k: 36.0,
            g_l: 0.3,
            e_na: 50.0,
            e_k: -77.0,
            e_l: -54.387,
        }
    }
}

/// Ionic currents (μA/cm²) at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IonicCurrents {
    pub na: f64,
    pub k: f64,
    pub leak: f64,
}

impl IonicCurrents {
    pub fn total(&self) -> f64 {
        self.na + self.k + self.leak
    }
}

impl ChannelParameters {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let params: ChannelParameters = serde_json::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(HhError::InvalidParameter(format!(
                "capacitance must be positive and finite, got {}",
                self.c
            )));
        }
        for (name, g) in [("g_na", self.g_na), ("g_k", self.g_k), ("g_l", self.g_l)] {
            if !(g.is_finite() && g >= 0.0) {
                return Err(HhError::InvalidParameter(format!(
                    "{name} must be a non-negative conductance, got {g}"
                )));
            }
        }
        for (name, e) in [("e_na", self.e_na), ("e_k", self.e_k), ("e_l", self.e_l)] {
            if !e.is_finite() {
                return Err(HhError::InvalidParameter(format!(
                    "{name} must be finite, got {e}"
                )));
            }
        }
        Ok(())
    }

    pub fn currents(&self, v: f64, m: f64, h: f64, n: f64) -> IonicCurrents {
        // Keep the left-to-right products: stored reference trajectories depend on them.
        IonicCurrents {
            na: self.g_na * m * m * m * h * (v - self.e_na),
            k: self.g_k * n * n * n * n * (v - self.e_k),
            leak: self.g_l * (v - self.e_l),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Na activation
    M,
    /// Na inactivation
    H,
    /// K activation
    N,
}

impl Gate {
    pub const ALL: [Gate; 3] = [Gate::M, Gate::H, Gate::N];
}

/// `exp` with the argument clipped to `[-EXP_CLIP, EXP_CLIP]`.
#[inline]
pub fn clipped_exp(x: f64) -> f64 {
    x.clamp(-EXP_CLIP, EXP_CLIP).exp()
}

/// `x / (1 - exp(-x/k))`, with the limit `k * (1 + x/2k)` around x = 0.
#[inline]
pub fn linoid(x: f64, k: f64) -> f64 {
    let u = x / k;
    if u.abs() < SINGULAR_EPS {
        k * (1.0 + u / 2.0)
    } else {
        x / (1.0 - clipped_exp(-u))
    }
}

pub trait GatingKinetics {
    /// Opening and closing rates `(alpha, beta)` in 1/ms.
    fn rates(&self, gate: Gate, v: f64) -> (f64, f64);

    fn steady_state(&self, gate: Gate, v: f64) -> f64 {
        let (alpha, beta) = self.rates(gate, v);
        alpha / (alpha + beta)
    }

    /// `dx/dt = alpha (1 - x) - beta x`
    fn derivative(&self, gate: Gate, v: f64, x: f64) -> f64 {
        let (alpha, beta) = self.rates(gate, v);
        alpha * (1.0 - x) - beta * x
    }
}

/// The voltage convention the rate functions are written in.
///
/// The two families are separate derivations. Shifting V by 65 mV lines up
/// every rate except `alpha_n`, whose coefficient differs tenfold, so a run
/// always uses exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateConvention {
    /// Modern convention, rest near -65 mV.
    #[default]
    Physiological,
    /// `(25 - V)` family with rest at 0 mV, coefficients as used by the
    /// chained-cell scripts (note 0.1 rather than 0.01 on `alpha_n`).
    RestAtZero,
}

impl GatingKinetics for RateConvention {
    fn rates(&self, gate: Gate, v: f64) -> (f64, f64) {
        match self {
            RateConvention::Physiological => physiological_rates(gate, v),
            RateConvention::RestAtZero => rest_at_zero_rates(gate, v),
        }
    }
}

fn physiological_rates(gate: Gate, v: f64) -> (f64, f64) {
    match gate {
        Gate::N => (
            0.01 * linoid(v + 55.0, 10.0),
            0.125 * clipped_exp(-(v + 65.0) / 80.0),
        ),
        Gate::M => (
            0.1 * linoid(v + 40.0, 10.0),
            4.0 * clipped_exp(-(v + 65.0) / 18.0),
        ),
        Gate::H => (
            0.07 * clipped_exp(-(v + 65.0) / 20.0),
            1.0 / (1.0 + clipped_exp(-(v + 35.0) / 10.0)),
        ),
    }
}

// (a - V) / (exp((a - V)/10) - 1) == linoid(V - a, 10)
fn rest_at_zero_rates(gate: Gate, v: f64) -> (f64, f64) {
    match gate {
        Gate::N => (
            0.1 * linoid(v - 10.0, 10.0),
            0.125 * clipped_exp(-v / 80.0),
        ),
        Gate::M => (0.1 * linoid(v - 25.0, 10.0), 4.0 * clipped_exp(-v / 18.0)),
        Gate::H => (
            0.07 * clipped_exp(-v / 20.0),
            1.0 / (clipped_exp((30.0 - v) / 10.0) + 1.0),
        ),
    }
}

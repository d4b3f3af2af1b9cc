use serde::{Deserialize, Serialize};

use crate::error::{HhError, Result};

/// External current schedule (μA/cm²) for one cell.
///
/// Time-based variants are sampled at the start of each step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stimulus {
    #[default]
    None,
    Constant(f64),
    /// `amplitude` from `onset` onwards.
    Step { onset: f64, amplitude: f64 },
    /// `amplitude` on `[onset, onset + width)`.
    Pulse { onset: f64, width: f64, amplitude: f64 },
    /// Repeats a pulse of `width` every `period` starting at `onset`.
    PulseTrain {
        onset: f64,
        width: f64,
        period: f64,
        amplitude: f64,
    },
    /// One value per step. Has to be exactly as long as the run.
    Samples(Vec<f64>),
}

impl Stimulus {
    pub fn validate(&self, steps: usize) -> Result<()> {
        let finite = |name: &str, x: f64| {
            if x.is_finite() {
                Ok(())
            } else {
                Err(HhError::InvalidParameter(format!("stimulus {name} must be finite, got {x}")))
            }
        };
        match self {
            Stimulus::None => Ok(()),
            Stimulus::Constant(a) => finite("amplitude", *a),
            Stimulus::Step { onset, amplitude } => {
                finite("onset", *onset)?;
                finite("amplitude", *amplitude)
            }
            Stimulus::Pulse { onset, width, amplitude } => {
                finite("onset", *onset)?;
                finite("width", *width)?;
                finite("amplitude", *amplitude)?;
                if *width < 0.0 {
                    return Err(HhError::InvalidParameter(format!(
                        "pulse width must be non-negative, got {width}"
                    )));
                }
                Ok(())
            }
            Stimulus::PulseTrain { onset, width, period, amplitude } => {
                finite("onset", *onset)?;
                finite("width", *width)?;
                finite("period", *period)?;
                finite("amplitude", *amplitude)?;
                if *period <= 0.0 || *width < 0.0 {
                    return Err(HhError::InvalidParameter(format!(
                        "pulse train needs period > 0 and width >= 0, got period {period} width {width}"
                    )));
                }
                Ok(())
            }
            Stimulus::Samples(samples) => {
                if samples.len() != steps {
                    return Err(HhError::ConfigurationMismatch(format!(
                        "stimulus has {} samples but the run takes {} steps",
                        samples.len(),
                        steps
                    )));
                }
                match samples.iter().position(|x| !x.is_finite()) {
                    Some(i) => Err(HhError::InvalidParameter(format!(
                        "stimulus sample {i} is not finite"
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// Current for step `step`, which starts at time `t`.
    pub fn current(&self, step: usize, t: f64) -> f64 {
        match self {
            Stimulus::None => 0.0,
            Stimulus::Constant(a) => *a,
            Stimulus::Step { onset, amplitude } => {
                if t >= *onset {
                    *amplitude
                } else {
                    0.0
                }
            }
            Stimulus::Pulse { onset, width, amplitude } => {
                if t >= *onset && t < onset + width {
                    *amplitude
                } else {
                    0.0
                }
            }
            Stimulus::PulseTrain { onset, width, period, amplitude } => {
                if t >= *onset && (t - onset).rem_euclid(*period) < *width {
                    *amplitude
                } else {
                    0.0
                }
            }
            Stimulus::Samples(samples) => samples.get(step).copied().unwrap_or(0.0),
        }
    }
}

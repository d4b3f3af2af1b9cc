//! Independent runs spread over the rayon thread pool. Each job resolves its
//! own state, so nothing mutable is shared between workers.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelParameters, RateConvention};
use crate::compartments::Compartments;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::integrator::{InitialState, Integrator};
use crate::stimulus::Stimulus;
use crate::trajectory::SimulationRun;

/// Everything one single-cell run needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub params: ChannelParameters,
    pub kinetics: RateConvention,
    pub initial: InitialState,
    pub config: SimulationConfig,
    pub stimulus: Stimulus,
}

impl Job {
    pub fn run(&self) -> Result<SimulationRun> {
        Integrator::new(self.params, self.kinetics, self.initial, self.config)?.run(&self.stimulus)
    }
}

/// Results come back in job order; a failing job does not affect the others.
pub fn run_many(jobs: &[Job]) -> Vec<Result<SimulationRun>> {
    jobs.par_iter().map(Job::run).collect()
}

/// `base` once per amplitude, with a constant drive of that amplitude.
pub fn sweep_drive(base: &Job, amplitudes: &[f64]) -> Vec<Result<SimulationRun>> {
    amplitudes
        .par_iter()
        .map(|&amplitude| {
            Job {
                stimulus: Stimulus::Constant(amplitude),
                ..base.clone()
            }
            .run()
        })
        .collect()
}

pub fn run_chains(chains: &[Compartments], sim: &SimulationConfig) -> Vec<Result<SimulationRun>> {
    chains.par_iter().map(|chain| chain.simulate(sim)).collect()
}

//! Recorded output of a run: per-cell traces laid out as structure-of-arrays,
//! one sample per completed step.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::config::Recording;
use crate::error::{HhError, Result};
use crate::integrator::CellState;

/// Upper bound on samples reserved up front; longer runs grow as they go.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Samples of one cell. Gating vectors stay empty under `Recording::PotentialOnly`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub v: Vec<f64>,
    pub m: Vec<f64>,
    pub h: Vec<f64>,
    pub n: Vec<f64>,
}

impl Trace {
    fn with_capacity(capacity: usize, recording: Recording) -> Trace {
        let gating = match recording {
            Recording::Full => capacity,
            Recording::PotentialOnly => 0,
        };
        Trace {
            v: Vec::with_capacity(capacity),
            m: Vec::with_capacity(gating),
            h: Vec::with_capacity(gating),
            n: Vec::with_capacity(gating),
        }
    }

    fn push(&mut self, state: &CellState, recording: Recording) {
        self.v.push(state.v);
        if recording == Recording::Full {
            self.m.push(state.m);
            self.h.push(state.h);
            self.n.push(state.n);
        }
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Full state at sample `i`, if gating was recorded.
    pub fn state(&self, i: usize) -> Option<CellState> {
        Some(CellState {
            v: *self.v.get(i)?,
            m: *self.m.get(i)?,
            h: *self.h.get(i)?,
            n: *self.n.get(i)?,
        })
    }

    /// Indices where V crosses `threshold` upwards.
    pub fn spike_indices(&self, threshold: f64) -> Vec<usize> {
        self.v
            .iter()
            .tuple_windows()
            .enumerate()
            .filter(|(_, (prev, next))| **prev < threshold && **next >= threshold)
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Smallest and largest value over all recorded gating samples.
    pub fn gating_range(&self) -> Option<(f64, f64)> {
        self.m
            .iter()
            .chain(&self.h)
            .chain(&self.n)
            .copied()
            .minmax_by(f64::total_cmp)
            .into_option()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub recording: Recording,
    /// Time at the end of each recorded step (ms)
    pub times: Vec<f64>,
    pub cells: Vec<Trace>,
}

impl Trajectory {
    pub(crate) fn new(n_cells: usize, capacity: usize, recording: Recording) -> Trajectory {
        let capacity = capacity.min(PREALLOC_LIMIT);
        Trajectory {
            recording,
            times: Vec::with_capacity(capacity),
            cells: (0..n_cells)
                .map(|_| Trace::with_capacity(capacity, recording))
                .collect(),
        }
    }

    pub(crate) fn push<'a>(&mut self, time: f64, states: impl IntoIterator<Item = &'a CellState>) {
        self.times.push(time);
        for (trace, state) in self.cells.iter_mut().zip(states) {
            trace.push(state, self.recording);
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn cell(&self, idx: usize) -> Option<&Trace> {
        self.cells.get(idx)
    }

    /// `(time, [V of every cell])` per sample.
    pub fn potential_rows(&self) -> impl Iterator<Item = (f64, Vec<f64>)> + '_ {
        self.times
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, self.cells.iter().map(|c| c.v[i]).collect()))
    }

    /// `(time, [state of every cell])` per sample. Empty unless gating was recorded.
    pub fn state_rows(&self) -> impl Iterator<Item = (f64, Vec<CellState>)> + '_ {
        let len = match self.recording {
            Recording::Full => self.len(),
            Recording::PotentialOnly => 0,
        };
        self.times[..len].iter().enumerate().map(|(i, &t)| {
            let states = self.cells.iter().filter_map(|c| c.state(i)).collect();
            (t, states)
        })
    }

    /// Times at which cell `idx` crossed `threshold` upwards.
    pub fn spike_times(&self, idx: usize, threshold: f64) -> Vec<f64> {
        self.cell(idx)
            .map(|trace| {
                trace
                    .spike_indices(threshold)
                    .into_iter()
                    .map(|i| self.times[i])
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped at `step` because cell `cell` went non-finite. Samples before `step` are kept.
    Diverged { step: usize, time: f64, cell: usize },
}

/// Result of a run. Check `status` before trusting the trajectory length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub dt: f64,
    pub steps_requested: usize,
    pub status: RunStatus,
    pub trajectory: Trajectory,
    /// Last finite state of every cell
    pub final_states: Vec<CellState>,
}

impl SimulationRun {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Turns a truncated run into `HhError::Diverged`.
    pub fn into_result(self) -> Result<Trajectory> {
        match self.status {
            RunStatus::Completed => Ok(self.trajectory),
            RunStatus::Diverged { step, time, cell } => Err(HhError::Diverged { step, time, cell }),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(v: f64) -> CellState {
        CellState { v, m: 0.1, h: 0.5, n: 0.3 }
    }

    #[test]
    fn test_potential_only_skips_gating() {
        let mut traj = Trajectory::new(2, 4, Recording::PotentialOnly);
        traj.push(0.1, &[state(-65.0), state(-64.0)]);
        assert_eq!(traj.len(), 1);
        assert_eq!(traj.cells[1].v, vec![-64.0]);
        assert!(traj.cells[0].m.is_empty());
        assert_eq!(traj.cells[0].state(0), None);
        assert_eq!(traj.cells[0].gating_range(), None);
        assert_eq!(traj.state_rows().count(), 0);
        assert_eq!(traj.potential_rows().count(), 1);
    }

    #[test]
    fn test_preallocation_is_bounded() {
        let traj = Trajectory::new(2, usize::MAX, Recording::Full);
        assert!(traj.times.capacity() <= PREALLOC_LIMIT);
        assert!(traj.cells[1].m.capacity() <= PREALLOC_LIMIT);
    }

    #[test]
    fn test_rows_and_state() {
        let mut traj = Trajectory::new(2, 2, Recording::Full);
        traj.push(0.1, &[state(-65.0), state(-60.0)]);
        traj.push(0.2, &[state(-64.0), state(-59.0)]);
        let rows: Vec<_> = traj.potential_rows().collect();
        assert_eq!(rows, vec![(0.1, vec![-65.0, -60.0]), (0.2, vec![-64.0, -59.0])]);
        let states: Vec<_> = traj.state_rows().collect();
        assert_eq!(
            states,
            vec![
                (0.1, vec![state(-65.0), state(-60.0)]),
                (0.2, vec![state(-64.0), state(-59.0)]),
            ]
        );
        assert_eq!(traj.cells[1].state(1), Some(state(-59.0)));
        assert_eq!(traj.cells[0].gating_range(), Some((0.1, 0.5)));
    }

    #[test]
    fn test_spike_times() {
        let mut traj = Trajectory::new(1, 6, Recording::PotentialOnly);
        for (i, v) in [-65.0, -20.0, 10.0, 30.0, -70.0, 5.0].into_iter().enumerate() {
            traj.push(i as f64, &[state(v)]);
        }
        assert_eq!(traj.cells[0].spike_indices(0.0), vec![2, 5]);
        assert_eq!(traj.spike_times(0, 0.0), vec![2.0, 5.0]);
        assert!(traj.spike_times(3, 0.0).is_empty());
    }

    #[test]
    fn test_diverged_run_into_error() {
        let run = SimulationRun {
            dt: 0.01,
            steps_requested: 10,
            status: RunStatus::Diverged { step: 3, time: 0.04, cell: 0 },
            trajectory: Trajectory::new(1, 0, Recording::Full),
            final_states: vec![state(-65.0)],
        };
        assert!(!run.is_complete());
        assert_eq!(
            run.into_result(),
            Err(HhError::Diverged { step: 3, time: 0.04, cell: 0 })
        );
    }
}

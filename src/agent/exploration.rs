use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    config::PolicyGradientExploration,
    constants::{pathwise, policy_gradient},
};

/// Step counter shared by every action selection of a run.
///
/// Owned by the trainer and never reset between episodes, so exploration anneals
/// over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplorationState {
    steps_done: u64,
}

impl ExplorationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    /// Returns the current step and moves on to the next one
    pub fn advance(&mut self) -> u64 {
        let t = self.steps_done;
        self.steps_done += 1;
        t
    }
}

/// Where the actor-critic takes its next action from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Policy,
    Hold,
    Random,
}

/// Two thresholds bracketing a policy band that widens over the run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathwiseSchedule {
    pub eps_start_low: f64,
    pub eps_start_high: f64,
    pub eps_end_low: f64,
    pub eps_end_high: f64,
    pub decay: f64,
}

impl Default for PathwiseSchedule {
    fn default() -> Self {
        Self {
            eps_start_low: pathwise::EPS_START_LOW,
            eps_start_high: pathwise::EPS_START_HIGH,
            eps_end_low: pathwise::EPS_END_LOW,
            eps_end_high: pathwise::EPS_END_HIGH,
            decay: pathwise::EPS_DECAY,
        }
    }
}

impl PathwiseSchedule {
    fn decay_factor(&self, t: u64) -> f64 {
        (-(t as f64) / self.decay).exp()
    }

    pub fn low(&self, t: u64) -> f64 {
        let f = self.decay_factor(t);
        self.eps_start_low * f + self.eps_end_low * (1. - f)
    }

    pub fn high(&self, t: u64) -> f64 {
        let f = self.decay_factor(t);
        self.eps_start_high * f + self.eps_end_high * (1. - f)
    }

    /// `high - low` is a convex mix of the start and end gaps, so positive gaps at
    /// both ends keep `low(t) < high(t)` for every t
    pub fn is_ordered(&self) -> bool {
        self.decay > 0.
            && self.eps_start_low < self.eps_start_high
            && self.eps_end_low < self.eps_end_high
    }

    /// Policy strictly inside the band, hold above it, random otherwise
    pub fn choose(&self, t: u64, u: f64) -> ActionSource {
        let (low, high) = (self.low(t), self.high(t));
        if low < u && u < high {
            ActionSource::Policy
        } else if u > high {
            ActionSource::Hold
        } else {
            ActionSource::Random
        }
    }

    /// Draws `u ∈ [0, 1)` against the thresholds at the current step, then advances
    pub fn draw<R: Rng + ?Sized>(&self, state: &mut ExplorationState, rng: &mut R) -> ActionSource {
        let u: f64 = rng.gen();
        self.choose(state.advance(), u)
    }
}

/// Where the stochastic policy takes its next action from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    Gaussian,
    Hold,
}

/// Single threshold decaying from `eps_start` to `eps_end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpsilonSchedule {
    pub eps_start: f64,
    pub eps_end: f64,
    pub decay: f64,
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            eps_start: policy_gradient::EPS_START,
            eps_end: policy_gradient::EPS_END,
            decay: policy_gradient::EPS_DECAY,
        }
    }
}

impl EpsilonSchedule {
    pub fn threshold(&self, t: u64) -> f64 {
        let f = (-(t as f64) / self.decay).exp();
        self.eps_start * f + self.eps_end * (1. - f)
    }

    pub fn choose(&self, t: u64, u: f64, mode: PolicyGradientExploration) -> SampleSource {
        match mode {
            PolicyGradientExploration::AlwaysSample => SampleSource::Gaussian,
            PolicyGradientExploration::EpsilonHold if u > self.threshold(t) => {
                SampleSource::Gaussian
            }
            PolicyGradientExploration::EpsilonHold => SampleSource::Hold,
        }
    }
}

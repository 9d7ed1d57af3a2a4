use ndarray::{Array1, ArrayView1};

use crate::{error::Result, types::Observation};

/// Result of applying one allocation to the environment
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
}

impl StepOutcome {
    pub fn new(observation: Observation, reward: f64, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
        }
    }
}

/// Market/portfolio simulation driven by the trainers.
///
/// Implementations own state transitions, fees and net worth accounting. Errors are
/// wrapped with [`crate::Error::environment`] and abort the run.
pub trait Environment {
    fn reset(&mut self) -> Result<Observation>;

    /// Applies `action`, a portfolio allocation over [`Environment::action_count`] assets
    fn step(&mut self, action: ArrayView1<f64>) -> Result<StepOutcome>;

    /// Diagnostic output for the current episode
    fn render(&self);

    /// Current allocation of the portfolio; acting on it changes nothing
    fn hold_rate(&self) -> Array1<f64>;

    fn net_worth(&self) -> f64;

    fn initial_balance(&self) -> f64;

    fn action_count(&self) -> usize;
}

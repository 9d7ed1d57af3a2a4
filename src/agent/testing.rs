//! Test doubles shared by the trainer tests

use std::sync::{Arc, Mutex};

use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
    LearningRate,
};
use ndarray::{array, Array1, ArrayView1};

use crate::{
    agent::nn::gradient_values,
    error::Result,
    gym::{Environment, StepOutcome},
    types::Observation,
};

/// Double precision keeps gradient comparisons tight
pub type TestBackend = Autodiff<NdArray<f64>>;
pub type TestDevice = NdArrayDevice;

pub const EPISODE_LEN: usize = 10;

/// Two assets, constant market observation, reward 1 on every step.
///
/// Net worth grows by 1% of the initial balance per step.
pub struct StubEnv {
    pub step: usize,
    pub weights: Array1<f64>,
    pub resets: usize,
}

impl StubEnv {
    pub fn new() -> Self {
        Self {
            step: 0,
            weights: array![0.5, 0.5],
            resets: 0,
        }
    }

    pub fn observation(&self) -> Observation {
        Observation::new(array![0.1, -0.2], array![self.weights[0], self.weights[1], 0.])
    }
}

impl Environment for StubEnv {
    fn reset(&mut self) -> Result<Observation> {
        self.step = 0;
        self.resets += 1;
        Ok(self.observation())
    }

    fn step(&mut self, action: ArrayView1<f64>) -> Result<StepOutcome> {
        self.step += 1;
        self.weights = action.to_owned();
        Ok(StepOutcome::new(self.observation(), 1., self.step == EPISODE_LEN))
    }

    fn render(&self) {}

    fn hold_rate(&self) -> Array1<f64> {
        self.weights.clone()
    }

    fn net_worth(&self) -> f64 {
        100. * (1. + 0.01 * self.step as f64)
    }

    fn initial_balance(&self) -> f64 {
        100.
    }

    fn action_count(&self) -> usize {
        2
    }
}

/// Applies nothing, only remembers the largest gradient of every call
#[derive(Clone, Default)]
pub struct RecordingOptimizer {
    pub calls: Arc<Mutex<Vec<f64>>>,
}

impl RecordingOptimizer {
    pub fn calls(&self) -> Vec<f64> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl<M, B> Optimizer<M, B> for RecordingOptimizer
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    type Record = ();

    fn step(&mut self, _lr: LearningRate, module: M, grads: GradientsParams) -> M {
        let largest = gradient_values(&module, &grads)
            .into_iter()
            .fold(0., |acc: f64, g| acc.max(g.abs()));
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(largest);
        }
        module
    }

    fn to_record(&self) -> Self::Record {}

    fn load_record(self, _record: Self::Record) -> Self {
        self
    }
}

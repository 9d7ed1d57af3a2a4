use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    agent::exploration::{EpsilonSchedule, PathwiseSchedule},
    constants::{files, market, pathwise, policy_gradient},
    error::{Error, Result},
};

/// Full description of a training run, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seed for every random draw of the run; entropy when absent
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub market: MarketConfig,
    pub pathwise: PathwiseConfig,
    pub policy_gradient: PolicyGradientConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            output_dir: PathBuf::from(files::OUTPUT_PATH),
            market: MarketConfig::default(),
            pathwise: PathwiseConfig::default(),
            policy_gradient: PolicyGradientConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// How the critic regression target combines reward and bootstrap value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriticTarget {
    /// `r + γ·Q'(s', μ'(s'))`
    Bellman,
    /// `(Q'(s', μ'(s')) + r)·γ`, kept for weights trained with the scaled form
    ScaledTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathwiseConfig {
    pub batch_size: usize,
    pub gamma: f64,
    pub capacity: usize,
    pub episodes: usize,
    pub optimize_every: usize,
    pub target_sync_every: usize,
    pub warmup_batches: usize,
    pub grad_clip: f64,
    /// Save, evaluate and plot every this many episodes; never when absent
    pub checkpoint_every: Option<usize>,
    pub critic_target: CriticTarget,
    pub schedule: PathwiseSchedule,
    pub learning_rate: f64,
}

impl Default for PathwiseConfig {
    fn default() -> Self {
        Self {
            batch_size: pathwise::BATCH_SIZE,
            gamma: pathwise::GAMMA,
            capacity: pathwise::MEMORY_CAPACITY,
            episodes: pathwise::EPISODES,
            optimize_every: pathwise::OPTIMIZE_EVERY,
            target_sync_every: pathwise::TARGET_SYNC_EVERY,
            warmup_batches: pathwise::WARMUP_BATCHES,
            grad_clip: pathwise::GRAD_CLIP,
            checkpoint_every: Some(pathwise::CHECKPOINT_EVERY),
            critic_target: CriticTarget::Bellman,
            schedule: PathwiseSchedule::default(),
            learning_rate: pathwise::LEARNING_RATE,
        }
    }
}

impl PathwiseConfig {
    /// Memory occupancy required before any update or target sync
    pub fn warmup_len(&self) -> usize {
        self.batch_size * self.warmup_batches
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.capacity == 0 {
            return Err(Error::Config("batch size and capacity must be positive".into()));
        }
        if self.optimize_every == 0 || self.target_sync_every == 0 {
            return Err(Error::Config("update cadences must be positive".into()));
        }
        if self.checkpoint_every == Some(0) {
            return Err(Error::Config("checkpoint cadence must be positive".into()));
        }
        if self.grad_clip <= 0. {
            return Err(Error::Config(format!("gradient clip {} is not positive", self.grad_clip)));
        }
        if !self.schedule.is_ordered() {
            return Err(Error::Config(
                "exploration schedule must keep low(t) below high(t)".into(),
            ));
        }
        Ok(())
    }
}

/// Which action the stochastic policy takes while training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyGradientExploration {
    /// Always act on a gaussian draw (plain REINFORCE)
    AlwaysSample,
    /// Hold the current allocation when the uniform draw falls under `eps(t)`
    EpsilonHold,
}

/// Order in which an episode's rewards are discounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnOrder {
    /// Discount the sampled batch in the order it was drawn
    Sampled,
    /// Discount the whole episode in time order, then sample
    Episode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyGradientConfig {
    pub batch_size: usize,
    pub gamma: f64,
    pub capacity: usize,
    pub episodes: usize,
    pub schedule: EpsilonSchedule,
    pub exploration: PolicyGradientExploration,
    pub return_order: ReturnOrder,
    pub covariance_floor: f64,
    pub max_resample: usize,
    pub learning_rate: f64,
}

impl Default for PolicyGradientConfig {
    fn default() -> Self {
        Self {
            batch_size: policy_gradient::BATCH_SIZE,
            gamma: policy_gradient::GAMMA,
            capacity: policy_gradient::MEMORY_CAPACITY,
            episodes: policy_gradient::EPISODES,
            schedule: EpsilonSchedule::default(),
            exploration: PolicyGradientExploration::AlwaysSample,
            return_order: ReturnOrder::Sampled,
            covariance_floor: policy_gradient::COVARIANCE_FLOOR,
            max_resample: policy_gradient::MAX_RESAMPLE,
            learning_rate: policy_gradient::LEARNING_RATE,
        }
    }
}

impl PolicyGradientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.capacity == 0 {
            return Err(Error::Config("batch size and capacity must be positive".into()));
        }
        if self.covariance_floor <= 0. {
            return Err(Error::Config(format!(
                "covariance floor {} is not positive",
                self.covariance_floor
            )));
        }
        if self.max_resample == 0 {
            return Err(Error::Config("at least one sampling attempt is required".into()));
        }
        if self.schedule.decay.is_nan() || self.schedule.decay <= 0. {
            return Err(Error::Config(format!(
                "epsilon decay {} is not positive",
                self.schedule.decay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub assets: usize,
    pub horizon: usize,
    pub window: usize,
    pub initial_balance: f64,
    pub buy_fee: f64,
    pub sell_fee: f64,
    pub drift: f64,
    pub volatility: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            assets: market::ASSETS,
            horizon: market::HORIZON,
            window: market::WINDOW,
            initial_balance: market::INITIAL_BALANCE,
            buy_fee: market::BUY_FEE,
            sell_fee: market::SELL_FEE,
            drift: market::DRIFT,
            volatility: market::VOLATILITY,
        }
    }
}

impl MarketConfig {
    /// Width of the flattened market and account observation
    pub fn observation_size(&self) -> usize {
        self.window * self.assets + self.assets + 1
    }
}

pub mod files {
    pub const OUTPUT_PATH: &str = "../training";
    pub const CHECKPOINT_DIR: &str = "model";
    pub const CHART_DIR: &str = "image/ret";
    pub const CHECKPOINT_EXTENSION: &str = "mpk";
    pub const CHECKPOINT_META_EXTENSION: &str = "meta";
    pub const RETURNS_TABLE_NAME: &str = "pathwise_derivative_returns.bin";
    pub const RETURNS_CHART_NAME: &str = "pathwise_derivative_update";
}

pub const CHART_IMAGE_FORMAT: &str = "png";

/// Deterministic actor-critic with pathwise (DPG) updates
pub mod pathwise {
    pub const BATCH_SIZE: usize = 256;
    pub const GAMMA: f64 = 0.999;
    pub const MEMORY_CAPACITY: usize = 30_000;
    pub const EPISODES: usize = 50;
    /// Optimize when the in-episode step index is a multiple of this
    pub const OPTIMIZE_EVERY: usize = 3;
    /// Hard-copy policy weights into the targets when the in-episode step index is a multiple of this
    pub const TARGET_SYNC_EVERY: usize = 100;
    /// Updates start once the memory holds this many batches
    pub const WARMUP_BATCHES: usize = 5;
    pub const GRAD_CLIP: f64 = 10.0;
    pub const CHECKPOINT_EVERY: usize = 2;
    pub const LEARNING_RATE: f64 = 0.01;

    pub const EPS_START_LOW: f64 = 0.45;
    pub const EPS_START_HIGH: f64 = 0.55;
    pub const EPS_END_LOW: f64 = 0.1;
    pub const EPS_END_HIGH: f64 = 0.9;
    pub const EPS_DECAY: f64 = 100_000.;
}

/// Stochastic policy gradient (REINFORCE) with a multivariate gaussian head
pub mod policy_gradient {
    pub const BATCH_SIZE: usize = 64;
    /// 4% a year spread over 250 trading days
    pub const GAMMA: f64 = 0.04 / 250.;
    pub const MEMORY_CAPACITY: usize = 3_000;
    pub const EPISODES: usize = 100;
    pub const LEARNING_RATE: f64 = 0.01;

    pub const EPS_START: f64 = 0.99;
    pub const EPS_END: f64 = 0.05;
    pub const EPS_DECAY: f64 = 200.;

    /// Added to the covariance vector factor before building the covariance
    pub const COVARIANCE_FLOOR: f64 = 1e-2;
    pub const MAX_RESAMPLE: usize = 100;
}

pub mod rmsprop {
    pub const ALPHA: f32 = 0.99;
    pub const EPS: f32 = 1e-8;
    pub const MOMENTUM: f32 = 0.;
}

pub mod market {
    pub const ASSETS: usize = 8;
    pub const HORIZON: usize = 250;
    pub const WINDOW: usize = 20;
    pub const INITIAL_BALANCE: f64 = 10_000.;
    pub const BUY_FEE: f64 = 0.015;
    pub const SELL_FEE: f64 = 0.;
    /// Daily drift of the simulated log prices
    pub const DRIFT: f64 = 0.0003;
    /// Daily volatility of the simulated log prices
    pub const VOLATILITY: f64 = 0.015;
}

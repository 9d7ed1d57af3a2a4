pub mod checkpoint;
pub mod exploration;
pub mod linear;
pub mod nn;
pub mod optim;
pub mod pathwise;
pub mod policy_gradient;
pub mod returns;
pub mod sampler;

#[cfg(test)]
mod testing;

use crate::types::Data;

/// Counters of one run, read by logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingStats {
    pub updates: usize,
    pub target_syncs: usize,
    pub episode_rewards: Data,
}

//! REINFORCE over a multivariate gaussian allocation policy.
//!
//! Each episode collects its scored steps into a fresh replay memory and ends with
//! a single batched update on `-mean(log_prob · G)`.

use std::marker::PhantomData;

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};
use ndarray::Array1;
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::{
    agent::{
        exploration::{ExplorationState, SampleSource},
        nn::{state_tensor, states_tensor, StochasticPolicy},
        returns::discounted_returns,
        TrainingStats,
    },
    config::{PolicyGradientConfig, ReturnOrder},
    error::{Error, Result},
    gym::{Environment, ReplayMemory},
    types::{Observation, ObservationBatch, ScoredTransition},
};

pub struct PolicyGradientTrainer<B: AutodiffBackend, E, P, O> {
    env: E,
    policy: P,
    optimizer: O,
    exploration: ExplorationState,
    rng: StdRng,
    device: B::Device,
    config: PolicyGradientConfig,
    stats: TrainingStats,
    backend: PhantomData<B>,
}

/// Action chosen for one step; only gaussian draws are scored
enum Chosen {
    Sampled {
        allocation: Array1<f64>,
        raw: Array1<f64>,
        log_prob: f64,
    },
    Hold(Array1<f64>),
}

impl<B, E, P, O> PolicyGradientTrainer<B, E, P, O>
where
    B: AutodiffBackend,
    E: Environment,
    P: StochasticPolicy<B> + AutodiffModule<B>,
    O: Optimizer<P, B>,
{
    pub fn new(
        env: E,
        policy: P,
        optimizer: O,
        config: PolicyGradientConfig,
        device: B::Device,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            env,
            policy,
            optimizer,
            exploration: ExplorationState::new(),
            rng,
            device,
            config,
            stats: TrainingStats::default(),
            backend: PhantomData,
        })
    }

    fn select_action(&mut self, state: &Observation, train: bool) -> Result<Chosen> {
        let u: f64 = self.rng.gen();
        let source = if train {
            self.config
                .schedule
                .choose(self.exploration.steps_done(), u, self.config.exploration)
        } else {
            SampleSource::Gaussian
        };

        match source {
            SampleSource::Hold => Ok(Chosen::Hold(self.env.hold_rate())),
            SampleSource::Gaussian => {
                let head = self
                    .policy
                    .forward(state_tensor(state, &self.device)?)
                    .heads()?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Shape("policy produced no head".into()))?;
                let sampled = head.sample(
                    &mut self.rng,
                    self.config.covariance_floor,
                    self.config.max_resample,
                )?;
                Ok(Chosen::Sampled {
                    allocation: sampled.allocation,
                    raw: sampled.raw,
                    log_prob: sampled.log_prob,
                })
            }
        }
    }

    /// Plays one episode and returns its total reward. Training episodes end with
    /// one update over the episode's own transitions and advance the exploration
    /// step once.
    pub fn run_episode(&mut self, train: bool) -> Result<f64> {
        let mut memory = ReplayMemory::new(self.config.capacity);
        let mut state = self.env.reset()?;
        let mut total_reward = 0.;

        loop {
            let chosen = self.select_action(&state, train)?;
            let allocation = match &chosen {
                Chosen::Sampled { allocation, .. } => allocation.view(),
                Chosen::Hold(hold) => hold.view(),
            };
            let outcome = self.env.step(allocation)?;
            total_reward += outcome.reward;

            if let Chosen::Sampled { raw, log_prob, .. } = chosen {
                memory.push(ScoredTransition {
                    log_prob,
                    reward: outcome.reward,
                    state,
                    raw_action: raw,
                });
            }
            state = outcome.observation;

            if outcome.done {
                break;
            }
        }

        self.env.render();

        if train {
            if memory.len() >= self.config.batch_size {
                self.optimize(&memory)?;
            } else {
                warn!(
                    scored = memory.len(),
                    batch_size = self.config.batch_size,
                    "episode too short to optimize"
                );
            }
            self.exploration.advance();
            self.stats.episode_rewards.push(total_reward);
        }

        Ok(total_reward)
    }

    /// One sampling-only rollout
    pub fn evaluate(&mut self) -> Result<f64> {
        self.run_episode(false)
    }

    pub fn train(&mut self) -> Result<()> {
        for episode in 1..=self.config.episodes {
            let reward = self.run_episode(true)?;
            info!(
                episode,
                reward,
                steps_done = self.exploration.steps_done(),
                updates = self.stats.updates,
                "episode finished"
            );
        }
        Ok(())
    }

    /// Draws a batch and pairs each transition with its discounted return
    pub fn sample_with_returns<'m>(
        &mut self,
        memory: &'m ReplayMemory<ScoredTransition>,
    ) -> Result<Vec<(&'m ScoredTransition, f64)>> {
        let batch_size = self.config.batch_size;

        match self.config.return_order {
            ReturnOrder::Sampled => {
                let batch = memory.sample(&mut self.rng, batch_size)?;
                let rewards: Vec<f64> = batch.iter().map(|t| t.reward).collect();
                let returns = discounted_returns(&rewards, self.config.gamma);
                Ok(batch.into_iter().zip(returns).collect())
            }
            ReturnOrder::Episode => {
                let episode: Vec<&ScoredTransition> = memory.iter().collect();
                if batch_size > episode.len() {
                    return Err(Error::InsufficientData {
                        requested: batch_size,
                        available: episode.len(),
                    });
                }

                let rewards: Vec<f64> = episode.iter().map(|t| t.reward).collect();
                let returns = discounted_returns(&rewards, self.config.gamma);
                Ok(index::sample(&mut self.rng, episode.len(), batch_size)
                    .into_iter()
                    .map(|i| (episode[i], returns[i]))
                    .collect())
            }
        }
    }

    /// Loss `-mean(log_prob · G)` over `samples` and its parameter gradients.
    ///
    /// The loss reports the stored log-probs. Gradients come from one batched
    /// forward pass, contracted with the per-head log-prob gradients.
    pub fn policy_gradient(
        &self,
        samples: &[(&ScoredTransition, f64)],
    ) -> Result<(f64, GradientsParams)> {
        let n = samples.len().max(1) as f64;
        let floor = self.config.covariance_floor;
        let batch = ObservationBatch::stack(samples.iter().map(|(t, _)| &t.state))?;
        let output = self.policy.forward(states_tensor(&batch, &self.device)?);
        let heads = output.heads()?;

        let mut loss = 0.;
        let mut upstream = Vec::with_capacity(samples.len());
        for ((transition, ret), head) in samples.iter().zip(&heads) {
            loss -= transition.log_prob * ret / n;
            upstream.push(
                head.log_prob_gradients(transition.raw_action.view(), floor)?
                    .scaled(-ret / n),
            );
        }

        let surrogate = output.contract(&upstream)?;
        let gradients = GradientsParams::from_grads(surrogate.backward(), &self.policy);
        Ok((loss, gradients))
    }

    pub fn optimize(&mut self, memory: &ReplayMemory<ScoredTransition>) -> Result<f64> {
        let samples = self.sample_with_returns(memory)?;
        let (loss, gradients) = self.policy_gradient(&samples)?;
        self.policy = self
            .optimizer
            .step(self.config.learning_rate, self.policy.clone(), gradients);

        self.stats.updates += 1;
        debug!(loss, updates = self.stats.updates, "optimized policy");
        Ok(loss)
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn exploration(&self) -> &ExplorationState {
        &self.exploration
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }
}

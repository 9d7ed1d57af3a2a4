//! Deterministic actor-critic trained with pathwise (DPG) updates.
//!
//! Every step of an episode is pushed into one replay memory shared by the whole
//! run. Once the memory holds `warmup_batches` batches, a batched update runs on
//! every `optimize_every`-th step of the episode and both target networks are hard
//! synced on every `target_sync_every`-th step.

use std::marker::PhantomData;

use burn::{
    module::AutodiffModule,
    nn::loss::{HuberLossConfig, Reduction},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use ndarray::Array1;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::{
    agent::{
        checkpoint::RunOutput,
        exploration::{ActionSource, ExplorationState},
        nn::{
            act, clip_gradients, matrix_tensor, scalar, states_tensor, vector_tensor, Actor,
            Critic,
        },
        sampler::random_one_hot,
        TrainingStats,
    },
    charts::returns_chart,
    config::{CriticTarget, PathwiseConfig},
    constants::files::RETURNS_CHART_NAME,
    error::Result,
    gym::{Environment, ReplayMemory},
    history::returns::ReturnsTable,
    types::{stack_rows, Data, Observation, ObservationBatch, Transition},
};

pub const ACTOR_CHECKPOINT: &str = "pathwise_derivative_actor";
pub const CRITIC_CHECKPOINT: &str = "pathwise_derivative_qvalue";

/// Losses of one batched update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateLosses {
    pub critic: f64,
    pub actor: f64,
}

/// Regression target of the critic for a batch
pub fn critic_targets<B: Backend>(
    kind: CriticTarget,
    gamma: f64,
    rewards: Tensor<B, 1>,
    next_values: Tensor<B, 1>,
) -> Tensor<B, 1> {
    match kind {
        CriticTarget::Bellman => rewards + next_values.mul_scalar(gamma),
        CriticTarget::ScaledTarget => (next_values + rewards).mul_scalar(gamma),
    }
}

/// Mean smooth L1 loss, quadratic inside `|d| < 1`
pub fn smooth_l1<B: Backend>(predictions: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    HuberLossConfig::new(1.)
        .init()
        .forward(predictions, targets, Reduction::Mean)
}

pub struct PathwiseTrainer<B: AutodiffBackend, E, A, C, OA, OC> {
    env: E,
    actor: A,
    actor_target: A,
    critic: C,
    critic_target: C,
    actor_optimizer: OA,
    critic_optimizer: OC,
    memory: ReplayMemory<Transition>,
    exploration: ExplorationState,
    rng: StdRng,
    device: B::Device,
    config: PathwiseConfig,
    stats: TrainingStats,
    backend: PhantomData<B>,
}

impl<B, E, A, C, OA, OC> PathwiseTrainer<B, E, A, C, OA, OC>
where
    B: AutodiffBackend,
    E: Environment,
    A: Actor<B> + AutodiffModule<B>,
    C: Critic<B> + AutodiffModule<B>,
    OA: Optimizer<A, B>,
    OC: Optimizer<C, B>,
{
    /// Targets start as exact copies of the policy networks
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: E,
        actor: A,
        critic: C,
        actor_optimizer: OA,
        critic_optimizer: OC,
        config: PathwiseConfig,
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
            actor_target: actor.clone(),
            actor,
            critic_target: critic.clone(),
            critic,
            actor_optimizer,
            critic_optimizer,
            memory: ReplayMemory::new(config.capacity),
            exploration: ExplorationState::new(),
            rng,
            device,
            config,
            stats: TrainingStats::default(),
            backend: PhantomData,
        })
    }

    pub fn select_action(&mut self, state: &Observation) -> Result<Array1<f64>> {
        match self.config.schedule.draw(&mut self.exploration, &mut self.rng) {
            ActionSource::Policy => act(&self.actor, state, &self.device),
            ActionSource::Hold => Ok(self.env.hold_rate()),
            ActionSource::Random => Ok(random_one_hot(&mut self.rng, self.env.action_count())),
        }
    }

    /// Plays one exploring episode and returns its total reward
    pub fn run_episode(&mut self) -> Result<f64> {
        let mut state = self.env.reset()?;
        let mut total_reward = 0.;
        let warmup = self.config.warmup_len();

        for t in 0.. {
            let action = self.select_action(&state)?;
            let outcome = self.env.step(action.view())?;
            total_reward += outcome.reward;

            self.memory.push(Transition {
                state,
                action,
                next_state: outcome.observation.clone(),
                reward: outcome.reward,
            });
            state = outcome.observation;

            if self.memory.len() >= warmup {
                if t % self.config.optimize_every == 0 {
                    self.optimize()?;
                }
                if t % self.config.target_sync_every == 0 {
                    self.sync_targets();
                }
            }

            if outcome.done {
                self.env.render();
                break;
            }
        }

        self.stats.episode_rewards.push(total_reward);
        Ok(total_reward)
    }

    /// One batched critic update followed by one actor update
    pub fn optimize(&mut self) -> Result<UpdateLosses> {
        let (states, actions, next_states, rewards) = {
            let batch = self.memory.sample(&mut self.rng, self.config.batch_size)?;
            let states = ObservationBatch::stack(batch.iter().map(|t| &t.state))?;
            let next_states = ObservationBatch::stack(batch.iter().map(|t| &t.next_state))?;
            let actions = stack_rows(
                batch.iter().map(|t| t.action.view()),
                self.env.action_count(),
                "action",
            )?;
            let rewards: Array1<f64> = batch.iter().map(|t| t.reward).collect();
            (states, actions, next_states, rewards)
        };
        let device = &self.device;
        let states = states_tensor::<B>(&states, device)?;
        let next_states = states_tensor::<B>(&next_states, device)?;
        let actions = matrix_tensor::<B>(actions.view(), device);
        let rewards = vector_tensor::<B>(rewards.view(), device);
        let lr = self.config.learning_rate;

        let next_actions = self.actor_target.forward(next_states.clone());
        let next_values = self.critic_target.forward(next_states, next_actions).detach();
        let targets = critic_targets(
            self.config.critic_target,
            self.config.gamma,
            rewards,
            next_values,
        );

        let critic_loss = smooth_l1(self.critic.forward(states.clone(), actions), targets);
        let critic_loss_value = scalar(critic_loss.clone());
        let grads = GradientsParams::from_grads(critic_loss.backward(), &self.critic);
        let grads = clip_gradients(&self.critic, grads, self.config.grad_clip);
        self.critic = self.critic_optimizer.step(lr, self.critic.clone(), grads);

        // -mean Q(s, μ(s)) through the freshly updated critic
        let policy_actions = self.actor.forward(states.clone());
        let actor_loss = self.critic.forward(states, policy_actions).mean().neg();
        let actor_loss_value = scalar(actor_loss.clone());
        let grads = GradientsParams::from_grads(actor_loss.backward(), &self.actor);
        let grads = clip_gradients(&self.actor, grads, self.config.grad_clip);
        self.actor = self.actor_optimizer.step(lr, self.actor.clone(), grads);

        self.stats.updates += 1;
        debug!(
            critic_loss = critic_loss_value,
            actor_loss = actor_loss_value,
            updates = self.stats.updates,
            "optimized"
        );

        Ok(UpdateLosses {
            critic: critic_loss_value,
            actor: actor_loss_value,
        })
    }

    /// Hard copy of both policy networks into their targets
    pub fn sync_targets(&mut self) {
        self.actor_target = self.actor.clone();
        self.critic_target = self.critic.clone();

        self.stats.target_syncs += 1;
        debug!(syncs = self.stats.target_syncs, "synced target networks");
    }

    /// Greedy rollout of the actor recording `net_worth / initial_balance - 1` per step
    pub fn evaluate(&mut self) -> Result<Data> {
        let mut state = self.env.reset()?;
        let initial = self.env.initial_balance();
        let mut returns = Vec::new();

        loop {
            let action = act(&self.actor, &state, &self.device)?;
            let outcome = self.env.step(action.view())?;
            returns.push(self.env.net_worth() / initial - 1.);
            state = outcome.observation;

            if outcome.done {
                self.env.render();
                break;
            }
        }

        Ok(returns)
    }

    /// Runs every configured episode. Each checkpoint episode evaluates the actor
    /// and records its return curve; with `output` the networks, the table and the
    /// chart are also written to disk.
    pub fn train(&mut self, output: Option<&RunOutput>) -> Result<ReturnsTable> {
        let mut table = ReturnsTable::new();

        for episode in 1..=self.config.episodes {
            let reward = self.run_episode()?;
            info!(
                episode,
                reward,
                memory = self.memory.len(),
                steps_done = self.exploration.steps_done(),
                updates = self.stats.updates,
                "episode finished"
            );

            let Some(every) = self.config.checkpoint_every else {
                continue;
            };
            if episode % every == 0 {
                self.checkpoint(episode, &mut table, output)?;
            }
        }

        Ok(table)
    }

    fn checkpoint(
        &mut self,
        episode: usize,
        table: &mut ReturnsTable,
        output: Option<&RunOutput>,
    ) -> Result<()> {
        if let Some(output) = output {
            output
                .checkpointer
                .save(ACTOR_CHECKPOINT, episode, &self.actor)?;
            output
                .checkpointer
                .save(CRITIC_CHECKPOINT, episode, &self.critic)?;
        }

        let returns = self.evaluate()?;
        let final_return = returns.last().copied().unwrap_or(0.);
        info!(episode, final_return, "evaluated actor");
        table.record(format!("{episode} epoch"), returns);

        if let Some(output) = output {
            table.write(&output.table_path)?;
            if output.plot {
                if let Some(path) =
                    returns_chart(&output.chart_dir, RETURNS_CHART_NAME, "Returns Curve", table)?
                {
                    debug!(path = %path.display(), "drew returns chart");
                }
            }
        }
        Ok(())
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn actor_target(&self) -> &A {
        &self.actor_target
    }

    pub fn critic(&self) -> &C {
        &self.critic
    }

    pub fn critic_target(&self) -> &C {
        &self.critic_target
    }

    pub fn memory(&self) -> &ReplayMemory<Transition> {
        &self.memory
    }

    pub fn exploration(&self) -> &ExplorationState {
        &self.exploration
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }
}

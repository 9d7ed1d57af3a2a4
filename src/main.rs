use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    tensor::backend::Backend,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use portfolio_rl::{
    agent::{
        checkpoint::RunOutput,
        linear::{LinearActor, LinearCritic, LinearGaussianPolicy},
        optim::rmsprop,
        pathwise::PathwiseTrainer,
        policy_gradient::PolicyGradientTrainer,
    },
    config::TrainingConfig,
    gym::SyntheticMarket,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type TrainingBackend = Autodiff<NdArray>;

const CRITIC_HIDDEN_SIZE: usize = 32;

#[derive(Parser)]
#[command(name = "portfolio_rl")]
#[command(about = "Portfolio allocation agents trained with pathwise and policy gradients", long_about = None)]
struct Cli {
    /// JSON run configuration; defaults apply to every missing field
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    episodes: Option<usize>,

    #[arg(short, long)]
    seed: Option<u64>,

    /// Root directory for checkpoints, returns tables and charts
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    no_plots: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deterministic actor-critic with replay and target networks
    Pathwise,
    /// REINFORCE with a multivariate gaussian policy
    PolicyGradient {
        /// Sampling rollouts after training
        #[arg(long, default_value_t = 1)]
        eval_episodes: usize,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<TrainingConfig> {
    let mut config = match &cli.config {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    if let Some(episodes) = cli.episodes {
        config.pathwise.episodes = episodes;
        config.policy_gradient.episodes = episodes;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    Ok(config)
}

/// Independent streams for the market, the network initialisation and the trainer
fn seeds(seed: Option<u64>) -> (Option<u64>, Option<u64>, Option<u64>) {
    match seed {
        Some(seed) => (
            Some(seed),
            Some(seed.wrapping_add(1)),
            Some(seed.wrapping_add(2)),
        ),
        None => (None, None, None),
    }
}

/// Seeds the backend generator that initialises the networks
fn init_backend(seed: Option<u64>) -> NdArrayDevice {
    if let Some(seed) = seed {
        TrainingBackend::seed(seed);
    }
    NdArrayDevice::default()
}

fn run_pathwise(config: &TrainingConfig, plots: bool) -> Result<()> {
    let (market_seed, init_seed, trainer_seed) = seeds(config.seed);
    let env = SyntheticMarket::new(config.market.clone(), market_seed);
    let input_size = config.market.observation_size();
    let assets = config.market.assets;

    let device = init_backend(init_seed);
    let actor = LinearActor::<TrainingBackend>::new(input_size, assets, &device);
    let critic =
        LinearCritic::<TrainingBackend>::new(input_size, assets, CRITIC_HIDDEN_SIZE, &device);

    let mut output = RunOutput::new(&config.output_dir).context("failed to prepare output")?;
    output.plot = plots;

    let mut trainer = PathwiseTrainer::new(
        env,
        actor,
        critic,
        rmsprop(),
        rmsprop(),
        config.pathwise.clone(),
        device,
        trainer_seed,
    )?;
    let table = trainer.train(Some(&output))?;

    let stats = trainer.stats();
    info!(
        updates = stats.updates,
        target_syncs = stats.target_syncs,
        evaluations = table.len(),
        "pathwise training finished"
    );
    for line in table.to_lines() {
        println!("{line}");
    }
    Ok(())
}

fn run_policy_gradient(config: &TrainingConfig, eval_episodes: usize) -> Result<()> {
    let (market_seed, init_seed, trainer_seed) = seeds(config.seed);
    let env = SyntheticMarket::new(config.market.clone(), market_seed);
    let device = init_backend(init_seed);
    let policy = LinearGaussianPolicy::<TrainingBackend>::new(
        config.market.observation_size(),
        config.market.assets,
        &device,
    );

    let mut trainer = PolicyGradientTrainer::new(
        env,
        policy,
        rmsprop(),
        config.policy_gradient.clone(),
        device,
        trainer_seed,
    )?;
    trainer.train()?;

    for episode in 1..=eval_episodes {
        let reward = trainer.evaluate()?;
        info!(episode, reward, "evaluation rollout");
    }

    info!(
        updates = trainer.stats().updates,
        steps_done = trainer.exploration().steps_done(),
        "policy gradient training finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    println!("{}", "Start".green());

    let cli = Cli::parse();
    init_logging();
    let config = load_config(&cli)?;

    match &cli.command {
        Some(Commands::PolicyGradient { eval_episodes }) => {
            run_policy_gradient(&config, *eval_episodes)?;
        }
        Some(Commands::Pathwise) | None => {
            run_pathwise(&config, !cli.no_plots)?;
        }
    }

    println!("{}", "End".green());
    Ok(())
}

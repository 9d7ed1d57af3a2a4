use ndarray::{Array1, ArrayView1};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::info;

use crate::{
    config::MarketConfig,
    error::{Error, Result},
    gym::environment::{Environment, StepOutcome},
    types::Observation,
};

/// Multi-asset portfolio over seeded random-walk prices.
///
/// Every reset draws a fresh log-normal price path of `window + horizon + 1` bars.
/// The market observation is the trailing `window` log returns of every asset; the
/// account observation is the current allocation followed by the cumulative return.
#[derive(Debug)]
pub struct SyntheticMarket {
    config: MarketConfig,
    rng: StdRng,
    /// prices[bar][asset]
    prices: Vec<Array1<f64>>,
    step: usize,
    weights: Array1<f64>,
    net_worth: f64,
    episode: usize,
}

impl SyntheticMarket {
    pub fn new(config: MarketConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let assets = config.assets;

        Self {
            net_worth: config.initial_balance,
            config,
            rng,
            prices: Vec::new(),
            step: 0,
            weights: Array1::from_elem(assets, 1. / assets as f64),
            episode: 0,
        }
    }

    fn generate_prices(&mut self) -> Result<()> {
        let normal = Normal::new(self.config.drift, self.config.volatility)
            .map_err(Error::environment)?;
        let bars = self.config.window + self.config.horizon + 1;

        let mut current = Array1::from_elem(self.config.assets, 100.);
        self.prices = Vec::with_capacity(bars);
        self.prices.push(current.clone());
        for _ in 1..bars {
            current = current.mapv(|price| price * normal.sample(&mut self.rng).exp());
            self.prices.push(current.clone());
        }

        Ok(())
    }

    fn observation(&self) -> Observation {
        let window = self.config.window;
        let mut market = Vec::with_capacity(window * self.config.assets);
        for bar in (self.step + 1 - window)..=self.step {
            let log_returns = (&self.prices[bar] / &self.prices[bar - 1]).mapv(f64::ln);
            market.extend(log_returns.iter().copied());
        }

        let mut account = self.weights.to_vec();
        account.push(self.net_worth / self.config.initial_balance - 1.);

        Observation::new(Array1::from(market), Array1::from(account))
    }

    fn last_step(&self) -> usize {
        self.config.window + self.config.horizon
    }
}

impl Environment for SyntheticMarket {
    fn reset(&mut self) -> Result<Observation> {
        self.generate_prices()?;
        self.step = self.config.window;
        self.net_worth = self.config.initial_balance;
        self.weights = Array1::from_elem(self.config.assets, 1. / self.config.assets as f64);

        Ok(self.observation())
    }

    fn step(&mut self, action: ArrayView1<f64>) -> Result<StepOutcome> {
        if self.prices.is_empty() {
            return Err(Error::Shape("step called before reset".into()));
        }
        if action.len() != self.config.assets {
            return Err(Error::Shape(format!(
                "action has {} ratios for {} assets",
                action.len(),
                self.config.assets
            )));
        }

        let total: f64 = action.iter().map(|ratio| ratio.max(0.)).sum();
        if total <= 0. {
            return Err(Error::Shape("action allocates nothing".into()));
        }
        let target = action.mapv(|ratio| ratio.max(0.) / total);

        // Fees are charged on the traded value on each side
        let bought: f64 = (&target - &self.weights).mapv(|delta| delta.max(0.)).sum();
        let sold: f64 = (&self.weights - &target).mapv(|delta| delta.max(0.)).sum();
        let fees = self.net_worth * (bought * self.config.buy_fee + sold * self.config.sell_fee);
        let invested = self.net_worth - fees;

        let growth = &self.prices[self.step + 1] / &self.prices[self.step];
        let grown = &target * &growth;
        let growth_total = grown.sum();

        let previous = self.net_worth;
        self.net_worth = invested * growth_total;
        self.weights = grown / growth_total;
        self.step += 1;

        let reward = self.net_worth / previous - 1.;
        let done = self.step >= self.last_step();
        if done {
            self.episode += 1;
        }

        Ok(StepOutcome::new(self.observation(), reward, done))
    }

    fn render(&self) {
        info!(
            episode = self.episode,
            net_worth = self.net_worth,
            total_return = self.net_worth / self.config.initial_balance - 1.,
            "market"
        );
    }

    fn hold_rate(&self) -> Array1<f64> {
        self.weights.clone()
    }

    fn net_worth(&self) -> f64 {
        self.net_worth
    }

    fn initial_balance(&self) -> f64 {
        self.config.initial_balance
    }

    fn action_count(&self) -> usize {
        self.config.assets
    }
}

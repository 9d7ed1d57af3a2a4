use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{Error, Result};

/// A list of values, where the last index is the most recent
pub type Data = Vec<f64>;

/// What the environment shows the agent after each step
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Market features (price windows, indicators), flattened
    pub market: Array1<f64>,
    /// Account features (current allocation, balance ratios)
    pub account: Array1<f64>,
}

impl Observation {
    pub fn new(market: Array1<f64>, account: Array1<f64>) -> Self {
        Self { market, account }
    }
}

/// Observations stacked row-wise, one row per sample, split by component
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    pub market: Array2<f64>,
    pub account: Array2<f64>,
}

impl ObservationBatch {
    pub fn stack<'a>(observations: impl IntoIterator<Item = &'a Observation>) -> Result<Self> {
        let observations: Vec<&Observation> = observations.into_iter().collect();
        let first = observations
            .first()
            .ok_or_else(|| Error::Shape("cannot stack an empty set of observations".into()))?;

        let market = stack_rows(
            observations.iter().map(|obs| obs.market.view()),
            first.market.len(),
            "market",
        )?;
        let account = stack_rows(
            observations.iter().map(|obs| obs.account.view()),
            first.account.len(),
            "account",
        )?;

        Ok(Self { market, account })
    }

    pub fn single(observation: &Observation) -> Self {
        Self {
            market: observation.market.clone().insert_axis(Axis(0)),
            account: observation.account.clone().insert_axis(Axis(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.market.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.market.nrows() == 0
    }
}

/// Stacks equally sized vectors into the rows of a matrix
pub fn stack_rows<'a>(
    rows: impl Iterator<Item = ArrayView1<'a, f64>>,
    width: usize,
    what: &str,
) -> Result<Array2<f64>> {
    let mut flat = Vec::new();
    let mut count = 0;
    for row in rows {
        if row.len() != width {
            return Err(Error::Shape(format!(
                "{what} row {count} has {} values, expected {width}",
                row.len()
            )));
        }
        flat.extend(row.iter().copied());
        count += 1;
    }

    Array2::from_shape_vec((count, width), flat).map_err(|e| Error::Shape(e.to_string()))
}

/// One step of off-policy experience
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Observation,
    /// Feasible allocation: non-negative and summing to one, or the hold vector
    pub action: Array1<f64>,
    pub next_state: Observation,
    pub reward: f64,
}

/// One step of on-policy experience.
///
/// The observation and the unclamped draw are kept so the gradient of `log_prob`
/// can be rebuilt when the episode is optimized.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTransition {
    pub log_prob: f64,
    pub reward: f64,
    pub state: Observation,
    pub raw_action: Array1<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn stack_splits_components() {
        let a = Observation::new(array![1., 2.], array![0.5]);
        let b = Observation::new(array![3., 4.], array![0.25]);

        let batch = ObservationBatch::stack([&a, &b]).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.market, array![[1., 2.], [3., 4.]]);
        assert_eq!(batch.account, array![[0.5], [0.25]]);
    }

    #[test]
    fn stack_rejects_ragged_rows() {
        let a = Observation::new(array![1., 2.], array![0.5]);
        let b = Observation::new(array![3.], array![0.25]);

        assert!(matches!(
            ObservationBatch::stack([&a, &b]),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn stack_rejects_empty() {
        assert!(ObservationBatch::stack(std::iter::empty()).is_err());
    }
}

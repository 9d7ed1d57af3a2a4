use std::f64::consts::PI;

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Error, Result};

/// Output of a stochastic policy: mean plus the two covariance factors.
///
/// The covariance is `L · diag(d + floor) · Lᵀ` with `L = factor_matrix` and
/// `d = factor_vector`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianHead {
    pub mean: Array1<f64>,
    pub factor_matrix: Array2<f64>,
    pub factor_vector: Array1<f64>,
}

/// Gradient of a scalar with respect to each part of a [`GaussianHead`]
#[derive(Debug, Clone, PartialEq)]
pub struct HeadGradients {
    pub mean: Array1<f64>,
    pub factor_matrix: Array2<f64>,
    pub factor_vector: Array1<f64>,
}

impl HeadGradients {
    pub fn scaled(mut self, factor: f64) -> Self {
        self.mean *= factor;
        self.factor_matrix *= factor;
        self.factor_vector *= factor;
        self
    }
}

/// A draw from the head, before and after projection onto the simplex
#[derive(Debug, Clone, PartialEq)]
pub struct SampledAction {
    /// The unclamped gaussian draw, scored by `log_prob`
    pub raw: Array1<f64>,
    /// Non-negative ratios summing to one
    pub allocation: Array1<f64>,
    pub log_prob: f64,
}

/// Multivariate normal built from a [`GaussianHead`], with its Cholesky factor cached
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    cholesky: Cholesky<f64, Dyn>,
}

impl GaussianHead {
    pub fn new(mean: Array1<f64>, factor_matrix: Array2<f64>, factor_vector: Array1<f64>) -> Self {
        Self {
            mean,
            factor_matrix,
            factor_vector,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    fn check_shapes(&self) -> Result<()> {
        let k = self.dim();
        if self.factor_matrix.dim() != (k, k) || self.factor_vector.len() != k {
            return Err(Error::Shape(format!(
                "gaussian head with mean of {k} has factors {:?} and {}",
                self.factor_matrix.dim(),
                self.factor_vector.len()
            )));
        }
        Ok(())
    }

    fn covariance_matrix(&self, floor: f64) -> Result<DMatrix<f64>> {
        self.check_shapes()?;
        let l = to_matrix(&self.factor_matrix);
        let scale = self.factor_vector.mapv(|d| d + floor);
        let d = DMatrix::from_diagonal(&to_vector(scale.view()));
        Ok(&l * d * l.transpose())
    }

    /// `L · diag(d + floor) · Lᵀ`
    pub fn covariance(&self, floor: f64) -> Result<Array2<f64>> {
        Ok(from_matrix(&self.covariance_matrix(floor)?))
    }

    pub fn distribution(&self, floor: f64) -> Result<MultivariateNormal> {
        MultivariateNormal::from_parts(
            to_vector(self.mean.view()),
            self.covariance_matrix(floor)?,
        )
    }

    /// Draws until some coordinate is positive, then clamps to `[0, 1]` and
    /// renormalizes. Fails after `max_attempts` all non-positive draws.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        floor: f64,
        max_attempts: usize,
    ) -> Result<SampledAction> {
        let distribution = self.distribution(floor)?;

        for _ in 0..max_attempts {
            let raw = distribution.sample(rng);
            if raw.iter().all(|value| *value <= 0.) {
                continue;
            }

            let allocation = project_to_simplex(raw.view());
            let log_prob = distribution.log_prob(raw.view())?;
            return Ok(SampledAction {
                raw,
                allocation,
                log_prob,
            });
        }

        Err(Error::DegenerateSample {
            attempts: max_attempts,
        })
    }

    /// Gradient of `log N(action; μ, Σ)` with respect to the mean and both factors
    pub fn log_prob_gradients(&self, action: ArrayView1<f64>, floor: f64) -> Result<HeadGradients> {
        let distribution = self.distribution(floor)?;
        let precision = distribution.precision();

        let delta = to_vector(action) - to_vector(self.mean.view());
        let alpha = &precision * delta;

        // ∂/∂Σ = (α αᵀ - Σ⁻¹) / 2
        let g_sigma = (&alpha * alpha.transpose() - &precision) * 0.5;

        let l = to_matrix(&self.factor_matrix);
        let scale = self.factor_vector.mapv(|d| d + floor);
        let scale = DMatrix::from_diagonal(&to_vector(scale.view()));
        // Σ = L D Lᵀ with G symmetric gives ∂/∂L = 2 G L D and ∂/∂d = diag(Lᵀ G L)
        let g_l = &g_sigma * &l * scale * 2.;
        let g_d = (l.transpose() * &g_sigma * &l).diagonal();

        Ok(HeadGradients {
            mean: from_vector(&alpha),
            factor_matrix: from_matrix(&g_l),
            factor_vector: from_vector(&g_d),
        })
    }
}

impl MultivariateNormal {
    /// Fails with [`Error::Covariance`] unless `covariance` is positive definite
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        Self::from_parts(to_vector(mean.view()), to_matrix(&covariance))
    }

    fn from_parts(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let (rows, cols) = covariance.shape();
        if rows != cols || rows != mean.len() {
            return Err(Error::Shape(format!(
                "covariance is {rows}x{cols} for a mean of {}",
                mean.len()
            )));
        }

        let cholesky = covariance.clone().cholesky().ok_or_else(|| {
            Error::Covariance(format!("{rows}x{rows} matrix is not positive definite"))
        })?;

        Ok(Self {
            mean,
            covariance,
            cholesky,
        })
    }

    pub fn covariance(&self) -> Array2<f64> {
        from_matrix(&self.covariance)
    }

    /// `μ + C z` with `z ~ N(0, I)` and `C` the lower Cholesky factor
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z = DVector::from_fn(self.mean.len(), |_, _| rng.sample::<f64, _>(StandardNormal));
        from_vector(&(&self.mean + self.cholesky.l() * z))
    }

    pub fn log_prob(&self, x: ArrayView1<f64>) -> Result<f64> {
        if x.len() != self.mean.len() {
            return Err(Error::Shape(format!(
                "scored {} values against a {} dimensional gaussian",
                x.len(),
                self.mean.len()
            )));
        }

        let k = self.mean.len() as f64;
        let delta = to_vector(x) - &self.mean;
        let whitened = self
            .cholesky
            .l()
            .solve_lower_triangular(&delta)
            .ok_or_else(|| Error::Covariance("singular Cholesky factor".into()))?;
        let mahalanobis = whitened.norm_squared();

        Ok(-0.5 * (k * (2. * PI).ln() + mahalanobis + self.cholesky.ln_determinant()))
    }

    /// Σ⁻¹ through the Cholesky factor
    pub fn precision(&self) -> DMatrix<f64> {
        self.cholesky.inverse()
    }
}

/// Clamps into `[0, 1]` and divides by the sum
pub fn project_to_simplex(raw: ArrayView1<f64>) -> Array1<f64> {
    let clamped = raw.mapv(|value| value.clamp(0., 1.));
    let total = clamped.sum();
    clamped / total
}

/// Everything into one uniformly chosen asset
pub fn random_one_hot<R: Rng + ?Sized>(rng: &mut R, n_actions: usize) -> Array1<f64> {
    let mut ratio = Array1::zeros(n_actions);
    ratio[rng.gen_range(0..n_actions)] = 1.;
    ratio
}

fn to_vector(values: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_iterator(values.len(), values.iter().copied())
}

fn to_matrix(values: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = values.dim();
    DMatrix::from_fn(rows, cols, |i, j| values[[i, j]])
}

fn from_vector(values: &DVector<f64>) -> Array1<f64> {
    values.iter().copied().collect()
}

fn from_matrix(values: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(values.shape(), |(i, j)| values[(i, j)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rand::{rngs::StdRng, SeedableRng};

    const FLOOR: f64 = 1e-2;

    fn assert_simplex(allocation: &Array1<f64>) {
        assert!(allocation.iter().all(|v| *v >= 0.));
        assert!((allocation.sum() - 1.).abs() < 1e-6);
    }

    #[test]
    fn covariance_uses_matrix_product() {
        let head = GaussianHead::new(
            array![0., 0.],
            array![[1., 0.], [2., 1.]],
            array![1. - FLOOR, 3. - FLOOR],
        );

        let covariance = head.covariance(FLOOR).unwrap();

        // L diag(1, 3) Lᵀ
        let expected = array![[1., 2.], [2., 7.]];
        assert!((&covariance - &expected).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn log_prob_matches_independent_normals() {
        let head = GaussianHead::new(array![0.5, -1.], Array2::eye(2), array![4. - FLOOR, 1. - FLOOR]);
        let distribution = head.distribution(FLOOR).unwrap();

        let x = array![1.5, 0.];
        let normal = |x: f64, mu: f64, var: f64| {
            -0.5 * ((2. * PI * var).ln() + (x - mu).powi(2) / var)
        };
        let expected = normal(1.5, 0.5, 4.) + normal(0., -1., 1.);

        assert!((distribution.log_prob(x.view()).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn precision_inverts_covariance() {
        let head = GaussianHead::new(
            array![0., 0., 0.],
            array![[1., 0., 0.], [0.5, 1., 0.], [-0.3, 0.2, 1.]],
            array![0.5, 1., 2.],
        );
        let distribution = head.distribution(FLOOR).unwrap();

        let covariance = to_matrix(&distribution.covariance());
        let product = covariance * distribution.precision();
        assert!((product - DMatrix::<f64>::identity(3, 3)).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn singular_covariance_is_rejected() {
        let head = GaussianHead::new(array![0., 0.], Array2::zeros((2, 2)), array![1., 1.]);

        assert!(matches!(head.distribution(FLOOR), Err(Error::Covariance(_))));
    }

    #[test]
    fn samples_are_feasible_allocations() {
        let mut rng = StdRng::seed_from_u64(11);
        let head = GaussianHead::new(array![0.3, 0.1, -0.2, 0.5], Array2::eye(4), array![0.2, 0.2, 0.2, 0.2]);

        for _ in 0..200 {
            let action = head.sample(&mut rng, FLOOR, 100).unwrap();
            assert_simplex(&action.allocation);
            assert!(action.raw.iter().any(|v| *v > 0.));
        }
    }

    #[test]
    fn mostly_negative_head_still_lands_on_simplex() {
        let mut rng = StdRng::seed_from_u64(12);
        // Each coordinate is positive with probability about 2.3%, so most draws are rejected
        let head = GaussianHead::new(array![-2., -2., -2.], Array2::eye(3), Array1::from_elem(3, 1. - FLOOR));

        let action = head.sample(&mut rng, FLOOR, 10_000).unwrap();

        assert_simplex(&action.allocation);
    }

    #[test]
    fn exhausted_rejection_fails_loudly() {
        let mut rng = StdRng::seed_from_u64(13);
        let head = GaussianHead::new(array![-1e6, -1e6], Array2::eye(2), array![0., 0.]);

        match head.sample(&mut rng, FLOOR, 100) {
            Err(Error::DegenerateSample { attempts }) => assert_eq!(attempts, 100),
            other => panic!("expected degenerate sample, got {other:?}"),
        }
    }

    #[test]
    fn log_prob_scores_the_unclamped_draw() {
        let mut rng = StdRng::seed_from_u64(14);
        let head = GaussianHead::new(array![0.2, 0.9], Array2::eye(2), array![0.5, 0.5]);

        let action = head.sample(&mut rng, FLOOR, 100).unwrap();
        let expected = head.distribution(FLOOR).unwrap().log_prob(action.raw.view()).unwrap();

        assert_eq!(action.log_prob, expected);
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let head = GaussianHead::new(
            array![0.1, -0.3],
            array![[1.2, 0.1], [-0.4, 0.8]],
            array![0.6, 0.3],
        );
        let x = array![0.4, 0.2];
        let log_prob = |head: &GaussianHead| {
            head.distribution(FLOOR).unwrap().log_prob(x.view()).unwrap()
        };
        let grads = head.log_prob_gradients(x.view(), FLOOR).unwrap();
        let h = 1e-6;

        for i in 0..2 {
            let mut up = head.clone();
            let mut down = head.clone();
            up.mean[i] += h;
            down.mean[i] -= h;
            let numeric = (log_prob(&up) - log_prob(&down)) / (2. * h);
            assert!((numeric - grads.mean[i]).abs() < 1e-5, "mean {i}");

            let mut up = head.clone();
            let mut down = head.clone();
            up.factor_vector[i] += h;
            down.factor_vector[i] -= h;
            let numeric = (log_prob(&up) - log_prob(&down)) / (2. * h);
            assert!((numeric - grads.factor_vector[i]).abs() < 1e-5, "vector {i}");

            for j in 0..2 {
                let mut up = head.clone();
                let mut down = head.clone();
                up.factor_matrix[[i, j]] += h;
                down.factor_matrix[[i, j]] -= h;
                let numeric = (log_prob(&up) - log_prob(&down)) / (2. * h);
                assert!(
                    (numeric - grads.factor_matrix[[i, j]]).abs() < 1e-5,
                    "matrix {i},{j}"
                );
            }
        }
    }

    #[test]
    fn one_hot_puts_everything_in_one_asset() {
        let mut rng = StdRng::seed_from_u64(15);
        for _ in 0..50 {
            let ratio = random_one_hot(&mut rng, 5);
            assert_eq!(ratio.sum(), 1.);
            assert_eq!(ratio.iter().filter(|v| **v == 1.).count(), 1);
        }
    }

    #[test]
    fn projection_clamps_then_normalizes() {
        let projected = project_to_simplex(array![2., -1., 0.5].view());

        assert!((&projected - &array![1. / 1.5, 0., 0.5 / 1.5]).iter().all(|v| v.abs() < 1e-12));
    }
}

//! Seam between the trainers and the networks they optimize.
//!
//! Networks are burn modules that only describe forward passes. The trainers own
//! losses, gradient clipping, target copies and optimizer steps. Observations and
//! actions cross the seam as ndarray values and become tensors here.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{
    agent::sampler::{GaussianHead, HeadGradients},
    error::{Error, Result},
    types::{Observation, ObservationBatch},
};

/// Deterministic policy: one allocation row per observation row
pub trait Actor<B: Backend>: Module<B> {
    fn forward(&self, states: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Action-value estimate Q(s, a), one value per row
pub trait Critic<B: Backend>: Module<B> {
    fn forward(&self, states: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1>;
}

/// Batched gaussian heads.
///
/// Shapes are `[n, k]` for the mean, `[n, k, k]` for the factor matrix and
/// `[n, k]` for the vector factor.
#[derive(Debug, Clone)]
pub struct GaussianOutput<B: Backend> {
    pub mean: Tensor<B, 2>,
    pub factor_matrix: Tensor<B, 3>,
    pub factor_vector: Tensor<B, 2>,
}

/// Policy producing a multivariate gaussian head per observation row
pub trait StochasticPolicy<B: Backend>: Module<B> {
    fn forward(&self, states: Tensor<B, 2>) -> GaussianOutput<B>;
}

impl<B: Backend> GaussianOutput<B> {
    pub fn len(&self) -> usize {
        self.mean.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every row out of the graph
    pub fn heads(&self) -> Result<Vec<GaussianHead>> {
        let [n, k] = self.mean.dims();
        let mean = to_array2(self.mean.clone())?;
        let factor_vector = to_array2(self.factor_vector.clone())?;
        let factor_matrix: Vec<f64> = self.factor_matrix.to_data().iter::<f64>().collect();

        (0..n)
            .map(|row| {
                let block = factor_matrix[row * k * k..(row + 1) * k * k].to_vec();
                let matrix = Array2::from_shape_vec((k, k), block)
                    .map_err(|e| Error::Shape(format!("factor matrix: {e}")))?;
                Ok(GaussianHead::new(
                    mean.row(row).to_owned(),
                    matrix,
                    factor_vector.row(row).to_owned(),
                ))
            })
            .collect()
    }

    /// `Σ_rows ⟨head, upstream⟩`. Its gradient with respect to the network
    /// parameters is the vector-Jacobian product of the heads with `upstream`.
    pub fn contract(self, upstream: &[HeadGradients]) -> Result<Tensor<B, 1>> {
        let [n, k] = self.mean.dims();
        if upstream.len() != n {
            return Err(Error::Shape(format!(
                "{} head gradients for {n} heads",
                upstream.len()
            )));
        }
        let device = self.mean.device();

        let mut mean = Vec::with_capacity(n * k);
        let mut matrix = Vec::with_capacity(n * k * k);
        let mut vector = Vec::with_capacity(n * k);
        for grads in upstream {
            if grads.mean.len() != k || grads.factor_matrix.dim() != (k, k) {
                return Err(Error::Shape(format!(
                    "head gradient of {} does not match heads of {k}",
                    grads.mean.len()
                )));
            }
            mean.extend(grads.mean.iter().copied());
            matrix.extend(grads.factor_matrix.iter().copied());
            vector.extend(grads.factor_vector.iter().copied());
        }

        let mean = Tensor::<B, 2>::from_data(TensorData::new(mean, [n, k]), &device);
        let matrix = Tensor::<B, 3>::from_data(TensorData::new(matrix, [n, k, k]), &device);
        let vector = Tensor::<B, 2>::from_data(TensorData::new(vector, [n, k]), &device);

        Ok((self.mean * mean).sum()
            + (self.factor_matrix * matrix).sum()
            + (self.factor_vector * vector).sum())
    }
}

/// Market then account features, one row per observation
pub fn states_tensor<B: Backend>(batch: &ObservationBatch, device: &B::Device) -> Result<Tensor<B, 2>> {
    let features = ndarray::concatenate(Axis(1), &[batch.market.view(), batch.account.view()])
        .map_err(|e| Error::Shape(format!("observation features: {e}")))?;
    Ok(matrix_tensor(features.view(), device))
}

pub fn state_tensor<B: Backend>(observation: &Observation, device: &B::Device) -> Result<Tensor<B, 2>> {
    states_tensor(&ObservationBatch::single(observation), device)
}

pub fn matrix_tensor<B: Backend>(values: ArrayView2<f64>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = values.dim();
    let flat: Vec<f64> = values.iter().copied().collect();
    Tensor::from_data(TensorData::new(flat, [rows, cols]), device)
}

pub fn vector_tensor<B: Backend>(values: ArrayView1<f64>, device: &B::Device) -> Tensor<B, 1> {
    let flat: Vec<f64> = values.iter().copied().collect();
    Tensor::from_data(TensorData::new(flat, [values.len()]), device)
}

pub fn to_array2<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f64>> {
    let [rows, cols] = tensor.dims();
    let flat: Vec<f64> = tensor.into_data().iter::<f64>().collect();
    Array2::from_shape_vec((rows, cols), flat).map_err(|e| Error::Shape(e.to_string()))
}

pub fn to_array1<B: Backend>(tensor: Tensor<B, 1>) -> Array1<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Value of a one element tensor, such as a reduced loss
pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Allocation of `actor` for a single observation
pub fn act<B: Backend, A: Actor<B>>(actor: &A, observation: &Observation, device: &B::Device) -> Result<Array1<f64>> {
    let actions = to_array2(actor.forward(state_tensor(observation, device)?))?;
    Ok(actions.row(0).to_owned())
}

struct GradientClipper<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    limit: f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientClipper<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.clamp(-self.limit, self.limit));
        }
    }
}

/// Clamps every gradient element of `module` into `[-limit, limit]`
pub fn clip_gradients<B, M>(module: &M, mut grads: GradientsParams, limit: f64) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut clipper = GradientClipper::<B> {
        grads: &mut grads,
        limit,
        backend: PhantomData,
    };
    module.visit(&mut clipper);
    grads
}

struct GradientCollector<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    values: Vec<f64>,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientCollector<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.values.extend(grad.into_data().iter::<f64>());
        }
    }
}

/// Every gradient element of `module`, in parameter visiting order
pub fn gradient_values<B, M>(module: &M, grads: &GradientsParams) -> Vec<f64>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut collector = GradientCollector::<B> {
        grads,
        values: Vec::new(),
        backend: PhantomData,
    };
    module.visit(&mut collector);
    collector.values
}

struct ParamCollector {
    values: Vec<f64>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.values.extend(tensor.to_data().iter::<f64>());
    }
}

/// Every parameter element of `module`, in visiting order
pub fn parameter_values<B: Backend, M: Module<B>>(module: &M) -> Vec<f64> {
    let mut collector = ParamCollector { values: Vec::new() };
    module.visit(&mut collector);
    collector.values
}

#[cfg(test)]
mod tests {
    use burn::module::Param;
    use ndarray::array;

    use super::*;
    use crate::agent::testing::{TestBackend, TestDevice};

    #[derive(Module, Debug)]
    struct Pair<B: Backend> {
        weights: Param<Tensor<B, 1>>,
    }

    fn pair(device: &TestDevice) -> Pair<TestBackend> {
        Pair {
            weights: Param::from_tensor(Tensor::from_data(
                TensorData::new(vec![1., -2., 3.], [3]),
                device,
            )),
        }
    }

    fn grads_of(module: &Pair<TestBackend>, scale: [f64; 3]) -> GradientsParams {
        let device = TestDevice::default();
        let loss = (module.weights.val() * vector_tensor(array![scale[0], scale[1], scale[2]].view(), &device)).sum();
        GradientsParams::from_grads(loss.backward(), module)
    }

    #[test]
    fn clip_bounds_every_element() {
        let device = TestDevice::default();
        let module = pair(&device);

        let grads = clip_gradients(&module, grads_of(&module, [-25., 3., 11.]), 10.);

        assert_eq!(gradient_values(&module, &grads), vec![-10., 3., 10.]);
    }

    #[test]
    fn parameters_are_read_in_order() {
        let module = pair(&TestDevice::default());

        assert_eq!(parameter_values(&module), vec![1., -2., 3.]);
    }

    #[test]
    fn contraction_is_a_vector_jacobian_product() {
        let device = TestDevice::default();
        let output = GaussianOutput::<TestBackend> {
            mean: matrix_tensor(array![[1., 2.]].view(), &device),
            factor_matrix: Tensor::from_data(TensorData::new(vec![1., 0., 0.5, 1.], [1, 2, 2]), &device),
            factor_vector: matrix_tensor(array![[0.3, 0.4]].view(), &device),
        };
        let upstream = HeadGradients {
            mean: array![2., -1.],
            factor_matrix: array![[1., 1.], [0., 2.]],
            factor_vector: array![10., 0.],
        };

        let heads = output.heads().unwrap();
        let value = scalar(output.contract(&[upstream]).unwrap());

        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].factor_matrix, array![[1., 0.], [0.5, 1.]]);
        // (2 - 2) + (1 + 0 + 0 + 2) + 3
        assert!((value - 6.).abs() < 1e-12);
    }

    #[test]
    fn features_put_market_before_account() {
        let device = TestDevice::default();
        let observation = Observation::new(array![0.1, -0.2], array![0.5, 0.5, 0.]);

        let state = to_array2(state_tensor::<TestBackend>(&observation, &device).unwrap()).unwrap();

        assert_eq!(state, array![[0.1, -0.2, 0.5, 0.5, 0.]]);
    }
}

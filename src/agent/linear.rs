//! Small reference networks used by the CLI and the trainer tests. Inputs are the
//! market features followed by the account features, one row per observation.

use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{softmax, softplus, tanh},
};

use crate::agent::nn::{Actor, Critic, GaussianOutput, StochasticPolicy};

/// Softmax over one affine layer, so every output row is a feasible allocation
#[derive(Module, Debug)]
pub struct LinearActor<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> LinearActor<B> {
    pub fn new(input_size: usize, n_actions: usize, device: &B::Device) -> Self {
        let initializer = Initializer::XavierUniform { gain: 1.0 };
        Self {
            linear: LinearConfig::new(input_size, n_actions)
                .with_initializer(initializer)
                .init(device),
        }
    }
}

impl<B: Backend> Actor<B> for LinearActor<B> {
    fn forward(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.linear.forward(states), 1)
    }
}

/// One tanh hidden layer over the observation followed by the action
#[derive(Module, Debug)]
pub struct LinearCritic<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> LinearCritic<B> {
    pub fn new(input_size: usize, n_actions: usize, hidden_size: usize, device: &B::Device) -> Self {
        let initializer = Initializer::XavierUniform { gain: 1.0 };
        Self {
            hidden: LinearConfig::new(input_size + n_actions, hidden_size)
                .with_initializer(initializer.clone())
                .init(device),
            output: LinearConfig::new(hidden_size, 1)
                .with_initializer(initializer)
                .init(device),
        }
    }
}

impl<B: Backend> Critic<B> for LinearCritic<B> {
    fn forward(&self, states: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        let input = Tensor::cat(vec![states, actions], 1);
        let hidden = tanh(self.hidden.forward(input));
        self.output.forward(hidden).squeeze::<1>(1)
    }
}

/// Affine mean with state-independent covariance factors.
///
/// The vector factor goes through softplus so it stays positive.
#[derive(Module, Debug)]
pub struct LinearGaussianPolicy<B: Backend> {
    mean: Linear<B>,
    bias: Param<Tensor<B, 1>>,
    factor_matrix: Param<Tensor<B, 2>>,
    factor_logits: Param<Tensor<B, 1>>,
}

impl<B: Backend> LinearGaussianPolicy<B> {
    pub fn new(input_size: usize, n_actions: usize, device: &B::Device) -> Self {
        Self {
            mean: LinearConfig::new(input_size, n_actions)
                .with_bias(false)
                .with_initializer(Initializer::XavierUniform { gain: 0.1 })
                .init(device),
            // Starts at the equal-weight allocation
            bias: Initializer::Constant {
                value: 1. / n_actions as f64,
            }
            .init([n_actions], device),
            factor_matrix: Param::from_tensor(Tensor::eye(n_actions, device)),
            // softplus(-2) ≈ 0.127
            factor_logits: Initializer::Constant { value: -2. }.init([n_actions], device),
        }
    }
}

impl<B: Backend> StochasticPolicy<B> for LinearGaussianPolicy<B> {
    fn forward(&self, states: Tensor<B, 2>) -> GaussianOutput<B> {
        let rows = states.dims()[0];
        let bias = self.bias.val().unsqueeze::<2>().repeat_dim(0, rows);

        GaussianOutput {
            mean: self.mean.forward(states) + bias,
            factor_matrix: self.factor_matrix.val().unsqueeze::<3>().repeat_dim(0, rows),
            factor_vector: softplus(self.factor_logits.val(), 1.)
                .unsqueeze::<2>()
                .repeat_dim(0, rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::optim::GradientsParams;
    use ndarray::array;

    use super::*;
    use crate::{
        agent::{
            nn::{gradient_values, matrix_tensor, states_tensor, to_array2},
            testing::{TestBackend, TestDevice},
        },
        types::{Observation, ObservationBatch},
    };

    fn states(device: &TestDevice) -> Tensor<TestBackend, 2> {
        let batch = ObservationBatch::stack([
            &Observation::new(array![0.1, -0.2, 0.3], array![0.5, 0.5]),
            &Observation::new(array![-0.4, 0.0, 0.2], array![0.9, 0.1]),
        ])
        .unwrap();
        states_tensor(&batch, device).unwrap()
    }

    #[test]
    fn actor_outputs_allocations() {
        let device = TestDevice::default();
        let actor = LinearActor::<TestBackend>::new(5, 4, &device);

        let actions = to_array2(actor.forward(states(&device))).unwrap();

        assert_eq!(actions.dim(), (2, 4));
        for row in actions.rows() {
            assert!(row.iter().all(|v| *v >= 0.));
            assert!((row.sum() - 1.).abs() < 1e-9);
        }
    }

    #[test]
    fn critic_scores_every_row_and_reaches_every_parameter() {
        let device = TestDevice::default();
        let critic = LinearCritic::<TestBackend>::new(5, 3, 4, &device);
        let actions = matrix_tensor(array![[0.2, 0.3, 0.5], [1.0, 0.0, 0.0]].view(), &device);

        let values = critic.forward(states(&device), actions);
        assert_eq!(values.dims(), [2]);

        let grads = GradientsParams::from_grads(values.sum().backward(), &critic);
        assert_eq!(gradient_values(&critic, &grads).len(), critic.num_params());
    }

    #[test]
    fn policy_heads_share_covariance_factors() {
        let device = TestDevice::default();
        let policy = LinearGaussianPolicy::<TestBackend>::new(5, 2, &device);

        let output = policy.forward(states(&device));
        let heads = output.heads().unwrap();

        assert_eq!(output.factor_matrix.dims(), [2, 2, 2]);
        assert_eq!(heads.len(), 2);
        for head in &heads {
            assert_eq!(head.factor_matrix, array![[1., 0.], [0., 1.]]);
            let expected = (1. + (-2f64).exp()).ln();
            assert!(head.factor_vector.iter().all(|v| (v - expected).abs() < 1e-12));
        }
    }
}

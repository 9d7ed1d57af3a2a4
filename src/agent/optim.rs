use burn::{
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, RmsProp, RmsPropConfig},
    tensor::backend::AutodiffBackend,
};

use crate::constants::rmsprop;

/// RMSprop without momentum, one instance per optimized network.
///
/// `v = α·v + (1 - α)·g²`, `θ -= lr · g / (√v + ε)`. The learning rate is passed
/// by the trainer on every step.
pub fn rmsprop<B, M>() -> OptimizerAdaptor<RmsProp, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    RmsPropConfig::new()
        .with_alpha(rmsprop::ALPHA)
        .with_momentum(rmsprop::MOMENTUM)
        .with_epsilon(rmsprop::EPS)
        .with_centered(false)
        .init()
}

#[cfg(test)]
mod tests {
    use burn::{
        module::Param,
        optim::{GradientsParams, Optimizer},
        prelude::*,
    };

    use super::*;
    use crate::agent::{
        nn::parameter_values,
        testing::{TestBackend, TestDevice},
    };

    #[derive(Module, Debug)]
    struct Scalar<B: Backend> {
        x: Param<Tensor<B, 1>>,
    }

    fn scalar(value: f64, device: &TestDevice) -> Scalar<TestBackend> {
        Scalar {
            x: Param::from_tensor(Tensor::from_data(TensorData::new(vec![value], [1]), device)),
        }
    }

    /// Gradient of x² at the current point
    fn square_grads(module: &Scalar<TestBackend>) -> GradientsParams {
        let loss = module.x.val().powi_scalar(2).sum();
        GradientsParams::from_grads(loss.backward(), module)
    }

    #[test]
    fn first_step_matches_closed_form() {
        let device = TestDevice::default();
        let mut optimizer = rmsprop::<TestBackend, Scalar<TestBackend>>();
        let module = scalar(1., &device);

        let grads = square_grads(&module);
        let module = optimizer.step(0.01, module, grads);

        // g = 2, v = 0.01 · 4, step = lr · 2 / √0.04
        let expected = 1. - 0.01 * 2. / (0.04f64.sqrt() + 1e-8);
        assert!((parameter_values(&module)[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn descends_a_quadratic() {
        let device = TestDevice::default();
        let mut optimizer = rmsprop::<TestBackend, Scalar<TestBackend>>();
        let mut module = scalar(5., &device);

        for _ in 0..500 {
            let grads = square_grads(&module);
            module = optimizer.step(0.05, module, grads);
        }

        let end = parameter_values(&module)[0];
        assert!(end.abs() < 0.1, "ended at {end}");
    }
}

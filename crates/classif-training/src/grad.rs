//! Whole-model gradient operations.
//!
//! Burn keeps gradients in a `GradientsParams` map keyed by parameter id, so
//! every operation here walks the model with a `ModuleVisitor` and touches
//! the gradient of each float parameter it finds.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

const CLIP_EPSILON: f64 = 1e-6;

struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    total: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            // Squared in f64; half-precision sums overflow past 65504.
            let squares: f64 = grad
                .into_data()
                .iter::<f64>()
                .map(|value| value * value)
                .sum();
            self.total += squares;
        }
    }
}

struct Scale<'a> {
    grads: &'a mut GradientsParams,
    factor: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Scale<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

/// L2 norm over all parameter gradients of `model`.
///
/// Non-finite when any gradient holds an inf or NaN.
pub fn grad_norm<B, M>(model: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = SquaredNorm { grads, total: 0.0 };
    model.visit(&mut visitor);
    visitor.total.sqrt()
}

/// Multiplies every parameter gradient by `factor`
pub fn scale_grads<B, M>(model: &M, mut grads: GradientsParams, factor: f64) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = Scale {
        grads: &mut grads,
        factor,
    };
    model.visit(&mut visitor);
    grads
}

/// Rescales gradients so their global norm is at most `max_norm`.
///
/// Returns the gradients and their norm before clipping. Gradients are left
/// untouched when the norm is already within bounds.
pub fn clip_grad_norm<B, M>(
    model: &M,
    grads: GradientsParams,
    max_norm: f64,
) -> (GradientsParams, f64)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let total_norm = grad_norm(model, &grads);
    let coef = max_norm / (total_norm + CLIP_EPSILON);
    if coef < 1.0 {
        (scale_grads(model, grads, coef), total_norm)
    } else {
        (grads, total_norm)
    }
}

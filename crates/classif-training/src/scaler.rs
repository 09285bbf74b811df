//! Precision policy and dynamic loss scaling.

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use tracing::debug;

use crate::grad::scale_grads;

/// Numeric precision of the forward/backward pass.
///
/// Half precision is only honoured on an accelerator; CPU runs always use
/// full precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionPolicy {
    #[default]
    Full,
    Half,
}

impl PrecisionPolicy {
    pub fn from_flags(cuda: bool, fp16: bool) -> Self {
        if cuda && fp16 {
            Self::Half
        } else {
            Self::Full
        }
    }

    pub fn is_half(&self) -> bool {
        matches!(self, Self::Half)
    }
}

/// Dynamic loss scaler.
///
/// The loss is multiplied by the current scale before backward so small
/// half-precision gradients do not flush to zero. At each optimizer step the
/// gradients are divided by the scale again; if any of them is not finite
/// the step is skipped and the scale backs off, and after
/// `growth_interval` consecutive finite steps the scale grows.
///
/// A disabled scaler has scale 1 and never skips a step.
#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    growth_tracker: usize,
    skipped_steps: usize,
}

impl GradScaler {
    pub const INITIAL_SCALE: f64 = 65536.0;

    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scale: Self::INITIAL_SCALE,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
            skipped_steps: 0,
        }
    }

    pub fn for_policy(policy: PrecisionPolicy) -> Self {
        Self::new(policy.is_half())
    }

    pub fn with_initial_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_growth_interval(mut self, steps: usize) -> Self {
        self.growth_interval = steps;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale(&self) -> f64 {
        if self.enabled {
            self.scale
        } else {
            1.0
        }
    }

    /// Steps skipped because of non-finite gradients
    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn scale_loss<B: Backend, const D: usize>(&self, loss: Tensor<B, D>) -> Tensor<B, D> {
        if self.enabled {
            loss.mul_scalar(self.scale)
        } else {
            loss
        }
    }

    /// Divides accumulated gradients by the current scale
    pub fn unscale<B, M>(&self, model: &M, grads: GradientsParams) -> GradientsParams
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        if self.enabled {
            scale_grads(model, grads, 1.0 / self.scale)
        } else {
            grads
        }
    }

    /// Records the outcome of one step; returns whether the optimizer
    /// should apply it.
    pub fn update(&mut self, found_non_finite: bool) -> bool {
        if !self.enabled {
            return true;
        }

        if found_non_finite {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
            self.skipped_steps += 1;
            debug!("Non-finite gradients, loss scale reduced to {}", self.scale);
            return false;
        }

        self.growth_tracker += 1;
        if self.growth_tracker >= self.growth_interval {
            self.scale *= self.growth_factor;
            self.growth_tracker = 0;
            debug!("Loss scale increased to {}", self.scale);
        }
        true
    }
}

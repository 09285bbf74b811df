//! Training and evaluation of binary image classifiers.
//!
//! This crate provides:
//! - Backbones (ResNet-18, EfficientNet-B0, a small CNN) behind a linear head
//! - The `Classifier` controller: train/validate/test/save/load
//! - Gradient utilities (global norm, clipping, unscaling)
//! - Dynamic loss scaling for reduced-precision runs
//! - Dashboard sinks for metric records
//! - Checkpoint naming helpers

pub mod checkpoint;
pub mod classifier;
pub mod dashboard;
pub mod grad;
pub mod mode;
pub mod model;
pub mod pairing;
pub mod scaler;

pub use checkpoint::{
    checkpoint_path, epoch_from_checkpoint_name, latest_checkpoint_epoch, list_checkpoint_epochs,
};
pub use classifier::{threshold_logits, Classifier, EpochReport, LossOutput, MetricValue};
pub use dashboard::{
    build_dashboard, Dashboard, DashboardRecord, HttpDashboard, InMemoryDashboard, JsonlDashboard,
    NullDashboard,
};
pub use grad::{clip_grad_norm, grad_norm, scale_grads};
pub use mode::{EvalGuard, Mode, ModeSwitch};
pub use model::{Backbone, ClassifierModel, EfficientNetB0, ResNet18, SmallCnn};
pub use pairing::CycleLoader;
pub use scaler::{GradScaler, PrecisionPolicy};

/// Re-export commonly used types
pub mod prelude {
    pub use super::classifier::{Classifier, EpochReport, MetricValue};
    pub use super::dashboard::{build_dashboard, Dashboard, InMemoryDashboard, NullDashboard};
    pub use super::model::ClassifierModel;
}

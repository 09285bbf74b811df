//! The classifier controller.
//!
//! `Classifier` owns the model, optimizer, losses, loss scaler and dashboard
//! sink, and drives one epoch of training at a time:
//! - forward/backward on every training batch, with gradient accumulation
//! - an optimizer step every `acc_grad_steps` batches and on the last batch
//! - a validation batch every `eval_every` batches and on the last batch,
//!   drawn from a validation loader that restarts as often as needed
//! - metric records to the dashboard after each step and validation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig};
use burn::optim::{
    adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsAccumulator, GradientsParams, Optimizer,
};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use classif_core::{classification_metrics, Error, Hyperparameters, Phase, Result};
use classif_data::{BatchLoader, ClassifierBatch};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkpoint::{load_parameters, save_parameters};
use crate::dashboard::{Dashboard, DashboardRecord};
use crate::grad::{clip_grad_norm, grad_norm};
use crate::mode::{Mode, ModeSwitch};
use crate::model::ClassifierModel;
use crate::pairing::CycleLoader;
use crate::scaler::{GradScaler, PrecisionPolicy};

type ClassifierOptimizer<B> = OptimizerAdaptor<
    Adam<<B as AutodiffBackend>::InnerBackend>,
    ClassifierModel<B>,
    B,
>;

/// A metric as produced by a forward pass
#[derive(Debug, Clone)]
pub enum MetricValue<B: Backend> {
    /// Device-resident scalar, read back only when published
    Tensor(Tensor<B, 1>),
    Scalar(f64),
}

impl<B: Backend> MetricValue<B> {
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Tensor(tensor) => tensor.clone().into_scalar().elem(),
            Self::Scalar(value) => *value,
        }
    }
}

pub type Metrics<B> = BTreeMap<String, MetricValue<B>>;

#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Holds `"loss"`
    pub metrics: Metrics<B>,
    /// Mean BCE-with-logits loss, shape `[1]`
    pub loss: Tensor<B, 1>,
    /// Raw model outputs, `[batch, num_classes]`
    pub logits: Tensor<B, 2>,
}

/// What happened during one call to [`Classifier::train`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochReport {
    pub batches: usize,
    /// Batch indices after which the optimizer stepped (or skipped a
    /// non-finite step)
    pub optimizer_steps: Vec<usize>,
    /// Batch indices after which a validation batch was evaluated
    pub validations: Vec<usize>,
    pub clipped_steps: usize,
    pub skipped_steps: usize,
    /// Mean of the per-batch training loss, already divided by
    /// `acc_grad_steps`
    pub mean_train_loss: f64,
}

/// Hard `{0, 1}` predictions: 1 where the logit is strictly positive
pub fn threshold_logits<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 2, Int> {
    logits.greater_elem(0.0).int()
}

fn forward_loss<B: Backend>(
    model: &ClassifierModel<B>,
    loss_fn: &BinaryCrossEntropyLoss<B>,
    x: Tensor<B, 4>,
    true_y: Tensor<B, 2, Int>,
) -> Result<LossOutput<B>> {
    let logits = model.forward(x);
    if logits.dims() != true_y.dims() {
        return Err(Error::Dataset(format!(
            "Targets of shape {:?} do not match logits of shape {:?}",
            true_y.dims(),
            logits.dims()
        )));
    }

    let loss = loss_fn.forward(logits.clone(), true_y);
    let mut metrics = Metrics::new();
    metrics.insert("loss".to_string(), MetricValue::Tensor(loss.clone()));
    Ok(LossOutput {
        metrics,
        loss,
        logits,
    })
}

fn int_values<B: Backend>(tensor: Tensor<B, 2, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| Error::Metrics(format!("Failed to read labels: {:?}", e)))
}

/// Publishes `metrics` as `"<phase>/<name>"` plus the current epoch
fn publish<B: Backend>(
    dashboard: &mut dyn Dashboard,
    metrics: &Metrics<B>,
    phase: Phase,
    epoch: usize,
    step: usize,
) -> Result<()> {
    let mut record: DashboardRecord = metrics
        .iter()
        .map(|(name, value)| (format!("{}/{}", phase, name), value.to_f64()))
        .collect();
    record.insert("epoch".to_string(), epoch as f64);
    dashboard.log(&record, step)
}

pub struct Classifier<B: AutodiffBackend> {
    device: B::Device,
    hps: Hyperparameters,
    model: ClassifierModel<B>,
    optim: ClassifierOptimizer<B>,
    accumulator: GradientsAccumulator<ClassifierModel<B>>,
    train_loss: BinaryCrossEntropyLoss<B>,
    eval_loss: BinaryCrossEntropyLoss<B::InnerBackend>,
    precision: PrecisionPolicy,
    scaler: GradScaler,
    dashboard: Box<dyn Dashboard>,
    mode: ModeSwitch,
    iters_so_far: usize,
    epochs_so_far: usize,
}

impl<B: AutodiffBackend> Classifier<B> {
    pub fn new(
        device: B::Device,
        hps: Hyperparameters,
        dashboard: Box<dyn Dashboard>,
    ) -> Result<Self> {
        hps.validate()?;

        let mut model =
            ClassifierModel::new(hps.backbone, hps.in_channels, hps.num_classes, &device);
        if hps.pretrained {
            match &hps.pretrained_weights {
                Some(path) => model = model.with_pretrained_backbone(path, &device)?,
                None => warn!(
                    "Pretrained {} requested but no weights configured, keeping random initialisation",
                    hps.backbone
                ),
            }
        }
        info!("{}", model.summary());

        if !hps.clipping_enabled() {
            info!("Gradient clipping disabled (clip_norm = {})", hps.clip_norm);
        }

        let precision = PrecisionPolicy::from_flags(hps.cuda, hps.fp16);
        if hps.fp16 && !precision.is_half() {
            warn!("fp16 requested without an accelerator, training in full precision");
        }
        let scaler = GradScaler::for_policy(precision);

        let train_loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);
        let eval_loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);

        Ok(Self {
            device,
            model,
            optim: AdamConfig::new().init(),
            accumulator: GradientsAccumulator::new(),
            train_loss,
            eval_loss,
            precision,
            scaler,
            dashboard,
            mode: ModeSwitch::new(),
            iters_so_far: 0,
            epochs_so_far: 0,
            hps,
        })
    }

    pub fn hps(&self) -> &Hyperparameters {
        &self.hps
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn model(&self) -> &ClassifierModel<B> {
        &self.model
    }

    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    pub fn precision(&self) -> PrecisionPolicy {
        self.precision
    }

    pub fn scaler(&self) -> &GradScaler {
        &self.scaler
    }

    pub fn iters_so_far(&self) -> usize {
        self.iters_so_far
    }

    pub fn epochs_so_far(&self) -> usize {
        self.epochs_so_far
    }

    /// Continues the epoch count of a resumed run
    pub fn set_epochs_so_far(&mut self, epochs: usize) {
        self.epochs_so_far = epochs;
    }

    /// Forward pass and loss on the training backend
    pub fn compute_loss(&self, x: Tensor<B, 4>, true_y: Tensor<B, 2, Int>) -> Result<LossOutput<B>> {
        forward_loss(&self.model, &self.train_loss, x, true_y)
    }

    /// Publishes `metrics` for `phase` at the current iteration
    pub fn send_to_dash<M: Backend>(&mut self, metrics: &Metrics<M>, phase: Phase) -> Result<()> {
        publish(
            self.dashboard.as_mut(),
            metrics,
            phase,
            self.epochs_so_far,
            self.iters_so_far,
        )
    }

    /// Runs one epoch over `train_loader`.
    ///
    /// `val_loader` is cycled alongside the training batches, so it may be
    /// shorter than the training loader but must not be empty.
    pub fn train<T, V>(&mut self, train_loader: &T, val_loader: &V) -> Result<EpochReport>
    where
        T: BatchLoader<B> + ?Sized,
        V: BatchLoader<B> + ?Sized,
    {
        if val_loader.is_empty() {
            return Err(Error::Dataset(
                "Validation loader yields no batches".to_string(),
            ));
        }

        let num_batches = train_loader.len();
        let acc_grad_steps = self.hps.acc_grad_steps;
        let eval_every = self.hps.eval_every;
        let progress = self.progress_bar(num_batches, Phase::Train);

        let mut report = EpochReport::default();
        let mut loss_sum = 0.0;

        let batches = train_loader.iter().zip(CycleLoader::new(val_loader));
        for (i, (batch, val_batch)) in batches.enumerate() {
            let batch = batch?.to_device(&self.device);
            let val_batch = val_batch?;

            let output = self.compute_loss(batch.images, batch.targets)?;
            let loss = output.loss.div_scalar(acc_grad_steps as f64);
            let mut metrics = output.metrics;
            metrics.insert("loss".to_string(), MetricValue::Tensor(loss.clone()));

            let grads = self.scaler.scale_loss(loss.clone()).backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.accumulator.accumulate(&self.model, grads);

            let loss_value: f64 = loss.into_scalar().elem();
            loss_sum += loss_value;
            progress.set_message(format!("loss {:.4}", loss_value));

            if (i + 1) % acc_grad_steps == 0 || i + 1 == num_batches {
                self.optimizer_step(&mut report);
                report.optimizer_steps.push(i);
                self.send_to_dash(&metrics, Phase::Train)?;
            }

            if (i + 1) % eval_every == 0 || i + 1 == num_batches {
                self.validate(val_batch)?;
                report.validations.push(i);
            }

            if self.hps.debug_level.is_verbose() {
                debug!(iteration = self.iters_so_far, lr = self.hps.lr, "Learning rate");
            }

            self.iters_so_far += 1;
            report.batches += 1;
            progress.inc(1);
        }
        progress.finish_and_clear();

        self.epochs_so_far += 1;
        if report.batches > 0 {
            report.mean_train_loss = loss_sum / report.batches as f64;
        }

        info!(
            "Epoch {} done: {} batches, {} optimizer steps ({} clipped, {} skipped), mean loss {:.4}",
            self.epochs_so_far,
            report.batches,
            report.optimizer_steps.len(),
            report.clipped_steps,
            report.skipped_steps,
            report.mean_train_loss
        );

        Ok(report)
    }

    /// Evaluates every batch of `loader` and publishes each as a test record
    pub fn test<L>(&mut self, loader: &L) -> Result<()>
    where
        L: BatchLoader<B> + ?Sized,
    {
        let _eval = self.mode.enter_eval();
        let progress = self.progress_bar(loader.len(), Phase::Test);

        for batch in loader.iter() {
            let metrics = self.evaluate_batch(batch?)?;
            publish(
                self.dashboard.as_mut(),
                &metrics,
                Phase::Test,
                self.epochs_so_far,
                self.iters_so_far,
            )?;
            progress.inc(1);
        }
        progress.finish_and_clear();
        Ok(())
    }

    /// Writes the model parameters to `dir/model_<epoch>.tar`
    pub fn save(&self, dir: &Path, epoch: usize) -> Result<PathBuf> {
        save_parameters(&self.model, dir, epoch)
    }

    /// Replaces the model parameters with `dir/model_<epoch>.tar`.
    ///
    /// Optimizer and loss-scaler state are left as they are.
    pub fn load(&mut self, dir: &Path, epoch: usize) -> Result<()> {
        self.model = load_parameters(self.model.clone(), dir, epoch, &self.device)?;
        Ok(())
    }

    /// Unscales, clips and applies the accumulated gradients
    fn optimizer_step(&mut self, report: &mut EpochReport) {
        let grads = self.accumulator.grads();
        let grads = self.scaler.unscale(&self.model, grads);

        let (grads, norm) = if self.hps.clipping_enabled() {
            let (grads, norm) = clip_grad_norm(&self.model, grads, self.hps.clip_norm);
            if norm > self.hps.clip_norm {
                report.clipped_steps += 1;
            }
            (grads, Some(norm))
        } else {
            (grads, None)
        };

        let found_non_finite = self.scaler.is_enabled()
            && !norm
                .unwrap_or_else(|| grad_norm(&self.model, &grads))
                .is_finite();

        if self.scaler.update(found_non_finite) {
            self.model = self.optim.step(self.hps.lr, self.model.clone(), grads);
        } else {
            warn!(
                "Skipping optimizer step at iteration {}: non-finite gradients",
                self.iters_so_far
            );
            report.skipped_steps += 1;
        }
    }

    fn validate(&mut self, batch: ClassifierBatch<B>) -> Result<()> {
        let _eval = self.mode.enter_eval();
        let metrics = self.evaluate_batch(batch)?;
        publish(
            self.dashboard.as_mut(),
            &metrics,
            Phase::Val,
            self.epochs_so_far,
            self.iters_so_far,
        )
    }

    /// Loss and classification metrics of one batch on the gradient-free model
    fn evaluate_batch(&self, batch: ClassifierBatch<B>) -> Result<Metrics<B::InnerBackend>> {
        let model = self.model.valid();
        let batch = batch.to_device(&self.device).inner();
        let true_y = batch.targets.clone();

        let output = forward_loss(&model, &self.eval_loss, batch.images, batch.targets)?;
        let pred_y = threshold_logits(output.logits);
        let scores = classification_metrics(&int_values(true_y)?, &int_values(pred_y)?)?;

        let mut metrics = output.metrics;
        metrics.extend(
            scores
                .into_iter()
                .map(|(name, value)| (name, MetricValue::Scalar(value))),
        );
        Ok(metrics)
    }

    fn progress_bar(&self, len: usize, phase: Phase) -> ProgressBar {
        if !self.hps.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:>5} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        progress.set_prefix(phase.to_string());
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_threshold_logits() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_data(
            TensorData::new(vec![-1.0f32, 0.0, 0.5, 3.0], [4, 1]),
            &device,
        );
        let predictions = int_values(threshold_logits(logits)).unwrap();
        assert_eq!(predictions, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_metric_values_read_back() {
        let device = Default::default();
        let tensor = MetricValue::<NdArray>::Tensor(Tensor::from_floats([0.25], &device));
        assert_eq!(tensor.to_f64(), 0.25);
        assert_eq!(MetricValue::<NdArray>::Scalar(2.0).to_f64(), 2.0);
    }

    #[test]
    fn test_publish_prefixes_phase() {
        let mut sink = crate::dashboard::InMemoryDashboard::new();
        let mut metrics = Metrics::<NdArray>::new();
        metrics.insert("accuracy".to_string(), MetricValue::Scalar(0.75));

        publish(&mut sink, &metrics, Phase::Val, 2, 40).unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let (step, record) = &entries[0];
        assert_eq!(*step, 40);
        assert_eq!(record["val/accuracy"], 0.75);
        assert_eq!(record["epoch"], 2.0);
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_compute_loss_rejects_mismatched_targets() {
        let hps = Hyperparameters {
            backbone: classif_core::BackboneKind::SmallCnn,
            in_channels: 1,
            show_progress: false,
            ..Default::default()
        };
        let classifier =
            Classifier::<TestBackend>::new(Default::default(), hps, Box::new(crate::NullDashboard))
                .unwrap();

        let device = classifier.device();
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, 8, 8], device);
        let y = Tensor::<TestBackend, 2, Int>::zeros([2, 3], device);
        assert!(matches!(classifier.compute_loss(x, y), Err(Error::Dataset(_))));
    }

    #[test]
    fn test_compute_loss_has_no_side_effects() {
        let hps = Hyperparameters {
            backbone: classif_core::BackboneKind::SmallCnn,
            in_channels: 1,
            show_progress: false,
            ..Default::default()
        };
        let classifier =
            Classifier::<TestBackend>::new(Default::default(), hps, Box::new(crate::NullDashboard))
                .unwrap();

        let device = classifier.device();
        let x = Tensor::<TestBackend, 4>::ones([2, 1, 8, 8], device);
        let y = Tensor::<TestBackend, 2, Int>::ones([2, 1], device);
        let output = classifier.compute_loss(x, y).unwrap();

        assert_eq!(output.logits.dims(), [2, 1]);
        assert!(output.metrics["loss"].to_f64().is_finite());
        assert_eq!(classifier.iters_so_far(), 0);
        assert_eq!(classifier.mode(), Mode::Train);
    }
}

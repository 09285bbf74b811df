#![allow(dead_code)]

use std::cell::Cell;

use burn::backend::Autodiff;
use burn::prelude::*;
use burn::tensor::TensorData;
use burn_ndarray::NdArray;
use classif_core::{BackboneKind, Error, Hyperparameters, Result};
use classif_data::{BatchLoader, BatchStream, ClassifierBatch, InMemoryLoader};
use classif_training::{Classifier, Dashboard, DashboardRecord, InMemoryDashboard};

pub type TestBackend = Autodiff<NdArray>;
pub type TestDevice = <TestBackend as Backend>::Device;

pub const IMAGE_SIZE: usize = 16;
pub const BATCH_SIZE: usize = 2;

pub fn device() -> TestDevice {
    Default::default()
}

/// Small CNN on single-channel 16x16 images
pub fn hps() -> Hyperparameters {
    Hyperparameters {
        lr: 1e-3,
        backbone: BackboneKind::SmallCnn,
        in_channels: 1,
        num_classes: 1,
        show_progress: false,
        ..Default::default()
    }
}

pub fn batch(seed: usize) -> ClassifierBatch<TestBackend> {
    let device = device();
    let numel = BATCH_SIZE * IMAGE_SIZE * IMAGE_SIZE;
    let pixels: Vec<f32> = (0..numel)
        .map(|k| ((k * 7 + seed * 13) % 17) as f32 / 17.0)
        .collect();
    let labels: Vec<i64> = (0..BATCH_SIZE).map(|k| ((k + seed) % 2) as i64).collect();

    ClassifierBatch::new(
        Tensor::from_data(
            TensorData::new(pixels, [BATCH_SIZE, 1, IMAGE_SIZE, IMAGE_SIZE]),
            &device,
        ),
        Tensor::from_data(TensorData::new(labels, [BATCH_SIZE, 1]), &device),
    )
}

pub fn loader(batches: usize) -> InMemoryLoader<TestBackend> {
    InMemoryLoader::new((0..batches).map(batch).collect())
}

pub fn build_classifier(hps: Hyperparameters) -> (Classifier<TestBackend>, InMemoryDashboard) {
    let dashboard = InMemoryDashboard::new();
    let classifier = Classifier::new(device(), hps, Box::new(dashboard.clone())).unwrap();
    (classifier, dashboard)
}

/// Counts how many passes a loader has started
pub struct CountingLoader {
    inner: InMemoryLoader<TestBackend>,
    passes: Cell<usize>,
}

impl CountingLoader {
    pub fn new(inner: InMemoryLoader<TestBackend>) -> Self {
        Self {
            inner,
            passes: Cell::new(0),
        }
    }

    pub fn passes(&self) -> usize {
        self.passes.get()
    }
}

impl BatchLoader<TestBackend> for CountingLoader {
    fn iter(&self) -> BatchStream<'_, TestBackend> {
        self.passes.set(self.passes.get() + 1);
        self.inner.iter()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Rejects every record holding a key of the given phase
pub struct FailingDashboard {
    phase: &'static str,
}

impl FailingDashboard {
    pub fn on(phase: &'static str) -> Self {
        Self { phase }
    }
}

impl Dashboard for FailingDashboard {
    fn log(&mut self, record: &DashboardRecord, _step: usize) -> Result<()> {
        let prefix = format!("{}/", self.phase);
        if record.keys().any(|key| key.starts_with(&prefix)) {
            return Err(Error::Dashboard("tracking server unavailable".to_string()));
        }
        Ok(())
    }
}

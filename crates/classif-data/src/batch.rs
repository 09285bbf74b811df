//! Items and tensor batches.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use classif_core::{Error, Result};

/// A single sample ready for batching
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierItem {
    /// Image data as flattened CHW float array
    pub pixels: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// One `{0, 1}` entry per output of the classifier head
    pub labels: Vec<i64>,
}

impl ClassifierItem {
    pub fn new(
        pixels: Vec<f32>,
        [channels, height, width]: [usize; 3],
        labels: Vec<i64>,
    ) -> Result<Self> {
        if pixels.len() != channels * height * width {
            return Err(Error::Dataset(format!(
                "Item has {} pixels, expected {}x{}x{}",
                pixels.len(),
                channels,
                height,
                width
            )));
        }
        Ok(Self {
            pixels,
            channels,
            height,
            width,
            labels,
        })
    }

    fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

/// Input images and multi-hot targets of one minibatch
#[derive(Clone, Debug)]
pub struct ClassifierBatch<B: Backend> {
    /// [batch, channels, height, width]
    pub images: Tensor<B, 4>,
    /// [batch, num_classes]
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> ClassifierBatch<B> {
    pub fn new(images: Tensor<B, 4>, targets: Tensor<B, 2, Int>) -> Self {
        Self { images, targets }
    }

    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }

    /// Moves both tensors to `device`
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            images: self.images.to_device(device),
            targets: self.targets.to_device(device),
        }
    }
}

impl<B: AutodiffBackend> ClassifierBatch<B> {
    /// Strips the autodiff wrapper for gradient-free evaluation
    pub fn inner(self) -> ClassifierBatch<B::InnerBackend> {
        ClassifierBatch {
            images: self.images.inner(),
            targets: self.targets.inner(),
        }
    }
}

/// Stacks items into a batch on a fixed device
#[derive(Clone, Debug)]
pub struct ClassifierBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ClassifierBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch(&self, items: Vec<ClassifierItem>) -> Result<ClassifierBatch<B>> {
        let first = items
            .first()
            .ok_or_else(|| Error::Dataset("Cannot batch zero items".to_string()))?;
        let [channels, height, width] = first.dims();
        let num_labels = first.labels.len();

        let mut pixels = Vec::with_capacity(items.len() * channels * height * width);
        let mut labels = Vec::with_capacity(items.len() * num_labels);
        for item in &items {
            if item.dims() != first.dims() || item.labels.len() != num_labels {
                return Err(Error::Dataset(format!(
                    "Inconsistent item shapes in batch: {:?}/{} vs {:?}/{}",
                    item.dims(),
                    item.labels.len(),
                    first.dims(),
                    num_labels
                )));
            }
            pixels.extend_from_slice(&item.pixels);
            labels.extend_from_slice(&item.labels);
        }

        let batch_size = items.len();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, channels, height, width]),
            &self.device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(labels, [batch_size, num_labels]),
            &self.device,
        );

        Ok(ClassifierBatch::new(images, targets))
    }
}

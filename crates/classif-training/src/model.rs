//! Backbones and the classifier model.
//!
//! Every backbone is a feature extractor ending in global average pooling;
//! `ClassifierModel` puts a single linear layer on top of it whose outputs
//! are the logits.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Tensor},
};
use classif_core::{BackboneKind, Error, Result};
use tracing::info;

/// Convolution, batch norm and ReLU
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .init(device),
            bn: BatchNormConfig::new(channels[1]).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.activation.forward(x)
    }
}

fn global_pool<B: Backend>(pool: &AdaptiveAvgPool2d, x: Tensor<B, 4>) -> Tensor<B, 2> {
    let x = pool.forward(x);
    // [batch, channels, 1, 1] -> [batch, channels]
    let [batch, channels, _, _] = x.dims();
    x.reshape([batch, channels])
}

/// 1x1 projection on the skip path of a strided residual block
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

/// Two 3x3 convolutions with an identity (or projected) skip connection
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        });

        Self {
            conv1: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: Conv2dConfig::new([out_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.bn.forward(downsample.conv.forward(x.clone())),
            None => x.clone(),
        };

        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);
        self.activation.forward(x.add(identity))
    }
}

/// ResNet-18 feature extractor
///
/// - Stem: 7x7 conv, stride 2, then 3x3 max pool
/// - 4 stages of two residual blocks (64, 128, 256, 512 channels)
/// - Global average pooling to 512 features
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    stem: ConvBnRelu<B>,
    maxpool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet18<B> {
    pub const FEATURES: usize = 512;

    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let stem = ConvBnRelu::new([in_channels, 64], 7, 2, device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::with_capacity(8);
        let mut channels = 64;
        for (stage, width) in [64, 128, 256, 512].into_iter().enumerate() {
            let stride = if stage == 0 { 1 } else { 2 };
            blocks.push(ResidualBlock::new(channels, width, stride, device));
            blocks.push(ResidualBlock::new(width, width, 1, device));
            channels = width;
        }

        Self {
            stem,
            maxpool,
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.maxpool.forward(self.stem.forward(input));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        global_pool(&self.avgpool, x)
    }
}

/// Compact EfficientNet-B0 style feature extractor
///
/// - Stem: 3x3 conv, stride 2
/// - Expansion/projection stages (16, 24, 40 channels)
/// - 1x1 head convolution to 1280 channels, global pooling, dropout
#[derive(Module, Debug)]
pub struct EfficientNetB0<B: Backend> {
    stem: ConvBnRelu<B>,
    stages: Vec<ConvBnRelu<B>>,
    head: ConvBnRelu<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
}

impl<B: Backend> EfficientNetB0<B> {
    pub const FEATURES: usize = 1280;

    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let stages = vec![
            // MBConv1, k3x3
            ConvBnRelu::new([32, 16], 3, 1, device),
            // MBConv6, k3x3
            ConvBnRelu::new([16, 96], 1, 1, device),
            ConvBnRelu::new([96, 24], 3, 2, device),
            // MBConv6, k5x5
            ConvBnRelu::new([24, 144], 1, 1, device),
            ConvBnRelu::new([144, 40], 5, 2, device),
        ];

        Self {
            stem: ConvBnRelu::new([in_channels, 32], 3, 2, device),
            stages,
            head: ConvBnRelu::new([40, Self::FEATURES], 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(0.2).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(input);
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));
        let x = self.head.forward(x);
        self.dropout.forward(global_pool(&self.pool, x))
    }
}

/// Conv, batch norm, ReLU and a 2x2 max pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    layer: ConvBnRelu<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            layer: ConvBnRelu::new([in_channels, out_channels], 3, 1, device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(self.layer.forward(x))
    }
}

/// Three pooled conv blocks, cheap enough for CPU runs and tests
#[derive(Module, Debug)]
pub struct SmallCnn<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> SmallCnn<B> {
    pub const FEATURES: usize = 64;

    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: ConvBlock::new(in_channels, 16, device),
            conv2: ConvBlock::new(16, 32, device),
            conv3: ConvBlock::new(32, Self::FEATURES, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        global_pool(&self.pool, x)
    }
}

#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    ResNet18(ResNet18<B>),
    EfficientNetB0(EfficientNetB0<B>),
    SmallCnn(SmallCnn<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn new(kind: BackboneKind, in_channels: usize, device: &B::Device) -> Self {
        match kind {
            BackboneKind::ResNet18 => Self::ResNet18(ResNet18::new(in_channels, device)),
            BackboneKind::EfficientNetB0 => {
                Self::EfficientNetB0(EfficientNetB0::new(in_channels, device))
            }
            BackboneKind::SmallCnn => Self::SmallCnn(SmallCnn::new(in_channels, device)),
        }
    }

    pub fn kind(&self) -> BackboneKind {
        match self {
            Self::ResNet18(_) => BackboneKind::ResNet18,
            Self::EfficientNetB0(_) => BackboneKind::EfficientNetB0,
            Self::SmallCnn(_) => BackboneKind::SmallCnn,
        }
    }

    /// Width of the pooled feature vector
    pub fn out_features(&self) -> usize {
        match self {
            Self::ResNet18(_) => ResNet18::<B>::FEATURES,
            Self::EfficientNetB0(_) => EfficientNetB0::<B>::FEATURES,
            Self::SmallCnn(_) => SmallCnn::<B>::FEATURES,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Self::ResNet18(model) => model.forward(input),
            Self::EfficientNetB0(model) => model.forward(input),
            Self::SmallCnn(model) => model.forward(input),
        }
    }
}

/// Backbone followed by a linear head producing one logit per output
#[derive(Module, Debug)]
pub struct ClassifierModel<B: Backend> {
    backbone: Backbone<B>,
    head: Linear<B>,
}

impl<B: Backend> ClassifierModel<B> {
    pub fn new(
        kind: BackboneKind,
        in_channels: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let backbone = Backbone::new(kind, in_channels, device);
        let head = LinearConfig::new(backbone.out_features(), num_classes).init(device);
        Self { backbone, head }
    }

    /// Replaces the backbone parameters with a record saved by
    /// `BinFileRecorder<FullPrecisionSettings>`. The recorder reads
    /// `<path>.bin`.
    pub fn with_pretrained_backbone(mut self, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone = self
            .backbone
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                Error::Model(format!(
                    "Failed to load backbone weights from {}: {:?}",
                    path.display(),
                    e
                ))
            })?;
        info!("Loaded pretrained backbone from {}", path.display());
        Ok(self)
    }

    /// Logits of shape `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    pub fn backbone(&self) -> &Backbone<B> {
        &self.backbone
    }

    pub fn num_classes(&self) -> usize {
        self.head.weight.dims()[1]
    }

    /// Human-readable architecture and parameter counts
    pub fn summary(&self) -> String {
        let backbone_params = self.backbone.num_params();
        let head_params = self.head.num_params();
        format!(
            "ClassifierModel\n  backbone: {} ({} features, {} parameters)\n  head:     Linear({} -> {}, {} parameters)\n  total:    {} parameters",
            self.backbone.kind(),
            self.backbone.out_features(),
            backbone_params,
            self.backbone.out_features(),
            self.num_classes(),
            head_params,
            backbone_params + head_params
        )
    }
}

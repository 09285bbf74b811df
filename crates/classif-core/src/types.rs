//! Core type definitions for the classifier workspace.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Backbone network used as the feature extractor of the classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    /// ResNet-18
    #[default]
    #[serde(rename = "resnet18")]
    ResNet18,
    /// EfficientNet-B0
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
    /// Three-block convolutional network, cheap enough for CPU runs
    SmallCnn,
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneKind::ResNet18 => write!(f, "resnet18"),
            BackboneKind::EfficientNetB0 => write!(f, "efficientnet_b0"),
            BackboneKind::SmallCnn => write!(f, "small_cnn"),
        }
    }
}

impl FromStr for BackboneKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "resnet18" => Ok(BackboneKind::ResNet18),
            "efficientnet_b0" => Ok(BackboneKind::EfficientNetB0),
            "small_cnn" => Ok(BackboneKind::SmallCnn),
            other => Err(Error::Config(format!(
                "Unknown backbone '{}'. Valid options: resnet18, efficientnet_b0, small_cnn",
                other
            ))),
        }
    }
}

/// Phase a metric record belongs to; used as the dashboard key prefix
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Training batches
    Train,
    /// Validation batches interleaved with training
    Val,
    /// Standalone test pass
    Test,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Val => write!(f, "val"),
            Phase::Test => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backbone_display_round_trip() {
        for kind in [
            BackboneKind::ResNet18,
            BackboneKind::EfficientNetB0,
            BackboneKind::SmallCnn,
        ] {
            assert_eq!(kind.to_string().parse::<BackboneKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_backbone_parse_accepts_dashes() {
        assert_eq!(
            "EfficientNet-B0".parse::<BackboneKind>().unwrap(),
            BackboneKind::EfficientNetB0
        );
        assert!("vgg16".parse::<BackboneKind>().is_err());
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct Wrapper {
        backbone: BackboneKind,
    }

    #[test]
    fn test_backbone_toml_uses_display_names() {
        for kind in [
            BackboneKind::ResNet18,
            BackboneKind::EfficientNetB0,
            BackboneKind::SmallCnn,
        ] {
            let parsed: Wrapper =
                toml::from_str(&format!("backbone = \"{}\"", kind)).unwrap();
            assert_eq!(parsed.backbone, kind);

            let written = toml::to_string(&Wrapper { backbone: kind }).unwrap();
            assert_eq!(written.trim(), format!("backbone = \"{}\"", kind));
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Train.to_string(), "train");
        assert_eq!(Phase::Val.to_string(), "val");
        assert_eq!(Phase::Test.to_string(), "test");
    }
}

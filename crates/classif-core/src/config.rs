//! Configuration structures for classifier training.

use crate::types::BackboneKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the verbosity level of the training loop.
pub const DEBUG_LEVEL_ENV: &str = "DEBUG_LVL";

/// Highest accepted debug level.
pub const MAX_DEBUG_LEVEL: u8 = 3;

/// Verbosity of the training loop, always within `0..=3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct DebugLevel(u8);

impl DebugLevel {
    /// Clamps `level` into `0..=3`.
    pub fn new(level: i64) -> Self {
        Self(level.clamp(0, MAX_DEBUG_LEVEL as i64) as u8)
    }

    /// Parses a raw value; anything that is not an integer yields level 0.
    pub fn parse(raw: &str) -> Self {
        raw.trim().parse::<i64>().map(Self::new).unwrap_or_default()
    }

    /// Reads `DEBUG_LVL` from the process environment.
    pub fn from_env() -> Self {
        std::env::var(DEBUG_LEVEL_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Level 2 and above log the learning rate at every iteration.
    pub fn is_verbose(&self) -> bool {
        self.0 >= 2
    }
}

impl From<i64> for DebugLevel {
    fn from(level: i64) -> Self {
        Self::new(level)
    }
}

impl From<DebugLevel> for u8 {
    fn from(level: DebugLevel) -> Self {
        level.0
    }
}

/// Hyperparameters of a classifier run.
///
/// Supplied once when the classifier is constructed and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Adam learning rate
    pub lr: f64,
    /// Global gradient-norm threshold; `<= 0` disables clipping
    pub clip_norm: f64,
    /// Number of backward passes accumulated per optimizer step
    pub acc_grad_steps: usize,
    /// Validate every N training iterations
    pub eval_every: usize,
    /// Reduced precision with dynamic loss scaling (only effective on an accelerator)
    pub fp16: bool,
    /// Whether the compute device is an accelerator
    pub cuda: bool,
    /// Feature extractor
    pub backbone: BackboneKind,
    /// Initialise the backbone from pretrained weights
    pub pretrained: bool,
    /// Backbone record used when `pretrained` is set
    pub pretrained_weights: Option<PathBuf>,
    /// Output dimensionality of the head
    pub num_classes: usize,
    /// Channels of the input images
    pub in_channels: usize,
    /// Verbosity of the training loop
    pub debug_level: DebugLevel,
    /// Draw progress bars while iterating loaders
    pub show_progress: bool,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            lr: 3e-4,
            clip_norm: 1.0,
            acc_grad_steps: 1,
            eval_every: 100,
            fp16: false,
            cuda: false,
            backbone: BackboneKind::ResNet18,
            pretrained: false,
            pretrained_weights: None,
            num_classes: 1,
            in_channels: 10,
            debug_level: DebugLevel::default(),
            show_progress: true,
        }
    }
}

impl Hyperparameters {
    /// Checks the values the training loop divides or indexes by.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::Config(format!(
                "Learning rate must be positive, got {}",
                self.lr
            )));
        }
        if self.acc_grad_steps == 0 {
            return Err(Error::Config(
                "acc_grad_steps must be greater than 0".to_string(),
            ));
        }
        if self.eval_every == 0 {
            return Err(Error::Config("eval_every must be greater than 0".to_string()));
        }
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be greater than 0".to_string()));
        }
        if self.in_channels == 0 {
            return Err(Error::Config("in_channels must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Gradient clipping is active only for a strictly positive threshold.
    pub fn clipping_enabled(&self) -> bool {
        self.clip_norm > 0.0
    }
}

/// Dashboard sink selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DashboardKind {
    /// Drop every record
    #[default]
    None,
    /// Append JSON lines to a local file
    Jsonl,
    /// POST JSON records to a remote endpoint
    Http,
}

/// Dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub kind: DashboardKind,
    /// Output file for `jsonl`
    pub path: Option<PathBuf>,
    /// Endpoint URL for `http`
    pub endpoint: Option<String>,
    /// Run identifier attached to every HTTP record
    pub run_name: Option<String>,
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            DashboardKind::None => Ok(()),
            DashboardKind::Jsonl if self.path.is_none() => Err(Error::Config(
                "jsonl dashboard requires a path".to_string(),
            )),
            DashboardKind::Http if self.endpoint.is_none() => Err(Error::Config(
                "http dashboard requires an endpoint".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

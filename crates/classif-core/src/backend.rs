//! Compute device selection.
//!
//! The training crates are generic over the Burn backend; this module only
//! decides whether a run should target an accelerator, which in turn drives
//! the precision policy of the classifier.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use crate::Error;

/// Device a run executes on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComputeDevice {
    /// CPU backend
    Cpu,
    /// Accelerator with the given index
    Gpu(usize),
}

impl ComputeDevice {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, ComputeDevice::Gpu(_))
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "CPU"),
            ComputeDevice::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// What the operator asked for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cpu,
    Gpu,
    /// Accelerator when one is detected, CPU otherwise
    #[default]
    Auto,
}

impl FromStr for DevicePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DevicePreference::Cpu),
            "gpu" | "cuda" | "wgpu" => Ok(DevicePreference::Gpu),
            "auto" => Ok(DevicePreference::Auto),
            other => Err(Error::Device(format!("Unknown device preference '{}'", other))),
        }
    }
}

/// Resolve a preference against the hardware present on this machine
pub fn select_device(preference: DevicePreference) -> ComputeDevice {
    let device = match preference {
        DevicePreference::Cpu => ComputeDevice::Cpu,
        DevicePreference::Gpu => {
            if is_gpu_available() {
                ComputeDevice::Gpu(0)
            } else {
                warn!("GPU requested but not available - falling back to CPU");
                ComputeDevice::Cpu
            }
        }
        DevicePreference::Auto => {
            if is_gpu_available() {
                ComputeDevice::Gpu(0)
            } else {
                ComputeDevice::Cpu
            }
        }
    };

    info!("Using device: {}", device);
    device
}

/// Check if any GPU acceleration is available
pub fn is_gpu_available() -> bool {
    has_nvidia_gpu() || has_amd_gpu()
}

fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("nvidia-smi.exe")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

fn has_amd_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/sys/module/amdgpu").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

//! Compute device selection
//!
//! `Auto` probes for CUDA, then Metal, and settles on the CPU when no
//! accelerator is usable. An explicit accelerator request that cannot be
//! satisfied is an error rather than a silent CPU fallback.

use crate::{Error, Result};
use candle_core::Device;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceChoice {
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceChoice {
    /// Create the candle device for this choice
    pub fn resolve(self) -> Result<Device> {
        match self {
            DeviceChoice::Auto => Ok(auto_device()),
            DeviceChoice::Cpu => Ok(Device::Cpu),
            DeviceChoice::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| Error::Device(format!("failed to create CUDA device {}: {}", ordinal, e))),
            DeviceChoice::Metal(ordinal) => Device::new_metal(ordinal)
                .map_err(|e| Error::Device(format!("failed to create Metal device {}: {}", ordinal, e))),
        }
    }
}

fn auto_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => {
                tracing::info!("using CUDA device");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "CUDA reported available but device creation failed"),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => {
                tracing::info!("using Metal device");
                return device;
            }
            Err(e) => tracing::warn!(error = %e, "Metal reported available but device creation failed"),
        }
    }
    tracing::info!("using CPU device");
    Device::Cpu
}

impl FromStr for DeviceChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match normalized.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal.parse::<usize>().map_err(|_| {
                    Error::InvalidConfig(format!("invalid device ordinal in {:?}", s))
                })?;
                (kind, Some(ordinal))
            }
            None => (normalized.as_str(), None),
        };

        match (kind, ordinal) {
            ("auto", None) | ("", None) => Ok(DeviceChoice::Auto),
            ("cpu", None) => Ok(DeviceChoice::Cpu),
            ("cuda", ordinal) | ("gpu", ordinal) => Ok(DeviceChoice::Cuda(ordinal.unwrap_or(0))),
            ("metal", ordinal) | ("mps", ordinal) => Ok(DeviceChoice::Metal(ordinal.unwrap_or(0))),
            _ => Err(Error::InvalidConfig(format!(
                "unknown device {:?}, expected auto, cpu, cuda[:N] or metal[:N]",
                s
            ))),
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceChoice::Auto => write!(f, "auto"),
            DeviceChoice::Cpu => write!(f, "cpu"),
            DeviceChoice::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            DeviceChoice::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

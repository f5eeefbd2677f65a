// Location: src/gpu/device.rs

use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use tracing::info;

use crate::error::{BenchError, Result};

/// Where models run, as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    /// First CUDA device when available, otherwise CPU
    #[default]
    Auto,
}

impl FromStr for DeviceSpec {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "auto" => Ok(DeviceSpec::Auto),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(DeviceSpec::Cuda)
                .ok_or_else(|| BenchError::config("device", format!("expected cpu, auto, cuda or cuda:N, got '{}'", s))),
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            DeviceSpec::Auto => write!(f, "auto"),
        }
    }
}

/// Open the candle device a spec names
pub fn select_device(spec: DeviceSpec) -> Result<Device> {
    let device = match spec {
        DeviceSpec::Cpu => Device::Cpu,
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| BenchError::ModelError {
            message: format!("CUDA device {} is unavailable", ordinal),
            source: Some(Box::new(e)),
        })?,
        DeviceSpec::Auto => Device::cuda_if_available(0)?,
    };

    info!("Using device {:?} for '{}'", device, spec);
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_spec() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
        assert_eq!("CUDA:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(1));
        assert_eq!("cuda".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(0));
        assert_eq!("auto".parse::<DeviceSpec>().unwrap(), DeviceSpec::Auto);
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
        assert_eq!(DeviceSpec::Cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn test_select_cpu() {
        assert!(select_device(DeviceSpec::Cpu).unwrap().is_cpu());
        assert!(select_device(DeviceSpec::Auto).is_ok());
    }
}

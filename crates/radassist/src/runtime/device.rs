use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested execution device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
  /// CUDA when an NVIDIA GPU is present, CPU otherwise
  #[default]
  Auto,
  Cuda,
  Cpu,
}

/// Device a model is actually loaded on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cuda,
  Cpu,
}

impl DevicePreference {
  pub fn resolve(self) -> Device {
    match self {
      DevicePreference::Auto if is_cuda_available() => Device::Cuda,
      DevicePreference::Auto => Device::Cpu,
      DevicePreference::Cuda => Device::Cuda,
      DevicePreference::Cpu => Device::Cpu,
    }
  }
}

impl Device {
  pub fn is_accelerator(self) -> bool {
    matches!(self, Device::Cuda)
  }

  /// The lower-resource device to retry on after an allocation failure
  pub fn fallback(self) -> Option<Device> {
    match self {
      Device::Cuda => Some(Device::Cpu),
      Device::Cpu => None,
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cuda => write!(f, "cuda"),
      Device::Cpu => write!(f, "cpu"),
    }
  }
}

/// Hardware-level CUDA check: does `nvidia-smi` run successfully
#[cfg(target_os = "linux")]
fn is_cuda_available() -> bool {
  std::process::Command::new("nvidia-smi")
    .output()
    .map(|output| output.status.success())
    .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_cuda_available() -> bool {
  false
}

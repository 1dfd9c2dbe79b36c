//! Device-string parsing and enumeration.
//!
//! Device specifications come in as strings: `"cpu"`, `"metal"`,
//! `"cuda:all"`, or an explicit comma-separated list such as `"cuda:0,2"`.

use crate::errors::{PorecallError, Result};

/// A single compute device a caller can be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    /// Host CPU.
    Cpu,
    /// Apple Metal GPU.
    Metal,
    /// A CUDA device, carrying its `cuda:N` name.
    Cuda(String),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Metal => write!(f, "metal"),
            Device::Cuda(name) => write!(f, "{name}"),
        }
    }
}

/// Enumerate the CUDA devices visible to this process.
///
/// The GPU layer is an external collaborator; this build carries no CUDA
/// runtime, so enumeration always yields an empty set and `"cuda:all"`
/// fails with `DeviceEnumerationFailed` at construction.
#[must_use]
pub fn enumerate_cuda_devices() -> Vec<String> {
    Vec::new()
}

/// Parse a device string into the set of devices it names.
///
/// # Errors
///
/// Returns `UnsupportedDevice` for an unknown string and
/// `DeviceEnumerationFailed` when a CUDA selection matches no devices.
pub fn parse_device_string(device: &str) -> Result<Vec<Device>> {
    match device {
        "cpu" => Ok(vec![Device::Cpu]),
        "metal" => Ok(vec![Device::Metal]),
        _ => {
            let Some(selector) = device.strip_prefix("cuda:") else {
                return Err(PorecallError::UnsupportedDevice { device: device.to_string() });
            };
            let devices: Vec<Device> = if selector == "all" {
                enumerate_cuda_devices().into_iter().map(Device::Cuda).collect()
            } else {
                selector
                    .split(',')
                    .map(|id| {
                        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                            Err(PorecallError::UnsupportedDevice { device: device.to_string() })
                        } else {
                            Ok(Device::Cuda(format!("cuda:{id}")))
                        }
                    })
                    .collect::<Result<_>>()?
            };
            if devices.is_empty() {
                return Err(PorecallError::DeviceEnumerationFailed {
                    device: device.to_string(),
                    reason: "CUDA device requested but no devices found".to_string(),
                });
            }
            Ok(devices)
        }
    }
}

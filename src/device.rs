//! Compute device selection.
//!
//! Accelerators are only considered when the crate is built with the
//! matching feature (`cuda` or `metal`). Selection never fails: anything
//! that cannot be initialized falls back to the CPU.

use candle_core::Device;
use candle_core::utils::{cuda_is_available, metal_is_available};

/// Device preference for evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cuda,
    Metal,
    Cpu,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            _ => Err(anyhow::anyhow!(
                "Invalid device preference: {}. Valid options: auto, cuda, metal, cpu",
                s
            )),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

fn try_cuda() -> Option<Device> {
    if !cuda_is_available() {
        return None;
    }
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("CUDA initialization failed: {}", e);
            None
        }
    }
}

fn try_metal() -> Option<Device> {
    if !metal_is_available() {
        return None;
    }
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("Metal initialization failed: {}", e);
            None
        }
    }
}

/// Select a device according to `preference` without printing anything.
pub fn resolve_device(preference: DevicePreference) -> Device {
    let picked = match preference {
        DevicePreference::Auto => try_cuda().or_else(try_metal),
        DevicePreference::Cuda => {
            let device = try_cuda();
            if device.is_none() {
                tracing::warn!("CUDA requested but not available, falling back to CPU");
            }
            device
        }
        DevicePreference::Metal => {
            let device = try_metal();
            if device.is_none() {
                tracing::warn!("Metal requested but not available, falling back to CPU");
            }
            device
        }
        DevicePreference::Cpu => None,
    };
    picked.unwrap_or(Device::Cpu)
}

/// Select a device and report the choice on stdout.
pub fn select_device(preference: DevicePreference) -> Device {
    let device = resolve_device(preference);

    if is_accelerator(&device) {
        println!("GPU is available");
    } else {
        println!("GPU is not available, switching to CPU");
    }
    println!("Using device: {}", device_label(&device));
    tracing::debug!(%preference, device = device_label(&device), "device selected");

    device
}

/// Whether the device is a GPU.
pub fn is_accelerator(device: &Device) -> bool {
    !matches!(device, Device::Cpu)
}

/// Short human-readable name for a device.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Print available devices
pub fn print_available_devices() {
    println!("Available devices:");
    println!("  CPU: ✓ Always available");

    if cfg!(feature = "cuda") {
        if cuda_is_available() {
            println!("  CUDA: ✓ Available");
        } else {
            println!("  CUDA: ✗ Not available");
        }
    } else {
        println!("  CUDA: ✗ Not compiled (use --features cuda)");
    }

    if cfg!(feature = "metal") {
        if metal_is_available() {
            println!("  Metal: ✓ Available");
        } else {
            println!("  Metal: ✗ Not available");
        }
    } else {
        println!("  Metal: ✗ Not compiled (use --features metal)");
    }
}

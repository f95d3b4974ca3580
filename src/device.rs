use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

use crate::error::Result;

/// Seed re-applied to the accelerator RNG before every classification call.
pub const SEED: u64 = 42;

/// Picks CUDA, then Metal, when `use_accelerator` is set and the device can
/// be opened; the CPU otherwise.
pub fn select_device(use_accelerator: bool) -> Device {
    if use_accelerator {
        if cuda_is_available() {
            match Device::new_cuda(0) {
                Ok(device) => return device,
                Err(e) => tracing::warn!(error = %e, "CUDA reported available but failed to open"),
            }
        }
        if metal_is_available() {
            match Device::new_metal(0) {
                Ok(device) => return device,
                Err(e) => tracing::warn!(error = %e, "Metal reported available but failed to open"),
            }
        }
    }
    Device::Cpu
}

pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

/// Re-seeds the device RNG so repeated calls replay identically.
///
/// CPU inference draws no random numbers, and candle's CPU backend refuses
/// `set_seed`, so only accelerators are seeded.
pub fn seed(device: &Device) -> Result<()> {
    if !device.is_cpu() {
        device.set_seed(SEED)?;
    }
    Ok(())
}

//! Backend Implementations and Device Discovery
//!
//! Contains concrete implementations of the `AcceleratorBackend` trait and
//! the platform/device lookup used at pipeline construction.

pub mod emulator;

use tracing::{debug, info};

use crate::backend::{AcceleratorBackend, DeviceClass};
use crate::error::{Error, Result};

// Re-exports
pub use emulator::{
    EmulatorBackend, EmulatorBuffer, EmulatorEvent, EmulatorKernel, EmulatorOptions,
    EmulatorProgram, EmulatorQueue, KernelContext, KernelFn, KernelRegistry,
};

/// Platform names visible to this process
///
/// No hardware runtime is linked, so only the emulated platform shows up,
/// and only when emulation is enabled.
#[must_use]
pub fn platforms(emulation: bool, options: &EmulatorOptions) -> Vec<String> {
    if emulation {
        vec![options.platform_name.clone()]
    } else {
        Vec::new()
    }
}

/// Locate the first device of `class` on the platform named `platform`
///
/// # Errors
/// - [`Error::UnknownPlatform`] if no platform has that name
/// - [`Error::NoDevice`] if the platform has no device of that class
pub fn discover(
    platform: &str,
    class: DeviceClass,
    emulation: bool,
    kernels: KernelRegistry,
    options: EmulatorOptions,
) -> Result<EmulatorBackend> {
    let available = platforms(emulation, &options);
    debug!(requested = platform, ?available, emulation, "Discovering platforms");

    if !available.iter().any(|name| name == platform) {
        return Err(Error::UnknownPlatform(platform.to_string()));
    }
    if class != DeviceClass::Accelerator {
        return Err(Error::no_device(platform, class));
    }

    let backend = EmulatorBackend::with_options(kernels, options);
    info!(
        platform,
        device = %backend.device_info().name,
        "Using emulated accelerator"
    );
    Ok(backend)
}

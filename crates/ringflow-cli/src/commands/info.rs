//! info command - list visible accelerator platforms and devices

use anyhow::{Context, Result};
use ringflow_device::{platforms, AcceleratorBackend, DeviceClass, EmulatorOptions};
use ringflow_stream::PipelineConfig;

use crate::vecsum::{kernels, KERNEL_NAME};

/// Execute the info command
///
/// # Arguments
/// * `emulation` - Include the software emulation platform
pub fn execute(emulation: bool) -> Result<()> {
    let options = EmulatorOptions::default();
    let available = platforms(emulation, &options);

    println!("Accelerator Platforms");
    println!("{}", "=".repeat(50));

    if available.is_empty() {
        println!("  No platforms found.");
        if !emulation {
            println!("  Software emulation is disabled (drop --no-emulation to enable it).");
        }
        return Ok(());
    }

    for platform in &available {
        let config = PipelineConfig::new(KERNEL_NAME)
            .with_platform(platform.as_str())
            .with_emulation(emulation);
        let backend = config
            .discover(kernels(), options.clone())
            .with_context(|| format!("Failed to open platform {}", platform))?;
        let device = backend.device_info();

        println!("  Platform:        {}", platform);
        println!("  Device:          {}", device.name);
        println!(
            "  Class:           {}{}",
            device.class,
            if device.emulated { " (emulated)" } else { "" }
        );
        println!(
            "  Global Memory:   {} MB",
            device.global_memory_bytes / (1024 * 1024)
        );
        if device.class == DeviceClass::Accelerator {
            println!("  Kernels:         {}", backend.kernels().names().join(", "));
        }
        println!();
    }

    Ok(())
}

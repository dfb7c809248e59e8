//! Configuration for the accelerator pipeline
//!
//! This module provides the kernel, device, ring depth and profiling
//! settings shared by the synchronous and asynchronous drivers.

use std::path::PathBuf;

use ringflow_device::{discover, DeviceClass, EmulatorBackend, EmulatorOptions, KernelRegistry};

use crate::{PipelineError, Result};

/// Environment variable enabling software emulation
pub const ENV_EMULATION: &str = "RINGFLOW_EMULATION";

/// Environment variable overriding the ring degree
pub const ENV_DEGREE: &str = "RINGFLOW_DEGREE";

/// Configuration for the accelerator pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Precompiled kernel binary (an empty blob is loaded when unset)
    pub kernel_binary: Option<PathBuf>,

    /// Kernel entry-point name
    pub kernel_name: String,

    /// Platform to search for the accelerator (default: `Xilinx`)
    pub platform_name: String,

    /// Buffers per argument ring and maximum items in flight (default: 2)
    pub degree: usize,

    /// Run against the software emulator
    pub emulation: bool,

    /// Record device timestamps per item
    pub profiling: bool,

    /// Ledger file appended to when the pipeline finishes
    pub profile_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_binary: None,
            kernel_name: String::new(),
            platform_name: "Xilinx".to_string(),
            degree: 2, // Double buffering
            emulation: false,
            profiling: false,
            profile_path: None,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration for the named kernel with default values
    pub fn new(kernel_name: impl Into<String>) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            ..Self::default()
        }
    }

    /// Create a configuration and apply `RINGFLOW_*` environment overrides
    ///
    /// The environment is read once here; afterwards emulation is an
    /// ordinary field of the configuration.
    pub fn from_env(kernel_name: impl Into<String>) -> Result<Self> {
        Self::new(kernel_name).with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_EMULATION) {
            self.emulation = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "sw_emu"
            );
        }
        if let Some(value) = lookup(ENV_DEGREE) {
            self.degree = value.trim().parse().map_err(|_| {
                PipelineError::InvalidConfig(format!(
                    "{} must be a positive integer, got `{}`",
                    ENV_DEGREE, value
                ))
            })?;
        }
        Ok(self)
    }

    /// Set the kernel binary path
    pub fn with_kernel_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.kernel_binary = Some(path.into());
        self
    }

    /// Set the platform name
    pub fn with_platform(mut self, name: impl Into<String>) -> Self {
        self.platform_name = name.into();
        self
    }

    /// Set the ring degree
    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    /// Enable or disable emulation
    pub fn with_emulation(mut self, enabled: bool) -> Self {
        self.emulation = enabled;
        self
    }

    /// Enable or disable profiling
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        if !enabled {
            self.profile_path = None;
        }
        self
    }

    /// Set the ledger file (enables profiling)
    pub fn with_profile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiling = true;
        self.profile_path = Some(path.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kernel_name.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "kernel_name must not be empty".to_string(),
            ));
        }

        if self.platform_name.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "platform_name must not be empty".to_string(),
            ));
        }

        if self.degree == 0 {
            return Err(PipelineError::InvalidConfig(
                "degree must be >= 1".to_string(),
            ));
        }

        if self.profile_path.is_some() && !self.profiling {
            return Err(PipelineError::InvalidConfig(
                "profile_path requires profiling".to_string(),
            ));
        }

        Ok(())
    }

    /// Locate the configured accelerator
    ///
    /// Only the emulated platform is visible, and only with `emulation` set.
    pub fn discover(&self, kernels: KernelRegistry, options: EmulatorOptions) -> Result<EmulatorBackend> {
        Ok(discover(
            &self.platform_name,
            DeviceClass::Accelerator,
            self.emulation,
            kernels,
            options,
        )?)
    }
}

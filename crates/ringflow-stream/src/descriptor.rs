//! Kernel argument descriptors
//!
//! One descriptor per kernel argument, in kernel signature order. The list
//! is fixed when a pipeline is built and sizes every ring buffer.

use std::collections::HashSet;
use std::fmt;

use ringflow_device::{Element, ElementType};

use crate::{PipelineError, Result};

/// How an argument is passed to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgRole {
    /// Host block copied to the device before launch
    Input,
    /// Device block copied back to the host after launch
    Output,
    /// Value passed directly at launch
    Scalar,
}

impl fmt::Display for ArgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgRole::Input => write!(f, "input"),
            ArgRole::Output => write!(f, "output"),
            ArgRole::Scalar => write!(f, "scalar"),
        }
    }
}

/// Describes one kernel argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    /// Argument name, unique among outputs
    pub name: String,
    /// Argument role
    pub role: ArgRole,
    /// Element type of the block or scalar
    pub element_type: ElementType,
    /// Elements per block (1 for scalars)
    pub element_count: usize,
}

impl ArgumentDescriptor {
    /// Host-to-device block of `element_count` values of `T`
    pub fn input<T: Element>(name: impl Into<String>, element_count: usize) -> Self {
        Self {
            name: name.into(),
            role: ArgRole::Input,
            element_type: T::TYPE,
            element_count,
        }
    }

    /// Device-to-host block of `element_count` values of `T`
    pub fn output<T: Element>(name: impl Into<String>, element_count: usize) -> Self {
        Self {
            name: name.into(),
            role: ArgRole::Output,
            element_type: T::TYPE,
            element_count,
        }
    }

    /// Scalar of type `T`
    pub fn scalar<T: Element>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: ArgRole::Scalar,
            element_type: T::TYPE,
            element_count: 1,
        }
    }

    /// Block size in bytes, `None` if it does not fit in `usize`
    #[must_use]
    pub fn checked_size_in_bytes(&self) -> Option<usize> {
        self.element_count
            .checked_mul(self.element_type.size_in_bytes())
    }

    /// Block size in bytes
    ///
    /// Saturates; [`validate_descriptors`] rejects sizes that overflow.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.checked_size_in_bytes().unwrap_or(usize::MAX)
    }

    /// Input or output (backed by a ring of device buffers)
    #[must_use]
    pub fn is_buffer(&self) -> bool {
        !matches!(self.role, ArgRole::Scalar)
    }
}

impl fmt::Display for ArgumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}[{}]",
            self.name, self.role, self.element_type, self.element_count
        )
    }
}

/// Check a descriptor list before a pipeline is built
///
/// The list must be non-empty, contain at least one output, give every
/// buffer argument a non-zero element count, and keep output names unique.
pub fn validate_descriptors(descriptors: &[ArgumentDescriptor]) -> Result<()> {
    if descriptors.is_empty() {
        return Err(PipelineError::InvalidDescriptor(
            "kernel must take at least one argument".to_string(),
        ));
    }

    let mut outputs = HashSet::new();
    for descriptor in descriptors {
        if descriptor.is_buffer() && descriptor.element_count == 0 {
            return Err(PipelineError::InvalidDescriptor(format!(
                "`{}` has no elements",
                descriptor.name
            )));
        }
        if descriptor.checked_size_in_bytes().is_none() {
            return Err(PipelineError::InvalidDescriptor(format!(
                "`{}` with {} elements of {} overflows the address space",
                descriptor.name, descriptor.element_count, descriptor.element_type
            )));
        }
        if descriptor.role == ArgRole::Output && !outputs.insert(descriptor.name.as_str()) {
            return Err(PipelineError::InvalidDescriptor(format!(
                "duplicate output name `{}`",
                descriptor.name
            )));
        }
    }

    if outputs.is_empty() {
        return Err(PipelineError::InvalidDescriptor(
            "kernel must have at least one output".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vecsum(count: usize) -> Vec<ArgumentDescriptor> {
        vec![
            ArgumentDescriptor::output::<i32>("C", count),
            ArgumentDescriptor::input::<i32>("A", count),
            ArgumentDescriptor::input::<i32>("B", count),
            ArgumentDescriptor::scalar::<i32>("size"),
        ]
    }

    #[test]
    fn test_size_in_bytes() {
        let args = vecsum(8 * 1024);
        assert_eq!(args[0].size_in_bytes(), 32 * 1024);
        assert_eq!(args[3].size_in_bytes(), 4);
        assert!(args[1].is_buffer());
        assert!(!args[3].is_buffer());
    }

    #[test]
    fn test_display() {
        let arg = ArgumentDescriptor::input::<f64>("x", 3);
        assert_eq!(arg.to_string(), "x:input f64[3]");
    }

    #[test]
    fn test_validate_accepts_vecsum() {
        assert!(validate_descriptors(&vecsum(8)).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_descriptors(&[]).is_err());
    }

    #[test]
    fn test_validate_requires_output() {
        let args = vec![ArgumentDescriptor::input::<u8>("A", 4)];
        assert!(validate_descriptors(&args).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_length_buffer() {
        let mut args = vecsum(8);
        args[1].element_count = 0;
        assert!(validate_descriptors(&args).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_outputs() {
        let args = vec![
            ArgumentDescriptor::output::<f32>("out", 4),
            ArgumentDescriptor::output::<f32>("out", 4),
        ];
        let err = validate_descriptors(&args).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_overflowing_size() {
        let mut args = vecsum(8);
        args[1].element_count = usize::MAX / 2;
        assert_eq!(args[1].checked_size_in_bytes(), None);
        assert_eq!(args[1].size_in_bytes(), usize::MAX);

        let err = validate_descriptors(&args).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDescriptor(_)));
        assert!(err.to_string().contains("overflows"));
    }
}

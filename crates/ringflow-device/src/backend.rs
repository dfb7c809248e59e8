//! Accelerator Backend Abstraction
//!
//! The runtime boundary the pipeline is written against: device discovery,
//! program loading, buffer allocation, in-order command queues whose
//! copy/launch primitives take an explicit wait-list and hand back a
//! completion event, and completion callbacks on those events.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::{self, Element};
use crate::error::{Error, Result};

/// Device class used during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// FPGA-style accelerator card
    Accelerator,
    /// Graphics processor
    Gpu,
    /// Host processor exposed as a compute device
    Cpu,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Accelerator => write!(f, "accelerator"),
            DeviceClass::Gpu => write!(f, "GPU"),
            DeviceClass::Cpu => write!(f, "CPU"),
        }
    }
}

/// Device information reported by a backend
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Platform the device belongs to
    pub platform: String,
    /// Device class
    pub class: DeviceClass,
    /// Global memory size in bytes
    pub global_memory_bytes: usize,
    /// Software emulation rather than physical hardware
    pub emulated: bool,
}

/// Host/device access pair for an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// Host writes, kernel reads (kernel inputs)
    HostWriteDeviceRead,
    /// Kernel writes, host reads (kernel outputs)
    HostReadDeviceWrite,
    /// Unrestricted
    ReadWrite,
}

impl MemAccess {
    /// Host may copy into the buffer
    #[must_use]
    pub fn host_writable(self) -> bool {
        !matches!(self, MemAccess::HostReadDeviceWrite)
    }

    /// Host may copy out of the buffer
    #[must_use]
    pub fn host_readable(self) -> bool {
        !matches!(self, MemAccess::HostWriteDeviceRead)
    }

    /// Kernels may read the buffer
    #[must_use]
    pub fn device_readable(self) -> bool {
        !matches!(self, MemAccess::HostReadDeviceWrite)
    }

    /// Kernels may write the buffer
    #[must_use]
    pub fn device_writable(self) -> bool {
        !matches!(self, MemAccess::HostWriteDeviceRead)
    }
}

/// Execution status of an enqueued command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Enqueued, not yet picked up by the device
    Queued,
    /// Picked up, waiting on its dependencies
    Submitted,
    /// Executing
    Running,
    /// Finished successfully
    Complete,
    /// Finished with a runtime error code
    Error(i32),
}

impl EventStatus {
    /// Complete or errored
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }
}

/// Device timestamps of a command, nanoseconds on the device clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventProfile {
    /// Command enqueued by the host
    pub queued_ns: u64,
    /// Command picked up by the device
    pub submit_ns: u64,
    /// Execution started
    pub start_ns: u64,
    /// Execution finished
    pub end_ns: u64,
}

impl EventProfile {
    /// Execution time
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Callback fired once when an event reaches a terminal status
pub type EventCallback = Box<dyn FnOnce(EventStatus) + Send + 'static>;

/// Completion handle of an asynchronous command
///
/// Handles are cheap to clone and only ever used as wait tokens or to
/// observe completion.
pub trait CompletionEvent: Clone + Send + Sync + fmt::Debug + 'static {
    /// Current status
    fn status(&self) -> EventStatus;

    /// Block until the command finishes
    ///
    /// # Errors
    /// Returns [`Error::EventFailed`] if the command completed with an error.
    fn wait(&self) -> Result<()>;

    /// Register a completion callback
    ///
    /// Fires on the runtime's notification thread, or immediately on the
    /// calling thread when the event already finished.
    fn set_callback(&self, callback: EventCallback);

    /// Device timestamps, once finished on a profiling queue
    fn profile(&self) -> Option<EventProfile>;
}

/// Device memory handle
pub trait DeviceBuffer: Clone + Send + Sync + fmt::Debug + 'static {
    /// Size in bytes
    fn size(&self) -> usize;

    /// Access flags the buffer was allocated with
    fn access(&self) -> MemAccess;
}

/// Value bound to a kernel argument slot
#[derive(Debug, Clone)]
pub enum KernelArg<B> {
    /// Device buffer
    Buffer(B),
    /// Scalar passed by value, as raw bytes
    Scalar(Vec<u8>),
}

impl<B> KernelArg<B> {
    /// Scalar argument from a typed value
    pub fn scalar<T: Element>(value: T) -> Self {
        KernelArg::Scalar(bytemuck::bytes_of(&value).to_vec())
    }
}

/// Kernel entry point with positional argument binding
pub trait Kernel: Send + Sync {
    /// Buffer type accepted as argument
    type Buffer: DeviceBuffer;

    /// Entry-point name
    fn name(&self) -> &str;

    /// Number of argument positions bound so far (highest index + 1)
    fn arg_count(&self) -> usize;

    /// Bind an argument by position
    ///
    /// Bound values are captured when the kernel is enqueued, so rebinding
    /// afterwards does not affect commands already in a queue.
    fn set_arg(&mut self, index: usize, arg: KernelArg<Self::Buffer>) -> Result<()>;
}

/// In-order command queue
///
/// Commands on one queue start and complete in the order enqueued; every
/// command additionally waits for all events of its wait-list.
pub trait CommandQueue: Send + Sync {
    /// Buffer type
    type Buffer: DeviceBuffer;
    /// Event type
    type Event: CompletionEvent;
    /// Kernel type
    type Kernel: Kernel<Buffer = Self::Buffer>;

    /// Async host-to-device copy of `data` to the start of `dst`
    fn enqueue_write(
        &self,
        dst: &Self::Buffer,
        data: Vec<u8>,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Async device-to-host copy of the start of `src` into `dst`
    fn enqueue_read(
        &self,
        src: &Self::Buffer,
        dst: &HostBuffer,
        wait_for: &[Self::Event],
    ) -> Result<Self::Event>;

    /// Async single work-item launch with the kernel's currently bound arguments
    fn enqueue_kernel(&self, kernel: &Self::Kernel, wait_for: &[Self::Event])
        -> Result<Self::Event>;

    /// Block until every enqueued command finished
    fn finish(&self) -> Result<()>;

    /// Whether events carry device timestamps
    fn is_profiling(&self) -> bool;
}

/// Abstract accelerator backend
///
/// Provides device information, program loading, allocation and queue
/// creation. The emulation backend implements it in software.
pub trait AcceleratorBackend: Send + Sync + 'static {
    /// Device memory handle
    type Buffer: DeviceBuffer;
    /// Completion handle
    type Event: CompletionEvent;
    /// Kernel handle
    type Kernel: Kernel<Buffer = Self::Buffer>;
    /// Command queue
    type Queue: CommandQueue<Buffer = Self::Buffer, Event = Self::Event, Kernel = Self::Kernel>;
    /// Loaded program
    type Program: Send + Sync;

    // =========================================================================
    // Device Information
    // =========================================================================

    /// Platform name the device was found on
    fn platform_name(&self) -> &str;

    /// Device information
    fn device_info(&self) -> &DeviceInfo;

    // =========================================================================
    // Programs and Kernels
    // =========================================================================

    /// Load a program from a precompiled binary blob
    fn build_program(&self, binary: &[u8]) -> Result<Self::Program>;

    /// Look up a kernel entry point
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel>;

    // =========================================================================
    // Memory and Queues
    // =========================================================================

    /// Allocate device memory
    fn allocate(&self, bytes: usize, access: MemAccess) -> Result<Self::Buffer>;

    /// Create an in-order command queue
    fn create_queue(&self, profiling: bool) -> Result<Self::Queue>;

    /// Block until every event finished
    ///
    /// # Errors
    /// Returns the first [`Error::EventFailed`] encountered; all events are
    /// still waited on.
    fn wait_for_events(&self, events: &[Self::Event]) -> Result<()> {
        let mut first_err = None;
        for event in events {
            if let Err(e) = event.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Host memory block used as a read destination
///
/// Shared so that a device-to-host copy can fill it after the enqueueing
/// call has returned.
#[derive(Debug, Clone, Default)]
pub struct HostBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl HostBuffer {
    /// Zero-filled block of `len` bytes
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0u8; len])),
        }
    }

    /// Block length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Check if block is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the start of the block
    ///
    /// # Errors
    /// Returns an error if `src` is longer than the block.
    pub fn write_from(&self, src: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        if src.len() > data.len() {
            return Err(Error::BufferSizeMismatch {
                expected: data.len(),
                actual: src.len(),
            });
        }
        data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy of the contents
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Move the contents out, leaving the block empty
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock())
    }

    /// Decode the contents as typed values
    pub fn typed<T: Element>(&self) -> Result<Vec<T>> {
        element::from_bytes(&self.data.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_access_pairs() {
        assert!(MemAccess::HostWriteDeviceRead.host_writable());
        assert!(MemAccess::HostWriteDeviceRead.device_readable());
        assert!(!MemAccess::HostWriteDeviceRead.host_readable());
        assert!(!MemAccess::HostWriteDeviceRead.device_writable());

        assert!(MemAccess::HostReadDeviceWrite.host_readable());
        assert!(MemAccess::HostReadDeviceWrite.device_writable());
        assert!(!MemAccess::HostReadDeviceWrite.host_writable());
        assert!(!MemAccess::HostReadDeviceWrite.device_readable());
    }

    #[test]
    fn test_event_status_terminal() {
        assert!(EventStatus::Complete.is_terminal());
        assert!(EventStatus::Error(-5).is_terminal());
        assert!(!EventStatus::Running.is_terminal());
        assert!(!EventStatus::Queued.is_terminal());
    }

    #[test]
    fn test_host_buffer_write_and_take() {
        let buffer = HostBuffer::zeroed(8);
        buffer.write_from(&[1, 2, 3]).unwrap();
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 0, 0, 0, 0, 0]);

        let taken = buffer.take();
        assert_eq!(taken.len(), 8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_host_buffer_overflow() {
        let buffer = HostBuffer::zeroed(2);
        assert!(buffer.write_from(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_host_buffer_typed() {
        let buffer = HostBuffer::zeroed(8);
        buffer.write_from(&element::to_bytes(&[7i32, -7])).unwrap();
        assert_eq!(buffer.typed::<i32>().unwrap(), vec![7, -7]);
    }

    #[test]
    fn test_scalar_arg_bytes() {
        let arg: KernelArg<()> = KernelArg::scalar(0x0102_0304u32);
        match arg {
            KernelArg::Scalar(bytes) => assert_eq!(bytes, 0x0102_0304u32.to_ne_bytes()),
            KernelArg::Buffer(()) => panic!("expected scalar"),
        }
    }

    #[test]
    fn test_device_class_display() {
        assert_eq!(DeviceClass::Accelerator.to_string(), "accelerator");
        assert_eq!(DeviceClass::Gpu.to_string(), "GPU");
    }
}

//! Accelerator runtime boundary for ringflow
//!
//! This crate defines what the streaming pipeline needs from an accelerator
//! runtime and ships a software emulator implementing it:
//!
//! - **Discovery**: platform lookup by name, first device of a class
//! - **Programs**: precompiled binary in, kernel entry points out
//! - **Memory**: device buffers with host/device access flags
//! - **Queues**: in-order copy and launch commands with explicit wait-lists
//! - **Events**: status, blocking wait, completion callbacks, device timestamps
//!
//! # Example
//!
//! ```
//! use ringflow_device::{
//!     AcceleratorBackend, CommandQueue, DeviceClass, EmulatorOptions, HostBuffer,
//!     KernelRegistry, MemAccess, discover, to_bytes,
//! };
//!
//! # fn main() -> ringflow_device::Result<()> {
//! let backend = discover(
//!     "Xilinx",
//!     DeviceClass::Accelerator,
//!     true,
//!     KernelRegistry::new(),
//!     EmulatorOptions::default(),
//! )?;
//! let queue = backend.create_queue(false)?;
//! let buffer = backend.allocate(16, MemAccess::ReadWrite)?;
//!
//! let write = queue.enqueue_write(&buffer, to_bytes(&[1u32, 2, 3, 4]), &[])?;
//! let out = HostBuffer::zeroed(16);
//! let read = queue.enqueue_read(&buffer, &out, &[write])?;
//! backend.wait_for_events(&[read])?;
//!
//! assert_eq!(out.typed::<u32>()?, vec![1, 2, 3, 4]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod element;
pub mod error;

pub use backend::{
    AcceleratorBackend, CommandQueue, CompletionEvent, DeviceBuffer, DeviceClass, DeviceInfo,
    EventCallback, EventProfile, EventStatus, HostBuffer, Kernel, KernelArg, MemAccess,
};
pub use backends::{
    discover, platforms, EmulatorBackend, EmulatorBuffer, EmulatorEvent, EmulatorKernel,
    EmulatorOptions, EmulatorProgram, EmulatorQueue, KernelContext, KernelFn, KernelRegistry,
};
pub use element::{from_bytes, to_bytes, Element, ElementType};
pub use error::{Error, Result};

//! Host/device transfers over ring buffers
//!
//! Writes merge the ring's own reuse dependency with one supplied by the
//! driver; reads take their whole wait-set from the driver.

use ringflow_device::{AcceleratorBackend, CommandQueue, HostBuffer, MemAccess};
use tracing::trace;

use crate::descriptor::ArgumentDescriptor;
use crate::ring::{RingBufferSet, RingStats};
use crate::Result;

/// Ring of host-to-device input buffers
pub struct WriteBuffers<B: AcceleratorBackend> {
    ring: RingBufferSet<B>,
}

impl<B: AcceleratorBackend> WriteBuffers<B> {
    /// Allocate the ring for an input argument
    pub fn new(
        backend: &B,
        descriptor: &ArgumentDescriptor,
        degree: usize,
        profiling: bool,
    ) -> Result<Self> {
        Ok(Self {
            ring: RingBufferSet::new(
                backend,
                descriptor.name.clone(),
                degree,
                descriptor.size_in_bytes(),
                MemAccess::HostWriteDeviceRead,
                profiling,
            )?,
        })
    }

    /// Advance to the next slot
    pub fn next(&mut self) -> &B::Buffer {
        self.ring.next()
    }

    /// Slot at the cursor
    pub fn current(&self) -> Result<&B::Buffer> {
        self.ring.current()
    }

    /// Copy `data` to the start of the current slot
    ///
    /// Waits for the ring's oldest pending transfer (once the ring is full)
    /// and for `extra_dependency`. The returned event is also recorded as
    /// pending on the ring.
    pub fn write(&mut self, data: Vec<u8>, extra_dependency: Option<&B::Event>) -> Result<B::Event> {
        let mut wait_for = Vec::with_capacity(2);
        if let Some(oldest) = self.ring.pop_oldest_pending() {
            wait_for.push(oldest);
        }
        if let Some(extra) = extra_dependency {
            wait_for.push(extra.clone());
        }

        let bytes = data.len();
        let buffer = self.ring.current()?;
        let event = self.ring.queue().enqueue_write(buffer, data, &wait_for)?;
        self.ring.enqueue(event.clone())?;

        trace!(
            ring = self.ring.name(),
            slot = ?self.ring.position(),
            bytes,
            deps = wait_for.len(),
            "Write enqueued"
        );
        Ok(event)
    }

    /// Underlying ring
    pub fn ring(&self) -> &RingBufferSet<B> {
        &self.ring
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

/// Ring of device-to-host output buffers
pub struct ReadBuffers<B: AcceleratorBackend> {
    ring: RingBufferSet<B>,
}

impl<B: AcceleratorBackend> ReadBuffers<B> {
    /// Allocate the ring for an output argument
    pub fn new(
        backend: &B,
        descriptor: &ArgumentDescriptor,
        degree: usize,
        profiling: bool,
    ) -> Result<Self> {
        Ok(Self {
            ring: RingBufferSet::new(
                backend,
                descriptor.name.clone(),
                degree,
                descriptor.size_in_bytes(),
                MemAccess::HostReadDeviceWrite,
                profiling,
            )?,
        })
    }

    /// Advance to the next slot
    pub fn next(&mut self) -> &B::Buffer {
        self.ring.next()
    }

    /// Slot at the cursor
    pub fn current(&self) -> Result<&B::Buffer> {
        self.ring.current()
    }

    /// Oldest pending read, once the ring is full
    pub fn pop_oldest_pending(&mut self) -> Option<B::Event> {
        self.ring.pop_oldest_pending()
    }

    /// Copy the current slot into `dest` after `wait_for`
    pub fn read(&mut self, dest: &HostBuffer, wait_for: &[B::Event]) -> Result<B::Event> {
        let buffer = self.ring.current()?;
        let event = self.ring.queue().enqueue_read(buffer, dest, wait_for)?;
        self.ring.enqueue(event.clone())?;

        trace!(
            ring = self.ring.name(),
            slot = ?self.ring.position(),
            bytes = dest.len(),
            "Read enqueued"
        );
        Ok(event)
    }

    /// Underlying ring
    pub fn ring(&self) -> &RingBufferSet<B> {
        &self.ring
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }
}

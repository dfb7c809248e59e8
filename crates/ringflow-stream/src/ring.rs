//! Ring-buffered device memory
//!
//! Each buffer argument gets `degree` device buffers used round-robin, plus
//! a FIFO of the completion events of the last `degree` transfers touching
//! them. A slot may only be reused once the oldest of those events is
//! known, which [`PendingEvents::pop_oldest_if_full`] hands out.
//!
//! Entry `k` from the back always belongs to the slot used `k` advances
//! ago. An advance that recorded no transfer (its item failed first) keeps
//! the slot's previous guard in its place so later items stay aligned.

use std::collections::VecDeque;

use ringflow_device::{AcceleratorBackend, CommandQueue, CompletionEvent, EventStatus, MemAccess};
use tracing::debug;

use crate::{PipelineError, Result};

/// FIFO of at most `capacity` pending events
///
/// An entry may be empty when its slot has nothing left to wait for.
#[derive(Debug)]
pub struct PendingEvents<E> {
    capacity: usize,
    events: VecDeque<Option<E>>,
    high_water: usize,
}

impl<E> PendingEvents<E> {
    /// Create an empty FIFO
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            high_water: 0,
        }
    }

    /// Remove the oldest event, but only when the FIFO is full
    pub fn pop_oldest_if_full(&mut self) -> Option<E> {
        if self.events.len() >= self.capacity {
            self.events.pop_front().flatten()
        } else {
            None
        }
    }

    /// Append an event, handing it back if the FIFO is already full
    pub fn push(&mut self, event: E) -> std::result::Result<(), E> {
        if self.events.len() >= self.capacity {
            return Err(event);
        }
        self.append(Some(event));
        Ok(())
    }

    /// Fill the entry of an advance that recorded nothing
    ///
    /// `guard` is whatever still protects that slot. When the FIFO is full
    /// its oldest entry is rotated to the back instead, since that entry
    /// belongs to the same slot.
    pub fn hold(&mut self, guard: Option<E>) {
        let guard = if self.events.len() >= self.capacity {
            self.events.pop_front().flatten().or(guard)
        } else {
            guard
        };
        self.append(guard);
    }

    fn append(&mut self, entry: Option<E>) {
        self.events.push_back(entry);
        self.high_water = self.high_water.max(self.events.len());
    }

    /// Current length
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum length
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest length observed
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

/// Whether a popped event still has to be waited on
pub(crate) fn still_guarding<E: CompletionEvent>(event: &E) -> bool {
    !matches!(event.status(), EventStatus::Error(_))
}

/// Snapshot of one ring's occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingStats {
    /// Argument name
    pub name: String,
    /// Buffers in the ring
    pub degree: usize,
    /// Pending events now
    pub pending: usize,
    /// Most pending events ever held
    pub high_water: usize,
}

/// Ring of device buffers for one kernel argument
///
/// Owns its own in-order command queue. Nothing here touches the device
/// after construction except through that queue.
pub struct RingBufferSet<B: AcceleratorBackend> {
    name: String,
    buffers: Vec<B::Buffer>,
    position: Option<usize>,
    pending: PendingEvents<B::Event>,
    /// Guard popped for the current slot, until a transfer is recorded
    popped: Option<B::Event>,
    recorded: bool,
    queue: B::Queue,
}

impl<B: AcceleratorBackend> RingBufferSet<B> {
    /// Allocate `degree` buffers of `bytes` each and a queue
    pub fn new(
        backend: &B,
        name: impl Into<String>,
        degree: usize,
        bytes: usize,
        access: MemAccess,
        profiling: bool,
    ) -> Result<Self> {
        let name = name.into();
        if degree == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "ring `{}` needs at least one buffer",
                name
            )));
        }

        let buffers = (0..degree)
            .map(|_| backend.allocate(bytes, access))
            .collect::<ringflow_device::Result<Vec<_>>>()?;
        let queue = backend.create_queue(profiling)?;

        debug!(ring = %name, degree, bytes, ?access, "Allocated ring buffers");

        Ok(Self {
            name,
            buffers,
            position: None,
            pending: PendingEvents::new(degree),
            popped: None,
            recorded: true,
            queue,
        })
    }

    /// Argument name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of buffers
    pub fn degree(&self) -> usize {
        self.buffers.len()
    }

    /// Cursor position, `None` before the first [`next`](Self::next)
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Advance the cursor and return the buffer at the new position
    ///
    /// If the previous slot never recorded a transfer, its guard is kept
    /// pending first.
    pub fn next(&mut self) -> &B::Buffer {
        if !self.recorded {
            debug!(ring = %self.name, slot = ?self.position, "Slot skipped; keeping its guard");
            self.pending.hold(self.popped.take());
        }
        self.recorded = false;
        let position = self.position.map_or(0, |p| (p + 1) % self.buffers.len());
        self.position = Some(position);
        &self.buffers[position]
    }

    /// Buffer at the cursor
    pub fn current(&self) -> Result<&B::Buffer> {
        self.position
            .map(|p| &self.buffers[p])
            .ok_or_else(|| PipelineError::RingNotAdvanced(self.name.clone()))
    }

    /// Oldest pending event, once `degree` are pending
    ///
    /// An event that already failed is dropped instead of returned, so a
    /// failed item does not fail the items reusing its slot.
    pub fn pop_oldest_pending(&mut self) -> Option<B::Event> {
        let oldest = self.pending.pop_oldest_if_full().filter(still_guarding);
        self.popped = oldest.clone();
        oldest
    }

    /// Record the completion event of a transfer on the current slot
    pub fn enqueue(&mut self, event: B::Event) -> Result<()> {
        self.pending
            .push(event)
            .map_err(|_| PipelineError::RingOverflow {
                name: self.name.clone(),
                degree: self.pending.capacity(),
            })?;
        self.popped = None;
        self.recorded = true;
        Ok(())
    }

    /// Pending events now
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Most pending events ever held
    pub fn high_water(&self) -> usize {
        self.pending.high_water()
    }

    /// The ring's command queue
    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    /// Block until the ring's queue drains
    pub fn finish(&self) -> Result<()> {
        Ok(self.queue.finish()?)
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> RingStats {
        RingStats {
            name: self.name.clone(),
            degree: self.degree(),
            pending: self.pending_len(),
            high_water: self.high_water(),
        }
    }
}

//! Asynchronous pipeline driver
//!
//! Keeps up to `degree` items in flight. `process` only enqueues device
//! work; completion callbacks on the read events feed a bounded channel
//! drained by a reconciliation thread, which emits items strictly in
//! submission order however their transfers complete.
//!
//! # Dependencies per item
//!
//! ```text
//!  write A ─┐
//!  write B ─┼─▶ kernel ─▶ read C ─▶ callback ─▶ channel ─▶ reconciler ─▶ emit/ack
//!  read C' ─┘                                                 (in order)
//! ```
//!
//! Input writes wait for the oldest kernel launch still using their slot;
//! the kernel waits for the oldest read still draining its output slot.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use ringflow_device::{AcceleratorBackend, CompletionEvent, EventStatus};
use tracing::{debug, error, info, trace, warn};

use crate::config::PipelineConfig;
use crate::descriptor::ArgumentDescriptor;
use crate::host::{deliver, KernelAdapter, KernelInput, ResultSet, StreamHost};
use crate::profiling::ProfilingLedger;
use crate::record::Item;
use crate::ring::{still_guarding, PendingEvents, RingStats};
use crate::stage::DeviceStage;
use crate::stats::{PipelineStats, SharedStats};
use crate::window::{CloseOnDrop, InFlightWindow};
use crate::{PipelineError, Result};

type SharedLedger<E> = Arc<Mutex<ProfilingLedger<E>>>;

/// Message to the reconciliation thread
enum Notice<E> {
    /// An item entered the pipeline; always precedes its fragments
    Submitted {
        seq: u64,
        item: Item,
        outputs: usize,
        at: Instant,
    },
    /// One output of an item finished transferring
    Fragment {
        seq: u64,
        output: usize,
        data: std::result::Result<Vec<u8>, String>,
        event: Option<E>,
    },
    /// Submission stopped early; only `outstanding` fragments will follow
    Aborted {
        seq: u64,
        reason: String,
        outstanding: usize,
    },
}

struct InFlightItem<E> {
    seq: u64,
    item: Item,
    slots: Vec<Option<Vec<u8>>>,
    remaining: usize,
    completed_by: Option<E>,
    failure: Option<String>,
    submitted_at: Instant,
}

struct Reconciler<E> {
    receiver: Receiver<Notice<E>>,
    items: VecDeque<InFlightItem<E>>,
    outputs: Vec<ArgumentDescriptor>,
    adapter: Arc<dyn KernelAdapter>,
    host: Arc<dyn StreamHost>,
    window: Arc<InFlightWindow>,
    ledger: Option<SharedLedger<E>>,
    stats: SharedStats,
}

impl<E: CompletionEvent> Reconciler<E> {
    fn run(mut self) {
        let window = Arc::clone(&self.window);
        let _close = CloseOnDrop(&window);

        while let Ok(notice) = self.receiver.recv() {
            self.apply(notice);
            self.emit_ready();
        }

        if !self.items.is_empty() {
            warn!(
                pending = self.items.len(),
                "Reconciler stopped with items in flight"
            );
        }
        trace!("Reconciler exiting");
    }

    fn lookup(&mut self, seq: u64) -> Option<&mut InFlightItem<E>> {
        let front = self.items.front()?.seq;
        let offset = usize::try_from(seq.checked_sub(front)?).ok()?;
        self.items.get_mut(offset).filter(|entry| entry.seq == seq)
    }

    fn apply(&mut self, notice: Notice<E>) {
        match notice {
            Notice::Submitted {
                seq,
                item,
                outputs,
                at,
            } => {
                self.items.push_back(InFlightItem {
                    seq,
                    item,
                    slots: vec![None; outputs],
                    remaining: outputs,
                    completed_by: None,
                    failure: None,
                    submitted_at: at,
                });
            }
            Notice::Fragment {
                seq,
                output,
                data,
                event,
            } => {
                let Some(entry) = self.lookup(seq) else {
                    warn!(seq, output, "Fragment for unknown item");
                    return;
                };
                if entry.remaining == 0 || output >= entry.slots.len() {
                    warn!(seq, output, "Unexpected fragment");
                    return;
                }
                match data {
                    Ok(bytes) => entry.slots[output] = Some(bytes),
                    Err(reason) => {
                        entry.failure.get_or_insert(reason);
                    }
                }
                entry.remaining -= 1;
                if entry.remaining == 0 {
                    entry.completed_by = event;
                }
                trace!(seq, output, remaining = entry.remaining, "Fragment received");
            }
            Notice::Aborted {
                seq,
                reason,
                outstanding,
            } => {
                let Some(entry) = self.lookup(seq) else {
                    warn!(seq, "Abort for unknown item");
                    return;
                };
                // Fragments of registered reads may already have arrived.
                let never_registered = entry.slots.len().saturating_sub(outstanding);
                entry.failure.get_or_insert(reason);
                entry.remaining = entry.remaining.saturating_sub(never_registered);
            }
        }
    }

    fn emit_ready(&mut self) {
        while self.items.front().is_some_and(|entry| entry.remaining == 0) {
            if let Some(entry) = self.items.pop_front() {
                self.retire(entry);
            }
        }
    }

    fn retire(&mut self, entry: InFlightItem<E>) {
        if let Some(ledger) = &self.ledger {
            let mut ledger = ledger.lock();
            match (&entry.completed_by, &entry.failure) {
                (Some(event), None) => ledger.end(entry.seq, event),
                _ => ledger.discard(entry.seq),
            }
        }

        let results = match entry.failure {
            Some(reason) => Err(PipelineError::Transfer(reason)),
            None => ResultSet::assemble(&self.outputs, entry.slots),
        };
        let bytes = results.as_ref().map_or(0, ResultSet::total_bytes);

        if deliver(self.host.as_ref(), self.adapter.as_ref(), &entry.item, results) {
            self.stats.record_emitted();
        } else {
            self.stats.record_failed();
        }
        self.stats
            .complete
            .record(bytes, entry.submitted_at.elapsed());
        debug!(seq = entry.seq, item = %entry.item.id, "Item retired");

        self.window.release();
    }
}

/// Pipelined driver with in-order emission
pub struct AsyncPipeline<B: AcceleratorBackend> {
    stage: DeviceStage<B>,
    kernel_events: PendingEvents<B::Event>,
    adapter: Arc<dyn KernelAdapter>,
    host: Arc<dyn StreamHost>,
    window: Arc<InFlightWindow>,
    sender: Option<Sender<Notice<B::Event>>>,
    reconciler: Option<JoinHandle<()>>,
    ledger: Option<SharedLedger<B::Event>>,
    config: PipelineConfig,
    stats: SharedStats,
    next_seq: u64,
}

impl<B: AcceleratorBackend> AsyncPipeline<B> {
    /// Build the driver on `backend` and start its reconciliation thread
    pub fn new(
        backend: B,
        config: PipelineConfig,
        descriptors: Vec<ArgumentDescriptor>,
        adapter: Arc<dyn KernelAdapter>,
        host: Arc<dyn StreamHost>,
    ) -> Result<Self> {
        config.validate()?;
        let degree = config.degree;

        let stage = DeviceStage::open(backend, &config, descriptors, degree)?;
        let outputs = stage.output_descriptors();
        let (sender, receiver) = bounded(degree * (outputs.len() + 1));
        let window = Arc::new(InFlightWindow::new(degree));
        let ledger = config
            .profiling
            .then(|| Arc::new(Mutex::new(ProfilingLedger::new())));
        let stats = Arc::new(PipelineStats::new());

        let reconciler = Reconciler {
            receiver,
            items: VecDeque::with_capacity(degree),
            outputs,
            adapter: Arc::clone(&adapter),
            host: Arc::clone(&host),
            window: Arc::clone(&window),
            ledger: ledger.clone(),
            stats: Arc::clone(&stats),
        };
        let handle = thread::Builder::new()
            .name("ringflow-reconciler".to_string())
            .spawn(move || reconciler.run())?;

        info!(degree, "Asynchronous pipeline started");

        Ok(Self {
            stage,
            kernel_events: PendingEvents::new(degree),
            adapter,
            host,
            window,
            sender: Some(sender),
            reconciler: Some(handle),
            ledger,
            config,
            stats,
            next_seq: 0,
        })
    }

    /// Submit one item
    ///
    /// Returns once the item's device work is enqueued. Blocks only while
    /// `degree` items are already in flight. Failures surface later as a
    /// `fail` for this item, in order.
    pub fn process(&mut self, item: Item) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let Some(sender) = self.sender.clone() else {
            self.reject(&item, "pipeline is shut down");
            return;
        };
        if let Err(e) = self.window.acquire() {
            self.reject(&item, &e.to_string());
            return;
        }
        self.stats.record_submitted();

        let started = Instant::now();
        let registered = sender.send(Notice::Submitted {
            seq,
            item: item.clone(),
            outputs: self.stage.output_count(),
            at: started,
        });
        if registered.is_err() {
            self.window.release();
            self.stats.record_failed();
            self.reject(&item, "reconciler is gone");
            return;
        }

        let mut outstanding = 0;
        if let Err(e) = self.submit(seq, &item, &sender, &mut outstanding) {
            warn!(seq, item = %item.id, error = %e, "Submission failed");
            let aborted = sender.send(Notice::Aborted {
                seq,
                reason: e.to_string(),
                outstanding,
            });
            if aborted.is_err() {
                error!(seq, "Reconciler is gone; item left unresolved");
            }
        }
        self.stats.submit.record(0, started.elapsed());
    }

    fn reject(&self, item: &Item, reason: &str) {
        error!(item = %item.id, reason, "Item rejected");
        self.host
            .report_error(&format!("item {}: {}", item.id, reason));
        self.host.fail(item);
    }

    fn submit(
        &mut self,
        seq: u64,
        item: &Item,
        sender: &Sender<Notice<B::Event>>,
        outstanding: &mut usize,
    ) -> Result<()> {
        let inputs = self.adapter.prepare_compute(item)?;
        self.stage.check_inputs(&inputs)?;

        // Every ring advances from here on; the kernel ring keeps one entry
        // per advance too.
        let oldest_kernel = self
            .kernel_events
            .pop_oldest_if_full()
            .filter(still_guarding);
        let kernel_event = match self.bind_and_launch(seq, inputs, oldest_kernel.as_ref()) {
            Ok(event) => event,
            Err(e) => {
                self.kernel_events.hold(oldest_kernel);
                return Err(e);
            }
        };
        self.kernel_events
            .push(kernel_event.clone())
            .map_err(|_| PipelineError::RingOverflow {
                name: self.config.kernel_name.clone(),
                degree: self.kernel_events.capacity(),
            })?;

        for output in 0..self.stage.output_count() {
            let (dest, event) = self.stage.read_output(output, &kernel_event)?;
            let tx = sender.clone();
            let completing = self.ledger.is_some().then(|| event.clone());
            event.set_callback(Box::new(move |status| {
                let data = match status {
                    EventStatus::Complete => Ok(dest.take()),
                    EventStatus::Error(code) => {
                        Err(format!("read of output {} failed with status {}", output, code))
                    }
                    other => Err(format!("read of output {} ended as {:?}", output, other)),
                };
                // A closed channel means the pipeline is being torn down.
                let _ = tx.send(Notice::Fragment {
                    seq,
                    output,
                    data,
                    event: completing,
                });
            }));
            *outstanding += 1;
        }

        trace!(seq, item = %item.id, "Item submitted");
        Ok(())
    }

    fn bind_and_launch(
        &mut self,
        seq: u64,
        inputs: Vec<KernelInput>,
        oldest_kernel: Option<&B::Event>,
    ) -> Result<B::Event> {
        let bound = self.stage.bind(inputs, oldest_kernel)?;
        let wait_for = bound.kernel_wait_set();

        if let Some(ledger) = &self.ledger {
            ledger.lock().start(seq, wait_for.clone());
        }
        let kernel_event = self.stage.launch(&wait_for)?;
        trace!(seq, deps = wait_for.len(), "Kernel enqueued");
        Ok(kernel_event)
    }

    /// Drain the device queues and wait until every item is emitted or failed
    ///
    /// Dumps profiling records when a ledger path is configured.
    pub fn finish(&mut self) -> Result<()> {
        self.stage.finish()?;
        self.window.wait_idle()?;
        if let Some(path) = self.config.profile_path.clone() {
            self.dump_profiling(&path)?;
        }
        Ok(())
    }

    /// Append completed profiling records to `path`
    pub fn dump_profiling(&self, path: &Path) -> Result<usize> {
        match &self.ledger {
            Some(ledger) => ledger.lock().dump_to_file(path),
            None => Ok(0),
        }
    }

    /// Items submitted but not yet emitted or failed
    pub fn in_flight(&self) -> usize {
        self.window.in_flight()
    }

    /// Shared statistics handle
    pub fn stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    /// Occupancy of every argument ring
    pub fn ring_stats(&self) -> Vec<RingStats> {
        self.stage.ring_stats()
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<B: AcceleratorBackend> Drop for AsyncPipeline<B> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "Asynchronous pipeline did not drain cleanly");
        }
        self.sender.take();
        if let Some(handle) = self.reconciler.take() {
            if handle.join().is_err() {
                error!("Reconciliation thread panicked");
            }
        }
    }
}

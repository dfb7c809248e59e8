//! Synchronous pipeline driver
//!
//! One item at a time: write inputs, launch, read outputs, block on the
//! reads, emit. Rings have a single buffer. Useful as a baseline and for
//! kernels whose results are needed before the next item is accepted.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ringflow_device::{AcceleratorBackend, CompletionEvent};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::descriptor::ArgumentDescriptor;
use crate::host::{deliver, KernelAdapter, ResultSet, StreamHost};
use crate::profiling::ProfilingLedger;
use crate::record::Item;
use crate::ring::RingStats;
use crate::stage::DeviceStage;
use crate::stats::{PipelineStats, SharedStats};
use crate::Result;

/// Fully serialized driver
pub struct SyncPipeline<B: AcceleratorBackend> {
    stage: DeviceStage<B>,
    outputs: Vec<ArgumentDescriptor>,
    adapter: Arc<dyn KernelAdapter>,
    host: Arc<dyn StreamHost>,
    ledger: Option<ProfilingLedger<B::Event>>,
    config: PipelineConfig,
    stats: SharedStats,
    next_seq: u64,
}

impl<B: AcceleratorBackend> SyncPipeline<B> {
    /// Build the driver on `backend`
    ///
    /// `config.degree` is ignored; every ring holds one buffer.
    pub fn new(
        backend: B,
        config: PipelineConfig,
        descriptors: Vec<ArgumentDescriptor>,
        adapter: Arc<dyn KernelAdapter>,
        host: Arc<dyn StreamHost>,
    ) -> Result<Self> {
        config.validate()?;
        if config.degree != 1 {
            debug!(degree = config.degree, "Synchronous driver runs with degree 1");
        }

        let stage = DeviceStage::open(backend, &config, descriptors, 1)?;
        let outputs = stage.output_descriptors();
        let ledger = config.profiling.then(ProfilingLedger::new);

        Ok(Self {
            stage,
            outputs,
            adapter,
            host,
            ledger,
            config,
            stats: Arc::new(PipelineStats::new()),
            next_seq: 0,
        })
    }

    /// Run one item to completion and deliver it to the host
    ///
    /// Item-level failures end in `fail`; nothing is returned to the caller.
    pub fn process(&mut self, item: Item) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.record_submitted();

        let started = Instant::now();
        let results = self.run(seq, &item, started);
        let bytes = results.as_ref().map_or(0, ResultSet::total_bytes);

        if deliver(self.host.as_ref(), self.adapter.as_ref(), &item, results) {
            self.stats.record_emitted();
        } else {
            self.stats.record_failed();
        }
        self.stats.complete.record(bytes, started.elapsed());
    }

    fn run(&mut self, seq: u64, item: &Item, started: Instant) -> Result<ResultSet> {
        let inputs = self.adapter.prepare_compute(item)?;
        self.stage.check_inputs(&inputs)?;
        let bound = self.stage.bind(inputs, None)?;
        let kernel_event = self.stage.launch(&bound.kernel_wait_set())?;

        let mut blocks = Vec::with_capacity(self.outputs.len());
        let mut reads = Vec::with_capacity(self.outputs.len());
        for output in 0..self.stage.output_count() {
            let (dest, event) = self.stage.read_output(output, &kernel_event)?;
            blocks.push(dest);
            reads.push(event);
        }
        self.stats.submit.record(0, started.elapsed());

        self.stage.backend().wait_for_events(&reads)?;
        debug!(seq, item = %item.id, "Item reads complete");

        if let Some(ledger) = self.ledger.as_mut() {
            let starts = if bound.writes.is_empty() {
                vec![kernel_event]
            } else {
                bound.writes
            };
            ledger.start(seq, starts);
            if let Some(end) = latest_finishing(&reads) {
                ledger.end(seq, end);
            }
        }

        ResultSet::assemble(
            &self.outputs,
            blocks.into_iter().map(|block| Some(block.take())).collect(),
        )
    }

    /// Drain the device queues and dump profiling records
    pub fn finish(&mut self) -> Result<()> {
        self.stage.finish()?;
        if let Some(path) = self.config.profile_path.clone() {
            self.dump_profiling(&path)?;
        }
        Ok(())
    }

    /// Append completed profiling records to `path`
    pub fn dump_profiling(&mut self, path: &Path) -> Result<usize> {
        match self.ledger.as_mut() {
            Some(ledger) => ledger.dump_to_file(path),
            None => Ok(0),
        }
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

impl<B: AcceleratorBackend> Drop for SyncPipeline<B> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "Synchronous pipeline did not finish cleanly");
        }
    }
}

/// Event with the latest device end timestamp
fn latest_finishing<E: CompletionEvent>(events: &[E]) -> Option<&E> {
    events
        .iter()
        .filter_map(|event| event.profile().map(|p| (p.end_ns, event)))
        .max_by_key(|(end_ns, _)| *end_ns)
        .map(|(_, event)| event)
}

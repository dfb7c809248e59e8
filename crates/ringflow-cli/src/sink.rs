//! Checking sink for the vector-sum demo

use std::time::Instant;

use parking_lot::Mutex;
use ringflow_stream::{Field, Item, OutputRecord, PipelineError, StreamHost};
use tracing::{debug, error};

use crate::metric::Metric;

#[derive(Debug, Default)]
struct Tally {
    checked: u64,
    wrong: u64,
    acked: u64,
    failed: u64,
}

/// Final counts of a [`CheckSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: u64,
    pub wrong: u64,
    pub acked: u64,
    pub failed: u64,
}

/// Verifies `C[i] == 1` for every element after the first and samples
/// source-to-sink latency in milliseconds
pub struct CheckSink {
    epoch: Instant,
    latency: Mutex<Metric>,
    tally: Mutex<Tally>,
}

impl CheckSink {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            latency: Mutex::new(Metric::new("latency")),
            tally: Mutex::new(Tally::default()),
        }
    }

    pub fn summary(&self) -> CheckSummary {
        let tally = self.tally.lock();
        CheckSummary {
            checked: tally.checked,
            wrong: tally.wrong,
            acked: tally.acked,
            failed: tally.failed,
        }
    }

    /// Latency samples so far, with the checked count as total
    pub fn latency(&self) -> Metric {
        let mut metric = self.latency.lock().clone();
        metric.set_total(self.tally.lock().checked);
        metric
    }
}

fn is_correct(values: &[i64]) -> bool {
    values.iter().skip(1).all(|&v| v == 1)
}

impl StreamHost for CheckSink {
    fn emit(&self, record: OutputRecord) -> Result<(), PipelineError> {
        let values = record
            .fields
            .first()
            .and_then(Field::as_int_list)
            .ok_or_else(|| PipelineError::Emit(format!("{}: result is not an int list", record.anchor)))?;
        let timestamp = record
            .fields
            .get(1)
            .and_then(Field::as_int)
            .ok_or_else(|| PipelineError::Emit(format!("{}: missing timestamp", record.anchor)))?;

        let correct = is_correct(values);
        if !correct {
            error!(item = %record.anchor, counter = ?values.first(), "Wrong vector sum");
        }

        let now = self.epoch.elapsed().as_nanos() as i64;
        let latency_ms = (now - timestamp) as f64 / 1_000_000.0;
        self.latency.lock().add(latency_ms);

        let mut tally = self.tally.lock();
        tally.checked += 1;
        if !correct {
            tally.wrong += 1;
        }
        debug!(item = %record.anchor, latency_ms, "Result checked");
        Ok(())
    }

    fn ack(&self, _item: &Item) {
        self.tally.lock().acked += 1;
    }

    fn fail(&self, _item: &Item) {
        self.tally.lock().failed += 1;
    }

    fn report_error(&self, message: &str) {
        error!("{}", message);
    }
}

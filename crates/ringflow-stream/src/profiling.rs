//! Per-item device profiling ledger
//!
//! Each item opens a record with the events that gate its execution and
//! closes it with the event that completed it. Closed records are resolved
//! to device timestamps right away and appended to a tab-separated file on
//! [`ProfilingLedger::dump_to_file`]:
//!
//! ```text
//! name<TAB>start_ms<TAB>stop_ms<TAB>duration_ms
//! ```

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use ringflow_device::{CompletionEvent, EventProfile};
use tracing::{debug, warn};

use crate::Result;

const NS_PER_MS: f64 = 1e6;

/// Resolved timing of one item, device clock nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSpan {
    /// Item sequence number
    pub seq: u64,
    /// Earliest start among the start events
    pub start_ns: u64,
    /// End of the completing event
    pub stop_ns: u64,
    /// Longest start-to-stop interval over the start events
    pub duration_ns: u64,
}

impl ProfileSpan {
    /// Resolve a span from start profiles and the end profile
    ///
    /// Without start profiles the end event is its own start.
    pub fn resolve(seq: u64, starts: &[EventProfile], end: &EventProfile) -> Self {
        let start_ns = starts
            .iter()
            .map(|p| p.start_ns)
            .min()
            .unwrap_or(end.start_ns);
        let duration_ns = starts
            .iter()
            .map(|p| end.end_ns.saturating_sub(p.start_ns))
            .max()
            .unwrap_or_else(|| end.duration_ns());

        Self {
            seq,
            start_ns,
            stop_ns: end.end_ns,
            duration_ns,
        }
    }

    /// Ledger line, milliseconds with 8 decimals
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{:.8}\t{:.8}\t{:.8}\n",
            self.seq,
            self.start_ns as f64 / NS_PER_MS,
            self.stop_ns as f64 / NS_PER_MS,
            self.duration_ns as f64 / NS_PER_MS
        )
    }
}

/// Open and completed profiling records
#[derive(Debug)]
pub struct ProfilingLedger<E> {
    open: HashMap<u64, Vec<E>>,
    completed: Vec<ProfileSpan>,
}

impl<E> Default for ProfilingLedger<E> {
    fn default() -> Self {
        Self {
            open: HashMap::new(),
            completed: Vec::new(),
        }
    }
}

impl<E: CompletionEvent> ProfilingLedger<E> {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the record of item `seq`
    pub fn start(&mut self, seq: u64, events: Vec<E>) {
        self.open.insert(seq, events);
    }

    /// Close the record of item `seq` with its completing event
    ///
    /// Unknown sequence numbers are ignored. Records whose events carry no
    /// device timestamps are dropped.
    pub fn end(&mut self, seq: u64, event: &E) {
        let Some(starts) = self.open.remove(&seq) else {
            debug!(seq, "No open profiling record");
            return;
        };

        let start_profiles: Option<Vec<EventProfile>> =
            starts.iter().map(CompletionEvent::profile).collect();
        match (start_profiles, event.profile()) {
            (Some(starts), Some(end)) => self.completed.push(ProfileSpan::resolve(seq, &starts, &end)),
            _ => warn!(seq, "Dropping profiling record without device timestamps"),
        }
    }

    /// Forget the open record of item `seq`
    pub fn discard(&mut self, seq: u64) {
        self.open.remove(&seq);
    }

    /// Completed records not yet dumped
    pub fn completed(&self) -> &[ProfileSpan] {
        &self.completed
    }

    /// Number of open records
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Append completed records to `path`, then clear them
    ///
    /// Returns the number of lines written.
    pub fn dump_to_file(&mut self, path: &Path) -> Result<usize> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for span in &self.completed {
            writer.write_all(span.to_line().as_bytes())?;
        }
        writer.flush()?;

        let written = self.completed.len();
        self.completed.clear();
        debug!(path = %path.display(), written, "Profiling records dumped");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringflow_device::{
        AcceleratorBackend, CommandQueue, EmulatorBackend, EmulatorEvent, KernelRegistry,
        MemAccess,
    };

    fn profile(start_ns: u64, end_ns: u64) -> EventProfile {
        EventProfile {
            queued_ns: 0,
            submit_ns: 0,
            start_ns,
            end_ns,
        }
    }

    fn events(backend: &EmulatorBackend, profiling: bool, n: usize) -> Vec<EmulatorEvent> {
        let queue = backend.create_queue(profiling).unwrap();
        let buffer = backend.allocate(4, MemAccess::ReadWrite).unwrap();
        let events: Vec<_> = (0..n)
            .map(|_| queue.enqueue_write(&buffer, vec![0; 4], &[]).unwrap())
            .collect();
        queue.finish().unwrap();
        events
    }

    #[test]
    fn test_span_resolution() {
        let span = ProfileSpan::resolve(
            3,
            &[profile(2_000_000, 3_000_000), profile(1_000_000, 4_000_000)],
            &profile(5_000_000, 6_000_000),
        );
        assert_eq!(span.start_ns, 1_000_000);
        assert_eq!(span.stop_ns, 6_000_000);
        assert_eq!(span.duration_ns, 5_000_000);
        assert_eq!(span.to_line(), "3\t1.00000000\t6.00000000\t5.00000000\n");
    }

    #[test]
    fn test_span_without_starts() {
        let span = ProfileSpan::resolve(0, &[], &profile(10, 30));
        assert_eq!(span.start_ns, 10);
        assert_eq!(span.duration_ns, 20);
    }

    #[test]
    fn test_ledger_round() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let evs = events(&backend, true, 3);

        let mut ledger = ProfilingLedger::new();
        ledger.start(0, evs[..2].to_vec());
        assert_eq!(ledger.open_count(), 1);
        ledger.end(0, &evs[2]);
        ledger.end(9, &evs[2]);

        assert_eq!(ledger.open_count(), 0);
        assert_eq!(ledger.completed().len(), 1);
        let span = ledger.completed()[0];
        assert!(span.start_ns <= span.stop_ns);
    }

    #[test]
    fn test_ledger_drops_unprofiled() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let evs = events(&backend, false, 2);

        let mut ledger = ProfilingLedger::new();
        ledger.start(0, vec![evs[0].clone()]);
        ledger.end(0, &evs[1]);
        assert!(ledger.completed().is_empty());
    }

    #[test]
    fn test_ledger_discard() {
        let mut ledger: ProfilingLedger<EmulatorEvent> = ProfilingLedger::new();
        ledger.start(1, Vec::new());
        ledger.discard(1);
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_dump_appends_and_clears() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let evs = events(&backend, true, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.tsv");

        let mut ledger = ProfilingLedger::new();
        for round in 0..2 {
            ledger.start(round, vec![evs[0].clone()]);
            ledger.end(round, &evs[1]);
            assert_eq!(ledger.dump_to_file(&path).unwrap(), 1);
            assert!(ledger.completed().is_empty());
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0\t"));
        assert!(lines[1].starts_with("1\t"));
        assert_eq!(lines[0].split('\t').count(), 4);
    }
}

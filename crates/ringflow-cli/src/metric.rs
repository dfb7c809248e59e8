//! Latency samples dumped as JSON summaries

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Samples averaged for `mean_last_2000`
const RECENT_WINDOW: usize = 2000;

/// Named series of samples
#[derive(Debug, Clone, Default)]
pub struct Metric {
    name: String,
    samples: Vec<f64>,
    total: u64,
}

/// Summary written to `metric_<name>.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub name: String,
    pub samples: usize,
    pub total: u64,
    pub mean: f64,
    pub mean_last_2000: f64,
    pub min: f64,
    pub max: f64,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Record one sample
    pub fn add(&mut self, value: f64) {
        self.samples.push(value);
    }

    /// Set the count of events the samples were taken from
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn report(&self) -> MetricReport {
        let recent = &self.samples[self.samples.len().saturating_sub(RECENT_WINDOW)..];
        MetricReport {
            name: self.name.clone(),
            samples: self.samples.len(),
            total: self.total,
            mean: mean(&self.samples),
            mean_last_2000: mean(recent),
            min: self.samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// File name used by [`dump`](Self::dump)
    pub fn file_name(&self) -> String {
        format!("metric_{}.json", self.name)
    }

    /// Write the summary into `dir`, returning the file path
    pub fn dump(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.report())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

//! Shared fixtures: emulated `vadd` and `vaddsub` kernels, their adapters
//! and a recording host

#![allow(dead_code)]

pub mod faulty;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ringflow_device::{EmulatorBackend, EmulatorOptions, Error as DeviceError, KernelRegistry};
use ringflow_stream::{
    ArgumentDescriptor, Field, Item, ItemId, KernelAdapter, KernelInput, OutputRecord,
    PipelineConfig, PipelineError, ResultSet, StreamHost,
};

pub const MAX_SIZE: usize = 64;

/// `C[i] = A[i] + B[i]` for `i < size`; `size` below zero fails the launch
pub fn kernels() -> KernelRegistry {
    KernelRegistry::new().with_kernel("vadd", |ctx| {
        let size = ctx.scalar::<i32>(3)?;
        let size = usize::try_from(size)
            .map_err(|_| DeviceError::Kernel(format!("negative size {}", size)))?;
        let a = ctx.read::<i32>(1)?;
        let b = ctx.read::<i32>(2)?;
        let c: Vec<i32> = a.iter().zip(&b).take(size).map(|(x, y)| x + y).collect();
        ctx.write(0, &c)
    })
    .with_kernel("vaddsub", |ctx| {
        let size = ctx.scalar::<i32>(4)?;
        let size = usize::try_from(size)
            .map_err(|_| DeviceError::Kernel(format!("negative size {}", size)))?;
        let a = ctx.read::<i32>(2)?;
        let b = ctx.read::<i32>(3)?;
        let pairs = a.iter().zip(&b).take(size);
        let sums: Vec<i32> = pairs.clone().map(|(x, y)| x + y).collect();
        let diffs: Vec<i32> = pairs.map(|(x, y)| x - y).collect();
        ctx.write(0, &sums)?;
        ctx.write(1, &diffs)
    })
}

/// `vaddsub` writes `C = A + B` and `D = A - B`
pub fn two_output_descriptors() -> Vec<ArgumentDescriptor> {
    vec![
        ArgumentDescriptor::output::<i32>("C", MAX_SIZE),
        ArgumentDescriptor::output::<i32>("D", MAX_SIZE),
        ArgumentDescriptor::input::<i32>("A", MAX_SIZE),
        ArgumentDescriptor::input::<i32>("B", MAX_SIZE),
        ArgumentDescriptor::scalar::<i32>("size"),
    ]
}

pub fn descriptors() -> Vec<ArgumentDescriptor> {
    vec![
        ArgumentDescriptor::output::<i32>("C", MAX_SIZE),
        ArgumentDescriptor::input::<i32>("A", MAX_SIZE),
        ArgumentDescriptor::input::<i32>("B", MAX_SIZE),
        ArgumentDescriptor::scalar::<i32>("size"),
    ]
}

pub fn config(degree: usize) -> PipelineConfig {
    PipelineConfig::new("vadd")
        .with_emulation(true)
        .with_degree(degree)
}

pub fn backend(config: &PipelineConfig, op_latency: Duration) -> EmulatorBackend {
    config
        .discover(
            kernels(),
            EmulatorOptions::default().with_op_latency(op_latency),
        )
        .unwrap()
}

pub fn two_output_config(degree: usize) -> PipelineConfig {
    PipelineConfig::new("vaddsub")
        .with_emulation(true)
        .with_degree(degree)
}

/// Item `id` carrying `A = [id; len]` and `B = [1, 2, .., len]`
pub fn item(id: u64, len: usize) -> Item {
    let a: Vec<i64> = vec![id as i64; len];
    let b: Vec<i64> = (1..=len as i64).collect();
    Item::new(id, vec![Field::IntList(a), Field::IntList(b)])
}

/// Expected `C` for [`item`]
pub fn expected(id: u64, len: usize) -> Vec<i64> {
    (1..=len as i64).map(|v| v + id as i64).collect()
}

/// Expected `D` for [`item`]
pub fn expected_difference(id: u64, len: usize) -> Vec<i64> {
    (1..=len as i64).map(|v| id as i64 - v).collect()
}

/// Adapter for `vadd`: fields 0 and 1 are `A` and `B`
pub struct VecAdd {
    /// Pass a negative size for this item
    pub poison: Option<u64>,
}

impl VecAdd {
    pub fn new() -> Self {
        Self { poison: None }
    }
}

fn int_list(item: &Item, index: usize) -> Result<Vec<i32>, PipelineError> {
    item.field(index)
        .and_then(Field::as_int_list)
        .map(|values| values.iter().map(|&v| v as i32).collect())
        .ok_or_else(|| PipelineError::Adapter(format!("field {} is not an int list", index)))
}

impl KernelAdapter for VecAdd {
    fn prepare_compute(&self, item: &Item) -> Result<Vec<KernelInput>, PipelineError> {
        let a = int_list(item, 0)?;
        let b = int_list(item, 1)?;
        let size = if self.poison == Some(item.id.0) {
            -1
        } else {
            a.len() as i32
        };
        Ok(vec![
            KernelInput::Output,
            KernelInput::data(&a),
            KernelInput::data(&b),
            KernelInput::scalar(size),
        ])
    }

    fn prepare_emit(&self, item: &Item, results: &ResultSet) -> Result<Vec<Field>, PipelineError> {
        let len = item
            .field(0)
            .and_then(Field::as_int_list)
            .map_or(0, <[i64]>::len);
        let c: Vec<i32> = results.get("C")?;
        Ok(vec![Field::IntList(
            c.into_iter().take(len).map(i64::from).collect(),
        )])
    }
}

/// Adapter for `vaddsub`: emits `C` then `D`
pub struct VecAddSub;

impl KernelAdapter for VecAddSub {
    fn prepare_compute(&self, item: &Item) -> Result<Vec<KernelInput>, PipelineError> {
        let a = int_list(item, 0)?;
        let b = int_list(item, 1)?;
        let size = a.len() as i32;
        Ok(vec![
            KernelInput::Output,
            KernelInput::Output,
            KernelInput::data(&a),
            KernelInput::data(&b),
            KernelInput::scalar(size),
        ])
    }

    fn prepare_emit(&self, item: &Item, results: &ResultSet) -> Result<Vec<Field>, PipelineError> {
        let len = item
            .field(0)
            .and_then(Field::as_int_list)
            .map_or(0, <[i64]>::len);
        let column = |name: &str| -> Result<Field, PipelineError> {
            let values: Vec<i32> = results.get(name)?;
            Ok(Field::IntList(
                values.into_iter().take(len).map(i64::from).collect(),
            ))
        };
        Ok(vec![column("C")?, column("D")?])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Emit(ItemId, Vec<Field>),
    Ack(ItemId),
    Fail(ItemId),
    Error(String),
}

/// Host recording every call, optionally refusing to emit one item
#[derive(Default)]
pub struct RecordingHost {
    pub events: Mutex<Vec<HostEvent>>,
    pub reject_emit: Option<u64>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(id: u64) -> Arc<Self> {
        Arc::new(Self {
            reject_emit: Some(id),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    /// Ids in the order they were acked
    pub fn acked(&self) -> Vec<u64> {
        self.filter(|event| match event {
            HostEvent::Ack(id) => Some(id.0),
            _ => None,
        })
    }

    /// Ids in the order they were failed
    pub fn failed(&self) -> Vec<u64> {
        self.filter(|event| match event {
            HostEvent::Fail(id) => Some(id.0),
            _ => None,
        })
    }

    /// Ids in the order they were acked or failed
    pub fn resolved(&self) -> Vec<u64> {
        self.filter(|event| match event {
            HostEvent::Ack(id) | HostEvent::Fail(id) => Some(id.0),
            _ => None,
        })
    }

    pub fn emitted(&self) -> Vec<(u64, Vec<Field>)> {
        self.filter(|event| match event {
            HostEvent::Emit(id, fields) => Some((id.0, fields.clone())),
            _ => None,
        })
    }

    fn filter<T>(&self, f: impl Fn(&HostEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }
}

impl StreamHost for RecordingHost {
    fn emit(&self, record: OutputRecord) -> Result<(), PipelineError> {
        if self.reject_emit == Some(record.anchor.0) {
            return Err(PipelineError::Emit(format!("refused {}", record.anchor)));
        }
        self.events
            .lock()
            .push(HostEvent::Emit(record.anchor, record.fields));
        Ok(())
    }

    fn ack(&self, item: &Item) {
        self.events.lock().push(HostEvent::Ack(item.id));
    }

    fn fail(&self, item: &Item) {
        self.events.lock().push(HostEvent::Fail(item.id));
    }

    fn report_error(&self, message: &str) {
        self.events.lock().push(HostEvent::Error(message.to_string()));
    }
}

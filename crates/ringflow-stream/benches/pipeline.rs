//! Pipeline throughput benchmarks
//!
//! Compares the synchronous driver with the asynchronous driver at
//! increasing pipeline depths on the emulator.

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ringflow_device::{EmulatorOptions, KernelRegistry};
use ringflow_stream::{
    ArgumentDescriptor, AsyncPipeline, Field, Item, KernelAdapter, KernelInput, OutputRecord,
    PipelineConfig, PipelineError, ResultSet, StreamHost, SyncPipeline,
};

const VEC_SIZE: usize = 1024;
const ITEMS: u64 = 64;
const DEGREES: &[usize] = &[1, 2, 4, 8];

/// Simulated cost of every device command
const OP_LATENCY: Duration = Duration::from_micros(50);

struct VecAdd;

impl KernelAdapter for VecAdd {
    fn prepare_compute(&self, item: &Item) -> Result<Vec<KernelInput>, PipelineError> {
        let seed = item.id.0 as i32;
        let a = vec![seed; VEC_SIZE];
        let b = vec![1i32; VEC_SIZE];
        Ok(vec![
            KernelInput::Output,
            KernelInput::data(&a),
            KernelInput::data(&b),
            KernelInput::scalar(VEC_SIZE as i32),
        ])
    }

    fn prepare_emit(&self, _item: &Item, results: &ResultSet) -> Result<Vec<Field>, PipelineError> {
        let c: Vec<i32> = results.get("C")?;
        Ok(vec![Field::Int(c.first().copied().unwrap_or_default().into())])
    }
}

struct Discard;

impl StreamHost for Discard {
    fn emit(&self, record: OutputRecord) -> Result<(), PipelineError> {
        black_box(record);
        Ok(())
    }

    fn ack(&self, _item: &Item) {}

    fn fail(&self, _item: &Item) {}

    fn report_error(&self, message: &str) {
        eprintln!("{}", message);
    }
}

fn kernels() -> KernelRegistry {
    KernelRegistry::new().with_kernel("vadd", |ctx| {
        let n = ctx.scalar::<i32>(3)? as usize;
        let a = ctx.read::<i32>(1)?;
        let b = ctx.read::<i32>(2)?;
        let c: Vec<i32> = a.iter().zip(&b).take(n).map(|(x, y)| x + y).collect();
        ctx.write(0, &c)
    })
}

fn descriptors() -> Vec<ArgumentDescriptor> {
    vec![
        ArgumentDescriptor::output::<i32>("C", VEC_SIZE),
        ArgumentDescriptor::input::<i32>("A", VEC_SIZE),
        ArgumentDescriptor::input::<i32>("B", VEC_SIZE),
        ArgumentDescriptor::scalar::<i32>("size"),
    ]
}

fn config(degree: usize) -> PipelineConfig {
    PipelineConfig::new("vadd")
        .with_emulation(true)
        .with_degree(degree)
}

fn options() -> EmulatorOptions {
    EmulatorOptions::default().with_op_latency(OP_LATENCY)
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_pipeline");
    group.throughput(Throughput::Elements(ITEMS));

    group.bench_function("vadd", |b| {
        b.iter(|| {
            let config = config(1);
            let backend = config.discover(kernels(), options()).unwrap();
            let mut pipeline = SyncPipeline::new(
                backend,
                config,
                descriptors(),
                Arc::new(VecAdd),
                Arc::new(Discard),
            )
            .unwrap();
            for id in 0..ITEMS {
                pipeline.process(Item::new(id, vec![]));
            }
            pipeline.finish().unwrap();
        })
    });

    group.finish();
}

fn bench_async(c: &mut Criterion) {
    let mut group = c.benchmark_group("async_pipeline");
    group.throughput(Throughput::Elements(ITEMS));

    for &degree in DEGREES {
        group.bench_with_input(BenchmarkId::new("vadd", degree), &degree, |b, &degree| {
            b.iter(|| {
                let config = config(degree);
                let backend = config.discover(kernels(), options()).unwrap();
                let mut pipeline = AsyncPipeline::new(
                    backend,
                    config,
                    descriptors(),
                    Arc::new(VecAdd),
                    Arc::new(Discard),
                )
                .unwrap();
                for id in 0..ITEMS {
                    pipeline.process(Item::new(id, vec![]));
                }
                pipeline.finish().unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sync, bench_async);
criterion_main!(benches);

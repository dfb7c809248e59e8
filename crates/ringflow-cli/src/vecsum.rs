//! Vector-sum kernel, argument layout and adapter

use ringflow_device::{Error as DeviceError, KernelRegistry};
use ringflow_stream::{
    ArgumentDescriptor, Field, Item, KernelAdapter, KernelInput, PipelineError, ResultSet,
};

/// Kernel entry point
pub const KERNEL_NAME: &str = "vecsum";

/// Default capacity of every vector argument
pub const DEFAULT_VEC_SIZE: usize = 8 * 1024;

/// Emulated `vecsum`: `C[i] = A[i] + B[i]` for `i < size`
pub fn kernels() -> KernelRegistry {
    KernelRegistry::new().with_kernel(KERNEL_NAME, |ctx| {
        let size = ctx.scalar::<i32>(3)?;
        let size = usize::try_from(size)
            .map_err(|_| DeviceError::Kernel(format!("invalid size {}", size)))?;
        let a = ctx.read::<i32>(1)?;
        let b = ctx.read::<i32>(2)?;
        let c: Vec<i32> = a.iter().zip(&b).take(size).map(|(x, y)| x + y).collect();
        ctx.write(0, &c)
    })
}

/// `C:out A:in B:in size:scalar`
pub fn descriptors(vec_size: usize) -> Vec<ArgumentDescriptor> {
    vec![
        ArgumentDescriptor::output::<i32>("C", vec_size),
        ArgumentDescriptor::input::<i32>("A", vec_size),
        ArgumentDescriptor::input::<i32>("B", vec_size),
        ArgumentDescriptor::scalar::<i32>("size"),
    ]
}

/// Adapter for items `[A, B, timestamp]`, emitting `[C[..size], timestamp]`
pub struct VecSumAdapter;

fn vector(item: &Item, index: usize, name: &str) -> Result<Vec<i32>, PipelineError> {
    let values = item
        .field(index)
        .and_then(Field::as_int_list)
        .ok_or_else(|| PipelineError::Adapter(format!("field `{}` is not an int list", name)))?;
    values
        .iter()
        .map(|&v| {
            i32::try_from(v).map_err(|_| {
                PipelineError::Adapter(format!("`{}` value {} does not fit in i32", name, v))
            })
        })
        .collect()
}

impl KernelAdapter for VecSumAdapter {
    fn prepare_compute(&self, item: &Item) -> Result<Vec<KernelInput>, PipelineError> {
        let a = vector(item, 0, "A")?;
        let b = vector(item, 1, "B")?;
        if a.len() != b.len() {
            return Err(PipelineError::Adapter(format!(
                "A has {} elements, B has {}",
                a.len(),
                b.len()
            )));
        }
        let size = a.len() as i32;
        Ok(vec![
            KernelInput::Output,
            KernelInput::data(&a),
            KernelInput::data(&b),
            KernelInput::scalar(size),
        ])
    }

    fn prepare_emit(&self, item: &Item, results: &ResultSet) -> Result<Vec<Field>, PipelineError> {
        let size = item.field(0).and_then(Field::as_int_list).map_or(0, <[i64]>::len);
        let timestamp = item
            .field(2)
            .cloned()
            .ok_or_else(|| PipelineError::Adapter("missing timestamp".into()))?;
        let c: Vec<i32> = results.get("C")?;
        Ok(vec![
            Field::IntList(c.into_iter().take(size).map(i64::from).collect()),
            timestamp,
        ])
    }
}

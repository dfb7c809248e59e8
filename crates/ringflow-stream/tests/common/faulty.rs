//! Emulator wrapper that refuses chosen launches and reads at enqueue time

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringflow_device::{
    AcceleratorBackend, CommandQueue, DeviceInfo, EmulatorBackend, EmulatorBuffer, EmulatorEvent,
    EmulatorKernel, EmulatorProgram, EmulatorQueue, Error as DeviceError, HostBuffer, MemAccess,
    Result as DeviceResult,
};
use ringflow_stream::PipelineConfig;

/// Which enqueue calls to refuse, counted from zero across all queues
#[derive(Debug, Default)]
pub struct Faults {
    pub reject_launch: Option<usize>,
    pub reject_read: Option<usize>,
    launches: AtomicUsize,
    reads: AtomicUsize,
}

impl Faults {
    pub fn launch(n: usize) -> Arc<Self> {
        Arc::new(Self {
            reject_launch: Some(n),
            ..Self::default()
        })
    }

    pub fn read(n: usize) -> Arc<Self> {
        Arc::new(Self {
            reject_read: Some(n),
            ..Self::default()
        })
    }

    fn refuse(counter: &AtomicUsize, target: Option<usize>) -> bool {
        target == Some(counter.fetch_add(1, Ordering::SeqCst))
    }
}

pub struct FaultyBackend {
    inner: EmulatorBackend,
    faults: Arc<Faults>,
}

pub fn faulty_backend(
    config: &PipelineConfig,
    op_latency: Duration,
    faults: &Arc<Faults>,
) -> FaultyBackend {
    FaultyBackend {
        inner: super::backend(config, op_latency),
        faults: Arc::clone(faults),
    }
}

pub struct FaultyQueue {
    inner: EmulatorQueue,
    faults: Arc<Faults>,
}

impl CommandQueue for FaultyQueue {
    type Buffer = EmulatorBuffer;
    type Event = EmulatorEvent;
    type Kernel = EmulatorKernel;

    fn enqueue_write(
        &self,
        dst: &EmulatorBuffer,
        data: Vec<u8>,
        wait_for: &[EmulatorEvent],
    ) -> DeviceResult<EmulatorEvent> {
        self.inner.enqueue_write(dst, data, wait_for)
    }

    fn enqueue_read(
        &self,
        src: &EmulatorBuffer,
        dst: &HostBuffer,
        wait_for: &[EmulatorEvent],
    ) -> DeviceResult<EmulatorEvent> {
        if Faults::refuse(&self.faults.reads, self.faults.reject_read) {
            return Err(DeviceError::QueueClosed);
        }
        self.inner.enqueue_read(src, dst, wait_for)
    }

    fn enqueue_kernel(
        &self,
        kernel: &EmulatorKernel,
        wait_for: &[EmulatorEvent],
    ) -> DeviceResult<EmulatorEvent> {
        if Faults::refuse(&self.faults.launches, self.faults.reject_launch) {
            return Err(DeviceError::QueueClosed);
        }
        self.inner.enqueue_kernel(kernel, wait_for)
    }

    fn finish(&self) -> DeviceResult<()> {
        self.inner.finish()
    }

    fn is_profiling(&self) -> bool {
        self.inner.is_profiling()
    }
}

impl AcceleratorBackend for FaultyBackend {
    type Buffer = EmulatorBuffer;
    type Event = EmulatorEvent;
    type Kernel = EmulatorKernel;
    type Queue = FaultyQueue;
    type Program = EmulatorProgram;

    fn platform_name(&self) -> &str {
        self.inner.platform_name()
    }

    fn device_info(&self) -> &DeviceInfo {
        self.inner.device_info()
    }

    fn build_program(&self, binary: &[u8]) -> DeviceResult<EmulatorProgram> {
        self.inner.build_program(binary)
    }

    fn create_kernel(&self, program: &EmulatorProgram, name: &str) -> DeviceResult<EmulatorKernel> {
        self.inner.create_kernel(program, name)
    }

    fn allocate(&self, bytes: usize, access: MemAccess) -> DeviceResult<EmulatorBuffer> {
        self.inner.allocate(bytes, access)
    }

    fn create_queue(&self, profiling: bool) -> DeviceResult<FaultyQueue> {
        Ok(FaultyQueue {
            inner: self.inner.create_queue(profiling)?,
            faults: Arc::clone(&self.faults),
        })
    }
}

//! Software Emulation Backend
//!
//! Stands in for accelerator hardware. Kernels are Rust closures looked up
//! by entry-point name in a [`KernelRegistry`]; each command queue owns a
//! worker thread that executes its commands strictly in order, blocks on
//! their wait-lists, stamps device-clock timestamps and fires completion
//! callbacks from that thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::backend::{
    AcceleratorBackend, CommandQueue, CompletionEvent, DeviceBuffer, DeviceClass, DeviceInfo,
    EventCallback, EventProfile, EventStatus, HostBuffer, Kernel, KernelArg, MemAccess,
};
use crate::element::{self, Element};
use crate::error::{Error, Result};

/// Status code of a command that failed while executing
pub const EXEC_STATUS_ERROR: i32 = -5;

/// Status code of a command whose wait-list contained a failed event
pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;

/// Upper bound on positional kernel arguments
const MAX_KERNEL_ARGS: usize = 64;

/// Kernel body executed by the emulator
pub type KernelFn = Arc<dyn Fn(&mut KernelContext<'_>) -> Result<()> + Send + Sync>;

/// Emulated device settings
#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    /// Platform name reported during discovery
    pub platform_name: String,
    /// Device name
    pub device_name: String,
    /// Simulated global memory in bytes
    pub global_memory_bytes: usize,
    /// Artificial latency added to every command
    pub op_latency: Duration,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            platform_name: "Xilinx".to_string(),
            device_name: "xilinx_sw_emu".to_string(),
            global_memory_bytes: 1024 * 1024 * 1024, // 1GB
            op_latency: Duration::ZERO,
        }
    }
}

impl EmulatorOptions {
    /// Set the platform name
    pub fn with_platform(mut self, name: impl Into<String>) -> Self {
        self.platform_name = name.into();
        self
    }

    /// Set the per-command latency
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }
}

/// Kernels known to the emulator, by entry-point name
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: Arc<RwLock<HashMap<String, KernelFn>>>,
}

impl KernelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a kernel body
    pub fn register<F>(&self, name: impl Into<String>, body: F)
    where
        F: Fn(&mut KernelContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.into(), Arc::new(body));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_kernel<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut KernelContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(name, body);
        self
    }

    /// Look up a kernel body
    pub fn get(&self, name: &str) -> Option<KernelFn> {
        self.kernels.read().get(name).cloned()
    }

    /// Registered entry points, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.names())
            .finish()
    }
}

/// Argument view handed to an emulated kernel body
pub struct KernelContext<'a> {
    name: &'a str,
    args: &'a [Option<KernelArg<EmulatorBuffer>>],
}

impl KernelContext<'_> {
    /// Entry-point name
    pub fn kernel_name(&self) -> &str {
        self.name
    }

    /// Number of bound argument positions
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, index: usize) -> Result<&KernelArg<EmulatorBuffer>> {
        self.args.get(index).and_then(Option::as_ref).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "argument {} of kernel `{}` is not set",
                index, self.name
            ))
        })
    }

    fn buffer(&self, index: usize) -> Result<&EmulatorBuffer> {
        match self.arg(index)? {
            KernelArg::Buffer(buffer) => Ok(buffer),
            KernelArg::Scalar(_) => Err(Error::InvalidArgument(format!(
                "argument {} of kernel `{}` is a scalar, expected a buffer",
                index, self.name
            ))),
        }
    }

    /// Read a scalar argument
    pub fn scalar<T: Element>(&self, index: usize) -> Result<T> {
        match self.arg(index)? {
            KernelArg::Scalar(bytes) if bytes.len() == T::TYPE.size_in_bytes() => {
                Ok(bytemuck::pod_read_unaligned(bytes))
            }
            KernelArg::Scalar(bytes) => Err(Error::InvalidArgument(format!(
                "argument {} of kernel `{}` holds {} bytes, expected {} ({})",
                index,
                self.name,
                bytes.len(),
                T::TYPE.size_in_bytes(),
                T::TYPE
            ))),
            KernelArg::Buffer(_) => Err(Error::InvalidArgument(format!(
                "argument {} of kernel `{}` is a buffer, expected a scalar",
                index, self.name
            ))),
        }
    }

    /// Read a whole buffer argument
    pub fn read<T: Element>(&self, index: usize) -> Result<Vec<T>> {
        let buffer = self.buffer(index)?;
        if !buffer.access.device_readable() {
            return Err(Error::AccessViolation(format!(
                "kernel `{}` read write-only argument {}",
                self.name, index
            )));
        }
        let data = buffer.data.read();
        element::from_bytes(&data)
    }

    /// Write to the start of a buffer argument
    pub fn write<T: Element>(&self, index: usize, values: &[T]) -> Result<()> {
        let buffer = self.buffer(index)?;
        if !buffer.access.device_writable() {
            return Err(Error::AccessViolation(format!(
                "kernel `{}` wrote read-only argument {}",
                self.name, index
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut data = buffer.data.write();
        if bytes.len() > data.len() {
            return Err(Error::BufferSizeMismatch {
                expected: data.len(),
                actual: bytes.len(),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Device clock and id source shared by a backend and its queues
#[derive(Debug)]
struct DeviceShared {
    epoch: Instant,
    next_id: AtomicU64,
    op_latency: Duration,
}

impl DeviceShared {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Emulated device buffer backed by host memory
#[derive(Clone)]
pub struct EmulatorBuffer {
    id: u64,
    access: MemAccess,
    data: Arc<RwLock<Vec<u8>>>,
}

impl EmulatorBuffer {
    /// Allocation id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl fmt::Debug for EmulatorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorBuffer")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("access", &self.access)
            .finish()
    }
}

impl DeviceBuffer for EmulatorBuffer {
    fn size(&self) -> usize {
        self.data.read().len()
    }

    fn access(&self) -> MemAccess {
        self.access
    }
}

struct EventState {
    status: EventStatus,
    profile: Option<EventProfile>,
    callbacks: Vec<EventCallback>,
}

struct EventInner {
    id: u64,
    state: Mutex<EventState>,
    done: Condvar,
}

/// Completion event of an emulated command
#[derive(Clone)]
pub struct EmulatorEvent {
    inner: Arc<EventInner>,
}

impl EmulatorEvent {
    fn new(id: u64, queued_ns: Option<u64>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                id,
                state: Mutex::new(EventState {
                    status: EventStatus::Queued,
                    profile: queued_ns.map(|queued_ns| EventProfile {
                        queued_ns,
                        ..EventProfile::default()
                    }),
                    callbacks: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Event id, unique per backend
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    fn transition(&self, status: EventStatus, now_ns: u64) {
        let mut state = self.inner.state.lock();
        state.status = status;
        if let Some(profile) = state.profile.as_mut() {
            match status {
                EventStatus::Submitted => profile.submit_ns = now_ns,
                EventStatus::Running => profile.start_ns = now_ns,
                _ => {}
            }
        }
    }

    fn complete(&self, status: EventStatus, now_ns: u64) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            state.status = status;
            if let Some(profile) = state.profile.as_mut() {
                profile.end_ns = now_ns;
            }
            std::mem::take(&mut state.callbacks)
        };
        self.inner.done.notify_all();

        for callback in callbacks {
            callback(status);
        }
    }

    fn wait_terminal(&self) -> EventStatus {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.done.wait(&mut state);
        }
        state.status
    }
}

impl fmt::Debug for EmulatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorEvent")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl CompletionEvent for EmulatorEvent {
    fn status(&self) -> EventStatus {
        self.inner.state.lock().status
    }

    fn wait(&self) -> Result<()> {
        match self.wait_terminal() {
            EventStatus::Error(code) => Err(Error::EventFailed { code }),
            _ => Ok(()),
        }
    }

    fn set_callback(&self, callback: EventCallback) {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            let status = state.status;
            drop(state);
            callback(status);
        } else {
            state.callbacks.push(callback);
        }
    }

    fn profile(&self) -> Option<EventProfile> {
        let state = self.inner.state.lock();
        if state.status.is_terminal() {
            state.profile
        } else {
            None
        }
    }
}

/// Emulated kernel with its bound arguments
pub struct EmulatorKernel {
    name: String,
    body: KernelFn,
    args: Vec<Option<KernelArg<EmulatorBuffer>>>,
}

impl fmt::Debug for EmulatorKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatorKernel")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl Kernel for EmulatorKernel {
    type Buffer = EmulatorBuffer;

    fn name(&self) -> &str {
        &self.name
    }

    fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn set_arg(&mut self, index: usize, arg: KernelArg<EmulatorBuffer>) -> Result<()> {
        if index >= MAX_KERNEL_ARGS {
            return Err(Error::InvalidArgument(format!(
                "argument index {} exceeds the limit of {}",
                index, MAX_KERNEL_ARGS
            )));
        }
        if index >= self.args.len() {
            self.args.resize(index + 1, None);
        }
        self.args[index] = Some(arg);
        Ok(())
    }
}

/// Program loaded into the emulator
#[derive(Debug)]
pub struct EmulatorProgram {
    binary_len: usize,
    kernels: KernelRegistry,
}

impl EmulatorProgram {
    /// Size of the binary blob the program was built from
    pub fn binary_len(&self) -> usize {
        self.binary_len
    }
}

enum Op {
    Write {
        dst: EmulatorBuffer,
        data: Vec<u8>,
    },
    Read {
        src: EmulatorBuffer,
        dst: HostBuffer,
    },
    Launch {
        name: String,
        body: KernelFn,
        args: Vec<Option<KernelArg<EmulatorBuffer>>>,
    },
}

impl Op {
    fn label(&self) -> &'static str {
        match self {
            Op::Write { .. } => "write",
            Op::Read { .. } => "read",
            Op::Launch { .. } => "launch",
        }
    }

    fn execute(&self) -> Result<()> {
        match self {
            Op::Write { dst, data } => {
                let mut target = dst.data.write();
                target[..data.len()].copy_from_slice(data);
                Ok(())
            }
            Op::Read { src, dst } => {
                let source = src.data.read();
                let len = dst.len().min(source.len());
                dst.write_from(&source[..len])
            }
            Op::Launch { name, body, args } => {
                let mut ctx = KernelContext { name, args };
                body(&mut ctx)
            }
        }
    }
}

struct Command {
    op: Op,
    wait_for: Vec<EmulatorEvent>,
    event: EmulatorEvent,
}

fn run_queue(queue_id: u64, commands: Receiver<Command>, shared: Arc<DeviceShared>) {
    while let Ok(Command { op, wait_for, event }) = commands.recv() {
        event.transition(EventStatus::Submitted, shared.now_ns());

        // Every dependency is waited on, even after one has failed.
        let dependency_failed = wait_for
            .iter()
            .map(EmulatorEvent::wait_terminal)
            .fold(false, |failed, status| {
                failed || matches!(status, EventStatus::Error(_))
            });

        event.transition(EventStatus::Running, shared.now_ns());

        let status = if dependency_failed {
            warn!(
                queue = queue_id,
                event = event.id(),
                op = op.label(),
                "Skipping command: a dependency failed"
            );
            EventStatus::Error(EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        } else {
            if !shared.op_latency.is_zero() {
                thread::sleep(shared.op_latency);
            }
            match op.execute() {
                Ok(()) => EventStatus::Complete,
                Err(e) => {
                    warn!(
                        queue = queue_id,
                        event = event.id(),
                        op = op.label(),
                        error = %e,
                        "Emulated command failed"
                    );
                    EventStatus::Error(EXEC_STATUS_ERROR)
                }
            }
        };

        trace!(queue = queue_id, event = event.id(), op = op.label(), ?status, "Command finished");
        event.complete(status, shared.now_ns());
    }

    trace!(queue = queue_id, "Emulator queue worker exiting");
}

/// In-order emulated command queue
pub struct EmulatorQueue {
    id: u64,
    profiling: bool,
    shared: Arc<DeviceShared>,
    sender: Option<Sender<Command>>,
    last: Mutex<Option<EmulatorEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl EmulatorQueue {
    fn submit(&self, op: Op, wait_for: &[EmulatorEvent]) -> Result<EmulatorEvent> {
        let sender = self.sender.as_ref().ok_or(Error::QueueClosed)?;
        let queued_ns = self.profiling.then(|| self.shared.now_ns());
        let event = EmulatorEvent::new(self.shared.next_id(), queued_ns);
        let label = op.label();

        // Holding `last` keeps send order and the recorded tail consistent.
        let mut last = self.last.lock();
        sender
            .send(Command {
                op,
                wait_for: wait_for.to_vec(),
                event: event.clone(),
            })
            .map_err(|_| Error::QueueClosed)?;
        *last = Some(event.clone());

        trace!(
            queue = self.id,
            event = event.id(),
            op = label,
            deps = wait_for.len(),
            "Command enqueued"
        );
        Ok(event)
    }
}

impl CommandQueue for EmulatorQueue {
    type Buffer = EmulatorBuffer;
    type Event = EmulatorEvent;
    type Kernel = EmulatorKernel;

    fn enqueue_write(
        &self,
        dst: &EmulatorBuffer,
        data: Vec<u8>,
        wait_for: &[EmulatorEvent],
    ) -> Result<EmulatorEvent> {
        if !dst.access.host_writable() {
            return Err(Error::AccessViolation(format!(
                "host write to buffer {} allocated as {:?}",
                dst.id, dst.access
            )));
        }
        if data.len() > dst.size() {
            return Err(Error::BufferSizeMismatch {
                expected: dst.size(),
                actual: data.len(),
            });
        }
        self.submit(
            Op::Write {
                dst: dst.clone(),
                data,
            },
            wait_for,
        )
    }

    fn enqueue_read(
        &self,
        src: &EmulatorBuffer,
        dst: &HostBuffer,
        wait_for: &[EmulatorEvent],
    ) -> Result<EmulatorEvent> {
        if !src.access.host_readable() {
            return Err(Error::AccessViolation(format!(
                "host read from buffer {} allocated as {:?}",
                src.id, src.access
            )));
        }
        if dst.len() > src.size() {
            return Err(Error::BufferSizeMismatch {
                expected: src.size(),
                actual: dst.len(),
            });
        }
        self.submit(
            Op::Read {
                src: src.clone(),
                dst: dst.clone(),
            },
            wait_for,
        )
    }

    fn enqueue_kernel(
        &self,
        kernel: &EmulatorKernel,
        wait_for: &[EmulatorEvent],
    ) -> Result<EmulatorEvent> {
        self.submit(
            Op::Launch {
                name: kernel.name.clone(),
                body: Arc::clone(&kernel.body),
                args: kernel.args.clone(),
            },
            wait_for,
        )
    }

    fn finish(&self) -> Result<()> {
        let last = self.last.lock().clone();
        if let Some(event) = last {
            event.wait_terminal();
        }
        Ok(())
    }

    fn is_profiling(&self) -> bool {
        self.profiling
    }
}

impl Drop for EmulatorQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(queue = self.id, "Emulator queue worker panicked");
            }
        }
    }
}

/// Software emulation backend
///
/// Exposes a single accelerator device on its platform.
#[derive(Debug)]
pub struct EmulatorBackend {
    info: DeviceInfo,
    kernels: KernelRegistry,
    shared: Arc<DeviceShared>,
}

impl EmulatorBackend {
    /// Create an emulator with default options
    pub fn new(kernels: KernelRegistry) -> Self {
        Self::with_options(kernels, EmulatorOptions::default())
    }

    /// Create an emulator with custom options
    pub fn with_options(kernels: KernelRegistry, options: EmulatorOptions) -> Self {
        Self {
            info: DeviceInfo {
                name: options.device_name,
                platform: options.platform_name,
                class: DeviceClass::Accelerator,
                global_memory_bytes: options.global_memory_bytes,
                emulated: true,
            },
            kernels,
            shared: Arc::new(DeviceShared {
                epoch: Instant::now(),
                next_id: AtomicU64::new(1),
                op_latency: options.op_latency,
            }),
        }
    }

    /// Kernels available to programs built on this device
    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }
}

impl AcceleratorBackend for EmulatorBackend {
    type Buffer = EmulatorBuffer;
    type Event = EmulatorEvent;
    type Kernel = EmulatorKernel;
    type Queue = EmulatorQueue;
    type Program = EmulatorProgram;

    fn platform_name(&self) -> &str {
        &self.info.platform
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build_program(&self, binary: &[u8]) -> Result<EmulatorProgram> {
        debug!(
            bytes = binary.len(),
            kernels = ?self.kernels.names(),
            "Loading program into emulator"
        );
        Ok(EmulatorProgram {
            binary_len: binary.len(),
            kernels: self.kernels.clone(),
        })
    }

    fn create_kernel(&self, program: &EmulatorProgram, name: &str) -> Result<EmulatorKernel> {
        let body = program
            .kernels
            .get(name)
            .ok_or_else(|| Error::KernelNotFound(name.to_string()))?;
        Ok(EmulatorKernel {
            name: name.to_string(),
            body,
            args: Vec::new(),
        })
    }

    fn allocate(&self, bytes: usize, access: MemAccess) -> Result<EmulatorBuffer> {
        if bytes == 0 {
            return Err(Error::alloc_failed(0, "cannot allocate 0 bytes"));
        }
        if bytes > self.info.global_memory_bytes {
            return Err(Error::alloc_failed(
                bytes,
                format!(
                    "exceeds device memory of {} bytes",
                    self.info.global_memory_bytes
                ),
            ));
        }
        Ok(EmulatorBuffer {
            id: self.shared.next_id(),
            access,
            data: Arc::new(RwLock::new(vec![0u8; bytes])),
        })
    }

    fn create_queue(&self, profiling: bool) -> Result<EmulatorQueue> {
        let id = self.shared.next_id();
        let (sender, receiver) = unbounded();
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name(format!("ringflow-emu-q{}", id))
            .spawn(move || run_queue(id, receiver, shared))
            .map_err(|e| Error::DeviceInit {
                device_id: 0,
                message: format!("failed to spawn queue worker: {}", e),
            })?;

        Ok(EmulatorQueue {
            id,
            profiling,
            shared: Arc::clone(&self.shared),
            sender: Some(sender),
            last: Mutex::new(None),
            worker: Some(worker),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn add_registry() -> KernelRegistry {
        KernelRegistry::new().with_kernel("vadd", |ctx| {
            let a: Vec<i32> = ctx.read(1)?;
            let b: Vec<i32> = ctx.read(2)?;
            let n = ctx.scalar::<i32>(3)? as usize;
            let c: Vec<i32> = a.iter().zip(&b).take(n).map(|(x, y)| x + y).collect();
            ctx.write(0, &c)
        })
    }

    #[test]
    fn test_emulator_backend_creation() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        assert_eq!(backend.platform_name(), "Xilinx");
        assert_eq!(backend.device_info().class, DeviceClass::Accelerator);
        assert!(backend.device_info().emulated);
    }

    #[test]
    fn test_buffer_allocation() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let buffer = backend.allocate(1024, MemAccess::ReadWrite).unwrap();
        assert_eq!(buffer.size(), 1024);
        assert!(backend.allocate(0, MemAccess::ReadWrite).is_err());
    }

    #[test]
    fn test_missing_kernel() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let program = backend.build_program(b"blob").unwrap();
        assert_eq!(program.binary_len(), 4);
        let err = backend.create_kernel(&program, "nope").unwrap_err();
        assert!(matches!(err, Error::KernelNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_write_kernel_read_roundtrip() {
        let backend = EmulatorBackend::new(add_registry());
        let program = backend.build_program(&[]).unwrap();
        let mut kernel = backend.create_kernel(&program, "vadd").unwrap();
        let queue = backend.create_queue(false).unwrap();

        let a = backend.allocate(16, MemAccess::HostWriteDeviceRead).unwrap();
        let b = backend.allocate(16, MemAccess::HostWriteDeviceRead).unwrap();
        let c = backend.allocate(16, MemAccess::HostReadDeviceWrite).unwrap();

        let wa = queue
            .enqueue_write(&a, element::to_bytes(&[1i32, 2, 3, 4]), &[])
            .unwrap();
        let wb = queue
            .enqueue_write(&b, element::to_bytes(&[10i32, 20, 30, 40]), &[])
            .unwrap();

        kernel.set_arg(0, KernelArg::Buffer(c.clone())).unwrap();
        kernel.set_arg(1, KernelArg::Buffer(a)).unwrap();
        kernel.set_arg(2, KernelArg::Buffer(b)).unwrap();
        kernel.set_arg(3, KernelArg::scalar(4i32)).unwrap();
        let launch = queue.enqueue_kernel(&kernel, &[wa, wb]).unwrap();

        let out = HostBuffer::zeroed(16);
        let read = queue.enqueue_read(&c, &out, &[launch]).unwrap();
        backend.wait_for_events(&[read]).unwrap();

        assert_eq!(out.typed::<i32>().unwrap(), vec![11, 22, 33, 44]);
    }

    #[test]
    fn test_access_flags_enforced() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let queue = backend.create_queue(false).unwrap();
        let output = backend.allocate(4, MemAccess::HostReadDeviceWrite).unwrap();
        let input = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();

        assert!(matches!(
            queue.enqueue_write(&output, vec![0; 4], &[]),
            Err(Error::AccessViolation(_))
        ));
        assert!(matches!(
            queue.enqueue_read(&input, &HostBuffer::zeroed(4), &[]),
            Err(Error::AccessViolation(_))
        ));
    }

    #[test]
    fn test_oversized_write_rejected() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let queue = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();
        let err = queue.enqueue_write(&buffer, vec![0; 8], &[]).unwrap_err();
        assert!(matches!(err, Error::BufferSizeMismatch { expected: 4, actual: 8 }));
    }

    #[test]
    fn test_failed_kernel_propagates_to_dependents() {
        let registry = KernelRegistry::new()
            .with_kernel("boom", |_| Err(Error::Kernel("boom".into())));
        let backend = EmulatorBackend::new(registry);
        let program = backend.build_program(&[]).unwrap();
        let kernel = backend.create_kernel(&program, "boom").unwrap();
        let queue = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostReadDeviceWrite).unwrap();

        let launch = queue.enqueue_kernel(&kernel, &[]).unwrap();
        let read = queue
            .enqueue_read(&buffer, &HostBuffer::zeroed(4), &[launch.clone()])
            .unwrap();

        assert!(matches!(launch.wait(), Err(Error::EventFailed { code: EXEC_STATUS_ERROR })));
        assert!(matches!(
            read.wait(),
            Err(Error::EventFailed {
                code: EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
            })
        ));
    }

    #[test]
    fn test_unset_argument_fails_launch() {
        let backend = EmulatorBackend::new(add_registry());
        let program = backend.build_program(&[]).unwrap();
        let kernel = backend.create_kernel(&program, "vadd").unwrap();
        let queue = backend.create_queue(false).unwrap();

        let launch = queue.enqueue_kernel(&kernel, &[]).unwrap();
        assert!(launch.wait().is_err());
    }

    #[test]
    fn test_callback_fires_on_completion() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let queue = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();

        let (tx, rx) = mpsc::channel();
        let event = queue.enqueue_write(&buffer, vec![1, 2, 3, 4], &[]).unwrap();
        event.set_callback(Box::new(move |status| {
            tx.send(status).unwrap();
        }));

        assert_eq!(rx.recv().unwrap(), EventStatus::Complete);
        assert_eq!(buffer.contents(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_callback_on_finished_event_runs_immediately() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let queue = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();

        let event = queue.enqueue_write(&buffer, vec![0; 4], &[]).unwrap();
        event.wait().unwrap();

        let (tx, rx) = mpsc::channel();
        event.set_callback(Box::new(move |status| tx.send(status).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), EventStatus::Complete);
    }

    #[test]
    fn test_in_order_completion_on_one_queue() {
        let backend = EmulatorBackend::with_options(
            KernelRegistry::new(),
            EmulatorOptions::default().with_op_latency(Duration::from_millis(1)),
        );
        let queue = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8u8 {
            let event = queue.enqueue_write(&buffer, vec![i; 4], &[]).unwrap();
            let order = Arc::clone(&order);
            event.set_callback(Box::new(move |_| order.lock().push(i)));
        }
        queue.finish().unwrap();

        assert_eq!(*order.lock(), (0..8).collect::<Vec<u8>>());
        assert_eq!(buffer.contents(), vec![7; 4]);
    }

    #[test]
    fn test_cross_queue_dependency() {
        let backend = EmulatorBackend::with_options(
            KernelRegistry::new(),
            EmulatorOptions::default().with_op_latency(Duration::from_millis(2)),
        );
        let writer = backend.create_queue(false).unwrap();
        let reader = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::ReadWrite).unwrap();

        let write = writer.enqueue_write(&buffer, vec![9; 4], &[]).unwrap();
        let out = HostBuffer::zeroed(4);
        let read = reader.enqueue_read(&buffer, &out, &[write]).unwrap();
        read.wait().unwrap();

        assert_eq!(out.to_vec(), vec![9; 4]);
    }

    #[test]
    fn test_profiling_timestamps() {
        let backend = EmulatorBackend::new(KernelRegistry::new());
        let profiled = backend.create_queue(true).unwrap();
        let plain = backend.create_queue(false).unwrap();
        let buffer = backend.allocate(4, MemAccess::HostWriteDeviceRead).unwrap();

        let event = profiled.enqueue_write(&buffer, vec![0; 4], &[]).unwrap();
        event.wait().unwrap();
        let profile = event.profile().unwrap();
        assert!(profile.queued_ns <= profile.submit_ns);
        assert!(profile.submit_ns <= profile.start_ns);
        assert!(profile.start_ns <= profile.end_ns);

        let event = plain.enqueue_write(&buffer, vec![0; 4], &[]).unwrap();
        event.wait().unwrap();
        assert!(event.profile().is_none());
        assert!(profiled.is_profiling());
        assert!(!plain.is_profiling());
    }

    #[test]
    fn test_scalar_width_checked() {
        let registry = KernelRegistry::new().with_kernel("wide", |ctx| {
            ctx.scalar::<i64>(0)?;
            Ok(())
        });
        let backend = EmulatorBackend::new(registry);
        let program = backend.build_program(&[]).unwrap();
        let mut kernel = backend.create_kernel(&program, "wide").unwrap();
        kernel.set_arg(0, KernelArg::scalar(1i32)).unwrap();
        let queue = backend.create_queue(false).unwrap();

        assert!(queue.enqueue_kernel(&kernel, &[]).unwrap().wait().is_err());
    }
}

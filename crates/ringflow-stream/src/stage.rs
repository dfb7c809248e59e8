//! Device-side state shared by both drivers
//!
//! Loads the program, owns the kernel and its queue, keeps one ring per
//! buffer argument and binds a launch's worth of arguments at a time.

use std::time::Instant;

use ringflow_device::{
    AcceleratorBackend, CommandQueue, DeviceBuffer, HostBuffer, Kernel, KernelArg,
};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::descriptor::{validate_descriptors, ArgRole, ArgumentDescriptor};
use crate::host::KernelInput;
use crate::ring::RingStats;
use crate::transfer::{ReadBuffers, WriteBuffers};
use crate::{PipelineError, Result};

enum ArgSlot<B: AcceleratorBackend> {
    Input(WriteBuffers<B>),
    Output(ReadBuffers<B>),
    Scalar,
}

/// Events produced while binding one launch
pub(crate) struct Bound<E> {
    /// Completion events of the input writes
    pub writes: Vec<E>,
    /// Oldest pending reads of output slots about to be overwritten
    pub output_reuse: Vec<E>,
}

impl<E> Bound<E> {
    /// Everything the kernel launch must wait for
    pub fn kernel_wait_set(&self) -> Vec<E>
    where
        E: Clone,
    {
        self.writes.iter().chain(&self.output_reuse).cloned().collect()
    }
}

pub(crate) struct DeviceStage<B: AcceleratorBackend> {
    backend: B,
    descriptors: Vec<ArgumentDescriptor>,
    slots: Vec<ArgSlot<B>>,
    outputs: Vec<usize>,
    kernel: B::Kernel,
    kernel_queue: B::Queue,
}

impl<B: AcceleratorBackend> DeviceStage<B> {
    pub fn open(
        backend: B,
        config: &PipelineConfig,
        descriptors: Vec<ArgumentDescriptor>,
        degree: usize,
    ) -> Result<Self> {
        validate_descriptors(&descriptors)?;

        let started = Instant::now();
        let binary = match &config.kernel_binary {
            Some(path) => std::fs::read(path)?,
            None => Vec::new(),
        };
        let program = backend.build_program(&binary)?;
        let kernel = backend.create_kernel(&program, &config.kernel_name)?;
        let kernel_queue = backend.create_queue(config.profiling)?;

        let slots = descriptors
            .iter()
            .map(|descriptor| match descriptor.role {
                ArgRole::Input => {
                    WriteBuffers::new(&backend, descriptor, degree, config.profiling)
                        .map(ArgSlot::Input)
                }
                ArgRole::Output => {
                    ReadBuffers::new(&backend, descriptor, degree, config.profiling)
                        .map(ArgSlot::Output)
                }
                ArgRole::Scalar => Ok(ArgSlot::Scalar),
            })
            .collect::<Result<Vec<_>>>()?;
        let outputs = descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.role == ArgRole::Output)
            .map(|(index, _)| index)
            .collect();

        info!(
            platform = backend.platform_name(),
            device = %backend.device_info().name,
            kernel = %config.kernel_name,
            args = descriptors.len(),
            degree,
            profiling = config.profiling,
            elapsed = ?started.elapsed(),
            "Accelerator stage ready"
        );

        Ok(Self {
            backend,
            descriptors,
            slots,
            outputs,
            kernel,
            kernel_queue,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Descriptors of the output arguments, in order
    pub fn output_descriptors(&self) -> Vec<ArgumentDescriptor> {
        self.outputs
            .iter()
            .map(|&index| self.descriptors[index].clone())
            .collect()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Check adapter inputs against the descriptors
    pub fn check_inputs(&self, inputs: &[KernelInput]) -> Result<()> {
        if inputs.len() != self.descriptors.len() {
            return Err(PipelineError::ArgumentCount {
                expected: self.descriptors.len(),
                actual: inputs.len(),
            });
        }

        for (index, (descriptor, input)) in self.descriptors.iter().zip(inputs).enumerate() {
            let mismatch = |reason: String| PipelineError::mismatch(index, &descriptor.name, reason);
            match (descriptor.role, input) {
                (ArgRole::Input, KernelInput::Data(data)) => {
                    if data.element_type() != descriptor.element_type {
                        return Err(mismatch(format!(
                            "expected {}, got {}",
                            descriptor.element_type,
                            data.element_type()
                        )));
                    }
                    if data.len() > descriptor.element_count {
                        return Err(mismatch(format!(
                            "{} elements exceed the capacity of {}",
                            data.len(),
                            descriptor.element_count
                        )));
                    }
                }
                (ArgRole::Scalar, KernelInput::Scalar(value)) => {
                    if value.element_type() != descriptor.element_type {
                        return Err(mismatch(format!(
                            "expected {}, got {}",
                            descriptor.element_type,
                            value.element_type()
                        )));
                    }
                }
                (ArgRole::Output, KernelInput::Output) => {}
                (role, input) => {
                    return Err(mismatch(format!(
                        "{} argument given {}",
                        role,
                        input.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write inputs and bind every kernel argument for one launch
    ///
    /// `inputs` must have passed [`check_inputs`](Self::check_inputs).
    /// Every ring advances before any transfer is enqueued, so the rings
    /// stay in step even when binding fails partway. Every input write also
    /// waits for `extra_dependency`.
    pub fn bind(
        &mut self,
        inputs: Vec<KernelInput>,
        extra_dependency: Option<&B::Event>,
    ) -> Result<Bound<B::Event>> {
        for slot in &mut self.slots {
            match slot {
                ArgSlot::Input(buffers) => {
                    buffers.next();
                }
                ArgSlot::Output(buffers) => {
                    buffers.next();
                }
                ArgSlot::Scalar => {}
            }
        }

        let mut bound = Bound {
            writes: Vec::new(),
            output_reuse: Vec::new(),
        };
        for (index, (slot, input)) in self.slots.iter_mut().zip(inputs).enumerate() {
            match (slot, input) {
                (ArgSlot::Input(buffers), KernelInput::Data(data)) => {
                    bound
                        .writes
                        .push(buffers.write(data.into_bytes(), extra_dependency)?);
                    self.kernel
                        .set_arg(index, KernelArg::Buffer(buffers.current()?.clone()))?;
                }
                (ArgSlot::Output(buffers), KernelInput::Output) => {
                    self.kernel
                        .set_arg(index, KernelArg::Buffer(buffers.current()?.clone()))?;
                    if let Some(event) = buffers.pop_oldest_pending() {
                        bound.output_reuse.push(event);
                    }
                }
                (ArgSlot::Scalar, KernelInput::Scalar(value)) => {
                    self.kernel
                        .set_arg(index, KernelArg::Scalar(value.into_bytes()))?;
                }
                (_, input) => {
                    return Err(PipelineError::mismatch(
                        index,
                        self.descriptors[index].name.clone(),
                        format!("unexpected {}", input.kind()),
                    ));
                }
            }
        }

        debug!(
            writes = bound.writes.len(),
            output_reuse = bound.output_reuse.len(),
            "Kernel arguments bound"
        );
        Ok(bound)
    }

    /// Enqueue the kernel with its bound arguments
    pub fn launch(&self, wait_for: &[B::Event]) -> Result<B::Event> {
        Ok(self.kernel_queue.enqueue_kernel(&self.kernel, wait_for)?)
    }

    /// Read the `output`-th output argument into a fresh host block
    pub fn read_output(
        &mut self,
        output: usize,
        kernel_event: &B::Event,
    ) -> Result<(HostBuffer, B::Event)> {
        let index = *self.outputs.get(output).ok_or_else(|| {
            PipelineError::InvalidDescriptor(format!("no output at position {}", output))
        })?;
        match &mut self.slots[index] {
            ArgSlot::Output(buffers) => {
                let dest = HostBuffer::zeroed(buffers.current()?.size());
                let event = buffers.read(&dest, std::slice::from_ref(kernel_event))?;
                Ok((dest, event))
            }
            _ => Err(PipelineError::InvalidDescriptor(format!(
                "argument {} is not an output",
                index
            ))),
        }
    }

    /// Block until the kernel queue and every ring queue drain
    pub fn finish(&self) -> Result<()> {
        self.kernel_queue.finish()?;
        for slot in &self.slots {
            match slot {
                ArgSlot::Input(buffers) => buffers.ring().finish()?,
                ArgSlot::Output(buffers) => buffers.ring().finish()?,
                ArgSlot::Scalar => {}
            }
        }
        Ok(())
    }

    /// Occupancy of every ring, in argument order
    pub fn ring_stats(&self) -> Vec<RingStats> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                ArgSlot::Input(buffers) => Some(buffers.stats()),
                ArgSlot::Output(buffers) => Some(buffers.stats()),
                ArgSlot::Scalar => None,
            })
            .collect()
    }
}

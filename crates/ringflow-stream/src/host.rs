//! Strategy interfaces between the pipeline and its surroundings
//!
//! A [`KernelAdapter`] turns items into kernel inputs and kernel results
//! into output fields; a [`StreamHost`] receives outputs and exactly one
//! ack or fail per item.

use ringflow_device::{from_bytes, to_bytes, Element, ElementType};
use tracing::{error, trace};

use crate::descriptor::ArgumentDescriptor;
use crate::record::{Field, Item, OutputRecord};
use crate::{PipelineError, Result};

/// Typed host-side block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostData {
    element_type: ElementType,
    bytes: Vec<u8>,
}

impl HostData {
    /// Copy typed values into a block
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        Self {
            element_type: T::TYPE,
            bytes: to_bytes(values),
        }
    }

    pub(crate) fn from_raw(element_type: ElementType, bytes: Vec<u8>) -> Self {
        Self {
            element_type,
            bytes,
        }
    }

    /// Element type
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.bytes.len() / self.element_type.size_in_bytes()
    }

    /// Check if block is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Decode as `T`, checking the element type
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::TYPE != self.element_type {
            return Err(PipelineError::Adapter(format!(
                "block holds {}, requested {}",
                self.element_type,
                T::TYPE
            )));
        }
        Ok(from_bytes(&self.bytes)?)
    }
}

/// Scalar kernel argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarValue {
    element_type: ElementType,
    bytes: Vec<u8>,
}

impl ScalarValue {
    /// Wrap a typed value
    pub fn new<T: Element>(value: T) -> Self {
        Self {
            element_type: T::TYPE,
            bytes: to_bytes(&[value]),
        }
    }

    /// Element type
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Value supplied for one kernel argument
#[derive(Debug, Clone, PartialEq)]
pub enum KernelInput {
    /// Contents of an input block
    Data(HostData),
    /// Scalar value
    Scalar(ScalarValue),
    /// Placeholder for an output argument
    Output,
}

impl KernelInput {
    /// Input block from typed values
    pub fn data<T: Element>(values: &[T]) -> Self {
        KernelInput::Data(HostData::from_slice(values))
    }

    /// Scalar from a typed value
    pub fn scalar<T: Element>(value: T) -> Self {
        KernelInput::Scalar(ScalarValue::new(value))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            KernelInput::Data(_) => "input data",
            KernelInput::Scalar(_) => "a scalar",
            KernelInput::Output => "an output placeholder",
        }
    }
}

/// Kernel results of one item, by output name
///
/// Entries follow the descriptor order of the output arguments.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    entries: Vec<(String, HostData)>,
}

impl ResultSet {
    /// Pair output descriptors with their read-back blocks
    pub(crate) fn assemble(
        outputs: &[ArgumentDescriptor],
        blocks: Vec<Option<Vec<u8>>>,
    ) -> Result<Self> {
        if blocks.len() != outputs.len() {
            return Err(PipelineError::Transfer(format!(
                "expected {} result blocks, got {}",
                outputs.len(),
                blocks.len()
            )));
        }
        let entries = outputs
            .iter()
            .zip(blocks)
            .map(|(descriptor, block)| {
                block
                    .map(|bytes| {
                        (
                            descriptor.name.clone(),
                            HostData::from_raw(descriptor.element_type, bytes),
                        )
                    })
                    .ok_or_else(|| {
                        PipelineError::Transfer(format!("`{}` was never read back", descriptor.name))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Raw block of the named output
    pub fn data(&self, name: &str) -> Option<&HostData> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| data)
    }

    /// Typed values of the named output
    pub fn get<T: Element>(&self, name: &str) -> Result<Vec<T>> {
        self.data(name)
            .ok_or_else(|| PipelineError::Adapter(format!("no output named `{}`", name)))?
            .to_vec()
    }

    /// Typed values of the `index`-th output
    pub fn by_index<T: Element>(&self, index: usize) -> Result<Vec<T>> {
        self.entries
            .get(index)
            .ok_or_else(|| PipelineError::Adapter(format!("no output at index {}", index)))?
            .1
            .to_vec()
    }

    /// Output names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Combined size of all output blocks in bytes
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, data)| data.bytes().len()).sum()
    }

    /// Number of outputs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no outputs
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Item-specific kernel logic
pub trait KernelAdapter: Send + Sync {
    /// One [`KernelInput`] per kernel argument, in descriptor order
    fn prepare_compute(&self, item: &Item) -> Result<Vec<KernelInput>>;

    /// Output fields built from the item and its kernel results
    fn prepare_emit(&self, item: &Item, results: &ResultSet) -> Result<Vec<Field>>;
}

/// Upstream stream host
///
/// Called from the pipeline's reconciliation thread, so implementations
/// must be shareable.
pub trait StreamHost: Send + Sync {
    /// Emit an output record
    fn emit(&self, record: OutputRecord) -> Result<()>;

    /// Acknowledge a processed item
    fn ack(&self, item: &Item);

    /// Fail an item (the host owns retry policy)
    fn fail(&self, item: &Item);

    /// Report an error for diagnostics
    fn report_error(&self, message: &str);
}

/// Finish one item: emit + ack on success, report + fail otherwise
///
/// Returns whether the item was emitted.
pub(crate) fn deliver(
    host: &dyn StreamHost,
    adapter: &dyn KernelAdapter,
    item: &Item,
    results: Result<ResultSet>,
) -> bool {
    let emitted = results
        .and_then(|results| adapter.prepare_emit(item, &results))
        .and_then(|fields| {
            host.emit(OutputRecord {
                anchor: item.id,
                fields,
            })
        });

    match emitted {
        Ok(()) => {
            host.ack(item);
            trace!(item = %item.id, "Item emitted");
            true
        }
        Err(e) => {
            error!(item = %item.id, error = %e, "Item failed");
            host.report_error(&format!("item {}: {}", item.id, e));
            host.fail(item);
            false
        }
    }
}

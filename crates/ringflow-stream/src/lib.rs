//! Ring-buffered accelerator pipeline with in-order emission
//!
//! This crate drives a single device kernel over a stream of items. Key
//! features:
//!
//! - **Ring buffers**: `degree` device buffers per kernel argument, reused
//!   in rotation
//! - **Event dependencies**: transfers and launches are chained through
//!   completion events, never through host-side waits
//! - **In-order emission**: results are emitted in submission order even
//!   when transfers complete out of order
//! - **Profiling**: optional per-item device timings appended to a ledger
//! - **Statistics tracking**: submitted, emitted and failed counts with
//!   stage latencies
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────┐   ┌──────────┐   ┌──────────┐
//!  item ───▶ │  write   │──▶│  kernel  │──▶│   read   │──┐
//!            │ (inputs) │   │ (launch) │   │(outputs) │  │ callback
//!            └──────────┘   └──────────┘   └──────────┘  ▼
//!              ring[0..degree]              ring[0..degree]  reconciler ───▶ emit + ack
//!                                                             (in order)    or fail
//! ```
//!
//! [`SyncPipeline`] runs one item at a time and blocks on its reads.
//! [`AsyncPipeline`] keeps up to `degree` items in flight.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ringflow_device::{EmulatorOptions, KernelRegistry};
//! use ringflow_stream::{
//!     ArgumentDescriptor, AsyncPipeline, KernelAdapter, PipelineConfig, StreamHost,
//! };
//!
//! # fn example(
//! #     adapter: Arc<dyn KernelAdapter>,
//! #     host: Arc<dyn StreamHost>,
//! #     kernels: KernelRegistry,
//! # ) -> ringflow_stream::Result<()> {
//! let config = PipelineConfig::new("vadd").with_emulation(true).with_degree(4);
//! let backend = config.discover(kernels, EmulatorOptions::default())?;
//! let descriptors = vec![
//!     ArgumentDescriptor::output::<i32>("C", 1024),
//!     ArgumentDescriptor::input::<i32>("A", 1024),
//!     ArgumentDescriptor::input::<i32>("B", 1024),
//!     ArgumentDescriptor::scalar::<i32>("size"),
//! ];
//!
//! let mut pipeline = AsyncPipeline::new(backend, config, descriptors, adapter, host)?;
//! // pipeline.process(item) for each item, then:
//! pipeline.finish()?;
//! println!("{}", pipeline.stats().summary());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;
pub mod descriptor;
pub mod record;
pub mod host;
pub mod ring;
pub mod transfer;
pub mod profiling;
pub mod stats;
pub mod sync_pipeline;
pub mod async_pipeline;

mod stage;
mod window;

pub use error::{PipelineError, Result};
pub use config::PipelineConfig;
pub use descriptor::{validate_descriptors, ArgRole, ArgumentDescriptor};
pub use record::{Field, Item, ItemId, OutputRecord};
pub use host::{HostData, KernelAdapter, KernelInput, ResultSet, ScalarValue, StreamHost};
pub use ring::{PendingEvents, RingBufferSet, RingStats};
pub use transfer::{ReadBuffers, WriteBuffers};
pub use profiling::{ProfileSpan, ProfilingLedger};
pub use stats::{PipelineStats, SharedStats, StageStats, StatsSummary};
pub use sync_pipeline::SyncPipeline;
pub use async_pipeline::AsyncPipeline;

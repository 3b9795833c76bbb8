//! Rackwatch Agent
//!
//! Store-and-forward delivery of temperature/humidity readings to a fixed
//! HTTP collector.
//!
//! # Overview
//!
//! - [`Scheduler`] polls a [`ReadingSource`] on a fixed interval and owns all state
//! - [`Dispatcher`] sends each valid reading and drains the backlog on success
//! - [`PendingQueue`] persists failed payloads as newline-terminated records
//! - [`ControlHandle`] and [`create_router`] expose the local control surface
//!
//! # Example
//!
//! ```ignore
//! use rackwatch_agent::{AgentConfig, ControlHandle, Dispatcher, HttpTransport, PendingQueue};
//!
//! let config = AgentConfig::load("rackwatch.json5")?;
//! let transport = HttpTransport::new(&config.collector)?;
//! let queue = PendingQueue::from_config(&config.queue);
//! let dispatcher = Dispatcher::new(transport, queue);
//!
//! let (handle, control_rx) = ControlHandle::channel(16);
//! let scheduler = Scheduler::new(source, dispatcher, config.scheduler.interval_ms, control_rx);
//! tokio::spawn(scheduler.run(shutdown_rx));
//! ```

pub mod args;
pub mod clock;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod source;
pub mod transport;

pub use args::AgentArgs;
pub use config::{AgentConfig, SensorConfig, Truncation};
pub use control::{ClearOutcome, ControlHandle, ControlServer, QueueContents, create_router};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{AgentError, Result};
pub use queue::{DrainOutcome, DrainReport, PendingQueue};
pub use scheduler::{Scheduler, SchedulerState, TickOutcome};
pub use source::{ConfiguredSource, ReadingSource, SensorError};
pub use transport::{DeliveryOutcome, HttpTransport, Transport};

// Re-export commonly used types from rackwatch-common
pub use rackwatch_common::{LoggingConfig, Payload, Reading};

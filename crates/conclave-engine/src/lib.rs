//! # conclave-engine
//!
//! The multi-agent execution engine: a [`Router`] that resolves what each
//! agent may call, and a [`Runtime`] that drives agents through model turns,
//! tool dispatch and delegation, either to completion or as a live stream.

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod stream;
pub mod truncate;

pub use config::RuntimeConfig;
pub use error::RunError;
pub use registry::ToolRegistry;
pub use router::{delegate_tool_name, Dispatch, Router, ToolOutcome};
pub use runtime::{RunResult, RunStats, Runtime};
pub use stream::RunStream;

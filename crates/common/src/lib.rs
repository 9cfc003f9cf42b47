//! Common utilities for hmd-tether
//!
//! Shared between the core tether library and the monitor binary:
//! the error taxonomy, logging setup, and pipeline counters.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{DecodeError, Result, TetherError, TransportError};
pub use logging::setup_logging;
pub use metrics::{PipelineMetrics, PipelineStats};

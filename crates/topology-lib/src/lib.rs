//! Topology construction engine
//!
//! This crate turns label-keyed telemetry into a topology graph:
//! - Container identifier parsing for orchestrated and plain workloads
//! - Get-or-create registry of applications, instances and containers
//! - Time series merging and counter increase
//! - Connection resolution through listen addresses and services
//! - Cross-zone and internet traffic classification
//! - External service synthesis for unknown peers

pub mod constructor;
pub mod error;
pub mod model;
pub mod net;
pub mod observability;
pub mod timeseries;

pub use constructor::{ConstructionContext, Constructor, PassStats};
pub use error::{ResolveError, Result};
pub use model::*;
pub use observability::{ConstructorMetrics, StructuredLogger};
pub use timeseries::{Reducer, TimeSeries, Timestamp};

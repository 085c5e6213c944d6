//! Multi-step funnel queries over an append-only event log.
//!
//! A declarative [`FunnelSpec`] is normalized, compiled into a single
//! parameterized SQL statement for the requested mode (ordered, strict or
//! unordered), executed through the `pathline-query` event store and
//! formatted into per-step conversion results. Breakdowns, exclusion events,
//! cohort partitions and time-to-convert histograms ride on the same
//! pipeline.
//!
//! [`FunnelService`] is the orchestrating entry point; the lower-level
//! modules (`normalize`, `steps`, `breakdown`, `engine`, `format`) are public
//! for callers that want to compile without executing.

pub mod actions;
pub mod breakdown;
pub mod engine;
pub mod error;
pub mod format;
pub mod histogram;
pub mod normalize;
pub mod service;
pub mod sql;
pub mod steps;
pub mod types;

pub use actions::{ActionDefinition, ActionMatcher, ActionRegistry, CohortDirectory};
pub use error::{FunnelError, Result};
pub use normalize::{normalize, NormalizedFunnel};
pub use service::FunnelService;
pub use types::{
    ConversionTimeHistogram, FunnelMode, FunnelResult, FunnelSpec, StepDefinition, StepEntity,
};

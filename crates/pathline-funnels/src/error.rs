use pathline_query::StoreError;
use thiserror::Error;

/// Error type for funnel compilation and execution.
///
/// Configuration variants are raised during normalization/compilation, before
/// any query executes; `Execution` wraps event-store failures. Degenerate
/// inputs (zero matching people, empty breakdown sets, zero-sample
/// histograms) are not errors and produce well-formed empty results.
#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("Funnel must define at least one step")]
    MissingSteps,

    #[error("Invalid exclusion range: {0}")]
    InvalidExclusion(String),

    #[error("Exclusion entity matches the entity of step {0} it overlaps")]
    ExclusionOverlapsStep(usize),

    #[error("Exclusions are only supported in ordered funnels")]
    ExclusionsUnsupportedForMode,

    #[error("Group breakdown supports a single property, got {0}")]
    MultiPropertyGroupBreakdown(usize),

    #[error("Group breakdown requires a group type index")]
    MissingGroupTypeIndex,

    #[error("Invalid cohort breakdown value: {0}")]
    InvalidCohortValue(String),

    #[error("Action {0} not found")]
    ActionNotFound(i64),

    #[error("Invalid step range: {0}")]
    InvalidStepRange(String),

    #[error("Query failed: {0}")]
    Execution(#[from] StoreError),
}

impl FunnelError {
    /// Caller mistakes (4xx) as opposed to engine failures (5xx)
    pub fn is_configuration(&self) -> bool {
        !matches!(self, FunnelError::Execution(_))
    }
}

pub type Result<T> = std::result::Result<T, FunnelError>;

//! Funnel specification and result types.
//!
//! A [`FunnelSpec`] is the declarative input, typically deserialized from a
//! JSON request body. Everything here is transient: computed per query
//! invocation and discarded.

use pathline_core::DateRange;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Label used for breakdown values folded out of the top-K set
pub const OTHER_BUCKET: &str = "Other";

/// Cohort id representing the synthetic "all users" cohort
pub const ALL_USERS_COHORT: i64 = 0;

/// What a step (or exclusion) matches on: a concrete event, or an action
/// resolved through the action registry into its constituent events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepEntity {
    Event { name: String },
    Action { id: i64 },
}

/// Which column family a property filter reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PropertyScope {
    Event,
    Person,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperator {
    Exact,
    IsNot,
    Contains,
    IsSet,
    IsNotSet,
}

impl Default for PropertyOperator {
    fn default() -> Self {
        PropertyOperator::Exact
    }
}

/// A single property predicate ANDed onto a step's entity match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PropertyFilter {
    #[serde(default = "PropertyFilter::default_scope")]
    pub scope: PropertyScope,
    pub key: String,
    #[serde(default)]
    pub operator: PropertyOperator,
    /// Compared as text against the extracted JSON value; ignored for
    /// `is_set` / `is_not_set`
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Required when `scope` is `group`
    #[serde(default)]
    pub group_type_index: Option<u8>,
}

impl PropertyFilter {
    fn default_scope() -> PropertyScope {
        PropertyScope::Event
    }
}

/// One stage of the funnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StepDefinition {
    pub order: usize,
    #[serde(flatten)]
    pub entity: StepEntity,
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl IntervalUnit {
    pub fn seconds(&self) -> i64 {
        match self {
            IntervalUnit::Second => 1,
            IntervalUnit::Minute => 60,
            IntervalUnit::Hour => 3_600,
            IntervalUnit::Day => 86_400,
            IntervalUnit::Week => 7 * 86_400,
            // Calendar months are irregular; funnels use a fixed 30 days
            IntervalUnit::Month => 30 * 86_400,
        }
    }
}

/// Maximum allowed time between the first step and any subsequent step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversionWindow {
    pub interval_value: i64,
    pub interval_unit: IntervalUnit,
}

impl ConversionWindow {
    pub fn to_seconds(&self) -> i64 {
        self.interval_value * self.interval_unit.seconds()
    }
}

/// Ordering semantics of the funnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FunnelMode {
    Ordered,
    Strict,
    Unordered,
}

impl Default for FunnelMode {
    fn default() -> Self {
        FunnelMode::Ordered
    }
}

/// Whether the funnel counts persons or group entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationTarget {
    Person,
    Group { group_type_index: u8 },
}

impl Default for AggregationTarget {
    fn default() -> Self {
        AggregationTarget::Person
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownType {
    Event,
    Person,
    Cohort,
    Group,
}

/// Single or multiple breakdown properties, boxed into a canonical list
/// during normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum BreakdownProperty {
    Single(String),
    Multiple(Vec<String>),
}

impl BreakdownProperty {
    pub fn into_list(self) -> Vec<String> {
        match self {
            BreakdownProperty::Single(p) => vec![p],
            BreakdownProperty::Multiple(ps) => ps,
        }
    }
}

/// Breakdown dimension splitting funnel results into parallel partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BreakdownSpec {
    #[serde(rename = "type")]
    pub kind: BreakdownType,
    pub property: BreakdownProperty,
    /// Top-K bound; values outside the top-K collapse into `"Other"`
    #[serde(default)]
    pub limit: Option<u32>,
    /// Required for `group` breakdowns
    #[serde(default)]
    pub group_type_index: Option<u8>,
}

/// Disqualifies a person if the entity occurs between two steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExclusionSpec {
    #[serde(flatten)]
    pub entity: StepEntity,
    pub funnel_from_step: usize,
    /// When unset the exclusion window ends at `latest_from + conversion
    /// window`
    #[serde(default)]
    pub funnel_to_step: Option<usize>,
}

/// Declarative multi-step funnel specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunnelSpec {
    pub project_id: i32,
    pub steps: Vec<StepDefinition>,
    pub date_range: DateRange,
    #[serde(default)]
    pub window: Option<ConversionWindow>,
    #[serde(default)]
    pub mode: FunnelMode,
    #[serde(default)]
    pub aggregation: AggregationTarget,
    #[serde(default)]
    pub breakdown: Option<BreakdownSpec>,
    #[serde(default)]
    pub exclusions: Vec<ExclusionSpec>,
    /// Breakdown partition paging
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Carry session/window id columns for session-replay drill-down
    #[serde(default)]
    pub include_recordings: bool,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How a drill-down person list should match the breakdown label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownMatch {
    Ordinal,
    Exact,
}

/// Request descriptor for a downstream person-list query; positive
/// `funnel_step` selects people who converted at that step, negative selects
/// people who dropped there. Not executed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DrilldownSelector {
    pub funnel_step: i64,
    #[serde(default)]
    pub breakdown_value: Option<String>,
    pub breakdown_match: BreakdownMatch,
}

/// Summary of one funnel step within one breakdown partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StepResult {
    pub step_index: usize,
    pub label: String,
    pub matched_count: u64,
    /// Percentage of the previous step that completed this step
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
    /// Undefined for step 0
    #[serde(default)]
    pub average_conversion_time_seconds: Option<f64>,
    #[serde(default)]
    pub median_conversion_time_seconds: Option<f64>,
    #[serde(default)]
    pub breakdown_value: Option<String>,
    pub converted_selector: DrilldownSelector,
    pub dropped_selector: DrilldownSelector,
}

/// One ordered step list per breakdown partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunnelPartition {
    #[serde(default)]
    pub breakdown_value: Option<String>,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FunnelResult {
    pub partitions: Vec<FunnelPartition>,
}

/// One ranked breakdown value discovered by the auxiliary ranking query;
/// computed once per query, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BreakdownBucket {
    pub value: String,
    pub ordinal_rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HistogramBin {
    pub from_seconds: i64,
    pub to_seconds: i64,
    pub person_count: u64,
}

/// Binned distribution of conversion durations between two chosen steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConversionTimeHistogram {
    pub bins: Vec<HistogramBin>,
}

impl StepEntity {
    /// Display label; actions get their registry name attached by the
    /// formatter when available
    pub fn default_label(&self) -> String {
        match self {
            StepEntity::Event { name } => name.clone(),
            StepEntity::Action { id } => format!("action {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funnel_spec_deserializes_with_defaults() {
        let body = serde_json::json!({
            "project_id": 1,
            "steps": [
                {"order": 0, "kind": "event", "name": "sign up"},
                {"order": 1, "kind": "action", "id": 42}
            ],
            "date_range": {"start": "2024-01-01T00:00:00Z", "end": "2024-02-01T00:00:00Z"}
        });

        let spec: FunnelSpec = serde_json::from_value(body).unwrap();
        assert_eq!(spec.mode, FunnelMode::Ordered);
        assert_eq!(spec.aggregation, AggregationTarget::Person);
        assert!(spec.window.is_none());
        assert!(spec.exclusions.is_empty());
        assert_eq!(
            spec.steps[1].entity,
            StepEntity::Action { id: 42 },
        );
    }

    #[test]
    fn test_breakdown_property_boxes_single_and_multi() {
        let single: BreakdownProperty = serde_json::from_str("\"$browser\"").unwrap();
        let multi: BreakdownProperty =
            serde_json::from_str("[\"$browser\", \"$os\"]").unwrap();
        assert_eq!(single.into_list(), vec!["$browser"]);
        assert_eq!(multi.into_list(), vec!["$browser", "$os"]);
    }

    #[test]
    fn test_conversion_window_seconds() {
        let window = ConversionWindow {
            interval_value: 7,
            interval_unit: IntervalUnit::Day,
        };
        assert_eq!(window.to_seconds(), 7 * 86_400);
    }
}

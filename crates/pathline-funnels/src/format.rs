//! Result formatter: decodes aggregated rows and derives the presentation
//! fields the raw counts do not carry.
//!
//! The engine reports exact per-step reach counts (people whose best attempt
//! ended at step `k`); the formatter accumulates them into "reached at least
//! step `k`" totals, computes conversion and drop-off rates, resolves
//! breakdown display labels, and attaches drill-down selectors for
//! downstream person-list queries.

use crate::actions::CohortDirectory;
use crate::error::Result;
use crate::normalize::{NormalizedBreakdown, NormalizedFunnel};
use crate::steps::CompiledStep;
use crate::types::{
    BreakdownMatch, BreakdownType, DrilldownSelector, FunnelMode, FunnelPartition, FunnelResult,
    StepResult, ALL_USERS_COHORT, OTHER_BUCKET,
};
use pathline_query::StoreError;
use sea_orm::QueryResult;

/// One decoded aggregation row, before rates and labels are derived
#[derive(Debug, Clone, PartialEq)]
pub struct RawPartitionRow {
    pub prop: Option<String>,
    /// `exact_counts[k]`: people whose best attempt reached exactly `k + 1`
    /// steps
    pub exact_counts: Vec<i64>,
    pub average_seconds: Vec<Option<f64>>,
    pub median_seconds: Vec<Option<f64>>,
}

pub fn decode_rows(
    rows: &[QueryResult],
    step_count: usize,
    has_breakdown: bool,
) -> Result<Vec<RawPartitionRow>> {
    rows.iter()
        .map(|row| {
            let prop = if has_breakdown {
                row.try_get("", "prop").map_err(StoreError::from)?
            } else {
                None
            };

            let mut exact_counts = Vec::with_capacity(step_count);
            for k in 1..=step_count {
                let count: i64 = row
                    .try_get("", &format!("step_{k}"))
                    .map_err(StoreError::from)?;
                exact_counts.push(count);
            }

            let mut average_seconds = Vec::with_capacity(step_count.saturating_sub(1));
            let mut median_seconds = Vec::with_capacity(step_count.saturating_sub(1));
            for i in 1..step_count {
                average_seconds.push(
                    row.try_get("", &format!("step_{i}_average_conversion_time"))
                        .map_err(StoreError::from)?,
                );
                median_seconds.push(
                    row.try_get("", &format!("step_{i}_median_conversion_time"))
                        .map_err(StoreError::from)?,
                );
            }

            Ok(RawPartitionRow {
                prop,
                exact_counts,
                average_seconds,
                median_seconds,
            })
        })
        .collect()
}

pub fn assemble(
    funnel: &NormalizedFunnel,
    steps: &[CompiledStep],
    rows: Vec<RawPartitionRow>,
    cohorts: &dyn CohortDirectory,
) -> FunnelResult {
    let n = steps.len();

    // Zero matching people is a valid result, not an error
    let rows = if rows.is_empty() && funnel.breakdown.is_none() {
        vec![RawPartitionRow {
            prop: None,
            exact_counts: vec![0; n],
            average_seconds: vec![None; n.saturating_sub(1)],
            median_seconds: vec![None; n.saturating_sub(1)],
        }]
    } else {
        rows
    };

    let partitions = rows
        .into_iter()
        .map(|row| {
            let label = row
                .prop
                .as_deref()
                .map(|raw| display_value(funnel.breakdown.as_ref(), raw, cohorts));

            let mut reached = vec![0u64; n];
            let mut running = 0i64;
            for k in (0..n).rev() {
                running += row.exact_counts.get(k).copied().unwrap_or(0);
                reached[k] = running.max(0) as u64;
            }

            let step_results = steps
                .iter()
                .enumerate()
                .map(|(k, step)| {
                    let conversion_rate = if k == 0 {
                        100.0
                    } else if reached[k - 1] > 0 {
                        reached[k] as f64 / reached[k - 1] as f64 * 100.0
                    } else {
                        0.0
                    };
                    let (average, median) = if k == 0 {
                        (None, None)
                    } else {
                        (
                            row.average_seconds.get(k - 1).copied().flatten(),
                            row.median_seconds.get(k - 1).copied().flatten(),
                        )
                    };
                    StepResult {
                        step_index: k,
                        label: step.label.clone(),
                        matched_count: reached[k],
                        conversion_rate,
                        drop_off_rate: 100.0 - conversion_rate,
                        average_conversion_time_seconds: average,
                        median_conversion_time_seconds: median,
                        breakdown_value: label.clone(),
                        converted_selector: selector(funnel.mode, (k + 1) as i64, label.as_deref()),
                        dropped_selector: selector(funnel.mode, -((k + 1) as i64), label.as_deref()),
                    }
                })
                .collect();

            FunnelPartition {
                breakdown_value: label,
                steps: step_results,
            }
        })
        .collect();

    FunnelResult { partitions }
}

fn selector(
    mode: FunnelMode,
    funnel_step: i64,
    breakdown_value: Option<&str>,
) -> DrilldownSelector {
    // The "Other" bucket is synthetic; person lists match it by rank.
    // Strict person lists re-check the label directly, so they stay exact.
    let breakdown_match = if breakdown_value == Some(OTHER_BUCKET) && mode != FunnelMode::Strict {
        BreakdownMatch::Ordinal
    } else {
        BreakdownMatch::Exact
    };
    DrilldownSelector {
        funnel_step,
        breakdown_value: breakdown_value.map(String::from),
        breakdown_match,
    }
}

fn display_value(
    breakdown: Option<&NormalizedBreakdown>,
    raw: &str,
    cohorts: &dyn CohortDirectory,
) -> String {
    match breakdown {
        Some(b) if b.kind == BreakdownType::Cohort => match raw.parse::<i64>() {
            Ok(ALL_USERS_COHORT) => "all users".to_string(),
            Ok(id) => cohorts
                .display_name(id)
                .unwrap_or_else(|| raw.to_string()),
            Err(_) => raw.to_string(),
        },
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{InMemoryActionRegistry, InMemoryCohortDirectory};
    use crate::normalize::normalize;
    use crate::steps::build_step;
    use crate::types::{
        AggregationTarget, BreakdownProperty, BreakdownSpec, FunnelMode, FunnelSpec,
        StepDefinition, StepEntity,
    };
    use pathline_core::{DateRange, UtcDateTime};

    fn fixture(step_names: &[&str], breakdown: Option<BreakdownSpec>) -> (NormalizedFunnel, Vec<CompiledStep>) {
        let start = "2024-01-01T00:00:00Z".parse::<UtcDateTime>().unwrap();
        let end = "2024-02-01T00:00:00Z".parse::<UtcDateTime>().unwrap();
        let spec = FunnelSpec {
            project_id: 1,
            steps: step_names
                .iter()
                .enumerate()
                .map(|(order, name)| StepDefinition {
                    order,
                    entity: StepEntity::Event {
                        name: name.to_string(),
                    },
                    properties: vec![],
                })
                .collect(),
            date_range: DateRange::new(start, end),
            window: None,
            mode: FunnelMode::Ordered,
            aggregation: AggregationTarget::Person,
            breakdown,
            exclusions: vec![],
            limit: None,
            offset: None,
            include_recordings: false,
        };
        let funnel = normalize(spec).unwrap();
        let registry = InMemoryActionRegistry::new();
        let steps = funnel
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| build_step(i, s, &registry).unwrap())
            .collect();
        (funnel, steps)
    }

    #[test]
    fn test_counts_accumulate_from_exact_to_reached() {
        let (funnel, steps) = fixture(&["a", "b", "c"], None);
        let rows = vec![RawPartitionRow {
            prop: None,
            exact_counts: vec![2, 3, 5],
            average_seconds: vec![Some(120.0), Some(30.0)],
            median_seconds: vec![Some(90.0), Some(20.0)],
        }];
        let cohorts = InMemoryCohortDirectory::new();

        let result = assemble(&funnel, &steps, rows, &cohorts);
        let partition = &result.partitions[0];
        assert_eq!(partition.steps[0].matched_count, 10);
        assert_eq!(partition.steps[1].matched_count, 8);
        assert_eq!(partition.steps[2].matched_count, 5);
        assert_eq!(partition.steps[1].conversion_rate, 80.0);
        assert_eq!(partition.steps[1].drop_off_rate, 20.0);
        assert_eq!(partition.steps[2].conversion_rate, 62.5);
        assert_eq!(
            partition.steps[1].average_conversion_time_seconds,
            Some(120.0)
        );
        assert!(partition.steps[0].average_conversion_time_seconds.is_none());
    }

    #[test]
    fn test_zero_rows_synthesize_an_empty_partition() {
        let (funnel, steps) = fixture(&["a", "b"], None);
        let cohorts = InMemoryCohortDirectory::new();

        let result = assemble(&funnel, &steps, vec![], &cohorts);
        assert_eq!(result.partitions.len(), 1);
        let partition = &result.partitions[0];
        assert_eq!(partition.steps.len(), 2);
        assert_eq!(partition.steps[0].matched_count, 0);
        assert_eq!(partition.steps[0].conversion_rate, 100.0);
        assert_eq!(partition.steps[1].conversion_rate, 0.0);
    }

    #[test]
    fn test_cohort_labels_resolve_through_directory() {
        let breakdown = BreakdownSpec {
            kind: BreakdownType::Cohort,
            property: BreakdownProperty::Multiple(vec!["3".to_string(), "all".to_string()]),
            limit: None,
            group_type_index: None,
        };
        let (funnel, steps) = fixture(&["a", "b"], Some(breakdown));
        let mut cohorts = InMemoryCohortDirectory::new();
        cohorts.insert(3, "Power users");

        let rows = vec![
            RawPartitionRow {
                prop: Some("0".to_string()),
                exact_counts: vec![1, 1],
                average_seconds: vec![None],
                median_seconds: vec![None],
            },
            RawPartitionRow {
                prop: Some("3".to_string()),
                exact_counts: vec![0, 1],
                average_seconds: vec![Some(5.0)],
                median_seconds: vec![Some(5.0)],
            },
        ];
        let result = assemble(&funnel, &steps, rows, &cohorts);
        assert_eq!(result.partitions[0].breakdown_value.as_deref(), Some("all users"));
        assert_eq!(
            result.partitions[1].breakdown_value.as_deref(),
            Some("Power users")
        );
    }

    #[test]
    fn test_other_bucket_selectors_match_by_rank() {
        let breakdown = BreakdownSpec {
            kind: BreakdownType::Event,
            property: BreakdownProperty::Single("$browser".to_string()),
            limit: Some(1),
            group_type_index: None,
        };
        let (funnel, steps) = fixture(&["a", "b"], Some(breakdown));
        let cohorts = InMemoryCohortDirectory::new();

        let rows = vec![RawPartitionRow {
            prop: Some(OTHER_BUCKET.to_string()),
            exact_counts: vec![1, 0],
            average_seconds: vec![None],
            median_seconds: vec![None],
        }];
        let result = assemble(&funnel, &steps, rows, &cohorts);
        let step = &result.partitions[0].steps[0];
        assert_eq!(step.converted_selector.breakdown_match, BreakdownMatch::Ordinal);
        assert_eq!(step.converted_selector.funnel_step, 1);
        assert_eq!(step.dropped_selector.funnel_step, -1);
    }

    #[test]
    fn test_strict_selectors_always_match_exactly() {
        let breakdown = BreakdownSpec {
            kind: BreakdownType::Event,
            property: BreakdownProperty::Single("$browser".to_string()),
            limit: Some(1),
            group_type_index: None,
        };
        let (mut funnel, steps) = fixture(&["a", "b"], Some(breakdown));
        funnel.mode = FunnelMode::Strict;
        let cohorts = InMemoryCohortDirectory::new();

        let rows = vec![RawPartitionRow {
            prop: Some(OTHER_BUCKET.to_string()),
            exact_counts: vec![1, 0],
            average_seconds: vec![None],
            median_seconds: vec![None],
        }];
        let result = assemble(&funnel, &steps, rows, &cohorts);
        let step = &result.partitions[0].steps[0];
        assert_eq!(step.converted_selector.breakdown_match, BreakdownMatch::Exact);
    }
}

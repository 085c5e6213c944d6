//! Spec normalization: fills defaults, validates exclusion ranges and
//! breakdown shape, and boxes breakdown properties into a canonical list.
//!
//! Every `ConfigurationError` the compiler can raise is raised here, before
//! any query is built or executed.

use crate::error::{FunnelError, Result};
use crate::types::*;
use pathline_core::DateRange;

/// Default conversion window when the spec leaves it unset
pub const DEFAULT_WINDOW_DAYS: i64 = 14;

/// Default breakdown partition page size
pub const DEFAULT_LIMIT: u64 = 100;

/// Default top-K bound for breakdown value discovery
pub const DEFAULT_BREAKDOWN_LIMIT: u32 = 25;

/// Canonicalized breakdown: properties always a list, limit always set
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBreakdown {
    pub kind: BreakdownType,
    pub properties: Vec<String>,
    pub limit: u32,
    pub group_type_index: Option<u8>,
}

/// A validated funnel spec with all defaults resolved; input to the compiler
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFunnel {
    pub project_id: i32,
    pub steps: Vec<StepDefinition>,
    pub date_range: DateRange,
    pub window_seconds: i64,
    pub mode: FunnelMode,
    pub aggregation: AggregationTarget,
    pub breakdown: Option<NormalizedBreakdown>,
    pub exclusions: Vec<ExclusionSpec>,
    pub limit: u64,
    pub offset: u64,
    pub include_recordings: bool,
}

impl NormalizedFunnel {
    pub fn max_steps(&self) -> usize {
        self.steps.len()
    }
}

pub fn normalize(spec: FunnelSpec) -> Result<NormalizedFunnel> {
    if spec.steps.is_empty() {
        return Err(FunnelError::MissingSteps);
    }

    let mut steps = spec.steps;
    steps.sort_by_key(|s| s.order);

    let last_step = steps.len() - 1;
    validate_exclusions(&spec.exclusions, &steps, last_step, spec.mode)?;

    let breakdown = spec.breakdown.map(normalize_breakdown).transpose()?;

    let window_seconds = spec
        .window
        .map(|w| w.to_seconds())
        .unwrap_or(DEFAULT_WINDOW_DAYS * 86_400);

    Ok(NormalizedFunnel {
        project_id: spec.project_id,
        steps,
        date_range: spec.date_range,
        window_seconds,
        mode: spec.mode,
        aggregation: spec.aggregation,
        breakdown,
        exclusions: spec.exclusions,
        limit: spec.limit.unwrap_or(DEFAULT_LIMIT),
        offset: spec.offset.unwrap_or(0),
        include_recordings: spec.include_recordings,
    })
}

fn validate_exclusions(
    exclusions: &[ExclusionSpec],
    steps: &[StepDefinition],
    last_step: usize,
    mode: FunnelMode,
) -> Result<()> {
    if exclusions.is_empty() {
        return Ok(());
    }
    if mode != FunnelMode::Ordered {
        return Err(FunnelError::ExclusionsUnsupportedForMode);
    }

    for exclusion in exclusions {
        let from = exclusion.funnel_from_step;
        if let Some(to) = exclusion.funnel_to_step {
            if from >= to {
                return Err(FunnelError::InvalidExclusion(format!(
                    "from_step {from} must be smaller than to_step {to}"
                )));
            }
            if to > last_step {
                return Err(FunnelError::InvalidExclusion(format!(
                    "to_step {to} is out of bounds, funnel ends at step {last_step}"
                )));
            }
        } else if from >= last_step {
            return Err(FunnelError::InvalidExclusion(format!(
                "from_step {from} leaves no room before the final step {last_step}"
            )));
        }

        // The excluded entity must differ from every step entity its range
        // overlaps; identical adjacent steps make the exclusion ambiguous and
        // stay unsupported.
        let to = exclusion.funnel_to_step.unwrap_or(last_step);
        for (index, step) in steps.iter().enumerate().take(to + 1).skip(from) {
            if step.entity == exclusion.entity {
                return Err(FunnelError::ExclusionOverlapsStep(index));
            }
        }
    }
    Ok(())
}

fn normalize_breakdown(spec: BreakdownSpec) -> Result<NormalizedBreakdown> {
    let properties = spec.property.into_list();

    if spec.kind == BreakdownType::Group {
        if properties.len() > 1 {
            return Err(FunnelError::MultiPropertyGroupBreakdown(properties.len()));
        }
        if spec.group_type_index.is_none() {
            return Err(FunnelError::MissingGroupTypeIndex);
        }
    }

    Ok(NormalizedBreakdown {
        kind: spec.kind,
        properties,
        limit: spec.limit.unwrap_or(DEFAULT_BREAKDOWN_LIMIT),
        group_type_index: spec.group_type_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathline_core::UtcDateTime;

    fn event_step(order: usize, name: &str) -> StepDefinition {
        StepDefinition {
            order,
            entity: StepEntity::Event {
                name: name.to_string(),
            },
            properties: vec![],
        }
    }

    fn base_spec(steps: Vec<StepDefinition>) -> FunnelSpec {
        let start = "2024-01-01T00:00:00Z".parse::<UtcDateTime>().unwrap();
        let end = "2024-02-01T00:00:00Z".parse::<UtcDateTime>().unwrap();
        FunnelSpec {
            project_id: 1,
            steps,
            date_range: DateRange::new(start, end),
            window: None,
            mode: FunnelMode::Ordered,
            aggregation: AggregationTarget::Person,
            breakdown: None,
            exclusions: vec![],
            limit: None,
            offset: None,
            include_recordings: false,
        }
    }

    #[test]
    fn test_defaults_are_filled() {
        let normalized =
            normalize(base_spec(vec![event_step(0, "sign up"), event_step(1, "buy")])).unwrap();
        assert_eq!(normalized.window_seconds, DEFAULT_WINDOW_DAYS * 86_400);
        assert_eq!(normalized.limit, DEFAULT_LIMIT);
        assert_eq!(normalized.offset, 0);
    }

    #[test]
    fn test_steps_are_sorted_by_order() {
        let normalized =
            normalize(base_spec(vec![event_step(1, "buy"), event_step(0, "sign up")])).unwrap();
        assert_eq!(
            normalized.steps[0].entity,
            StepEntity::Event {
                name: "sign up".to_string()
            }
        );
    }

    #[test]
    fn test_empty_steps_rejected() {
        assert!(matches!(
            normalize(base_spec(vec![])),
            Err(FunnelError::MissingSteps)
        ));
    }

    #[test]
    fn test_inverted_exclusion_range_rejected() {
        let mut spec = base_spec(vec![
            event_step(0, "a"),
            event_step(1, "b"),
            event_step(2, "c"),
        ]);
        spec.exclusions = vec![ExclusionSpec {
            entity: StepEntity::Event {
                name: "refund".to_string(),
            },
            funnel_from_step: 2,
            funnel_to_step: Some(1),
        }];
        assert!(matches!(
            normalize(spec),
            Err(FunnelError::InvalidExclusion(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_exclusion_rejected() {
        let mut spec = base_spec(vec![event_step(0, "a"), event_step(1, "b")]);
        spec.exclusions = vec![ExclusionSpec {
            entity: StepEntity::Event {
                name: "refund".to_string(),
            },
            funnel_from_step: 0,
            funnel_to_step: Some(5),
        }];
        assert!(matches!(
            normalize(spec),
            Err(FunnelError::InvalidExclusion(_))
        ));
    }

    #[test]
    fn test_exclusion_matching_overlapped_step_rejected() {
        let mut spec = base_spec(vec![
            event_step(0, "a"),
            event_step(1, "b"),
            event_step(2, "c"),
        ]);
        spec.exclusions = vec![ExclusionSpec {
            entity: StepEntity::Event {
                name: "b".to_string(),
            },
            funnel_from_step: 0,
            funnel_to_step: Some(2),
        }];
        assert!(matches!(
            normalize(spec),
            Err(FunnelError::ExclusionOverlapsStep(1))
        ));
    }

    #[test]
    fn test_exclusions_rejected_outside_ordered_mode() {
        let mut spec = base_spec(vec![event_step(0, "a"), event_step(1, "b")]);
        spec.mode = FunnelMode::Unordered;
        spec.exclusions = vec![ExclusionSpec {
            entity: StepEntity::Event {
                name: "refund".to_string(),
            },
            funnel_from_step: 0,
            funnel_to_step: Some(1),
        }];
        assert!(matches!(
            normalize(spec),
            Err(FunnelError::ExclusionsUnsupportedForMode)
        ));
    }

    #[test]
    fn test_multi_property_group_breakdown_rejected() {
        let mut spec = base_spec(vec![event_step(0, "a")]);
        spec.breakdown = Some(BreakdownSpec {
            kind: BreakdownType::Group,
            property: BreakdownProperty::Multiple(vec!["plan".into(), "tier".into()]),
            limit: None,
            group_type_index: Some(0),
        });
        assert!(matches!(
            normalize(spec),
            Err(FunnelError::MultiPropertyGroupBreakdown(2))
        ));
    }

    #[test]
    fn test_breakdown_limit_defaulted() {
        let mut spec = base_spec(vec![event_step(0, "a")]);
        spec.breakdown = Some(BreakdownSpec {
            kind: BreakdownType::Event,
            property: BreakdownProperty::Single("$browser".into()),
            limit: None,
            group_type_index: None,
        });
        let normalized = normalize(spec).unwrap();
        let breakdown = normalized.breakdown.unwrap();
        assert_eq!(breakdown.limit, DEFAULT_BREAKDOWN_LIMIT);
        assert_eq!(breakdown.properties, vec!["$browser"]);
    }
}

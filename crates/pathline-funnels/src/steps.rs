//! Step condition builder: compiles a step (event or action plus property
//! filters) into a boolean predicate over the event row. The engines derive
//! the `step_i` / `latest_i` columns from that predicate.

use crate::actions::ActionRegistry;
use crate::error::{FunnelError, Result};
use crate::sql::expr::{and_all, binary, col, eq, or_all, param, Expr};
use crate::sql::BinOp;
use crate::types::{PropertyFilter, PropertyOperator, PropertyScope, StepDefinition, StepEntity};
use pathline_query::Params;

/// A step compiled to a predicate; one per funnel step, in order
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub index: usize,
    pub label: String,
    pub entity: StepEntity,
    pub predicate: Expr,
    pub params: Params,
}

pub fn build_step(
    index: usize,
    step: &StepDefinition,
    registry: &dyn ActionRegistry,
) -> Result<CompiledStep> {
    let prefix = format!("step_{index}");
    let (predicate, params, label) =
        entity_predicate(&prefix, &step.entity, &step.properties, registry)?;
    Ok(CompiledStep {
        index,
        label,
        entity: step.entity.clone(),
        predicate,
        params,
    })
}

/// Predicate + params for an entity match; shared between steps and
/// exclusion pseudo-steps
pub fn entity_predicate(
    prefix: &str,
    entity: &StepEntity,
    properties: &[PropertyFilter],
    registry: &dyn ActionRegistry,
) -> Result<(Expr, Params, String)> {
    let mut params = Params::new();

    let (entity_expr, label) = match entity {
        StepEntity::Event { name } => {
            let param_name = format!("{prefix}_event");
            params = params.with(&param_name, name.clone());
            (eq(col("events.event"), param(param_name)), name.clone())
        }
        StepEntity::Action { id } => {
            let action = registry
                .resolve(*id)
                .ok_or(FunnelError::ActionNotFound(*id))?;
            // Each underlying sub-event is OR'd into the predicate
            let mut matchers = Vec::with_capacity(action.matchers.len());
            for (k, matcher) in action.matchers.iter().enumerate() {
                let param_name = format!("{prefix}_action_{k}_event");
                params = params.with(&param_name, matcher.event.clone());
                let mut parts = vec![eq(col("events.event"), param(param_name))];
                for (j, filter) in matcher.properties.iter().enumerate() {
                    let (expr, filter_params) =
                        property_expr(filter, &format!("{prefix}_action_{k}_filter_{j}"))?;
                    parts.push(expr);
                    params = params.merge(filter_params);
                }
                matchers.push(and_all(parts));
            }
            (or_all(matchers), action.name.clone())
        }
    };

    // Step-level property filters are ANDed on top
    let mut parts = vec![entity_expr];
    for (j, filter) in properties.iter().enumerate() {
        let (expr, filter_params) = property_expr(filter, &format!("{prefix}_filter_{j}"))?;
        parts.push(expr);
        params = params.merge(filter_params);
    }

    Ok((and_all(parts), params, label))
}

fn property_expr(filter: &PropertyFilter, prefix: &str) -> Result<(Expr, Params)> {
    let column = match filter.scope {
        PropertyScope::Event => "events.properties".to_string(),
        PropertyScope::Person => "events.person_properties".to_string(),
        PropertyScope::Group => {
            let index = filter
                .group_type_index
                .ok_or(FunnelError::MissingGroupTypeIndex)?;
            format!("events.group_{index}_properties")
        }
    };

    let key_param = format!("{prefix}_key");
    let mut params = Params::single(&key_param, filter.key.clone());
    let extracted = Expr::JsonText(Box::new(col(column)), Box::new(param(key_param)));

    let expr = match filter.operator {
        PropertyOperator::IsSet => Expr::IsNotNull(Box::new(extracted)),
        PropertyOperator::IsNotSet => Expr::IsNull(Box::new(extracted)),
        PropertyOperator::Exact | PropertyOperator::IsNot | PropertyOperator::Contains => {
            let Some(value) = filter.value.as_ref() else {
                // A comparison with no value can only check presence
                tracing::warn!(key = %filter.key, "property filter without value, treating as is_set");
                return Ok((Expr::IsNotNull(Box::new(extracted)), params));
            };
            let mut text = value_as_text(value);
            let op = match filter.operator {
                PropertyOperator::Exact => BinOp::Eq,
                PropertyOperator::IsNot => BinOp::IsDistinctFrom,
                PropertyOperator::Contains => {
                    text = format!("%{text}%");
                    BinOp::ILike
                }
                _ => unreachable!(),
            };
            let value_param = format!("{prefix}_value");
            params = params.with(&value_param, text);
            binary(extracted, op, param(value_param))
        }
    };

    Ok((expr, params))
}

/// JSONB `->>` extraction yields text, so filter values compare as text
fn value_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionDefinition, ActionMatcher, InMemoryActionRegistry};
    use crate::sql::{PostgresRenderer, SqlRenderer};
    use pathline_query::Binder;

    fn render(step: &CompiledStep) -> String {
        let mut binder = Binder::new(step.params.clone());
        PostgresRenderer::new()
            .render(&step.predicate, &mut binder)
            .unwrap()
    }

    fn event_step(name: &str, properties: Vec<PropertyFilter>) -> StepDefinition {
        StepDefinition {
            order: 0,
            entity: StepEntity::Event {
                name: name.to_string(),
            },
            properties,
        }
    }

    #[test]
    fn test_plain_event_step() {
        let registry = InMemoryActionRegistry::new();
        let step = build_step(0, &event_step("sign up", vec![]), &registry).unwrap();
        assert_eq!(render(&step), "(events.event = $1)");
        assert_eq!(step.label, "sign up");
    }

    #[test]
    fn test_property_filters_are_anded() {
        let registry = InMemoryActionRegistry::new();
        let step = build_step(
            0,
            &event_step(
                "pageview",
                vec![PropertyFilter {
                    scope: PropertyScope::Event,
                    key: "$browser".to_string(),
                    operator: PropertyOperator::Exact,
                    value: Some(serde_json::json!("Chrome")),
                    group_type_index: None,
                }],
            ),
            &registry,
        )
        .unwrap();
        assert_eq!(
            render(&step),
            "((events.event = $1) AND ((events.properties ->> $2) = $3))"
        );
    }

    #[test]
    fn test_action_sub_events_are_ored() {
        let mut registry = InMemoryActionRegistry::new();
        registry.insert(ActionDefinition {
            id: 7,
            name: "Signed up".to_string(),
            matchers: vec![
                ActionMatcher {
                    event: "sign up clicked".to_string(),
                    properties: vec![],
                },
                ActionMatcher {
                    event: "sign up submitted".to_string(),
                    properties: vec![],
                },
            ],
        });

        let step = build_step(
            1,
            &StepDefinition {
                order: 1,
                entity: StepEntity::Action { id: 7 },
                properties: vec![],
            },
            &registry,
        )
        .unwrap();
        assert_eq!(
            render(&step),
            "((events.event = $1) OR (events.event = $2))"
        );
        assert_eq!(step.label, "Signed up");
    }

    #[test]
    fn test_unresolvable_action_is_configuration_error() {
        let registry = InMemoryActionRegistry::new();
        let result = build_step(
            0,
            &StepDefinition {
                order: 0,
                entity: StepEntity::Action { id: 99 },
                properties: vec![],
            },
            &registry,
        );
        assert!(matches!(result, Err(FunnelError::ActionNotFound(99))));
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_person_scope_and_set_operators() {
        let registry = InMemoryActionRegistry::new();
        let step = build_step(
            0,
            &event_step(
                "buy",
                vec![PropertyFilter {
                    scope: PropertyScope::Person,
                    key: "email".to_string(),
                    operator: PropertyOperator::IsSet,
                    value: None,
                    group_type_index: None,
                }],
            ),
            &registry,
        )
        .unwrap();
        assert_eq!(
            render(&step),
            "((events.event = $1) AND ((events.person_properties ->> $2) IS NOT NULL))"
        );
    }
}

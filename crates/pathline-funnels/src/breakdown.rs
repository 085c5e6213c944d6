//! Breakdown resolver: value-selection expressions per breakdown type, the
//! top-K value discovery query, folding of overflow values into the
//! `"Other"` bucket, and the cohort-membership join.

use crate::error::{FunnelError, Result};
use crate::normalize::{NormalizedBreakdown, NormalizedFunnel};
use crate::sql::expr::{col, func, or_all, param, Expr};
use crate::sql::{PostgresRenderer, SqlRenderer};
use crate::steps::CompiledStep;
use crate::types::{BreakdownBucket, BreakdownType, ALL_USERS_COHORT, OTHER_BUCKET};
use pathline_query::{Binder, CompiledQuery, Params};
use sea_orm::QueryResult;

/// Join of the main query against cohort-membership sets; rendered into the
/// FROM clause by the engine
#[derive(Debug, Clone)]
pub struct CohortJoin {
    pub cohort_param_names: Vec<String>,
    pub include_all_users: bool,
}

impl CohortJoin {
    /// Render the join fragment; cohort ids and the project id resolve
    /// through the shared binder
    pub fn render(&self, binder: &mut Binder) -> Result<String> {
        let placeholders = self
            .cohort_param_names
            .iter()
            .map(|name| binder.placeholder(name))
            .collect::<pathline_query::Result<Vec<_>>>()?;

        let mut membership = if placeholders.is_empty() {
            // Only the synthetic all-users cohort was requested
            String::new()
        } else {
            format!(
                "SELECT person_id, cohort_id FROM cohort_people WHERE cohort_id IN ({})",
                placeholders.join(", ")
            )
        };

        if self.include_all_users {
            let project = binder.placeholder("project_id")?;
            let all_users = format!(
                "SELECT DISTINCT person_id, {ALL_USERS_COHORT} AS cohort_id FROM events WHERE project_id = {project}"
            );
            if membership.is_empty() {
                membership = all_users;
            } else {
                membership = format!("{membership} UNION ALL {all_users}");
            }
        }

        Ok(format!(
            "INNER JOIN ({membership}) cohort_join ON cohort_join.person_id = events.person_id"
        ))
    }
}

/// A breakdown compiled to its `prop` expression (folded when top-K values
/// were discovered) plus the params and optional cohort join it needs
#[derive(Debug, Clone)]
pub struct CompiledBreakdown {
    pub kind: BreakdownType,
    pub prop_expr: Expr,
    pub params: Params,
    pub join: Option<CohortJoin>,
}

pub fn compile_breakdown(
    breakdown: &NormalizedBreakdown,
    discovered: Option<&[String]>,
) -> Result<CompiledBreakdown> {
    if breakdown.kind == BreakdownType::Cohort {
        return compile_cohort_breakdown(breakdown);
    }

    let (base, mut params) = value_expr(breakdown)?;

    // Fold everything outside the discovered top-K into "Other"
    let prop_expr = match discovered {
        Some(values) if !values.is_empty() => {
            let mut candidates = Vec::with_capacity(values.len());
            for (m, value) in values.iter().enumerate() {
                let name = format!("breakdown_value_{m}");
                params = params.with(&name, value.clone());
                candidates.push(param(name));
            }
            params = params.with("breakdown_other", OTHER_BUCKET);
            Expr::Case {
                branches: vec![(
                    Expr::In(Box::new(base.clone()), candidates),
                    base,
                )],
                else_value: Some(Box::new(param("breakdown_other"))),
            }
        }
        _ => base,
    };

    Ok(CompiledBreakdown {
        kind: breakdown.kind,
        prop_expr,
        params,
        join: None,
    })
}

/// Unfolded value-selection expression bound to alias `prop`.
///
/// Empty and NULL property values coalesce to `''` so they stay a bucket of
/// their own unless the limit forces them into "Other".
pub fn value_expr(breakdown: &NormalizedBreakdown) -> Result<(Expr, Params)> {
    let column = match breakdown.kind {
        BreakdownType::Event => "events.properties".to_string(),
        BreakdownType::Person => "events.person_properties".to_string(),
        BreakdownType::Group => {
            let index = breakdown
                .group_type_index
                .ok_or(FunnelError::MissingGroupTypeIndex)?;
            format!("events.group_{index}_properties")
        }
        BreakdownType::Cohort => {
            return Err(FunnelError::InvalidCohortValue(
                "cohort breakdowns resolve through the membership join".to_string(),
            ))
        }
    };

    let mut params = Params::single("breakdown_empty", "");
    let mut extracted = Vec::with_capacity(breakdown.properties.len());
    for (i, property) in breakdown.properties.iter().enumerate() {
        let key_param = format!("breakdown_key_{i}");
        params = params.with(&key_param, property.clone());
        extracted.push(func(
            "COALESCE",
            vec![
                Expr::JsonText(Box::new(col(column.clone())), Box::new(param(key_param))),
                param("breakdown_empty"),
            ],
        ));
    }

    let expr = if extracted.len() == 1 {
        extracted.into_iter().next().unwrap_or(Expr::Null)
    } else {
        // Multi-property breakdowns collapse to one text dimension
        params = params.with("breakdown_separator", "::");
        let mut args = vec![param("breakdown_separator")];
        args.extend(extracted);
        func("CONCAT_WS", args)
    };

    Ok((expr, params))
}

fn compile_cohort_breakdown(breakdown: &NormalizedBreakdown) -> Result<CompiledBreakdown> {
    let mut params = Params::new();
    let mut cohort_param_names = Vec::new();

    for (m, value) in breakdown.properties.iter().enumerate() {
        // The synthetic all-users cohort is always part of the join
        if value == "all" {
            continue;
        }
        let id: i64 = value
            .parse()
            .map_err(|_| FunnelError::InvalidCohortValue(value.clone()))?;
        let name = format!("breakdown_cohort_{m}");
        params = params.with(&name, id);
        cohort_param_names.push(name);
    }

    Ok(CompiledBreakdown {
        kind: BreakdownType::Cohort,
        prop_expr: Expr::Cast(Box::new(col("cohort_join.cohort_id")), "TEXT".to_string()),
        params,
        join: Some(CohortJoin {
            cohort_param_names,
            include_all_users: true,
        }),
    })
}

/// Auxiliary ranking query: top-K breakdown values by total match count over
/// the prefiltered event set. Ties break lexicographically so the "Other"
/// bucket is deterministic.
pub fn values_query(
    funnel: &NormalizedFunnel,
    steps: &[CompiledStep],
    breakdown: &NormalizedBreakdown,
) -> Result<CompiledQuery> {
    let (value, value_params) = value_expr(breakdown)?;

    let mut params = Params::new()
        .with("project_id", funnel.project_id)
        .with("date_from", funnel.date_range.start.0)
        .with("date_to", funnel.date_range.end.0)
        .with("breakdown_limit", i64::from(breakdown.limit));
    params = params.merge(value_params);
    for step in steps {
        params = params.merge(step.params.clone());
    }

    let renderer = PostgresRenderer::new();
    let mut binder = Binder::new(params);

    let value_sql = renderer.render(&value, &mut binder)?;
    let any_step = renderer.render(
        &or_all(steps.iter().map(|s| s.predicate.clone()).collect()),
        &mut binder,
    )?;
    let project = binder.placeholder("project_id")?;
    let date_from = binder.placeholder("date_from")?;
    let date_to = binder.placeholder("date_to")?;
    let limit = binder.placeholder("breakdown_limit")?;

    let sql = format!(
        "SELECT {value_sql} AS value, COUNT(*) AS matches \
         FROM events \
         WHERE events.project_id = {project} \
           AND events.timestamp >= {date_from} \
           AND events.timestamp <= {date_to} \
           AND {any_step} \
         GROUP BY value \
         ORDER BY matches DESC, value ASC \
         LIMIT {limit}"
    );

    Ok(binder.finish(sql))
}

/// Decode discovery rows into ranked buckets
pub fn decode_values(rows: &[QueryResult]) -> Result<Vec<BreakdownBucket>> {
    let mut buckets = Vec::with_capacity(rows.len());
    for (rank, row) in rows.iter().enumerate() {
        let value: String = row
            .try_get("", "value")
            .map_err(pathline_query::StoreError::from)?;
        buckets.push(BreakdownBucket {
            value,
            ordinal_rank: rank,
        });
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BreakdownType;

    fn event_breakdown(properties: Vec<&str>, limit: u32) -> NormalizedBreakdown {
        NormalizedBreakdown {
            kind: BreakdownType::Event,
            properties: properties.into_iter().map(String::from).collect(),
            limit,
            group_type_index: None,
        }
    }

    fn render(expr: &Expr, params: Params) -> String {
        let mut binder = Binder::new(params);
        PostgresRenderer::new().render(expr, &mut binder).unwrap()
    }

    #[test]
    fn test_event_value_expr_coalesces_null() {
        let breakdown = event_breakdown(vec!["$browser"], 10);
        let (expr, params) = value_expr(&breakdown).unwrap();
        assert_eq!(
            render(&expr, params),
            "COALESCE((events.properties ->> $1), $2)"
        );
    }

    #[test]
    fn test_multi_property_concatenates() {
        let breakdown = event_breakdown(vec!["$browser", "$os"], 10);
        let (expr, params) = value_expr(&breakdown).unwrap();
        let sql = render(&expr, params);
        assert!(sql.starts_with("CONCAT_WS("));
        assert!(sql.contains("events.properties ->>"));
    }

    #[test]
    fn test_fold_collapses_overflow_into_other() {
        let breakdown = event_breakdown(vec!["$browser"], 1);
        let compiled =
            compile_breakdown(&breakdown, Some(&["Chrome".to_string()])).unwrap();
        let sql = render(&compiled.prop_expr, compiled.params.clone());
        assert!(sql.starts_with("CASE WHEN COALESCE"));
        assert!(sql.contains(" IN ("));
        assert!(sql.ends_with(" END"));
        assert_eq!(
            compiled.params.get("breakdown_other"),
            Some(&sea_orm::Value::from(OTHER_BUCKET))
        );
    }

    #[test]
    fn test_no_discovery_keeps_raw_expression() {
        let breakdown = event_breakdown(vec!["$browser"], 10);
        let compiled = compile_breakdown(&breakdown, None).unwrap();
        let sql = render(&compiled.prop_expr, compiled.params);
        assert!(sql.starts_with("COALESCE"));
    }

    #[test]
    fn test_cohort_breakdown_builds_membership_join() {
        let breakdown = NormalizedBreakdown {
            kind: BreakdownType::Cohort,
            properties: vec!["3".to_string(), "all".to_string()],
            limit: 10,
            group_type_index: None,
        };
        let compiled = compile_breakdown(&breakdown, None).unwrap();
        let join = compiled.join.expect("cohort join");
        assert!(join.include_all_users);

        let params = compiled.params.with("project_id", 1i32);
        let mut binder = Binder::new(params);
        let sql = join.render(&mut binder).unwrap();
        assert!(sql.contains("cohort_people"));
        assert!(sql.contains("UNION ALL"));
        assert!(sql.contains("0 AS cohort_id"));
    }

    #[test]
    fn test_all_users_cohort_joins_even_when_not_requested() {
        let breakdown = NormalizedBreakdown {
            kind: BreakdownType::Cohort,
            properties: vec!["7".to_string()],
            limit: 10,
            group_type_index: None,
        };
        let compiled = compile_breakdown(&breakdown, None).unwrap();
        assert!(compiled.join.expect("cohort join").include_all_users);
    }

    #[test]
    fn test_invalid_cohort_value_rejected() {
        let breakdown = NormalizedBreakdown {
            kind: BreakdownType::Cohort,
            properties: vec!["not-a-number".to_string()],
            limit: 10,
            group_type_index: None,
        };
        assert!(matches!(
            compile_breakdown(&breakdown, None),
            Err(FunnelError::InvalidCohortValue(_))
        ));
    }
}

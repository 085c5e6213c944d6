//! Exclusion pseudo-steps. An exclusion disqualifies a person when its
//! entity occurs strictly between completion of `from_step` and completion of
//! `to_step` (or `latest_from + window` when `to_step` is open-ended).
//!
//! Exclusion timestamps travel through the level pipeline next to the
//! `latest_i` columns: raw per-row values until level `from_step + 1`, where
//! they are nulled out against `latest_from` and re-windowed, then passed
//! through unchanged.

use crate::actions::ActionRegistry;
use crate::error::Result;
use crate::normalize::NormalizedFunnel;
use crate::sql::expr::{and_all, binary, col, func, gt, lt, Expr};
use crate::sql::BinOp;
use crate::steps::entity_predicate;
use pathline_query::Params;

#[derive(Debug, Clone)]
pub struct CompiledExclusion {
    pub index: usize,
    pub from_step: usize,
    pub to_step: Option<usize>,
    pub predicate: Expr,
    pub params: Params,
}

impl CompiledExclusion {
    /// Column carrying the exclusion's candidate timestamp
    pub fn latest_col(&self) -> String {
        format!("exclusion_{}_latest_{}", self.index, self.from_step)
    }

    /// Level at which the column is nulled out and re-windowed
    pub fn activation_level(&self) -> usize {
        self.from_step + 1
    }

    /// True when the person's conversion is invalidated by this exclusion.
    ///
    /// NULL exclusion timestamps (no matching event at or after
    /// `latest_from`) make the comparison NULL, which filters as false.
    pub fn violation_expr(&self, window_param: &str) -> Expr {
        let excl = col(self.latest_col());
        let from = col(format!("latest_{}", self.from_step));
        let window_end = binary(
            from.clone(),
            BinOp::Add,
            Expr::SecondsInterval(Box::new(Expr::Param(window_param.to_string()))),
        );
        // An unreached to_step falls back to the conversion window bound
        let upper = match self.to_step {
            Some(to) => func("COALESCE", vec![col(format!("latest_{to}")), window_end]),
            None => window_end,
        };
        and_all(vec![gt(excl.clone(), from), lt(excl, upper)])
    }
}

pub fn compile_exclusions(
    funnel: &NormalizedFunnel,
    registry: &dyn ActionRegistry,
) -> Result<Vec<CompiledExclusion>> {
    let mut compiled = Vec::with_capacity(funnel.exclusions.len());
    for (index, exclusion) in funnel.exclusions.iter().enumerate() {
        let prefix = format!("exclusion_{index}");
        let (predicate, params, _label) =
            entity_predicate(&prefix, &exclusion.entity, &[], registry)?;
        compiled.push(CompiledExclusion {
            index,
            from_step: exclusion.funnel_from_step,
            to_step: exclusion.funnel_to_step,
            predicate,
            params,
        });
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{PostgresRenderer, SqlRenderer};
    use pathline_query::Binder;

    fn render(expr: &Expr, params: Params) -> String {
        let mut binder = Binder::new(params.with("window_seconds", 3_600i64));
        PostgresRenderer::new().render(expr, &mut binder).unwrap()
    }

    #[test]
    fn test_violation_between_two_steps() {
        let exclusion = CompiledExclusion {
            index: 0,
            from_step: 0,
            to_step: Some(1),
            predicate: Expr::Null,
            params: Params::new(),
        };
        let sql = render(&exclusion.violation_expr("window_seconds"), Params::new());
        assert_eq!(
            sql,
            "((exclusion_0_latest_0 > latest_0) AND (exclusion_0_latest_0 < \
             COALESCE(latest_1, (latest_0 + ($1 * INTERVAL '1 second')))))"
        );
    }

    #[test]
    fn test_open_ended_violation_uses_window_bound() {
        let exclusion = CompiledExclusion {
            index: 1,
            from_step: 1,
            to_step: None,
            predicate: Expr::Null,
            params: Params::new(),
        };
        let sql = render(&exclusion.violation_expr("window_seconds"), Params::new());
        assert!(sql.contains("exclusion_1_latest_1 > latest_1"));
        assert!(sql.contains("latest_1 + ($1 * INTERVAL '1 second')"));
        assert!(!sql.contains("COALESCE"));
    }
}

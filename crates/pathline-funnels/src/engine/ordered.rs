//! Ordered engine: steps must occur in sequence, with any number of other
//! events in between.
//!
//! Level 1 resolves every `latest_i` to the earliest candidate at or after
//! the current row. Each further level `L` (from `n - 1` down to `2`) nulls
//! out `latest_i` candidates that precede the resolved `latest_{L-1}` and
//! re-windows them, so interleaved occurrences ("A C B C") still resolve to a
//! valid ordered sequence.

use super::{
    comparison_select, conversion_time_exprs, event_query, partition_select, sequential_steps_expr,
    steps_per_person, EngineContext,
};
use crate::error::Result;
use crate::sql::expr::Expr;
use crate::sql::SqlRenderer;
use crate::steps::CompiledStep;
use pathline_query::Binder;

pub(super) fn steps_per_person_query(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    extra: Option<(&str, &Expr)>,
) -> Result<String> {
    let in_order: Vec<&CompiledStep> = ctx.steps.iter().collect();
    let offsets = duplicate_offsets(&in_order);
    let n = ctx.step_count();

    let base = event_query(renderer, binder, ctx, &in_order, true)?;
    let mut sql = partition_select(renderer, binder, ctx, 1, &offsets, &base)?;
    // Higher levels sit innermost; 2..=n-1 collapses to nothing for n <= 2
    for level in (2..n).rev() {
        let compared = comparison_select(renderer, binder, ctx, level, &sql)?;
        sql = partition_select(renderer, binder, ctx, level, &offsets, &compared)?;
    }

    let steps_expr = sequential_steps_expr(n);
    let times = conversion_time_exprs(n);
    steps_per_person(renderer, binder, ctx, &steps_expr, &times, extra, &sql)
}

/// A step identical to its predecessor must claim a different event row, so
/// its window frame ends one row earlier
fn duplicate_offsets(steps: &[&CompiledStep]) -> Vec<u32> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            if i > 0 && step.entity == steps[i - 1].entity {
                1
            } else {
                0
            }
        })
        .collect()
}

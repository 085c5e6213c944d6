//! Unordered engine: steps may complete in any order within the conversion
//! window.
//!
//! One branch per rotation of the step list, each treating its first step as
//! the anchor: `steps` counts how many of the remaining steps occurred after
//! the anchor and inside the window. Branches are UNION ALLed and the usual
//! best-attempt ranking keeps each person's maximum across rotations.

use super::{event_query, partition_select, steps_per_person, window_bound, EngineContext};
use crate::error::Result;
use crate::sql::expr::{and_all, binary, case_when, case_when_else, col, func, lt, lt_eq, num, Expr};
use crate::sql::{BinOp, SqlRenderer};
use crate::steps::CompiledStep;
use pathline_query::Binder;

pub(super) fn steps_per_person_query(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
) -> Result<String> {
    let n = ctx.step_count();
    let offsets = vec![0u32; n];
    let steps_expr = completed_count_expr(n);
    let times = forward_gap_exprs(n);

    let mut branches = Vec::with_capacity(n);
    for rotation in 0..n {
        let rotated: Vec<&CompiledStep> =
            (0..n).map(|i| &ctx.steps[(rotation + i) % n]).collect();
        let base = event_query(renderer, binder, ctx, &rotated, true)?;
        let windowed = partition_select(renderer, binder, ctx, 1, &offsets, &base)?;
        branches.push(steps_per_person(
            renderer, binder, ctx, &steps_expr, &times, None, &windowed,
        )?);
    }
    Ok(branches.join(" UNION ALL "))
}

/// `1 +` one for each non-anchor step completed after the anchor and within
/// the window; NULL candidates contribute nothing
fn completed_count_expr(n: usize) -> Expr {
    let mut expr = num(1);
    for i in 1..n {
        let completed = and_all(vec![
            lt(col("latest_0"), col(format!("latest_{i}"))),
            lt_eq(col(format!("latest_{i}")), window_bound()),
        ]);
        expr = binary(expr, BinOp::Add, case_when_else(completed, num(1), num(0)));
    }
    expr
}

/// No ordering between the non-anchor steps is knowable, so the transition
/// time out of step `i - 1` is the smallest forward gap to any other step
/// that still lands inside the window. `LEAST` skips NULL candidates.
fn forward_gap_exprs(n: usize) -> Vec<(String, Expr)> {
    (1..n)
        .map(|i| {
            let reference = col(format!("latest_{}", i - 1));
            let gaps: Vec<Expr> = (0..n)
                .filter(|&j| j != i - 1)
                .map(|j| {
                    let candidate = col(format!("latest_{j}"));
                    let forward = and_all(vec![
                        lt(reference.clone(), candidate.clone()),
                        lt_eq(candidate.clone(), window_bound()),
                    ]);
                    let seconds = Expr::Cast(
                        Box::new(Expr::EpochDiff(
                            Box::new(candidate),
                            Box::new(reference.clone()),
                        )),
                        "DOUBLE PRECISION".to_string(),
                    );
                    case_when(forward, seconds)
                })
                .collect();
            (format!("step_{i}_conversion_time"), func("LEAST", gaps))
        })
        .collect()
}

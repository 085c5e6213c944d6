//! Strict engine: step `i` must be the person's very next event after step
//! `i - 1`, with nothing in between.
//!
//! The event scan keeps every event, not only step matches, because any
//! intervening event breaks the sequence. A single windowing pass pins
//! `latest_i` to the row exactly `i` positions after the current one (newest
//! first ordering), via a one-row `i PRECEDING` frame; the value survives
//! only when that row matched step `i`.

use super::{
    conversion_time_exprs, event_query, sequential_steps_expr, steps_per_person, EngineContext,
    RECORDING_FIELDS,
};
use crate::error::Result;
use crate::sql::expr::{col, min_over, Expr};
use crate::sql::{Frame, FrameBound, SortDir, SqlRenderer};
use crate::steps::CompiledStep;
use pathline_query::Binder;

/// Output rows keep the shared per-person shape (`steps` plus transition
/// times) rather than a furthest-step/person-array pair; the person lists
/// that need individual people are a separate query driven by the drill-down
/// selectors.
pub(super) fn steps_per_person_query(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    extra: Option<(&str, &Expr)>,
) -> Result<String> {
    let in_order: Vec<&CompiledStep> = ctx.steps.iter().collect();
    let n = ctx.step_count();

    let base = event_query(renderer, binder, ctx, &in_order, false)?;

    let partition = ctx.partition_exprs();
    let mut cols = vec![ctx.identity_cols().to_string()];
    for i in 0..n {
        cols.push(format!("step_{i}"));
        if i == 0 {
            cols.push("latest_0".to_string());
            if ctx.funnel.include_recordings {
                for field in RECORDING_FIELDS {
                    cols.push(format!("step_0_{field}"));
                }
            }
        } else {
            let offset = i as u32;
            let frame = Frame {
                start: FrameBound::Preceding(offset),
                end: FrameBound::Preceding(offset),
            };
            let pinned = min_over(
                col(format!("latest_{i}")),
                partition.clone(),
                SortDir::Desc,
                frame,
            );
            cols.push(format!("{} AS latest_{i}", renderer.render(&pinned, binder)?));
            if ctx.funnel.include_recordings {
                for field in RECORDING_FIELDS {
                    let fname = format!("step_{i}_{field}");
                    let pinned =
                        min_over(col(fname.clone()), partition.clone(), SortDir::Desc, frame);
                    cols.push(format!("{} AS {fname}", renderer.render(&pinned, binder)?));
                }
            }
        }
    }
    let sql = format!("SELECT {} FROM ({base}) adjacent", cols.join(", "));

    let steps_expr = sequential_steps_expr(n);
    let times = conversion_time_exprs(n);
    steps_per_person(renderer, binder, ctx, &steps_expr, &times, extra, &sql)
}

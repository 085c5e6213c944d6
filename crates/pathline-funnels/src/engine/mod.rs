//! Funnel query engines.
//!
//! All three modes share the same outer shape: an inner per-event query
//! derives `step_i` flags and `latest_i` candidate timestamps, a mode-specific
//! windowing stage resolves each `latest_i` to the earliest valid occurrence,
//! and a per-person stage collapses rows into a `steps` count. The engine then
//! keeps each person's best attempt and aggregates counts and conversion
//! times, optionally per breakdown partition.
//!
//! Dispatch is a closed match on [`FunnelMode`]; adding a mode means adding an
//! engine module and an arm here.

pub mod exclusion;
mod ordered;
mod strict;
mod unordered;

pub use exclusion::{compile_exclusions, CompiledExclusion};

use crate::breakdown::CompiledBreakdown;
use crate::error::{FunnelError, Result};
use crate::normalize::NormalizedFunnel;
use crate::sql::expr::{
    and_all, binary, case_when, case_when_else, col, lt, lt_eq, min_over, num, or_all, param,
    trailing_frame, Expr,
};
use crate::sql::{BinOp, PostgresRenderer, SortDir, SqlRenderer};
use crate::steps::CompiledStep;
use crate::types::{AggregationTarget, FunnelMode};
use pathline_query::{Binder, CompiledQuery, Params};

/// Everything the engines and shared stages read while rendering one query
pub(crate) struct EngineContext<'a> {
    pub funnel: &'a NormalizedFunnel,
    pub steps: &'a [CompiledStep],
    pub exclusions: &'a [CompiledExclusion],
    pub breakdown: Option<&'a CompiledBreakdown>,
}

impl EngineContext<'_> {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn target_column(&self) -> String {
        match self.funnel.aggregation {
            AggregationTarget::Person => "events.person_id".to_string(),
            AggregationTarget::Group { group_type_index } => {
                format!("events.group_{group_type_index}_key")
            }
        }
    }

    pub fn has_prop(&self) -> bool {
        self.breakdown.is_some()
    }

    /// Window partition: per person (or group), and per breakdown value when
    /// a breakdown is active
    pub fn partition_exprs(&self) -> Vec<Expr> {
        let mut exprs = vec![col("aggregation_target")];
        if self.has_prop() {
            exprs.push(col("prop"));
        }
        exprs
    }

    pub fn identity_cols(&self) -> &'static str {
        if self.has_prop() {
            "aggregation_target, timestamp, prop"
        } else {
            "aggregation_target, timestamp"
        }
    }

    pub fn group_cols(&self) -> &'static str {
        if self.has_prop() {
            "aggregation_target, prop"
        } else {
            "aggregation_target"
        }
    }
}

/// Parameters every compiled funnel statement binds
fn global_params(funnel: &NormalizedFunnel) -> Params {
    Params::new()
        .with("project_id", funnel.project_id)
        .with("date_from", funnel.date_range.start.0)
        .with("date_to", funnel.date_range.end.0)
        .with("window_seconds", funnel.window_seconds)
}

/// Per-step event fields carried for session-replay correlation when the
/// request asks for recordings
pub(crate) const RECORDING_FIELDS: [&str; 2] = ["session_id", "window_id"];

/// `latest_0 + conversion window`, the upper bound every later step must meet
pub(crate) fn window_bound() -> Expr {
    binary(
        col("latest_0"),
        BinOp::Add,
        Expr::SecondsInterval(Box::new(param("window_seconds"))),
    )
}

/// Innermost query: one row per candidate event with step flags and latest
/// candidate timestamps.
///
/// `ordered_steps` fixes the `step_i` column assignment; the unordered engine
/// passes rotations of the same compiled steps. With `only_matching` the scan
/// keeps only events that match some step or exclusion; the strict engine
/// needs every event because adjacency counts intervening events too.
pub(crate) fn event_query(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    ordered_steps: &[&CompiledStep],
    only_matching: bool,
) -> Result<String> {
    let mut cols = vec![
        format!("{} AS aggregation_target", ctx.target_column()),
        "events.timestamp AS timestamp".to_string(),
    ];
    if let Some(breakdown) = ctx.breakdown {
        cols.push(format!(
            "{} AS prop",
            renderer.render(&breakdown.prop_expr, binder)?
        ));
    }
    for (i, step) in ordered_steps.iter().enumerate() {
        let flag = case_when_else(step.predicate.clone(), num(1), num(0));
        cols.push(format!("{} AS step_{i}", renderer.render(&flag, binder)?));
        let latest = case_when(step.predicate.clone(), col("events.timestamp"));
        cols.push(format!("{} AS latest_{i}", renderer.render(&latest, binder)?));
        if ctx.funnel.include_recordings {
            for field in RECORDING_FIELDS {
                let value = case_when(step.predicate.clone(), col(format!("events.{field}")));
                cols.push(format!(
                    "{} AS step_{i}_{field}",
                    renderer.render(&value, binder)?
                ));
            }
        }
    }
    for exclusion in ctx.exclusions {
        let latest = case_when(exclusion.predicate.clone(), col("events.timestamp"));
        cols.push(format!(
            "{} AS {}",
            renderer.render(&latest, binder)?,
            exclusion.latest_col()
        ));
    }

    let join = match ctx.breakdown.and_then(|b| b.join.as_ref()) {
        Some(join) => format!(" {}", join.render(binder)?),
        None => String::new(),
    };

    let mut where_parts = vec![
        format!("events.project_id = {}", binder.placeholder("project_id")?),
        format!("events.timestamp >= {}", binder.placeholder("date_from")?),
        format!("events.timestamp <= {}", binder.placeholder("date_to")?),
    ];
    if only_matching {
        let mut predicates: Vec<Expr> = ordered_steps.iter().map(|s| s.predicate.clone()).collect();
        predicates.extend(ctx.exclusions.iter().map(|e| e.predicate.clone()));
        where_parts.push(renderer.render(&or_all(predicates), binder)?);
    }

    Ok(format!(
        "SELECT {} FROM events{join} WHERE {}",
        cols.join(", "),
        where_parts.join(" AND ")
    ))
}

/// One windowing level: `latest_i` for `i >= level` becomes the earliest
/// candidate at or after the current row, scanning the person's events newest
/// first. `offsets[i]` shifts the frame end to skip rows an identical
/// adjacent step already claimed.
pub(crate) fn partition_select(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    level: usize,
    offsets: &[u32],
    inner: &str,
) -> Result<String> {
    let partition = ctx.partition_exprs();
    let mut cols = vec![ctx.identity_cols().to_string()];
    for i in 0..ctx.step_count() {
        cols.push(format!("step_{i}"));
        if i < level {
            cols.push(format!("latest_{i}"));
        } else {
            let windowed = min_over(
                col(format!("latest_{i}")),
                partition.clone(),
                SortDir::Desc,
                trailing_frame(offsets[i]),
            );
            cols.push(format!(
                "{} AS latest_{i}",
                renderer.render(&windowed, binder)?
            ));
        }
        if ctx.funnel.include_recordings {
            for field in RECORDING_FIELDS {
                let name = format!("step_{i}_{field}");
                if i < level {
                    cols.push(name);
                } else {
                    // Recording fields follow the same frame as the step's
                    // timestamp so they stay paired with latest_i
                    let windowed = min_over(
                        col(name.clone()),
                        partition.clone(),
                        SortDir::Desc,
                        trailing_frame(offsets[i]),
                    );
                    cols.push(format!("{} AS {name}", renderer.render(&windowed, binder)?));
                }
            }
        }
    }
    for exclusion in ctx.exclusions {
        let name = exclusion.latest_col();
        if exclusion.activation_level() == level {
            let windowed = min_over(
                col(name.clone()),
                partition.clone(),
                SortDir::Desc,
                trailing_frame(0),
            );
            cols.push(format!("{} AS {name}", renderer.render(&windowed, binder)?));
        } else {
            cols.push(name);
        }
    }
    Ok(format!(
        "SELECT {} FROM ({inner}) level_{level}",
        cols.join(", ")
    ))
}

/// Comparison stage preceding a re-window: candidates that precede the
/// previous step's resolved timestamp are nulled out so the next
/// `partition_select` picks a later occurrence
pub(crate) fn comparison_select(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    level: usize,
    inner: &str,
) -> Result<String> {
    let previous = col(format!("latest_{}", level - 1));
    let mut cols = vec![ctx.identity_cols().to_string()];
    for i in 0..ctx.step_count() {
        cols.push(format!("step_{i}"));
        let name = format!("latest_{i}");
        let stale = lt_eq(col(name.clone()), previous.clone());
        if i < level {
            cols.push(name);
        } else {
            // Candidates not strictly after the previous step are discarded
            let nulled = case_when_else(stale.clone(), Expr::Null, col(name.clone()));
            cols.push(format!("{} AS {name}", renderer.render(&nulled, binder)?));
        }
        if ctx.funnel.include_recordings {
            for field in RECORDING_FIELDS {
                let fname = format!("step_{i}_{field}");
                if i < level {
                    cols.push(fname);
                } else {
                    // Dropped with the timestamp they were paired to
                    let nulled = case_when_else(stale.clone(), Expr::Null, col(fname.clone()));
                    cols.push(format!("{} AS {fname}", renderer.render(&nulled, binder)?));
                }
            }
        }
    }
    for exclusion in ctx.exclusions {
        let name = exclusion.latest_col();
        if exclusion.activation_level() == level {
            let from = col(format!("latest_{}", exclusion.from_step));
            let nulled =
                case_when_else(lt(col(name.clone()), from), Expr::Null, col(name.clone()));
            cols.push(format!("{} AS {name}", renderer.render(&nulled, binder)?));
        } else {
            cols.push(name);
        }
    }
    Ok(format!(
        "SELECT {} FROM ({inner}) cmp_{level}",
        cols.join(", ")
    ))
}

/// `steps` value for sequential modes: highest `k` such that steps `1..k`
/// happened in order, each within the conversion window of `latest_0`.
/// NULL `latest_i` comparisons evaluate false and fall through.
pub(crate) fn sequential_steps_expr(n: usize) -> Expr {
    if n == 1 {
        return num(1);
    }
    let mut branches = Vec::with_capacity(n - 1);
    for k in (2..=n).rev() {
        let mut parts = Vec::with_capacity(2 * (k - 1));
        for i in 1..k {
            parts.push(lt(
                col(format!("latest_{}", i - 1)),
                col(format!("latest_{i}")),
            ));
            parts.push(lt_eq(col(format!("latest_{i}")), window_bound()));
        }
        branches.push((and_all(parts), num(k as i64)));
    }
    Expr::Case {
        branches,
        else_value: Some(Box::new(num(1))),
    }
}

/// Per-transition durations in seconds, NULL when the transition did not
/// complete inside the window
pub(crate) fn conversion_time_exprs(n: usize) -> Vec<(String, Expr)> {
    (1..n)
        .map(|i| {
            let previous = col(format!("latest_{}", i - 1));
            let current = col(format!("latest_{i}"));
            let completed = and_all(vec![
                Expr::IsNotNull(Box::new(current.clone())),
                Expr::IsNotNull(Box::new(previous.clone())),
                lt(previous.clone(), current.clone()),
                lt_eq(current.clone(), window_bound()),
            ]);
            let seconds = Expr::Cast(
                Box::new(Expr::EpochDiff(Box::new(current), Box::new(previous))),
                "DOUBLE PRECISION".to_string(),
            );
            (
                format!("step_{i}_conversion_time"),
                case_when(completed, seconds),
            )
        })
        .collect()
}

/// Collapse windowed rows into one `steps` count per funnel attempt: only
/// rows anchored at a step-0 event survive, and excluded conversions drop out
pub(crate) fn steps_per_person(
    renderer: &dyn SqlRenderer,
    binder: &mut Binder,
    ctx: &EngineContext<'_>,
    steps_expr: &Expr,
    times: &[(String, Expr)],
    extra: Option<(&str, &Expr)>,
    inner: &str,
) -> Result<String> {
    let mut cols = vec![ctx.group_cols().to_string()];
    cols.push(format!("{} AS steps", renderer.render(steps_expr, binder)?));
    for (name, expr) in times {
        cols.push(format!("{} AS {name}", renderer.render(expr, binder)?));
    }
    if let Some((name, expr)) = extra {
        cols.push(format!("{} AS {name}", renderer.render(expr, binder)?));
    }

    let mut where_parts = vec!["step_0 = 1".to_string()];
    if !ctx.exclusions.is_empty() {
        let violations = or_all(
            ctx.exclusions
                .iter()
                .map(|e| e.violation_expr("window_seconds"))
                .collect(),
        );
        // NULL violation means no exclusion event was seen at all
        where_parts.push(format!(
            "NOT COALESCE({}, FALSE)",
            renderer.render(&violations, binder)?
        ));
    }

    Ok(format!(
        "SELECT {} FROM ({inner}) spp WHERE {}",
        cols.join(", "),
        where_parts.join(" AND ")
    ))
}

/// Keep each person's best attempt and reduce to one row per person (and
/// breakdown value) with per-transition time aggregates
pub(crate) fn step_counts(ctx: &EngineContext<'_>, inner: &str) -> String {
    let group = ctx.group_cols();
    let n = ctx.step_count();

    let mut ranked_cols = vec![
        group.to_string(),
        "steps".to_string(),
        format!("MAX(steps) OVER (PARTITION BY {group}) AS max_steps"),
    ];
    for i in 1..n {
        ranked_cols.push(format!("step_{i}_conversion_time"));
    }

    let mut agg_cols = vec![group.to_string(), "steps".to_string()];
    for i in 1..n {
        agg_cols.push(format!(
            "AVG(step_{i}_conversion_time) AS step_{i}_average_conversion_time_inner"
        ));
        agg_cols.push(format!(
            "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY step_{i}_conversion_time) \
             AS step_{i}_median_conversion_time_inner"
        ));
    }

    format!(
        "SELECT {} FROM (SELECT {} FROM ({inner}) attempts) ranked \
         WHERE steps = max_steps GROUP BY {group}, steps",
        agg_cols.join(", "),
        ranked_cols.join(", ")
    )
}

/// Outermost aggregation: exact per-step reach counts plus averaged
/// conversion times, one row per breakdown partition
fn final_select(ctx: &EngineContext<'_>, binder: &mut Binder, inner: &str) -> Result<String> {
    let n = ctx.step_count();
    let mut cols = Vec::new();
    if ctx.has_prop() {
        cols.push("prop".to_string());
    }
    for k in 1..=n {
        cols.push(format!("COUNT(*) FILTER (WHERE steps = {k}) AS step_{k}"));
    }
    for i in 1..n {
        cols.push(format!(
            "AVG(step_{i}_average_conversion_time_inner) AS step_{i}_average_conversion_time"
        ));
        cols.push(format!(
            "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY step_{i}_median_conversion_time_inner) \
             AS step_{i}_median_conversion_time"
        ));
    }

    let mut sql = format!("SELECT {} FROM ({inner}) counts", cols.join(", "));
    if ctx.has_prop() {
        let limit = binder.placeholder("final_limit")?;
        let offset = binder.placeholder("final_offset")?;
        sql.push_str(&format!(
            " GROUP BY prop ORDER BY prop LIMIT {limit} OFFSET {offset}"
        ));
    }
    Ok(sql)
}

/// Compile the full funnel statement for the spec's mode
pub fn compile_funnel(
    funnel: &NormalizedFunnel,
    steps: &[CompiledStep],
    exclusions: &[CompiledExclusion],
    breakdown: Option<&CompiledBreakdown>,
) -> Result<CompiledQuery> {
    let ctx = EngineContext {
        funnel,
        steps,
        exclusions,
        breakdown,
    };

    let mut params = global_params(funnel);
    for step in steps {
        params = params.merge(step.params.clone());
    }
    for exclusion in exclusions {
        params = params.merge(exclusion.params.clone());
    }
    if let Some(breakdown) = breakdown {
        params = params
            .merge(breakdown.params.clone())
            .with("final_limit", funnel.limit as i64)
            .with("final_offset", funnel.offset as i64);
    }

    let renderer = PostgresRenderer::new();
    let mut binder = Binder::new(params);

    let per_person = match funnel.mode {
        FunnelMode::Ordered => ordered::steps_per_person_query(&renderer, &mut binder, &ctx, None)?,
        FunnelMode::Strict => strict::steps_per_person_query(&renderer, &mut binder, &ctx, None)?,
        FunnelMode::Unordered => unordered::steps_per_person_query(&renderer, &mut binder, &ctx)?,
    };
    let counts = step_counts(&ctx, &per_person);
    let sql = final_select(&ctx, &mut binder, &counts)?;

    tracing::debug!(
        mode = ?funnel.mode,
        steps = steps.len(),
        exclusions = exclusions.len(),
        breakdown = breakdown.is_some(),
        "compiled funnel query"
    );
    Ok(binder.finish(sql))
}

/// Compile the per-person conversion duration query between two steps,
/// feeding the time-to-convert histogram. Each converted person contributes
/// the duration of their fastest best attempt.
pub fn compile_time_to_convert(
    funnel: &NormalizedFunnel,
    steps: &[CompiledStep],
    exclusions: &[CompiledExclusion],
    from_step: usize,
    to_step: usize,
) -> Result<CompiledQuery> {
    let n = steps.len();
    if from_step >= to_step || to_step >= n {
        return Err(FunnelError::InvalidStepRange(format!(
            "from_step {from_step} to to_step {to_step} does not fit a {n}-step funnel"
        )));
    }
    if funnel.mode == FunnelMode::Unordered {
        return Err(FunnelError::InvalidStepRange(
            "time to convert requires a sequential funnel".to_string(),
        ));
    }

    let ctx = EngineContext {
        funnel,
        steps,
        exclusions,
        breakdown: None,
    };

    let mut params = global_params(funnel);
    for step in steps {
        params = params.merge(step.params.clone());
    }
    for exclusion in exclusions {
        params = params.merge(exclusion.params.clone());
    }

    let renderer = PostgresRenderer::new();
    let mut binder = Binder::new(params);

    let duration = Expr::Cast(
        Box::new(Expr::EpochDiff(
            Box::new(col(format!("latest_{to_step}"))),
            Box::new(col(format!("latest_{from_step}"))),
        )),
        "DOUBLE PRECISION".to_string(),
    );
    let extra = Some(("total_conversion_time", &duration));
    let per_person = match funnel.mode {
        FunnelMode::Ordered => {
            ordered::steps_per_person_query(&renderer, &mut binder, &ctx, extra)?
        }
        FunnelMode::Strict => strict::steps_per_person_query(&renderer, &mut binder, &ctx, extra)?,
        FunnelMode::Unordered => unreachable!("rejected above"),
    };

    let sql = format!(
        "SELECT ranked.aggregation_target, MIN(ranked.total_conversion_time) AS total_conversion_time \
         FROM (SELECT aggregation_target, steps, \
               MAX(steps) OVER (PARTITION BY aggregation_target) AS max_steps, \
               total_conversion_time FROM ({per_person}) attempts) ranked \
         WHERE ranked.steps = ranked.max_steps AND ranked.steps > {to_step} \
           AND ranked.total_conversion_time IS NOT NULL \
         GROUP BY ranked.aggregation_target"
    );
    Ok(binder.finish(sql))
}

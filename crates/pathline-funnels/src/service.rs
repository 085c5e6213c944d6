//! Funnel orchestration: normalizes a spec, resolves breakdown values,
//! compiles the statement for the requested mode, executes it through the
//! event store and formats the result.

use crate::actions::{ActionRegistry, CohortDirectory};
use crate::breakdown::{self, CompiledBreakdown};
use crate::engine;
use crate::error::Result;
use crate::format;
use crate::histogram;
use crate::normalize::{normalize, NormalizedFunnel};
use crate::steps::{build_step, CompiledStep};
use crate::types::{BreakdownType, ConversionTimeHistogram, FunnelResult, FunnelSpec};
use pathline_query::EventStore;
use std::sync::Arc;

pub struct FunnelService {
    store: Arc<dyn EventStore>,
    actions: Arc<dyn ActionRegistry>,
    cohorts: Arc<dyn CohortDirectory>,
}

impl FunnelService {
    pub fn new(
        store: Arc<dyn EventStore>,
        actions: Arc<dyn ActionRegistry>,
        cohorts: Arc<dyn CohortDirectory>,
    ) -> Self {
        Self {
            store,
            actions,
            cohorts,
        }
    }

    /// Run a funnel end to end: one value-discovery round trip when a
    /// non-cohort breakdown is present, then the funnel statement itself
    pub async fn run(&self, spec: FunnelSpec) -> Result<FunnelResult> {
        let funnel = normalize(spec)?;
        let steps = self.compile_steps(&funnel)?;
        let exclusions = engine::compile_exclusions(&funnel, self.actions.as_ref())?;
        let breakdown = self.resolve_breakdown(&funnel, &steps).await?;

        let query = engine::compile_funnel(&funnel, &steps, &exclusions, breakdown.as_ref())?;
        let rows = self.store.query_all(&query).await?;
        tracing::debug!(rows = rows.len(), "funnel query returned");

        let raw = format::decode_rows(&rows, funnel.max_steps(), breakdown.is_some())?;
        Ok(format::assemble(&funnel, &steps, raw, self.cohorts.as_ref()))
    }

    /// Distribution of conversion durations between two steps
    pub async fn time_to_convert(
        &self,
        spec: FunnelSpec,
        from_step: usize,
        to_step: usize,
        bin_count: Option<usize>,
    ) -> Result<ConversionTimeHistogram> {
        let funnel = normalize(spec)?;
        let steps = self.compile_steps(&funnel)?;
        let exclusions = engine::compile_exclusions(&funnel, self.actions.as_ref())?;

        let query =
            engine::compile_time_to_convert(&funnel, &steps, &exclusions, from_step, to_step)?;
        let rows = self.store.query_all(&query).await?;
        let durations = histogram::decode_durations(&rows)?;
        tracing::debug!(converted = durations.len(), "time-to-convert sample collected");
        Ok(histogram::build_histogram(&durations, bin_count))
    }

    fn compile_steps(&self, funnel: &NormalizedFunnel) -> Result<Vec<CompiledStep>> {
        funnel
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| build_step(i, step, self.actions.as_ref()))
            .collect()
    }

    async fn resolve_breakdown(
        &self,
        funnel: &NormalizedFunnel,
        steps: &[CompiledStep],
    ) -> Result<Option<CompiledBreakdown>> {
        let Some(spec) = &funnel.breakdown else {
            return Ok(None);
        };
        // Cohort partitions come from the membership join, not from values
        if spec.kind == BreakdownType::Cohort {
            return breakdown::compile_breakdown(spec, None).map(Some);
        }

        let discovery = breakdown::values_query(funnel, steps, spec)?;
        let rows = self.store.query_all(&discovery).await?;
        let buckets = breakdown::decode_values(&rows)?;
        tracing::debug!(discovered = buckets.len(), "breakdown values ranked");

        let values: Vec<String> = buckets.into_iter().map(|b| b.value).collect();
        breakdown::compile_breakdown(spec, Some(&values)).map(Some)
    }
}

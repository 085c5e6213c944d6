//! Time-to-convert histogram: bins the per-person conversion durations
//! returned by [`crate::engine::compile_time_to_convert`].
//!
//! Binning happens here rather than in SQL; the duration query returns one
//! row per converted person and the sample sizes stay small.

use crate::error::Result;
use crate::types::{ConversionTimeHistogram, HistogramBin};
use pathline_query::StoreError;
use sea_orm::QueryResult;

/// Upper bound on a caller-supplied bin count
pub const MAX_BINS: usize = 90;

/// Automatic bin selection follows the cube-root rule within these bounds
pub const AUTO_MIN_BINS: usize = 3;
pub const AUTO_MAX_BINS: usize = 60;

/// Fallback width when the sample has no spread to divide
const MIN_BIN_WIDTH_SECONDS: i64 = 60;

pub fn decode_durations(rows: &[QueryResult]) -> Result<Vec<f64>> {
    rows.iter()
        .map(|row| {
            row.try_get("", "total_conversion_time")
                .map_err(|e| StoreError::from(e).into())
        })
        .collect()
}

/// Contiguous integer-second bins over the observed range.
///
/// The bin count is the caller's, clamped to `1..=MAX_BINS`, or
/// `ceil(cbrt(n))` clamped to `AUTO_MIN_BINS..=AUTO_MAX_BINS`. The width is
/// `ceil(range / count)` seconds, falling back to one minute when the sample
/// has no spread. Every bucket between the minimum and the maximum is
/// emitted, so the output always holds `count + 1` bins, zero-filled where no
/// person landed. An empty sample produces an empty histogram, not an error.
pub fn build_histogram(durations: &[f64], bin_count: Option<usize>) -> ConversionTimeHistogram {
    if durations.is_empty() {
        return ConversionTimeHistogram { bins: Vec::new() };
    }

    let count = match bin_count {
        Some(explicit) => explicit.clamp(1, MAX_BINS),
        None => ((durations.len() as f64).cbrt().ceil() as usize)
            .clamp(AUTO_MIN_BINS, AUTO_MAX_BINS),
    };

    let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let from = min.floor() as i64;
    let to = max.ceil() as i64;

    let mut width = (to - from + count as i64 - 1) / count as i64;
    if width <= 0 {
        width = MIN_BIN_WIDTH_SECONDS;
    }

    let mut counts = vec![0u64; count + 1];
    for &value in durations {
        let index = (((value - from as f64) / width as f64).floor() as usize).min(count);
        counts[index] += 1;
    }

    let bins = counts
        .into_iter()
        .enumerate()
        .map(|(b, person_count)| HistogramBin {
            from_seconds: from + width * b as i64,
            to_seconds: from + width * (b + 1) as i64,
            person_count,
        })
        .collect();

    ConversionTimeHistogram { bins }
}

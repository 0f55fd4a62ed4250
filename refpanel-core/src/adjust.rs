//! Corporate-action price adjustment.
//!
//! Every event (split, dividend, spin-off) carries a factor that applies to
//! all prices observed before its effective date. The cumulative factor of an
//! observation is the product of the factors of all later events.

use crate::domain::{AdjustmentEvent, FACTOR_COL};
use crate::frame;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashMap;

/// Suffix appended to the adjusted copy of a column.
pub const ADJ_SUFFIX: &str = "_adj";

/// Cumulative factor of each observation date, in the order given.
///
/// `factor(d)` is the product of every event with `effective_date > d`;
/// missing event factors count as 1.0. Runs as one backward scan over both
/// lists sorted by date.
pub fn cumulative_factors(observations: &[NaiveDate], events: &[AdjustmentEvent]) -> Vec<f64> {
    let mut out = vec![1.0; observations.len()];
    if events.is_empty() {
        return out;
    }

    let mut obs_order: Vec<usize> = (0..observations.len()).collect();
    obs_order.sort_by_key(|&i| observations[i]);

    let mut sorted_events: Vec<&AdjustmentEvent> = events.iter().collect();
    sorted_events.sort_by_key(|e| e.effective_date);

    let mut product = 1.0;
    let mut next_event = sorted_events.len();
    for &i in obs_order.iter().rev() {
        let date = observations[i];
        while next_event > 0 && sorted_events[next_event - 1].effective_date > date {
            next_event -= 1;
            product *= sorted_events[next_event].multiplier();
        }
        out[i] = product;
    }
    out
}

/// Group event rows by entity key. Rows with a null key or date are skipped.
pub fn events_by_key(
    df: &DataFrame,
    key_column: &str,
    date_column: &str,
    factor_column: &str,
) -> PolarsResult<HashMap<String, Vec<AdjustmentEvent>>> {
    let keys = frame::read_strings(df, key_column)?;
    let dates = frame::read_dates(df, date_column)?;
    let factors = frame::read_floats(df, factor_column)?;

    let mut out: HashMap<String, Vec<AdjustmentEvent>> = HashMap::new();
    for ((key, date), factor) in keys.into_iter().zip(dates).zip(factors) {
        if let (Some(key), Some(effective_date)) = (key, date) {
            out.entry(key).or_default().push(AdjustmentEvent {
                effective_date,
                factor,
            });
        }
    }
    Ok(out)
}

/// Add `cum_factor` and one `<col>_adj` column per adjustable column.
///
/// Factors are computed per value of `key_column`. When `enabled` is false
/// the factor is 1.0 everywhere and the `_adj` columns equal their source.
/// Columns in `adjustable` that are missing from `df` are skipped.
pub fn adjust_prices(
    df: &DataFrame,
    key_column: &str,
    date_column: &str,
    events: &HashMap<String, Vec<AdjustmentEvent>>,
    adjustable: &[String],
    enabled: bool,
) -> PolarsResult<DataFrame> {
    let factors = if enabled {
        row_factors(df, key_column, date_column, events)?
    } else {
        vec![1.0; df.height()]
    };

    let mut out = df.clone();
    for column in adjustable {
        if !frame::has_column(df, column) {
            continue;
        }
        let adjusted: Vec<Option<f64>> = frame::read_floats(df, column)?
            .into_iter()
            .zip(&factors)
            .map(|(value, factor)| value.map(|v| v * factor))
            .collect();
        out.with_column(Column::new(format!("{column}{ADJ_SUFFIX}").into(), adjusted))?;
    }
    out.with_column(Column::new(FACTOR_COL.into(), factors))?;
    Ok(out)
}

fn row_factors(
    df: &DataFrame,
    key_column: &str,
    date_column: &str,
    events: &HashMap<String, Vec<AdjustmentEvent>>,
) -> PolarsResult<Vec<f64>> {
    let keys = frame::read_strings(df, key_column)?;
    let dates = frame::read_dates(df, date_column)?;

    let mut rows_by_key: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        if let (Some(key), Some(_)) = (key, dates[i]) {
            rows_by_key.entry(key.as_str()).or_default().push(i);
        }
    }

    let mut factors = vec![1.0; df.height()];
    for (key, rows) in rows_by_key {
        let Some(key_events) = events.get(key) else {
            continue;
        };
        let observed: Vec<NaiveDate> = rows.iter().filter_map(|&i| dates[i]).collect();
        for (&i, factor) in rows.iter().zip(cumulative_factors(&observed, key_events)) {
            factors[i] = factor;
        }
    }
    Ok(factors)
}

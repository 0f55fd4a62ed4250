//! Per-dataset loaders.
//!
//! Each loader turns mapped entities and a date window into one long-format
//! frame carrying an `ISIN` column. Fetch failures follow the configured
//! [`FetchPolicy`].

pub mod estimates;
pub mod fundamentals;
pub mod prices;

pub use estimates::{EstimateLoad, EstimatesLoader};
pub use fundamentals::{FundamentalsLoad, FundamentalsLoader};
pub use prices::{PriceLoad, PriceLoader};

use crate::config::FetchPolicy;
use crate::domain::ISIN_COL;
use crate::frame;
use crate::panel::PanelError;
use crate::query::Query;
use crate::source::{self, Database};
use polars::prelude::*;
use std::collections::HashMap;

/// Run `query` and apply `policy`. `Ok(None)` means "no rows to use".
pub(crate) fn fetch_rows(
    db: &dyn Database,
    query: &Query,
    policy: FetchPolicy,
) -> Result<Option<DataFrame>, PanelError> {
    source::fetch(db, query)
        .into_rows(policy, &query.table)
        .map_err(|source| PanelError::Fetch {
            table: query.table.to_string(),
            source,
        })
}

/// Keep rows whose `key_column` maps to an ISIN and prepend the `ISIN`
/// column. `pairs` is `(key, isin)`.
pub(crate) fn attach_isin(
    df: &DataFrame,
    key_column: &str,
    pairs: &[(String, String)],
) -> PolarsResult<DataFrame> {
    let lookup: HashMap<&str, &str> = pairs
        .iter()
        .map(|(key, isin)| (key.as_str(), isin.as_str()))
        .collect();
    let keys = frame::read_strings(df, key_column)?;

    let mut mask = Vec::with_capacity(keys.len());
    let mut isins = Vec::new();
    for key in &keys {
        match key.as_deref().and_then(|k| lookup.get(k)) {
            Some(isin) => {
                mask.push(true);
                isins.push(*isin);
            }
            None => mask.push(false),
        }
    }

    let dropped = mask.iter().filter(|m| !**m).count();
    if dropped > 0 {
        tracing::debug!(dropped, "rows without ISIN mapping dropped");
    }

    let mut out = df.filter(&BooleanChunked::from_slice("mask".into(), &mask))?;
    if frame::has_column(&out, ISIN_COL) {
        out.drop_in_place(ISIN_COL)?;
    }
    out.insert_column(0, Column::new(ISIN_COL.into(), isins))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_isin_is_an_inner_join() {
        let df = df!(
            "fsym_id" => &["A-S", "X-S", "B-S"],
            "value" => &[1.0, 2.0, 3.0]
        )
        .unwrap();
        let pairs = vec![
            ("A-S".to_string(), "US0000000001".to_string()),
            ("B-S".to_string(), "US0000000002".to_string()),
        ];
        let out = attach_isin(&df, "fsym_id", &pairs).unwrap();
        assert_eq!(frame::column_names(&out), vec!["ISIN", "fsym_id", "value"]);
        assert_eq!(
            frame::read_strings(&out, "ISIN").unwrap(),
            vec![Some("US0000000001".into()), Some("US0000000002".into())]
        );
    }
}

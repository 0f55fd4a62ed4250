//! Calendar alignment.
//!
//! Series keyed by `(date, ISIN)` are left-joined onto a canonical date
//! spine. The calendar drives the join, so every calendar date survives even
//! when no series has data for it.

use crate::domain::{ISIN_COL, PRICE_DATE_COL};
use crate::frame;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};

/// Canonical calendar: sorted, deduplicated dates in a single column.
#[derive(Debug, Clone)]
pub struct CalendarAligner {
    dates: Vec<NaiveDate>,
    date_column: String,
}

impl CalendarAligner {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>, date_column: impl Into<String>) -> Self {
        let dates: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: dates.into_iter().collect(),
            date_column: date_column.into(),
        }
    }

    /// Calendar from the `date_column` of a reference table. Null dates are
    /// dropped.
    pub fn from_frame(df: &DataFrame, date_column: &str) -> PolarsResult<Self> {
        let dates = frame::read_dates(df, date_column)?;
        Ok(Self::new(dates.into_iter().flatten(), date_column))
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    /// The calendar as a one-column frame.
    pub fn spine(&self) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![frame::date_column(&self.date_column, &self.dates)?])
    }

    /// Left-join every series onto the calendar, in order.
    ///
    /// Each series joins on its date column (`price_date` when present, else
    /// `date`) and on `ISIN` once both sides carry it. Non-key columns that
    /// the result already has are dropped from the incoming series.
    pub fn align(&self, series: &[DataFrame]) -> PolarsResult<DataFrame> {
        let mut result = self.spine()?;
        for df in series {
            result = self.join_one(&result, df)?;
        }
        Ok(result)
    }

    fn join_one(&self, left: &DataFrame, right: &DataFrame) -> PolarsResult<DataFrame> {
        let right_date = if frame::has_column(right, PRICE_DATE_COL) {
            PRICE_DATE_COL
        } else {
            crate::domain::DATE_COL
        };
        let with_isin = frame::has_column(left, ISIN_COL) && frame::has_column(right, ISIN_COL);

        // Columns carried over from the right side.
        let carried: Vec<String> = frame::column_names(right)
            .into_iter()
            .filter(|c| c != right_date && !(with_isin && c == ISIN_COL))
            .filter(|c| !frame::has_column(left, c))
            .collect();

        let right_dates = if frame::has_column(right, right_date) {
            frame::read_dates(right, right_date)?
        } else {
            vec![None; right.height()]
        };
        let right_isins = if with_isin {
            frame::read_strings(right, ISIN_COL)?
        } else {
            vec![None; right.height()]
        };

        let mut lookup: HashMap<(NaiveDate, Option<&str>), Vec<IdxSize>> = HashMap::new();
        for (j, date) in right_dates.iter().enumerate() {
            let Some(date) = date else { continue };
            let isin = right_isins[j].as_deref();
            if with_isin && isin.is_none() {
                continue;
            }
            lookup.entry((*date, isin)).or_default().push(j as IdxSize);
        }

        let left_dates = frame::read_dates(left, &self.date_column)?;
        let left_isins = if with_isin {
            frame::read_strings(left, ISIN_COL)?
        } else {
            vec![None; left.height()]
        };

        let mut left_idx: Vec<IdxSize> = Vec::with_capacity(left.height());
        let mut right_idx: Vec<Option<IdxSize>> = Vec::with_capacity(left.height());
        for (i, date) in left_dates.iter().enumerate() {
            let matches = date.and_then(|d| {
                let isin = left_isins[i].as_deref();
                if with_isin && isin.is_none() {
                    return None;
                }
                lookup.get(&(d, isin))
            });
            match matches {
                Some(rows) => {
                    for &j in rows {
                        left_idx.push(i as IdxSize);
                        right_idx.push(Some(j));
                    }
                }
                None => {
                    left_idx.push(i as IdxSize);
                    right_idx.push(None);
                }
            }
        }

        let left_rows = left.take(&IdxCa::from_vec("left".into(), left_idx))?;
        let right_rows = right.select(carried.iter().map(String::as_str))?;
        let right_columns: Vec<Column> = if right_idx.iter().all(Option::is_none) {
            right_rows
                .get_columns()
                .iter()
                .map(|c| frame::null_column(c.name(), left_rows.height(), c.dtype()))
                .collect()
        } else {
            right_rows
                .take(&IdxCa::from_iter_options("right".into(), right_idx.into_iter()))?
                .take_columns()
        };
        left_rows.hstack(&right_columns)
    }
}

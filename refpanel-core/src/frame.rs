//! Small DataFrame helpers shared by the loaders.

use chrono::NaiveDate;
use polars::prelude::*;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date")
}

/// Days since 1970-01-01, the physical representation of a polars `Date`.
pub fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

pub fn date_from_days(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

/// Build a `Date` column from chrono dates.
pub fn date_column(name: &str, dates: &[NaiveDate]) -> PolarsResult<Column> {
    let days: Vec<i32> = dates.iter().map(|d| days_since_epoch(*d)).collect();
    Column::new(name.into(), days).cast(&DataType::Date)
}

/// Build a nullable `Date` column.
pub fn opt_date_column(name: &str, dates: &[Option<NaiveDate>]) -> PolarsResult<Column> {
    let days: Vec<Option<i32>> = dates.iter().map(|d| d.map(days_since_epoch)).collect();
    Column::new(name.into(), days).cast(&DataType::Date)
}

/// All-null column of the given type.
pub fn null_column(name: &str, len: usize, dtype: &DataType) -> Column {
    Series::full_null(name.into(), len, dtype).into_column()
}

/// Zero-row frame with the given typed columns.
pub fn empty_frame(columns: &[(&str, DataType)]) -> PolarsResult<DataFrame> {
    DataFrame::new(
        columns
            .iter()
            .map(|(name, dtype)| Series::new_empty((*name).into(), dtype).into_column())
            .collect(),
    )
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Actual name of the column matching `name` case-insensitively.
pub fn find_column(df: &DataFrame, name: &str) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .find(|c| c.eq_ignore_ascii_case(name))
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect()
}

/// Read a column as dates.
///
/// `Date` columns are read directly, `Datetime` columns are truncated and
/// ISO strings (`YYYY-MM-DD`, optionally followed by a time) are parsed.
/// Unparseable strings read as null.
pub fn read_dates(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<NaiveDate>>> {
    let column = df.column(name)?;
    match column.dtype() {
        DataType::String => {
            let ca = column.str()?;
            Ok((0..ca.len())
                .map(|i| ca.get(i).and_then(parse_iso_date))
                .collect())
        }
        DataType::Date => Ok(date_values(column.date()?)),
        _ => {
            let cast = column.cast(&DataType::Date)?;
            Ok(date_values(cast.date()?))
        }
    }
}

fn date_values(ca: &DateChunked) -> Vec<Option<NaiveDate>> {
    (0..ca.len()).map(|i| ca.get(i).map(date_from_days)).collect()
}

fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Read a column as strings (non-string columns are cast).
pub fn read_strings(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let ca = column.str()?;
    Ok((0..ca.len()).map(|i| ca.get(i).map(str::to_string)).collect())
}

/// Read a column as floats (non-float columns are cast; failures read as null).
pub fn read_floats(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let ca = column.f64()?;
    Ok((0..ca.len()).map(|i| ca.get(i)).collect())
}

/// Make `name` a `Date` column, parsing strings when needed.
pub fn normalize_date_column(df: &mut DataFrame, name: &str) -> PolarsResult<()> {
    if df.column(name)?.dtype() == &DataType::Date {
        return Ok(());
    }
    let dates = read_dates(df, name)?;
    df.with_column(opt_date_column(name, &dates)?)?;
    Ok(())
}

/// Vertical concatenation over the union of columns.
///
/// Column order is first-seen across `frames`; a column missing from a frame
/// is filled with nulls of the type it has where first seen.
pub fn concat_diagonal(frames: Vec<DataFrame>) -> PolarsResult<DataFrame> {
    let mut union: Vec<(String, DataType)> = Vec::new();
    for df in &frames {
        for column in df.get_columns() {
            let name = column.name().to_string();
            if !union.iter().any(|(n, _)| *n == name) {
                union.push((name, column.dtype().clone()));
            }
        }
    }

    let mut acc: Option<DataFrame> = None;
    for df in frames {
        let height = df.height();
        let mut columns = Vec::with_capacity(union.len());
        for (name, dtype) in &union {
            let column = match df.column(name) {
                Ok(c) if c.dtype() == dtype => c.clone(),
                Ok(c) => c.cast(dtype)?,
                Err(_) => null_column(name, height, dtype),
            };
            columns.push(column);
        }
        let aligned = DataFrame::new(columns)?;
        acc = Some(match acc {
            None => aligned,
            Some(mut a) => {
                a.vstack_mut(&aligned)?;
                a
            }
        });
    }

    match acc {
        Some(df) => Ok(df),
        None => Ok(DataFrame::empty()),
    }
}

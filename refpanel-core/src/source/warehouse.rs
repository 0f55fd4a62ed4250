//! In-process table store.
//!
//! [`FrameWarehouse`] holds one `DataFrame` per table and answers [`Query`]
//! values the way a SQL engine would: table and column names match
//! case-insensitively, unknown names are errors, and filters are AND-ed.
//! It backs the CLI (a directory of exported tables) and the test fixtures.

use super::{Catalog, Database, SourceError};
use crate::domain::TableId;
use crate::frame;
use crate::query::{Filter, Projection, Query, Value};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct FrameWarehouse {
    name: String,
    /// Keyed by the folded table id.
    tables: BTreeMap<String, (TableId, DataFrame)>,
}

impl FrameWarehouse {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Register or replace a table.
    pub fn insert(&mut self, table: TableId, df: DataFrame) {
        self.tables.insert(table.folded(), (table, df));
    }

    pub fn with_table(mut self, table: TableId, df: DataFrame) -> Self {
        self.insert(table, df);
        self
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Load every `<schema>.<table>.parquet` and `<schema>.<table>.csv` file
    /// in `dir`. Other files are skipped.
    pub fn from_dir(dir: &Path) -> Result<Self, SourceError> {
        let mut warehouse = Self::new(dir.display().to_string());
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let (stem, format) = if let Some(stem) = file_name.strip_suffix(".parquet") {
                (stem, TableFormat::Parquet)
            } else if let Some(stem) = file_name.strip_suffix(".csv") {
                (stem, TableFormat::Csv)
            } else {
                tracing::debug!(file = file_name, "skipping non-table file");
                continue;
            };
            let table: TableId = match stem.parse() {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(file = file_name, error = %e, "skipping file with invalid table name");
                    continue;
                }
            };
            let df = read_table(&path, format)?;
            tracing::debug!(%table, rows = df.height(), "loaded table");
            warehouse.insert(table, df);
        }
        Ok(warehouse)
    }

    fn lookup(&self, table: &TableId) -> Result<&DataFrame, SourceError> {
        self.tables
            .get(&table.folded())
            .map(|(_, df)| df)
            .ok_or_else(|| SourceError::UnknownTable(table.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum TableFormat {
    Parquet,
    Csv,
}

fn read_table(path: &Path, format: TableFormat) -> Result<DataFrame, SourceError> {
    let lf = match format {
        TableFormat::Parquet => LazyFrame::scan_parquet(path, Default::default())?,
        TableFormat::Csv => LazyCsvReader::new(path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()?,
    };
    Ok(lf.collect()?)
}

impl Database for FrameWarehouse {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, query: &Query) -> Result<DataFrame, SourceError> {
        let df = self.lookup(&query.table)?;
        let table = query.table.to_string();

        let mut mask = vec![true; df.height()];
        for filter in &query.filters {
            let actual = resolve_column(df, &table, filter.column().as_str())?;
            apply_filter(df, &table, &actual, filter, &mut mask)?;
        }
        let selected = df.filter(&BooleanChunked::from_slice("mask".into(), &mask))?;

        match &query.projection {
            Projection::All => Ok(selected),
            Projection::Columns(columns) => {
                let mut actual_names = Vec::with_capacity(columns.len());
                for column in columns {
                    actual_names.push(resolve_column(&selected, &table, column.as_str())?);
                }
                let mut out = selected.select(actual_names.iter().map(String::as_str))?;
                for (actual, requested) in actual_names.iter().zip(columns) {
                    if actual != requested.as_str() {
                        out.rename(actual, requested.as_str().into())?;
                    }
                }
                Ok(out)
            }
        }
    }
}

impl Catalog for FrameWarehouse {
    fn all_tables(&self) -> Result<Vec<TableId>, SourceError> {
        Ok(self.tables.values().map(|(id, _)| id.clone()).collect())
    }

    fn columns(&self, table: &TableId) -> Result<Vec<String>, SourceError> {
        Ok(frame::column_names(self.lookup(table)?))
    }
}

fn resolve_column(df: &DataFrame, table: &str, column: &str) -> Result<String, SourceError> {
    frame::find_column(df, column).ok_or_else(|| SourceError::UnknownColumn {
        table: table.to_string(),
        column: column.to_string(),
    })
}

/// Cell values of `column` read with the same kind as `like`.
fn read_like(
    df: &DataFrame,
    table: &str,
    column: &str,
    like: &Value,
) -> Result<Vec<Option<Value>>, SourceError> {
    let mismatch = |expected: &'static str| SourceError::TypeMismatch {
        table: table.to_string(),
        column: column.to_string(),
        expected,
    };
    let cells = match like {
        Value::Str(_) => frame::read_strings(df, column)
            .map_err(|_| mismatch("string"))?
            .into_iter()
            .map(|v| v.map(Value::Str))
            .collect(),
        Value::Date(_) => frame::read_dates(df, column)
            .map_err(|_| mismatch("date"))?
            .into_iter()
            .map(|v| v.map(Value::Date))
            .collect(),
        Value::Float(_) => frame::read_floats(df, column)
            .map_err(|_| mismatch("number"))?
            .into_iter()
            .map(|v| v.map(Value::Float))
            .collect(),
    };
    Ok(cells)
}

/// AND `filter` into `mask`. Null cells never match.
fn apply_filter(
    df: &DataFrame,
    table: &str,
    column: &str,
    filter: &Filter,
    mask: &mut [bool],
) -> Result<(), SourceError> {
    match filter {
        Filter::Eq { value, .. } => {
            let cells = read_like(df, table, column, value)?;
            and_mask(mask, &cells, |cell| cell == value);
        }
        Filter::In { values, .. } => {
            let Some(first) = values.first() else {
                mask.iter_mut().for_each(|m| *m = false);
                return Ok(());
            };
            let cells = read_like(df, table, column, first)?;
            and_mask(mask, &cells, |cell| values.contains(cell));
        }
        Filter::Between { low, high, .. } => {
            let cells = read_like(df, table, column, low)?;
            and_mask(mask, &cells, |cell| cell >= low && cell <= high);
        }
        Filter::AtLeast { value, .. } => {
            let cells = read_like(df, table, column, value)?;
            and_mask(mask, &cells, |cell| cell >= value);
        }
        Filter::EndsWith { suffix, .. } => {
            let cells = frame::read_strings(df, column).map_err(|_| SourceError::TypeMismatch {
                table: table.to_string(),
                column: column.to_string(),
                expected: "string",
            })?;
            for (m, cell) in mask.iter_mut().zip(&cells) {
                *m = *m && cell.as_deref().is_some_and(|s| s.ends_with(suffix.as_str()));
            }
        }
    }
    Ok(())
}

fn and_mask(mask: &mut [bool], cells: &[Option<Value>], pred: impl Fn(&Value) -> bool) {
    for (m, cell) in mask.iter_mut().zip(cells) {
        *m = *m && cell.as_ref().is_some_and(&pred);
    }
}

//! Fundamentals loader: resolve, fetch per table, align on the calendar.

use super::{attach_isin, fetch_rows};
use crate::align::CalendarAligner;
use crate::config::{CalendarSettings, FetchPolicy, FundamentalsSettings};
use crate::domain::{
    DateWindow, EntityMap, Frequency, Ident, TableId, DATE_COL, ENTITY_COL, ISIN_COL,
};
use crate::frame;
use crate::panel::PanelError;
use crate::query::Query;
use crate::resolve::{FieldResolver, ResolutionMap};
use crate::source::{Catalog, Database};
use polars::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct FundamentalsLoad {
    /// `date, ISIN, <fields in request order>`.
    pub frame: DataFrame,
    pub resolution: ResolutionMap,
}

pub struct FundamentalsLoader<'a> {
    db: &'a dyn Database,
    resolver: FieldResolver<'a>,
    settings: &'a FundamentalsSettings,
    calendar: &'a CalendarSettings,
    policy: FetchPolicy,
}

impl<'a> FundamentalsLoader<'a> {
    pub fn new(
        db: &'a dyn Database,
        catalog: &'a dyn Catalog,
        settings: &'a FundamentalsSettings,
        calendar: &'a CalendarSettings,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            db,
            resolver: FieldResolver::new(catalog, settings.schema.clone(), settings.priority.clone()),
            settings,
            calendar,
            policy,
        }
    }

    pub fn resolver(&self) -> &FieldResolver<'a> {
        &self.resolver
    }

    pub fn load(
        &self,
        entities: &EntityMap,
        window: DateWindow,
        fields: &[String],
        frequency: Frequency,
        allow_fallback: bool,
    ) -> Result<FundamentalsLoad, PanelError> {
        let resolution = self
            .resolver
            .resolve(fields, frequency, allow_fallback)
            .map_err(PanelError::Catalog)?;
        let requested: Vec<String> = resolution.fields().iter().map(|f| f.to_string()).collect();

        let securities = entities.security_ids();
        let mut series = Vec::new();
        if !securities.is_empty() {
            let pairs = entities.by_security();
            for (table, table_fields) in resolution.by_table() {
                let Some(raw) = self.fetch_table(&table, &table_fields, &securities, window)? else {
                    continue;
                };
                let mut df = attach_isin(&raw, ENTITY_COL, &pairs)?;
                df.drop_in_place(ENTITY_COL)?;
                series.push(df);
            }
        }

        if series.is_empty() {
            tracing::debug!("no fundamentals fetched, returning an empty frame");
            return Ok(FundamentalsLoad {
                frame: empty_output(&requested)?,
                resolution,
            });
        }

        let aligner = self.calendar(&series)?;
        let aligned = aligner.align(&series)?;
        let frame = finish(aligned, aligner.date_column(), window, &requested)?;
        tracing::debug!(rows = frame.height(), tables = series.len(), "loaded fundamentals");
        Ok(FundamentalsLoad { frame, resolution })
    }

    fn fetch_table(
        &self,
        table: &TableId,
        fields: &[String],
        securities: &[String],
        window: DateWindow,
    ) -> Result<Option<DataFrame>, PanelError> {
        let date = &self.settings.date_column;
        let mut columns = vec![Ident::new(ENTITY_COL)?, date.clone()];
        for field in fields {
            columns.push(Ident::new(field.as_str())?);
        }
        let query = Query::select(table.clone(), columns)
            .where_in(Ident::new(ENTITY_COL)?, securities.iter().cloned())
            .between(date.clone(), window.start(), window.end());

        let Some(mut df) = fetch_rows(self.db, &query, self.policy)? else {
            return Ok(None);
        };
        if date.as_str() != DATE_COL {
            df.rename(date.as_str(), DATE_COL.into())?;
        }
        frame::normalize_date_column(&mut df, DATE_COL)?;
        Ok(Some(df))
    }

    /// The reference calendar. When it cannot be read under the degrade
    /// policy, the union of the series dates stands in for it.
    fn calendar(&self, series: &[DataFrame]) -> Result<CalendarAligner, PanelError> {
        let query = Query::select(self.calendar.table.clone(), vec![self.calendar.date_column.clone()]);
        let column = self.calendar.date_column.as_str();
        match fetch_rows(self.db, &query, self.policy)? {
            Some(df) => Ok(CalendarAligner::from_frame(&df, column)?),
            None => {
                tracing::warn!(table = %self.calendar.table, "calendar unavailable, using observed dates");
                let mut dates = BTreeSet::new();
                for df in series {
                    dates.extend(frame::read_dates(df, DATE_COL)?.into_iter().flatten());
                }
                Ok(CalendarAligner::new(dates, column))
            }
        }
    }
}

/// `date, ISIN, <fields>` with no rows.
fn empty_output(fields: &[String]) -> PolarsResult<DataFrame> {
    let mut columns: Vec<(&str, DataType)> =
        vec![(DATE_COL, DataType::Date), (ISIN_COL, DataType::String)];
    columns.extend(fields.iter().map(|f| (f.as_str(), DataType::Float64)));
    frame::empty_frame(&columns)
}

/// Turn the aligned frame into `date, ISIN, <fields>`, restricted to the
/// window and to rows that carry an ISIN. Fields no fetched table supplied
/// (unresolved, or their table came back empty) become Float64 null columns.
fn finish(
    mut aligned: DataFrame,
    calendar_column: &str,
    window: DateWindow,
    fields: &[String],
) -> PolarsResult<DataFrame> {
    let stale: Vec<String> = frame::column_names(&aligned)
        .into_iter()
        .filter(|c| c != calendar_column && c.to_ascii_lowercase().starts_with(DATE_COL))
        .filter(|c| !fields.contains(c))
        .collect();
    for column in &stale {
        aligned.drop_in_place(column)?;
    }
    if calendar_column != DATE_COL {
        aligned.rename(calendar_column, DATE_COL.into())?;
    }

    let dates = frame::read_dates(&aligned, DATE_COL)?;
    let isins = frame::read_strings(&aligned, ISIN_COL)?;
    let mask: Vec<bool> = dates
        .iter()
        .zip(&isins)
        .map(|(date, isin)| date.is_some_and(|d| window.contains(d)) && isin.is_some())
        .collect();
    let mut kept = aligned.filter(&BooleanChunked::from_slice("mask".into(), &mask))?;

    for field in fields {
        if !frame::has_column(&kept, field) {
            tracing::debug!(field = %field, "no rows fetched for field, filling with nulls");
            kept.with_column(frame::null_column(field, kept.height(), &DataType::Float64))?;
        }
    }

    let mut order = vec![DATE_COL.to_string(), ISIN_COL.to_string()];
    order.extend(fields.iter().cloned());
    kept.select(order)
}

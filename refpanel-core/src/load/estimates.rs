//! Estimates loader.
//!
//! One estimate kind (consensus, actuals, guidance, ...) is spread across
//! alternative tables. Candidates are tried in order until every requested
//! item has been found; items that never show up get placeholder rows so
//! the output carries every requested item for every entity and period.

use super::{attach_isin, fetch_rows};
use crate::config::{EstimateSettings, FetchPolicy};
use crate::domain::{DateWindow, EntityMap, Frequency, Ident, ENTITY_COL, ISIN_COL};
use crate::frame;
use crate::panel::PanelError;
use crate::query::Query;
use crate::source::Database;
use polars::prelude::*;

#[derive(Debug, Clone)]
pub struct EstimateLoad {
    pub frame: DataFrame,
    /// Requested items that were filled with null rows.
    pub synthesized: Vec<String>,
}

pub struct EstimatesLoader<'a> {
    db: &'a dyn Database,
    settings: &'a EstimateSettings,
    policy: FetchPolicy,
}

impl<'a> EstimatesLoader<'a> {
    pub fn new(db: &'a dyn Database, settings: &'a EstimateSettings, policy: FetchPolicy) -> Self {
        Self {
            db,
            settings,
            policy,
        }
    }

    pub fn load(
        &self,
        entities: &EntityMap,
        window: DateWindow,
        kind: &str,
        items: &[String],
        frequency: Frequency,
    ) -> Result<EstimateLoad, PanelError> {
        let items = dedup(items);
        let securities = entities.security_ids();
        if items.is_empty() || securities.is_empty() {
            return Ok(EstimateLoad {
                frame: self.empty()?,
                synthesized: Vec::new(),
            });
        }

        let item_col = self.settings.item_column.as_str();
        let mut found: Vec<String> = Vec::new();
        let mut collected = Vec::new();
        let mut last_failure = None;

        for table in self.settings.candidate_tables(kind, frequency)? {
            let missing: Vec<String> = items.iter().filter(|i| !found.contains(i)).cloned().collect();
            if missing.is_empty() {
                break;
            }

            let query = Query::select_all(table.clone())
                .where_in(self.settings.item_column.clone(), missing)
                .between(self.settings.period_column.clone(), window.start(), window.end())
                .where_in(Ident::new(ENTITY_COL)?, securities.iter().cloned());

            // A missing alternative table is expected; move on to the next one.
            let rows = match fetch_rows(self.db, &query, FetchPolicy::Escalate) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(%table, kind, error = %e, "estimate table unavailable, trying next");
                    last_failure = Some(e);
                    continue;
                }
            };
            let Some(mut df) = rows else { continue };

            frame::normalize_date_column(&mut df, self.settings.period_column.as_str())?;
            for item in frame::read_strings(&df, item_col)?.into_iter().flatten() {
                if !found.contains(&item) {
                    found.push(item);
                }
            }
            tracing::debug!(%table, kind, rows = df.height(), "fetched estimates");
            collected.push(df);
        }

        if collected.is_empty() {
            if let (FetchPolicy::Escalate, Some(e)) = (self.policy, last_failure) {
                return Err(e);
            }
            return Ok(EstimateLoad {
                frame: self.empty()?,
                synthesized: Vec::new(),
            });
        }

        let mut all = frame::concat_diagonal(collected)?;
        let missing: Vec<String> = items.into_iter().filter(|i| !found.contains(i)).collect();
        let synthesized = if missing.is_empty() {
            Vec::new()
        } else {
            all = self.synthesize(all, &missing)?;
            missing
        };

        let frame = attach_isin(&all, ENTITY_COL, &entities.by_security())?;
        Ok(EstimateLoad { frame, synthesized })
    }

    /// Append one null row per distinct natural key for every missing item.
    fn synthesize(&self, df: DataFrame, missing: &[String]) -> PolarsResult<DataFrame> {
        let keys: Vec<String> = self
            .settings
            .key_columns
            .iter()
            .map(|k| k.as_str().to_string())
            .filter(|k| frame::has_column(&df, k))
            .collect();
        if keys.is_empty() {
            tracing::warn!(items = ?missing, "no key columns to build placeholder rows");
            return Ok(df);
        }

        let base = df
            .select(keys.iter().map(String::as_str))?
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()?;

        let mut frames = vec![df];
        for item in missing {
            tracing::warn!(item = %item, rows = base.height(), "estimate item not found, adding null rows");
            let mut placeholder = base.clone();
            let values = vec![item.as_str(); base.height()];
            placeholder.with_column(Column::new(self.settings.item_column.as_str().into(), values))?;
            frames.push(placeholder);
        }
        frame::concat_diagonal(frames)
    }

    fn empty(&self) -> PolarsResult<DataFrame> {
        frame::empty_frame(&[
            (ISIN_COL, DataType::String),
            (ENTITY_COL, DataType::String),
            (self.settings.item_column.as_str(), DataType::String),
            (self.settings.period_column.as_str(), DataType::Date),
        ])
    }
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

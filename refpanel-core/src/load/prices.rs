//! Price loader.

use super::{attach_isin, fetch_rows};
use crate::adjust::{self, ADJ_SUFFIX};
use crate::config::{FetchPolicy, PriceSettings};
use crate::domain::{
    AdjustmentEvent, DateWindow, EntityMap, Ident, ENTITY_COL, ISIN_COL, PRICE_DATE_COL,
};
use crate::frame;
use crate::panel::PanelError;
use crate::query::Query;
use crate::source::{Catalog, Database};
use polars::prelude::*;
use std::collections::HashMap;

/// Loaded prices plus the requested fields that were not available.
#[derive(Debug, Clone)]
pub struct PriceLoad {
    /// `price_date, ISIN, <pass-through>, <adjustable>, <adjustable>_adj`.
    pub frame: DataFrame,
    pub dropped_fields: Vec<String>,
}

pub struct PriceLoader<'a> {
    db: &'a dyn Database,
    catalog: &'a dyn Catalog,
    settings: &'a PriceSettings,
    policy: FetchPolicy,
}

impl<'a> PriceLoader<'a> {
    pub fn new(
        db: &'a dyn Database,
        catalog: &'a dyn Catalog,
        settings: &'a PriceSettings,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            db,
            catalog,
            settings,
            policy,
        }
    }

    pub fn load(
        &self,
        entities: &EntityMap,
        window: DateWindow,
        fields: &[String],
        adjust: bool,
    ) -> Result<PriceLoad, PanelError> {
        let (fields, dropped_fields) = self.available_fields(fields)?;
        if fields.is_empty() {
            tracing::warn!("no valid price field requested, returning an empty frame");
            return Ok(PriceLoad {
                frame: self.empty(&[])?,
                dropped_fields,
            });
        }

        let listings = entities.regional_ids();
        if listings.is_empty() {
            return Ok(PriceLoad {
                frame: self.empty(&fields)?,
                dropped_fields,
            });
        }

        let Some(raw) = self.fetch_prices(&listings, window, &fields)? else {
            return Ok(PriceLoad {
                frame: self.empty(&fields)?,
                dropped_fields,
            });
        };
        let events = self.fetch_events(&listings, window)?;

        let mut prices = attach_isin(&raw, ENTITY_COL, &entities.by_regional())?;
        frame::normalize_date_column(&mut prices, PRICE_DATE_COL)?;

        let adjustable: Vec<String> = fields
            .iter()
            .filter(|f| self.settings.is_adjustable(f))
            .cloned()
            .collect();
        let adjusted =
            adjust::adjust_prices(&prices, ENTITY_COL, PRICE_DATE_COL, &events, &adjustable, adjust)?;

        let sorted = adjusted.sort([ISIN_COL, PRICE_DATE_COL], SortMultipleOptions::default())?;
        let frame = sorted.select(output_columns(&fields, &adjustable))?;
        tracing::debug!(rows = frame.height(), "loaded prices");
        Ok(PriceLoad {
            frame,
            dropped_fields,
        })
    }

    /// Split requested fields into those the price table has and those it
    /// does not. Key columns requested as fields are ignored.
    fn available_fields(&self, fields: &[String]) -> Result<(Vec<String>, Vec<String>), PanelError> {
        let columns: Vec<String> = match self.catalog.columns(&self.settings.table) {
            Ok(cols) => cols.iter().map(|c| c.to_ascii_lowercase()).collect(),
            Err(e) => match self.policy {
                FetchPolicy::Degrade => {
                    tracing::warn!(table = %self.settings.table, error = %e, "cannot list price columns");
                    Vec::new()
                }
                FetchPolicy::Escalate => return Err(PanelError::Catalog(e)),
            },
        };

        let mut kept: Vec<String> = Vec::new();
        let mut dropped = Vec::new();
        for field in fields {
            let lower = field.to_ascii_lowercase();
            if lower == ENTITY_COL || lower == PRICE_DATE_COL {
                continue;
            }
            if kept.iter().any(|k| k.eq_ignore_ascii_case(field)) {
                continue;
            }
            if Ident::new(field.as_str()).is_ok() && columns.contains(&lower) {
                if !self.settings.is_adjustable(field) && !self.settings.is_pass_through(field) {
                    tracing::debug!(field = %field, "unclassified price field, passing it through unadjusted");
                }
                kept.push(field.clone());
            } else {
                tracing::warn!(field = %field, table = %self.settings.table, "price field not available, ignoring it");
                dropped.push(field.clone());
            }
        }
        Ok((kept, dropped))
    }

    fn fetch_prices(
        &self,
        listings: &[String],
        window: DateWindow,
        fields: &[String],
    ) -> Result<Option<DataFrame>, PanelError> {
        let mut columns = vec![Ident::new(ENTITY_COL)?, self.settings.date_column.clone()];
        for field in fields {
            columns.push(Ident::new(field.as_str())?);
        }
        let mut query = Query::select(self.settings.table.clone(), columns)
            .where_in(Ident::new(ENTITY_COL)?, listings.iter().cloned())
            .between(self.settings.date_column.clone(), window.start(), window.end());
        if let Some(suffix) = &self.settings.regional_suffix {
            query = query.ends_with(Ident::new(ENTITY_COL)?, suffix.clone());
        }

        let Some(mut df) = fetch_rows(self.db, &query, self.policy)? else {
            return Ok(None);
        };
        if self.settings.date_column.as_str() != PRICE_DATE_COL {
            df.rename(self.settings.date_column.as_str(), PRICE_DATE_COL.into())?;
        }
        Ok(Some(df))
    }

    /// Events from the window start onward, keyed by listing id. Later events
    /// still adjust prices inside the window.
    fn fetch_events(
        &self,
        listings: &[String],
        window: DateWindow,
    ) -> Result<HashMap<String, Vec<AdjustmentEvent>>, PanelError> {
        let query = Query::select(
            self.settings.adjustment_table.clone(),
            vec![
                Ident::new(ENTITY_COL)?,
                self.settings.effective_date_column.clone(),
                self.settings.factor_column.clone(),
            ],
        )
        .where_in(Ident::new(ENTITY_COL)?, listings.iter().cloned())
        .at_least(self.settings.effective_date_column.clone(), window.start());

        match fetch_rows(self.db, &query, self.policy)? {
            Some(df) => Ok(adjust::events_by_key(
                &df,
                ENTITY_COL,
                self.settings.effective_date_column.as_str(),
                self.settings.factor_column.as_str(),
            )?),
            None => Ok(HashMap::new()),
        }
    }

    fn empty(&self, fields: &[String]) -> PolarsResult<DataFrame> {
        let mut columns = vec![
            (PRICE_DATE_COL.to_string(), DataType::Date),
            (ISIN_COL.to_string(), DataType::String),
        ];
        let adjustable: Vec<String> = fields
            .iter()
            .filter(|f| self.settings.is_adjustable(f))
            .cloned()
            .collect();
        for name in output_columns(fields, &adjustable).into_iter().skip(2) {
            columns.push((name, DataType::Float64));
        }
        let typed: Vec<(&str, DataType)> = columns
            .iter()
            .map(|(n, t)| (n.as_str(), t.clone()))
            .collect();
        frame::empty_frame(&typed)
    }
}

/// `price_date, ISIN, <pass-through>, <adjustable>, <adjustable>_adj`.
fn output_columns(fields: &[String], adjustable: &[String]) -> Vec<String> {
    let mut out = vec![PRICE_DATE_COL.to_string(), ISIN_COL.to_string()];
    out.extend(fields.iter().filter(|f| !adjustable.contains(f)).cloned());
    out.extend(adjustable.iter().cloned());
    out.extend(adjustable.iter().map(|f| format!("{f}{ADJ_SUFFIX}")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityLink;
    use crate::source::FrameWarehouse;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entities() -> EntityMap {
        EntityMap::new(vec![
            EntityLink {
                isin: "US0000000001".into(),
                security_id: "AAA-S".into(),
                regional_id: "AAA-R".into(),
            },
            EntityLink {
                isin: "US0000000002".into(),
                security_id: "BBB-S".into(),
                regional_id: "BBB-R".into(),
            },
        ])
    }

    fn warehouse() -> FrameWarehouse {
        FrameWarehouse::new("prices")
            .with_table(
                "fgp_v1.fgp_global_prices".parse().unwrap(),
                df!(
                    "fsym_id" => &["BBB-R", "AAA-R", "AAA-R", "AAA-X"],
                    "price_date" => &["2021-01-01", "2021-02-01", "2021-01-01", "2021-01-01"],
                    "price" => &[10.0, 52.0, 100.0, 1.0],
                    "currency" => &["EUR", "USD", "USD", "USD"],
                    "volume" => &[1000.0, 400.0, 200.0, 1.0]
                )
                .unwrap(),
            )
            .with_table(
                "fgp_v1.fgp_ca_adj_factors".parse().unwrap(),
                df!(
                    "fsym_id" => &["AAA-R", "AAA-R"],
                    "effective_date" => &["2020-06-01", "2021-01-15"],
                    "div_spl_spin_adj_factor" => &[0.1, 0.5]
                )
                .unwrap(),
            )
    }

    fn window() -> DateWindow {
        DateWindow::new(d(2021, 1, 1), d(2021, 12, 31)).unwrap()
    }

    #[test]
    fn loads_and_adjusts_prices() {
        let wh = warehouse();
        let settings = PriceSettings::default();
        let loader = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Degrade);
        let out = loader
            .load(
                &entities(),
                window(),
                &["price".into(), "currency".into(), "close".into()],
                true,
            )
            .unwrap();

        assert_eq!(out.dropped_fields, vec!["close"]);
        assert_eq!(
            frame::column_names(&out.frame),
            vec!["price_date", "ISIN", "currency", "price", "price_adj"]
        );
        // Sorted by ISIN then date; the 2020 event is before the window.
        assert_eq!(
            frame::read_floats(&out.frame, "price_adj").unwrap(),
            vec![Some(50.0), Some(52.0), Some(10.0)]
        );
        assert_eq!(
            frame::read_dates(&out.frame, "price_date").unwrap(),
            vec![Some(d(2021, 1, 1)), Some(d(2021, 2, 1)), Some(d(2021, 1, 1))]
        );
    }

    #[test]
    fn no_adjust_still_has_adj_columns() {
        let wh = warehouse();
        let settings = PriceSettings::default();
        let loader = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Degrade);
        let out = loader
            .load(&entities(), window(), &["price".into()], false)
            .unwrap();
        assert_eq!(
            frame::read_floats(&out.frame, "price_adj").unwrap(),
            frame::read_floats(&out.frame, "price").unwrap()
        );
    }

    #[test]
    fn no_valid_field_gives_empty_frame() {
        let wh = warehouse();
        let settings = PriceSettings::default();
        let loader = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Degrade);
        let out = loader
            .load(&entities(), window(), &["close".into()], true)
            .unwrap();
        assert_eq!(out.frame.height(), 0);
        assert_eq!(frame::column_names(&out.frame), vec!["price_date", "ISIN"]);
    }

    #[test]
    fn unmapped_entities_give_typed_empty_frame() {
        let wh = warehouse();
        let settings = PriceSettings::default();
        let loader = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Degrade);
        let out = loader
            .load(&EntityMap::default(), window(), &["volume".into()], true)
            .unwrap();
        assert_eq!(out.frame.height(), 0);
        assert_eq!(
            frame::column_names(&out.frame),
            vec!["price_date", "ISIN", "volume", "volume_adj"]
        );
    }

    #[test]
    fn missing_factor_table_follows_policy() {
        let wh = FrameWarehouse::new("prices").with_table(
            "fgp_v1.fgp_global_prices".parse().unwrap(),
            df!(
                "fsym_id" => &["AAA-R"],
                "price_date" => &["2021-01-01"],
                "price" => &[100.0]
            )
            .unwrap(),
        );
        let settings = PriceSettings::default();

        let degraded = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Degrade)
            .load(&entities(), window(), &["price".into()], true)
            .unwrap();
        assert_eq!(
            frame::read_floats(&degraded.frame, "price_adj").unwrap(),
            vec![Some(100.0)]
        );

        let escalated = PriceLoader::new(&wh, &wh, &settings, FetchPolicy::Escalate).load(
            &entities(),
            window(),
            &["price".into()],
            true,
        );
        assert!(matches!(escalated, Err(PanelError::Fetch { .. })));
    }
}

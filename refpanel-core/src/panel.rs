//! Panel requests and the assembler that runs the loaders.

use crate::config::{ConfigError, Settings};
use crate::domain::{DateWindow, EntityMap, Frequency, IdentError, DATE_COL, PRICE_DATE_COL};
use crate::load::{EstimatesLoader, FundamentalsLoader, PriceLoader};
use crate::output::{PanelOutput, PanelSummary};
use crate::schema::{PanelSchema, SchemaError};
use crate::source::{Catalog, Database, EntityMapper, SourceError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const PRICES_KEY: &str = "prices";
pub const FUNDAMENTALS_KEY: &str = "fundamentals";
pub const ESTIMATES_PREFIX: &str = "estimates.";

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("ISIN mapping failed: {0}")]
    Mapping(#[source] SourceError),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] SourceError),

    #[error("fetch from {table} failed: {source}")]
    Fetch { table: String, source: SourceError },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ident(#[from] IdentError),

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),

    #[error("malformed {key} frame: {source}")]
    Schema { key: String, source: SchemaError },
}

/// What to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRequest {
    pub isins: Vec<String>,
    pub window: DateWindow,
    pub price_fields: Vec<String>,
    pub fundamental_fields: Vec<String>,
    /// Apply corporate-action adjustment to price fields.
    pub adjust: bool,
    pub frequency: Frequency,
    /// Let fundamentals resolve outside the priority tables.
    pub fallback: bool,
    pub estimate_kinds: Vec<String>,
    pub estimate_items: Vec<String>,
    /// Defaults to `frequency`.
    pub estimate_frequency: Option<Frequency>,
}

impl Default for PanelRequest {
    fn default() -> Self {
        Self {
            isins: Vec::new(),
            window: DateWindow::default(),
            price_fields: Vec::new(),
            fundamental_fields: Vec::new(),
            adjust: true,
            frequency: Frequency::Qf,
            fallback: false,
            estimate_kinds: Vec::new(),
            estimate_items: Vec::new(),
            estimate_frequency: None,
        }
    }
}

impl PanelRequest {
    pub fn new(isins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            isins: isins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    pub fn prices(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.price_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn fundamentals(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fundamental_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn estimates(
        mut self,
        kinds: impl IntoIterator<Item = impl Into<String>>,
        items: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.estimate_kinds = kinds.into_iter().map(Into::into).collect();
        self.estimate_items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn adjust(mut self, adjust: bool) -> Self {
        self.adjust = adjust;
        self
    }

    pub fn estimate_frequency(&self) -> Frequency {
        self.estimate_frequency.unwrap_or(self.frequency)
    }

    /// Content hash of the request (blake3 over its JSON form).
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

/// Runs the loaders for a [`PanelRequest`] and collects their frames.
pub struct PanelAssembler<'a> {
    db: &'a dyn Database,
    catalog: &'a dyn Catalog,
    mapper: &'a dyn EntityMapper,
    settings: &'a Settings,
}

impl<'a> PanelAssembler<'a> {
    pub fn new(
        db: &'a dyn Database,
        catalog: &'a dyn Catalog,
        mapper: &'a dyn EntityMapper,
        settings: &'a Settings,
    ) -> Self {
        Self {
            db,
            catalog,
            mapper,
            settings,
        }
    }

    pub fn load(&self, request: &PanelRequest) -> Result<PanelOutput, PanelError> {
        let mut frames = BTreeMap::new();
        let mut summary = PanelSummary {
            fingerprint: request.fingerprint(),
            ..PanelSummary::default()
        };

        let entities = self.mapper.map_isins(&request.isins).map_err(PanelError::Mapping)?;
        tracing::debug!(
            requested = request.isins.len(),
            mapped = entities.links().len(),
            "mapped ISINs"
        );
        let policy = self.settings.fetch_policy;

        let prices = if request.price_fields.is_empty() {
            DataFrame::empty()
        } else {
            let load = PriceLoader::new(self.db, self.catalog, &self.settings.prices, policy).load(
                &entities,
                request.window,
                &request.price_fields,
                request.adjust,
            )?;
            summary.dropped_price_fields = load.dropped_fields;
            let mut df = load.frame;
            df.rename(PRICE_DATE_COL, DATE_COL.into())?;
            check(PRICES_KEY, &df, &[])?;
            df
        };
        frames.insert(PRICES_KEY.to_string(), prices);

        let fundamentals = if request.fundamental_fields.is_empty() {
            DataFrame::empty()
        } else {
            let load = FundamentalsLoader::new(
                self.db,
                self.catalog,
                &self.settings.fundamentals,
                &self.settings.calendar,
                policy,
            )
            .load(
                &entities,
                request.window,
                &request.fundamental_fields,
                request.frequency,
                request.fallback,
            )?;
            let fields: Vec<String> = load.resolution.fields().iter().map(|f| f.to_string()).collect();
            check(FUNDAMENTALS_KEY, &load.frame, &fields)?;
            summary.resolution = load.resolution;
            load.frame
        };
        frames.insert(FUNDAMENTALS_KEY.to_string(), fundamentals);

        self.load_estimates(request, &entities, &mut frames, &mut summary)?;

        Ok(PanelOutput::new(frames, summary))
    }

    fn load_estimates(
        &self,
        request: &PanelRequest,
        entities: &EntityMap,
        frames: &mut BTreeMap<String, DataFrame>,
        summary: &mut PanelSummary,
    ) -> Result<(), PanelError> {
        if request.estimate_kinds.is_empty() || request.estimate_items.is_empty() {
            return Ok(());
        }
        let loader = EstimatesLoader::new(self.db, &self.settings.estimates, self.settings.fetch_policy);
        for kind in &request.estimate_kinds {
            let key = format!("{ESTIMATES_PREFIX}{kind}");
            if frames.contains_key(&key) {
                continue;
            }
            let load = loader.load(
                entities,
                request.window,
                kind,
                &request.estimate_items,
                request.estimate_frequency(),
            )?;
            if !load.synthesized.is_empty() {
                summary.synthesized_items.insert(kind.clone(), load.synthesized);
            }
            frames.insert(key, load.frame);
        }
        Ok(())
    }
}

fn check(key: &str, df: &DataFrame, fields: &[String]) -> Result<(), PanelError> {
    PanelSchema::validate(df, fields).map_err(|source| PanelError::Schema {
        key: key.to_string(),
        source,
    })
}

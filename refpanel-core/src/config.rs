//! Loader configuration.
//!
//! Everything the source system kept as class-level constants (table
//! priorities, adjustable price columns, estimate table naming, calendar and
//! symbology tables) lives here so it can be replaced per deployment or per
//! test. `Settings::default()` describes the FactSet layout; a TOML file may
//! override any subset of it.

use crate::domain::{Frequency, Ident, IdentError, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("estimate table template '{template}' for kind '{kind}': {source}")]
    Template {
        template: String,
        kind: String,
        source: IdentError,
    },
}

/// What a loader does when a single table cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPolicy {
    /// Log a warning and treat the table as empty.
    #[default]
    Degrade,
    /// Abort the load with the underlying error.
    Escalate,
}

/// Ordered table preference per frequency. Earlier entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityMap(BTreeMap<Frequency, Vec<TableId>>);

impl PriorityMap {
    pub fn new(entries: BTreeMap<Frequency, Vec<TableId>>) -> Self {
        Self(entries)
    }

    /// Priority list for `frequency`; empty when none is configured.
    pub fn get(&self, frequency: Frequency) -> &[TableId] {
        self.0.get(&frequency).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set(&mut self, frequency: Frequency, tables: Vec<TableId>) {
        self.0.insert(frequency, tables);
    }

    /// FactSet Fundamentals: basic before advanced, reported before derived.
    /// Semi-annual requests read the annual tables.
    pub fn factset() -> Self {
        let mut map = BTreeMap::new();
        for frequency in Frequency::ALL {
            let suffix = match frequency {
                Frequency::Saf => Frequency::Af.tag(),
                other => other.tag(),
            };
            let tables = ["ff_basic", "ff_advanced", "ff_basic_der", "ff_advanced_der"]
                .iter()
                .map(|stem| TableId::new(ident("ff_v3"), ident(&format!("{stem}_{suffix}"))))
                .collect();
            map.insert(frequency, tables);
        }
        Self(map)
    }
}

fn ident(raw: &str) -> Ident {
    Ident::new(raw).expect("built-in identifier is valid")
}

fn table(raw: &str) -> TableId {
    raw.parse().expect("built-in table id is valid")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalsSettings {
    /// Schema scanned for candidate tables.
    pub schema: String,
    pub date_column: Ident,
    pub priority: PriorityMap,
}

impl Default for FundamentalsSettings {
    fn default() -> Self {
        Self {
            schema: "ff_v3".into(),
            date_column: ident("date"),
            priority: PriorityMap::factset(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub table: TableId,
    pub date_column: Ident,
    pub adjustment_table: TableId,
    pub effective_date_column: Ident,
    pub factor_column: Ident,
    /// Only listings whose id ends with this suffix are priced.
    pub regional_suffix: Option<String>,
    /// Columns multiplied by the cumulative factor. Anything else passes through.
    pub adjustable: Vec<String>,
    /// Known pass-through columns. Columns on neither list also pass
    /// through, with a debug note at load time.
    pub non_adjustable: Vec<String>,
}

impl PriceSettings {
    pub fn is_adjustable(&self, column: &str) -> bool {
        self.adjustable.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn is_pass_through(&self, column: &str) -> bool {
        self.non_adjustable.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

impl Default for PriceSettings {
    fn default() -> Self {
        let strings = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect();
        Self {
            table: table("fgp_v1.fgp_global_prices"),
            date_column: ident("price_date"),
            adjustment_table: table("fgp_v1.fgp_ca_adj_factors"),
            effective_date_column: ident("effective_date"),
            factor_column: ident("div_spl_spin_adj_factor"),
            regional_suffix: Some("-R".into()),
            adjustable: strings(&[
                "price",
                "price_open",
                "price_high",
                "price_low",
                "volume",
                "turnover",
                "vwap",
            ]),
            non_adjustable: strings(&[
                "fsym_id",
                "price_date",
                "currency",
                "trade_count",
                "one_day_pct",
                "wtd_pct",
                "mtd_pct",
                "qtd_pct",
                "ytd_pct",
                "one_mth_pct",
                "three_mth_pct",
                "six_mth_pct",
                "nine_mth_pct",
                "one_yr_pct",
                "two_yr_pct",
                "three_yr_pct",
                "five_yr_pct",
                "ten_yr_pct",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateSettings {
    /// Candidate table names, tried in order. `{kind}` and `{freq}` are
    /// substituted.
    pub table_templates: Vec<String>,
    pub item_column: Ident,
    pub period_column: Ident,
    /// Natural key of an estimate row besides the item. Columns absent from a
    /// loaded frame are skipped.
    pub key_columns: Vec<Ident>,
}

impl EstimateSettings {
    /// Candidate tables for an estimate kind at a frequency.
    pub fn candidate_tables(
        &self,
        kind: &str,
        frequency: Frequency,
    ) -> Result<Vec<TableId>, ConfigError> {
        self.table_templates
            .iter()
            .map(|template| {
                template
                    .replace("{kind}", kind)
                    .replace("{freq}", frequency.tag())
                    .parse::<TableId>()
                    .map_err(|source| ConfigError::Template {
                        template: template.clone(),
                        kind: kind.to_string(),
                        source,
                    })
            })
            .collect()
    }
}

impl Default for EstimateSettings {
    fn default() -> Self {
        Self {
            table_templates: vec![
                "fe_v4.fe_advanced_{kind}_{freq}".into(),
                "fe.fe_{kind}_{freq}".into(),
            ],
            item_column: ident("fe_item"),
            period_column: ident("fe_fp_end"),
            key_columns: vec![ident("fsym_id"), ident("fe_fp_end"), ident("currency")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub table: TableId,
    pub date_column: Ident,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            table: table("ref_v2.ref_calendar_dates"),
            date_column: ident("ref_date"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbologySettings {
    /// `isin`, `fsym_id` (security level).
    pub isin_table: TableId,
    /// `fsym_security_id`, `fsym_regional_id`.
    pub coverage_table: TableId,
}

impl Default for SymbologySettings {
    fn default() -> Self {
        Self {
            isin_table: table("sym_v1.sym_isin"),
            coverage_table: table("sym_v1.sym_coverage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub fields_table: TableId,
    pub codes_table: TableId,
    pub tables_table: TableId,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            fields_table: table("ref_v2.ref_metadata_fields"),
            codes_table: table("ref_v2.ref_metadata_codes"),
            tables_table: table("ref_v2.ref_metadata_tables"),
        }
    }
}

/// Complete loader configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch_policy: FetchPolicy,
    pub fundamentals: FundamentalsSettings,
    pub prices: PriceSettings,
    pub estimates: EstimateSettings,
    pub calendar: CalendarSettings,
    pub symbology: SymbologySettings,
    pub metadata: MetadataSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string. Missing sections keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

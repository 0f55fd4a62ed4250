//! Collaborator traits and structured error types.
//!
//! The loaders only see three seams: a [`Database`] that evaluates a
//! [`Query`], a [`Catalog`] that lists tables and columns, and an
//! [`EntityMapper`] that turns ISINs into internal keys. Swap implementations
//! to point the loaders at another backend, or at fixtures in tests.

pub mod symbology;
pub mod warehouse;

pub use symbology::SymbologyMapper;
pub use warehouse::FrameWarehouse;

use crate::config::FetchPolicy;
use crate::domain::{EntityMap, IdentError, TableId};
use crate::query::Query;
use polars::prelude::{DataFrame, PolarsError};
use thiserror::Error;

/// Errors raised by a data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("table not found: {0}")]
    UnknownTable(String),

    #[error("column '{column}' not found in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("column '{column}' of {table} cannot be compared as {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid identifier: {0}")]
    Ident(#[from] IdentError),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes single-table queries.
pub trait Database {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;

    /// Evaluate `query` and return its rows.
    fn execute(&self, query: &Query) -> Result<DataFrame, SourceError>;
}

/// Table and column listing.
pub trait Catalog {
    /// Every base table, in a stable order.
    fn all_tables(&self) -> Result<Vec<TableId>, SourceError>;

    /// Tables of one schema (case-insensitive).
    fn tables(&self, schema: &str) -> Result<Vec<TableId>, SourceError> {
        let schema = schema.to_ascii_lowercase();
        Ok(self
            .all_tables()?
            .into_iter()
            .filter(|t| t.schema().folded() == schema)
            .collect())
    }

    /// Column names of `table`, as stored.
    fn columns(&self, table: &TableId) -> Result<Vec<String>, SourceError>;
}

/// Maps external identifiers to internal entity keys.
///
/// Identifiers with no mapping are dropped from the result, not reported.
pub trait EntityMapper {
    fn map_isins(&self, isins: &[String]) -> Result<EntityMap, SourceError>;
}

/// Outcome of one per-table fetch.
///
/// Keeps "the table had no rows" apart from "the table could not be read",
/// so the caller decides whether a failure degrades coverage or aborts.
#[derive(Debug)]
pub enum FetchOutcome {
    Rows(DataFrame),
    Empty,
    Failed(SourceError),
}

impl FetchOutcome {
    pub fn from_result(result: Result<DataFrame, SourceError>) -> Self {
        match result {
            Ok(df) if df.height() == 0 => Self::Empty,
            Ok(df) => Self::Rows(df),
            Err(e) => Self::Failed(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Apply `policy`: rows come back as `Some`, an empty table as `None`,
    /// and a failure is either logged and treated as empty or returned.
    pub fn into_rows(
        self,
        policy: FetchPolicy,
        table: &TableId,
    ) -> Result<Option<DataFrame>, SourceError> {
        match self {
            Self::Rows(df) => Ok(Some(df)),
            Self::Empty => {
                tracing::debug!(%table, "fetch returned no rows");
                Ok(None)
            }
            Self::Failed(e) => match policy {
                FetchPolicy::Degrade => {
                    tracing::warn!(%table, error = %e, "fetch failed, treating table as empty");
                    Ok(None)
                }
                FetchPolicy::Escalate => Err(e),
            },
        }
    }
}

/// Run `query` against `db`, classifying the result.
pub fn fetch(db: &dyn Database, query: &Query) -> FetchOutcome {
    tracing::debug!(backend = db.name(), %query, "executing query");
    FetchOutcome::from_result(db.execute(query))
}

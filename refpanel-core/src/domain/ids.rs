use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentError {
    #[error("empty identifier")]
    Empty,

    #[error("invalid identifier '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidCharacter(String),

    #[error("invalid table id '{0}': expected 'schema.table'")]
    MalformedTable(String),
}

/// A validated SQL identifier (column, schema or table name).
///
/// Only `[A-Za-z0-9_]` is accepted, so an `Ident` can be rendered into query
/// text without quoting or escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentError::Empty);
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IdentError::InvalidCharacter(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form, used for all catalog comparisons.
    pub fn folded(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl TryFrom<String> for Ident {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ident> for String {
    fn from(value: Ident) -> Self {
        value.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified table identifier: `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableId {
    schema: Ident,
    table: Ident,
}

impl TableId {
    pub fn new(schema: Ident, table: Ident) -> Self {
        Self { schema, table }
    }

    pub fn schema(&self) -> &Ident {
        &self.schema
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    /// Case-insensitive key (`schema.table`, lower-cased).
    pub fn folded(&self) -> String {
        format!("{}.{}", self.schema.folded(), self.table.folded())
    }
}

impl FromStr for TableId {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (schema, table) = s
            .split_once('.')
            .ok_or_else(|| IdentError::MalformedTable(s.to_string()))?;
        if table.contains('.') {
            return Err(IdentError::MalformedTable(s.to_string()));
        }
        Ok(Self::new(Ident::new(schema)?, Ident::new(table)?))
    }
}

impl TryFrom<String> for TableId {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TableId> for String {
    fn from(value: TableId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

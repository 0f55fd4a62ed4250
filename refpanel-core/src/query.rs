//! Query values handed to a [`Database`](crate::source::Database).
//!
//! Loaders never build SQL text. They describe a projection and a list of
//! filters over validated identifiers; a backend either evaluates the query
//! directly (see [`FrameWarehouse`](crate::source::FrameWarehouse)) or renders
//! it with [`Query::to_sql`], which keeps every caller-supplied value in the
//! bound parameter list.

use crate::domain::{Ident, TableId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal compared against a column.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Date(NaiveDate),
    Float(f64),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    All,
    Columns(Vec<Ident>),
}

/// Row predicate. All filters of a query are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq { column: Ident, value: Value },
    /// An empty value list matches nothing.
    In { column: Ident, values: Vec<Value> },
    /// Inclusive on both ends.
    Between { column: Ident, low: Value, high: Value },
    AtLeast { column: Ident, value: Value },
    EndsWith { column: Ident, suffix: String },
}

impl Filter {
    pub fn column(&self) -> &Ident {
        match self {
            Self::Eq { column, .. }
            | Self::In { column, .. }
            | Self::Between { column, .. }
            | Self::AtLeast { column, .. }
            | Self::EndsWith { column, .. } => column,
        }
    }
}

/// A single-table select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: TableId,
    pub projection: Projection,
    pub filters: Vec<Filter>,
}

/// Rendered SQL with positional `?` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<Value>,
}

impl Query {
    pub fn select(table: TableId, columns: Vec<Ident>) -> Self {
        Self {
            table,
            projection: Projection::Columns(columns),
            filters: Vec::new(),
        }
    }

    pub fn select_all(table: TableId) -> Self {
        Self {
            table,
            projection: Projection::All,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: Ident, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq {
            column,
            value: value.into(),
        })
    }

    pub fn where_in<V: Into<Value>>(
        self,
        column: Ident,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::In {
            column,
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn between(self, column: Ident, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.filter(Filter::Between {
            column,
            low: low.into(),
            high: high.into(),
        })
    }

    pub fn at_least(self, column: Ident, value: impl Into<Value>) -> Self {
        self.filter(Filter::AtLeast {
            column,
            value: value.into(),
        })
    }

    pub fn ends_with(self, column: Ident, suffix: impl Into<String>) -> Self {
        self.filter(Filter::EndsWith {
            column,
            suffix: suffix.into(),
        })
    }

    /// Render as parameterized SQL.
    pub fn to_sql(&self) -> SqlStatement {
        let mut params = Vec::new();
        let projection = match &self.projection {
            Projection::All => "*".to_string(),
            Projection::Columns(cols) => cols
                .iter()
                .map(Ident::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        };
        let mut text = format!("SELECT {projection} FROM {}", self.table);

        let clauses: Vec<String> = self
            .filters
            .iter()
            .map(|filter| match filter {
                Filter::Eq { column, value } => {
                    params.push(value.clone());
                    format!("{column} = ?")
                }
                Filter::In { values, .. } if values.is_empty() => "1 = 0".to_string(),
                Filter::In { column, values } => {
                    params.extend(values.iter().cloned());
                    let marks = vec!["?"; values.len()].join(", ");
                    format!("{column} IN ({marks})")
                }
                Filter::Between { column, low, high } => {
                    params.push(low.clone());
                    params.push(high.clone());
                    format!("{column} BETWEEN ? AND ?")
                }
                Filter::AtLeast { column, value } => {
                    params.push(value.clone());
                    format!("{column} >= ?")
                }
                Filter::EndsWith { column, suffix } => {
                    params.push(Value::Str(format!("%{}", escape_like(suffix))));
                    format!("{column} LIKE ? ESCAPE '\\'")
                }
            })
            .collect();

        if !clauses.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&clauses.join(" AND "));
        }

        SqlStatement { text, params }
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql().text)
    }
}

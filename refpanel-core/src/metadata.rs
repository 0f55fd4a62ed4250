//! Catalog browsing and reference-metadata lookups.

use crate::config::MetadataSettings;
use crate::domain::{Ident, TableId};
use crate::frame;
use crate::query::Query;
use crate::source::{Catalog, Database, SourceError};
use std::collections::HashSet;

/// A field and its description, as returned by [`MetadataService::search_fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub description: String,
}

pub struct MetadataService<'a> {
    db: &'a dyn Database,
    catalog: &'a dyn Catalog,
    settings: &'a MetadataSettings,
}

impl<'a> MetadataService<'a> {
    pub fn new(db: &'a dyn Database, catalog: &'a dyn Catalog, settings: &'a MetadataSettings) -> Self {
        Self {
            db,
            catalog,
            settings,
        }
    }

    pub fn list_tables(&self) -> Result<Vec<TableId>, SourceError> {
        self.catalog.all_tables()
    }

    pub fn table_columns(&self, table: &TableId) -> Result<Vec<String>, SourceError> {
        self.catalog.columns(table)
    }

    /// Tables carrying `column` (case-insensitive). Tables whose columns
    /// cannot be listed are skipped.
    pub fn column_tables(&self, column: &str) -> Result<Vec<TableId>, SourceError> {
        let mut out = Vec::new();
        for table in self.catalog.all_tables()? {
            match self.catalog.columns(&table) {
                Ok(cols) if cols.iter().any(|c| c.eq_ignore_ascii_case(column)) => out.push(table),
                Ok(_) => {}
                Err(e) => tracing::warn!(%table, error = %e, "cannot list columns"),
            }
        }
        Ok(out)
    }

    pub fn field_description(&self, field: &str) -> Result<Option<String>, SourceError> {
        self.describe(&self.settings.fields_table, "field_name", field, "field_description")
    }

    pub fn code_description(&self, code: &str) -> Result<Option<String>, SourceError> {
        self.describe(&self.settings.codes_table, "code", code, "code_description")
    }

    pub fn table_description(&self, table: &str) -> Result<Option<String>, SourceError> {
        self.describe(&self.settings.tables_table, "table_name", table, "table_description")
    }

    /// Fields whose description contains `text` (case-insensitive), one per
    /// field name.
    pub fn search_fields(&self, text: &str) -> Result<Vec<FieldInfo>, SourceError> {
        let query = Query::select(
            self.settings.fields_table.clone(),
            vec![Ident::new("field_name")?, Ident::new("field_description")?],
        );
        let df = self.db.execute(&query)?;
        let names = frame::read_strings(&df, "field_name")?;
        let descriptions = frame::read_strings(&df, "field_description")?;

        let needle = text.to_lowercase();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (name, description) in names.into_iter().zip(descriptions) {
            let (Some(name), Some(description)) = (name, description) else {
                continue;
            };
            if description.to_lowercase().contains(&needle) && seen.insert(name.clone()) {
                out.push(FieldInfo { name, description });
            }
        }
        Ok(out)
    }

    fn describe(
        &self,
        table: &TableId,
        key_column: &str,
        key: &str,
        value_column: &str,
    ) -> Result<Option<String>, SourceError> {
        let query = Query::select(table.clone(), vec![Ident::new(value_column)?])
            .eq(Ident::new(key_column)?, key);
        let df = self.db.execute(&query)?;
        Ok(frame::read_strings(&df, value_column)?
            .into_iter()
            .flatten()
            .next())
    }
}

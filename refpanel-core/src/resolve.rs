//! Field-to-table resolution.
//!
//! A requested field may live in zero, one or several tables of the
//! fundamentals schema. [`FieldResolver`] picks one table per field from a
//! [`PriorityMap`], optionally falling back to any table that carries it.

use crate::config::PriorityMap;
use crate::domain::{Frequency, Ident, TableId};
use crate::source::{Catalog, SourceError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Field → chosen table, in request order, one entry per distinct field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionMap {
    entries: Vec<(String, Option<TableId>)>,
}

impl ResolutionMap {
    pub fn new(entries: Vec<(String, Option<TableId>)>) -> Self {
        Self { entries }
    }

    /// `None` when the field was not requested, `Some(None)` when it was
    /// requested but is unresolved.
    pub fn get(&self, field: &str) -> Option<Option<&TableId>> {
        self.entries
            .iter()
            .find(|(f, _)| f.eq_ignore_ascii_case(field))
            .map(|(_, t)| t.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&TableId>)> {
        self.entries.iter().map(|(f, t)| (f.as_str(), t.as_ref()))
    }

    pub fn fields(&self) -> Vec<&str> {
        self.entries.iter().map(|(f, _)| f.as_str()).collect()
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, t)| t.is_none())
            .map(|(f, _)| f.as_str())
            .collect()
    }

    /// Resolved fields grouped by table, tables in first-use order.
    pub fn by_table(&self) -> Vec<(TableId, Vec<String>)> {
        let mut groups: Vec<(TableId, Vec<String>)> = Vec::new();
        for (field, table) in &self.entries {
            let Some(table) = table else { continue };
            match groups.iter_mut().find(|(t, _)| t == table) {
                Some((_, fields)) => fields.push(field.clone()),
                None => groups.push((table.clone(), vec![field.clone()])),
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pick a table for one field.
///
/// The first priority entry present among `candidates` wins. Without a
/// priority match, `fallback` takes the first candidate in catalog order.
pub fn choose_table(
    candidates: &[TableId],
    priority: &[TableId],
    fallback: bool,
) -> Option<TableId> {
    let present: HashSet<String> = candidates.iter().map(TableId::folded).collect();
    priority
        .iter()
        .find(|t| present.contains(&t.folded()))
        .cloned()
        .or_else(|| {
            if fallback {
                candidates.first().cloned()
            } else {
                None
            }
        })
}

/// Resolves fields against the tables of one schema.
///
/// Table lists and column sets are read from the catalog once and cached for
/// the lifetime of the resolver. The cache is not thread-safe.
pub struct FieldResolver<'a> {
    catalog: &'a dyn Catalog,
    schema: String,
    priority: PriorityMap,
    tables: RefCell<Option<Vec<TableId>>>,
    columns: RefCell<HashMap<String, HashSet<String>>>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(catalog: &'a dyn Catalog, schema: impl Into<String>, priority: PriorityMap) -> Self {
        Self {
            catalog,
            schema: schema.into(),
            priority,
            tables: RefCell::new(None),
            columns: RefCell::new(HashMap::new()),
        }
    }

    pub fn priority(&self) -> &PriorityMap {
        &self.priority
    }

    /// Tables of the resolver's schema, catalog order.
    pub fn tables(&self) -> Result<Vec<TableId>, SourceError> {
        if let Some(tables) = self.tables.borrow().as_ref() {
            return Ok(tables.clone());
        }
        let tables = self.catalog.tables(&self.schema)?;
        tracing::debug!(schema = %self.schema, count = tables.len(), "listed tables");
        *self.tables.borrow_mut() = Some(tables.clone());
        Ok(tables)
    }

    /// Lower-cased column names of `table`. A catalog failure reads as no
    /// columns.
    pub fn columns(&self, table: &TableId) -> HashSet<String> {
        let key = table.folded();
        if let Some(cols) = self.columns.borrow().get(&key) {
            return cols.clone();
        }
        let cols: HashSet<String> = match self.catalog.columns(table) {
            Ok(cols) => cols.iter().map(|c| c.to_ascii_lowercase()).collect(),
            Err(e) => {
                tracing::warn!(%table, error = %e, "cannot list columns, treating table as empty");
                HashSet::new()
            }
        };
        self.columns.borrow_mut().insert(key, cols.clone());
        cols
    }

    /// Every table carrying each field, catalog order.
    pub fn field_locations(
        &self,
        fields: &[String],
    ) -> Result<Vec<(String, Vec<TableId>)>, SourceError> {
        let tables = self.tables()?;
        Ok(dedup_fields(fields)
            .into_iter()
            .map(|field| {
                let lower = field.to_ascii_lowercase();
                let present = tables
                    .iter()
                    .filter(|t| self.columns(t).contains(&lower))
                    .cloned()
                    .collect();
                (field, present)
            })
            .collect())
    }

    pub fn resolve(
        &self,
        fields: &[String],
        frequency: Frequency,
        allow_fallback: bool,
    ) -> Result<ResolutionMap, SourceError> {
        let priority = self.priority.get(frequency);
        let mut entries = Vec::new();

        for (field, candidates) in self.field_locations(fields)? {
            if let Err(e) = Ident::new(field.as_str()) {
                tracing::warn!(field = %field, error = %e, "field name is not a valid identifier");
                entries.push((field, None));
                continue;
            }

            let chosen = choose_table(&candidates, priority, allow_fallback);
            match &chosen {
                Some(table) => tracing::debug!(field = %field, %table, "resolved field"),
                None if !allow_fallback => {
                    let priority_list: Vec<String> =
                        priority.iter().map(|t| t.to_string()).collect();
                    tracing::warn!(
                        field = %field,
                        priority = ?priority_list,
                        "field not found in priority tables, it will be null"
                    );
                }
                None => {
                    tracing::warn!(field = %field, "field not found in any table, it will be null");
                }
            }
            entries.push((field, chosen));
        }

        Ok(ResolutionMap::new(entries))
    }
}

/// Distinct fields (case-insensitive), first spelling kept.
fn dedup_fields(fields: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .filter(|f| seen.insert(f.to_ascii_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameWarehouse;
    use polars::prelude::*;
    use std::cell::Cell;

    fn t(s: &str) -> TableId {
        s.parse().unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn warehouse() -> FrameWarehouse {
        let frame = |cols: &[&str]| {
            DataFrame::new(
                cols.iter()
                    .map(|c| Column::new((*c).into(), &[1.0f64]))
                    .collect(),
            )
            .unwrap()
        };
        FrameWarehouse::new("ff")
            .with_table(t("ff_v3.ff_basic_qf"), frame(&["fsym_id", "date", "FF_SALES"]))
            .with_table(t("ff_v3.ff_advanced_qf"), frame(&["fsym_id", "date", "ff_sales", "ff_assets"]))
            .with_table(t("ff_v3.ff_extra_qf"), frame(&["fsym_id", "date", "eps", "ff_assets"]))
            .with_table(t("ff_v3.ff_zzz_qf"), frame(&["fsym_id", "date", "eps"]))
            .with_table(t("fgp_v1.fgp_global_prices"), frame(&["fsym_id", "price"]))
    }

    #[test]
    fn choose_prefers_priority_order() {
        let candidates = vec![t("ff_v3.ff_advanced_qf"), t("ff_v3.ff_basic_qf")];
        let priority = vec![t("ff_v3.ff_basic_qf"), t("ff_v3.ff_advanced_qf")];
        assert_eq!(
            choose_table(&candidates, &priority, false),
            Some(t("ff_v3.ff_basic_qf"))
        );
    }

    #[test]
    fn choose_without_fallback_stays_in_priority() {
        let candidates = vec![t("ff_v3.ff_extra_qf")];
        let priority = vec![t("ff_v3.ff_basic_qf")];
        assert_eq!(choose_table(&candidates, &priority, false), None);
        assert_eq!(
            choose_table(&candidates, &priority, true),
            Some(t("ff_v3.ff_extra_qf"))
        );
        assert_eq!(choose_table(&[], &priority, true), None);
    }

    #[test]
    fn choose_matches_priority_case_insensitively() {
        let candidates = vec![t("FF_V3.FF_BASIC_QF")];
        let priority = vec![t("ff_v3.ff_basic_qf")];
        assert!(choose_table(&candidates, &priority, false).is_some());
    }

    #[test]
    fn locations_are_case_insensitive_and_in_catalog_order() {
        let wh = warehouse();
        let resolver = FieldResolver::new(&wh, "ff_v3", PriorityMap::factset());
        let locations = resolver.field_locations(&fields(&["ff_sales", "ff_assets"])).unwrap();
        assert_eq!(
            locations[0].1,
            vec![t("ff_v3.ff_advanced_qf"), t("ff_v3.ff_basic_qf")]
        );
        assert_eq!(
            locations[1].1,
            vec![t("ff_v3.ff_advanced_qf"), t("ff_v3.ff_extra_qf")]
        );
    }

    #[test]
    fn resolves_priority_table_with_or_without_fallback() {
        let wh = warehouse();
        let resolver = FieldResolver::new(&wh, "ff_v3", PriorityMap::factset());
        for fallback in [false, true] {
            let map = resolver
                .resolve(&fields(&["ff_sales"]), Frequency::Qf, fallback)
                .unwrap();
            assert_eq!(map.get("ff_sales"), Some(Some(&t("ff_v3.ff_basic_qf"))));
        }
    }

    #[test]
    fn non_priority_field_needs_fallback() {
        let wh = warehouse();
        let resolver = FieldResolver::new(&wh, "ff_v3", PriorityMap::factset());

        let strict = resolver.resolve(&fields(&["eps"]), Frequency::Qf, false).unwrap();
        assert_eq!(strict.get("eps"), Some(None));
        assert_eq!(strict.unresolved(), vec!["eps"]);

        let loose = resolver.resolve(&fields(&["eps"]), Frequency::Qf, true).unwrap();
        assert_eq!(loose.get("eps"), Some(Some(&t("ff_v3.ff_extra_qf"))));
    }

    #[test]
    fn duplicate_fields_collapse() {
        let wh = warehouse();
        let resolver = FieldResolver::new(&wh, "ff_v3", PriorityMap::factset());
        let map = resolver
            .resolve(&fields(&["ff_sales", "FF_SALES", "ff_assets"]), Frequency::Qf, false)
            .unwrap();
        assert_eq!(map.fields(), vec!["ff_sales", "ff_assets"]);
        assert_eq!(map.by_table().len(), 2);
    }

    #[test]
    fn invalid_field_name_is_unresolved() {
        let wh = warehouse();
        let resolver = FieldResolver::new(&wh, "ff_v3", PriorityMap::factset());
        let map = resolver
            .resolve(&fields(&["ff_sales; drop"]), Frequency::Qf, true)
            .unwrap();
        assert_eq!(map.get("ff_sales; drop"), Some(None));
    }

    #[test]
    fn by_table_groups_in_first_use_order() {
        let map = ResolutionMap::new(vec![
            ("a".into(), Some(t("s.t2"))),
            ("b".into(), Some(t("s.t1"))),
            ("c".into(), None),
            ("d".into(), Some(t("s.t2"))),
        ]);
        assert_eq!(
            map.by_table(),
            vec![
                (t("s.t2"), vec!["a".to_string(), "d".to_string()]),
                (t("s.t1"), vec!["b".to_string()]),
            ]
        );
    }

    /// Catalog that counts column lookups and fails for one table.
    struct CountingCatalog {
        calls: Cell<usize>,
    }

    impl Catalog for CountingCatalog {
        fn all_tables(&self) -> Result<Vec<TableId>, SourceError> {
            Ok(vec![t("ff_v3.ff_basic_qf"), t("ff_v3.ff_broken_qf")])
        }

        fn columns(&self, table: &TableId) -> Result<Vec<String>, SourceError> {
            self.calls.set(self.calls.get() + 1);
            if table.table().as_str() == "ff_broken_qf" {
                return Err(SourceError::Query("permission denied".into()));
            }
            Ok(vec!["FF_SALES".into()])
        }
    }

    #[test]
    fn columns_are_cached_and_failures_degrade() {
        let catalog = CountingCatalog { calls: Cell::new(0) };
        let resolver = FieldResolver::new(&catalog, "ff_v3", PriorityMap::factset());

        let first = resolver.resolve(&fields(&["ff_sales"]), Frequency::Qf, true).unwrap();
        let second = resolver.resolve(&fields(&["ff_sales"]), Frequency::Qf, true).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("ff_sales"), Some(Some(&t("ff_v3.ff_basic_qf"))));
        assert_eq!(catalog.calls.get(), 2);
        assert!(resolver.columns(&t("ff_v3.ff_broken_qf")).is_empty());
    }
}

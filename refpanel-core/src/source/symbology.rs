//! ISIN resolution through the symbology tables.

use super::{Database, EntityMapper, SourceError};
use crate::config::SymbologySettings;
use crate::domain::{EntityLink, EntityMap, Ident};
use crate::frame;
use crate::query::Query;
use std::collections::HashMap;

/// [`EntityMapper`] over an ISIN table (`isin`, `fsym_id`) and a coverage
/// table (`fsym_security_id`, `fsym_regional_id`).
///
/// A security listed in several regions yields one link per listing.
pub struct SymbologyMapper<'a> {
    db: &'a dyn Database,
    settings: SymbologySettings,
}

impl<'a> SymbologyMapper<'a> {
    pub fn new(db: &'a dyn Database, settings: SymbologySettings) -> Self {
        Self { db, settings }
    }

    fn security_ids(&self, isins: &[String]) -> Result<Vec<(String, String)>, SourceError> {
        let query = Query::select(
            self.settings.isin_table.clone(),
            vec![Ident::new("isin")?, Ident::new("fsym_id")?],
        )
        .where_in(Ident::new("isin")?, isins.iter().cloned());
        let df = self.db.execute(&query)?;
        let isin_col = frame::read_strings(&df, "isin")?;
        let sec_col = frame::read_strings(&df, "fsym_id")?;
        Ok(isin_col
            .into_iter()
            .zip(sec_col)
            .filter_map(|(isin, sec)| Some((isin?, sec?)))
            .collect())
    }

    fn regional_ids(
        &self,
        security_ids: Vec<String>,
    ) -> Result<HashMap<String, Vec<String>>, SourceError> {
        let query = Query::select(
            self.settings.coverage_table.clone(),
            vec![Ident::new("fsym_security_id")?, Ident::new("fsym_regional_id")?],
        )
        .where_in(Ident::new("fsym_security_id")?, security_ids);
        let df = self.db.execute(&query)?;
        let sec_col = frame::read_strings(&df, "fsym_security_id")?;
        let reg_col = frame::read_strings(&df, "fsym_regional_id")?;

        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for (sec, reg) in sec_col.into_iter().zip(reg_col) {
            if let (Some(sec), Some(reg)) = (sec, reg) {
                let listings = out.entry(sec).or_default();
                if !listings.contains(&reg) {
                    listings.push(reg);
                }
            }
        }
        Ok(out)
    }
}

impl EntityMapper for SymbologyMapper<'_> {
    fn map_isins(&self, isins: &[String]) -> Result<EntityMap, SourceError> {
        if isins.is_empty() {
            return Ok(EntityMap::default());
        }

        let pairs = self.security_ids(isins)?;
        let securities: Vec<String> = pairs.iter().map(|(_, sec)| sec.clone()).collect();
        let listings = self.regional_ids(securities)?;

        // Request order, not table order.
        let mut links = Vec::new();
        for isin in isins {
            for (_, sec) in pairs.iter().filter(|(i, _)| i == isin) {
                for reg in listings.get(sec).into_iter().flatten() {
                    let link = EntityLink {
                        isin: isin.clone(),
                        security_id: sec.clone(),
                        regional_id: reg.clone(),
                    };
                    if !links.contains(&link) {
                        links.push(link);
                    }
                }
            }
        }

        let dropped = isins
            .iter()
            .filter(|isin| !links.iter().any(|l| &l.isin == *isin))
            .count();
        if dropped > 0 {
            tracing::debug!(dropped, requested = isins.len(), "ISINs without entity mapping");
        }
        Ok(EntityMap::new(links))
    }
}

//! Entity identifiers and corporate-action events.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One resolved ISIN.
///
/// Fundamentals and estimates are keyed by the security-level id, prices by
/// the regional (listing-level) id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLink {
    pub isin: String,
    pub security_id: String,
    pub regional_id: String,
}

/// Result of mapping external identifiers to internal entity keys.
///
/// ISINs without a mapping are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMap {
    links: Vec<EntityLink>,
}

impl EntityMap {
    pub fn new(links: Vec<EntityLink>) -> Self {
        Self { links }
    }

    pub fn links(&self) -> &[EntityLink] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Distinct security ids, first-seen order.
    pub fn security_ids(&self) -> Vec<String> {
        dedup(self.links.iter().map(|l| l.security_id.as_str()))
    }

    /// Distinct regional ids, first-seen order.
    pub fn regional_ids(&self) -> Vec<String> {
        dedup(self.links.iter().map(|l| l.regional_id.as_str()))
    }

    /// `(security_id, isin)` pairs; the first ISIN wins when a security has several.
    pub fn by_security(&self) -> Vec<(String, String)> {
        first_per_key(self.links.iter().map(|l| (&l.security_id, &l.isin)))
    }

    /// `(regional_id, isin)` pairs; the first ISIN wins when a listing has several.
    pub fn by_regional(&self) -> Vec<(String, String)> {
        first_per_key(self.links.iter().map(|l| (&l.regional_id, &l.isin)))
    }
}

fn dedup<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).map(str::to_string).collect()
}

fn first_per_key<'a>(
    pairs: impl Iterator<Item = (&'a String, &'a String)>,
) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    pairs
        .filter(|(key, _)| seen.insert(key.as_str()))
        .map(|(key, isin)| (key.clone(), isin.clone()))
        .collect()
}

/// A corporate-action adjustment factor taking effect on `effective_date`.
///
/// A missing factor is treated as 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentEvent {
    pub effective_date: NaiveDate,
    pub factor: Option<f64>,
}

impl AdjustmentEvent {
    pub fn new(effective_date: NaiveDate, factor: f64) -> Self {
        Self {
            effective_date,
            factor: Some(factor),
        }
    }

    /// The multiplier this event contributes.
    pub fn multiplier(&self) -> f64 {
        self.factor.unwrap_or(1.0)
    }
}

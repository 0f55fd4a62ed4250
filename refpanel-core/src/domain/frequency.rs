//! Reporting frequency tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown frequency '{0}' (expected one of qf, af, ltm, ytd, saf)")]
pub struct UnknownFrequency(pub String);

/// Reporting cadence used to pick preferred fundamentals tables and to name
/// estimate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Quarterly.
    Qf,
    /// Annual.
    Af,
    /// Last twelve months.
    Ltm,
    /// Year to date.
    Ytd,
    /// Semi-annual.
    Saf,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Qf,
        Frequency::Af,
        Frequency::Ltm,
        Frequency::Ytd,
        Frequency::Saf,
    ];

    /// Tag as it appears in table names (`ff_basic_qf`, `fe_advanced_conh_af`).
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Qf => "qf",
            Self::Af => "af",
            Self::Ltm => "ltm",
            Self::Ytd => "ytd",
            Self::Saf => "saf",
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::Qf
    }
}

impl FromStr for Frequency {
    type Err = UnknownFrequency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.tag() == lower)
            .ok_or_else(|| UnknownFrequency(s.to_string()))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

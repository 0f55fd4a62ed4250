//! Loaded panels: named frames plus what happened while loading them.

use crate::domain::{DATE_COL, ISIN_COL};
use crate::frame;
use crate::resolve::ResolutionMap;
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("frame operation failed: {0}")]
    Frame(#[from] PolarsError),

    #[error("manifest serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown export format '{0}' (expected csv or parquet)")]
    UnknownFormat(String),
}

/// Bookkeeping carried next to the frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelSummary {
    pub fingerprint: String,
    /// Fundamentals field → table.
    pub resolution: ResolutionMap,
    /// Estimate kind → items filled with null rows.
    pub synthesized_items: BTreeMap<String, Vec<String>>,
    pub dropped_price_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            _ => Err(OutputError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFrame {
    pub key: String,
    pub file: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

/// Written as `manifest.json` next to the exported frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub created_at: DateTime<Utc>,
    pub format: ExportFormat,
    pub summary: PanelSummary,
    pub frames: Vec<ExportedFrame>,
}

/// Long-format frames keyed by name (`prices`, `fundamentals`,
/// `estimates.<kind>`).
#[derive(Debug, Clone, Default)]
pub struct PanelOutput {
    frames: BTreeMap<String, DataFrame>,
    summary: PanelSummary,
}

impl PanelOutput {
    pub fn new(frames: BTreeMap<String, DataFrame>, summary: PanelSummary) -> Self {
        Self { frames, summary }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.frames.keys().map(String::as_str)
    }

    pub fn summary(&self) -> &PanelSummary {
        &self.summary
    }

    pub fn frame(&self, key: &str) -> Option<&DataFrame> {
        self.frames.get(key)
    }

    /// The frame under `key`, or an empty frame.
    pub fn get(&self, key: &str) -> DataFrame {
        self.frames.get(key).cloned().unwrap_or_else(DataFrame::empty)
    }

    /// Restrict every frame to `isins` and to `[start, end]`. Each bound is
    /// optional; frames without an `ISIN` or `date` column are not filtered
    /// on it.
    pub fn filter(
        &self,
        isins: Option<&[String]>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<PanelOutput, OutputError> {
        let mut frames = BTreeMap::new();
        for (key, df) in &self.frames {
            let mut mask = vec![true; df.height()];

            if let Some(isins) = isins.filter(|_| frame::has_column(df, ISIN_COL)) {
                for (m, isin) in mask.iter_mut().zip(frame::read_strings(df, ISIN_COL)?) {
                    *m = *m && isin.is_some_and(|i| isins.contains(&i));
                }
            }

            if (start.is_some() || end.is_some()) && frame::has_column(df, DATE_COL) {
                for (m, date) in mask.iter_mut().zip(frame::read_dates(df, DATE_COL)?) {
                    let in_range = date.is_some_and(|d| {
                        start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e)
                    });
                    *m = *m && in_range;
                }
            }

            let filtered = df.filter(&BooleanChunked::from_slice("mask".into(), &mask))?;
            frames.insert(key.clone(), filtered);
        }
        Ok(PanelOutput::new(frames, self.summary.clone()))
    }

    /// Wide matrix of one feature: a `date` column (ascending) followed by
    /// one Float64 column per ISIN (first-seen order). Empty when the source
    /// or the feature is absent. The first value wins for duplicate
    /// `(date, ISIN)` pairs.
    pub fn to_matrix(&self, source: &str, feature: &str) -> Result<DataFrame, OutputError> {
        let Some(df) = self.frames.get(source) else {
            return Ok(DataFrame::empty());
        };
        if df.height() == 0
            || !frame::has_column(df, feature)
            || !frame::has_column(df, DATE_COL)
            || !frame::has_column(df, ISIN_COL)
        {
            return Ok(DataFrame::empty());
        }

        let dates = frame::read_dates(df, DATE_COL)?;
        let isins = frame::read_strings(df, ISIN_COL)?;
        let values = frame::read_floats(df, feature)?;

        let axis: Vec<NaiveDate> = dates
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let row_of: HashMap<NaiveDate, usize> =
            axis.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut entities: Vec<String> = Vec::new();
        let mut cells: Vec<Vec<Option<f64>>> = Vec::new();
        let mut filled: Vec<Vec<bool>> = Vec::new();
        for ((date, isin), value) in dates.iter().zip(&isins).zip(&values) {
            let (Some(date), Some(isin)) = (date, isin) else {
                continue;
            };
            let col = match entities.iter().position(|e| e == isin) {
                Some(c) => c,
                None => {
                    entities.push(isin.clone());
                    cells.push(vec![None; axis.len()]);
                    filled.push(vec![false; axis.len()]);
                    entities.len() - 1
                }
            };
            let row = row_of[date];
            if !filled[col][row] {
                cells[col][row] = *value;
                filled[col][row] = true;
            }
        }

        let mut columns = vec![frame::date_column(DATE_COL, &axis)?];
        for (isin, column) in entities.iter().zip(cells) {
            columns.push(Column::new(isin.as_str().into(), column));
        }
        Ok(DataFrame::new(columns)?)
    }

    /// One matrix per non-key column of `source`, in column order.
    pub fn to_matrices(&self, source: &str) -> Result<Vec<(String, DataFrame)>, OutputError> {
        let Some(df) = self.frames.get(source) else {
            return Ok(Vec::new());
        };
        frame::column_names(df)
            .into_iter()
            .filter(|c| c != DATE_COL && c != ISIN_COL)
            .map(|feature| {
                let matrix = self.to_matrix(source, &feature)?;
                Ok((feature, matrix))
            })
            .collect()
    }

    /// Write every frame as `<key>.<ext>` plus `manifest.json` into `dir`.
    /// Frames without columns (datasets not requested) are skipped.
    pub fn write_to(&self, dir: &Path, format: ExportFormat) -> Result<ExportManifest, OutputError> {
        std::fs::create_dir_all(dir).map_err(|source| OutputError::Io {
            action: "create directory",
            path: dir.to_path_buf(),
            source,
        })?;

        let mut exported = Vec::with_capacity(self.frames.len());
        for (key, df) in &self.frames {
            if df.width() == 0 {
                tracing::debug!(key = %key, "nothing requested, skipping frame");
                continue;
            }
            let file = format!("{key}.{}", format.extension());
            let path = dir.join(&file);
            write_frame(&path, df, format)?;
            exported.push(ExportedFrame {
                key: key.clone(),
                file,
                rows: df.height(),
                columns: frame::column_names(df),
            });
        }

        let manifest = ExportManifest {
            created_at: Utc::now(),
            format,
            summary: self.summary.clone(),
            frames: exported,
        };
        let path = dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&path, json).map_err(|source| OutputError::Io {
            action: "write",
            path,
            source,
        })?;
        tracing::debug!(dir = %dir.display(), frames = manifest.frames.len(), "exported panel");
        Ok(manifest)
    }
}

fn write_frame(path: &Path, df: &DataFrame, format: ExportFormat) -> Result<(), OutputError> {
    let mut file = File::create(path).map_err(|source| OutputError::Io {
        action: "create",
        path: path.to_path_buf(),
        source,
    })?;
    let mut df = df.clone();
    match format {
        ExportFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        }
        ExportFormat::Parquet => {
            ParquetWriter::new(&mut file).finish(&mut df)?;
        }
    }
    Ok(())
}

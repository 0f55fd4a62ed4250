use crate::domain::{DATE_COL, ISIN_COL};
use polars::prelude::*;

/// Key columns every long-format panel frame carries.
pub struct PanelSchema;

impl PanelSchema {
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new(DATE_COL.into(), DataType::Date),
            Field::new(ISIN_COL.into(), DataType::String),
        ])
    }

    /// Check the key columns and their types, plus the presence of
    /// `fields`. Frames with no columns at all (nothing requested) pass.
    pub fn validate(df: &DataFrame, fields: &[String]) -> Result<(), SchemaError> {
        if df.width() == 0 {
            return Ok(());
        }
        let actual = df.schema();

        for field in Self::schema().iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        for name in fields {
            if !actual.contains(name) {
                return Err(SchemaError::MissingColumn(name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use chrono::NaiveDate;

    fn valid() -> DataFrame {
        DataFrame::new(vec![
            frame::date_column("date", &[NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()]).unwrap(),
            Column::new("ISIN".into(), &["US0378331005"]),
            Column::new("ff_sales".into(), &[1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn accepts_keyed_frame() {
        assert!(PanelSchema::validate(&valid(), &["ff_sales".to_string()]).is_ok());
    }

    #[test]
    fn accepts_frame_without_columns() {
        assert!(PanelSchema::validate(&DataFrame::empty(), &["x".to_string()]).is_ok());
    }

    #[test]
    fn rejects_missing_field() {
        let err = PanelSchema::validate(&valid(), &["eps".to_string()]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(c) if c == "eps"));
    }

    #[test]
    fn rejects_string_dates() {
        let df = df!("date" => &["2021-01-01"], "ISIN" => &["X"]).unwrap();
        assert!(matches!(
            PanelSchema::validate(&df, &[]),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }
}

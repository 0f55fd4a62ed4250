use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date window: start {start} is after end {end}")]
pub struct InvalidWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Inclusive date range of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for DateWindow {
    type Error = InvalidWindow;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidWindow> {
        if start > end {
            return Err(InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Default for DateWindow {
    /// 1990-01-01 through 2030-12-31.
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(1990, 1, 1).expect("valid date"),
            end: NaiveDate::from_ymd_opt(2030, 12, 31).expect("valid date"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_is_inclusive() {
        let w = DateWindow::new(d(2021, 1, 1), d(2021, 12, 31)).unwrap();
        assert!(w.contains(d(2021, 1, 1)));
        assert!(w.contains(d(2021, 12, 31)));
        assert!(!w.contains(d(2022, 1, 1)));
    }

    #[test]
    fn reversed_window_is_rejected() {
        assert!(DateWindow::new(d(2022, 1, 1), d(2021, 1, 1)).is_err());
        assert!(DateWindow::new(d(2021, 1, 1), d(2021, 1, 1)).is_ok());
    }

    #[test]
    fn default_window_covers_history() {
        let w = DateWindow::default();
        assert_eq!(w.start(), d(1990, 1, 1));
        assert_eq!(w.end(), d(2030, 12, 31));
    }

    #[test]
    fn deserialization_rejects_reversed_window() {
        let ok: DateWindow =
            serde_json::from_str(r#"{"start":"2021-01-01","end":"2021-12-31"}"#).unwrap();
        assert_eq!(ok, DateWindow::new(d(2021, 1, 1), d(2021, 12, 31)).unwrap());

        let reversed = serde_json::from_str::<DateWindow>(r#"{"start":"2021-12-31","end":"2021-01-01"}"#);
        assert!(reversed.is_err());
    }
}

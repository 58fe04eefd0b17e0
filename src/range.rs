use chrono::{Days, NaiveDate};
use serde::Serialize;

/// Days before today covered by the initial dashboard load.
pub const DEFAULT_LOOKBACK_DAYS: u64 = 1;

const PICKER_FORMAT: &str = "%Y-%m-%d";
const COMPACT_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("invalid date {input:?}: expected YYYY-MM-DD or YYYYMMDD")]
    InvalidDate { input: String },

    #[error("start date {start} is after end date {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

// Accepts the date picker's format and the compact one the API uses.
pub fn parse_date(input: &str) -> Result<NaiveDate, RangeError> {
    let t = input.trim();
    let compact = t.len() == 8 && t.bytes().all(|b| b.is_ascii_digit());
    let fmt = if compact { COMPACT_FORMAT } else { PICKER_FORMAT };
    NaiveDate::parse_from_str(t, fmt).map_err(|_| RangeError::InvalidDate {
        input: input.to_string(),
    })
}

/// An inclusive calendar range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    /// Like [`DateRange::new`], but an end date past `today` is pulled back
    /// to `today` first. A start date in the future is still rejected.
    pub fn bounded(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<Self, RangeError> {
        Self::new(start, end.min(today))
    }

    pub fn trailing(days: u64, today: NaiveDate) -> Self {
        let start = today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn compact_start(&self) -> String {
        self.start.format(COMPACT_FORMAT).to_string()
    }

    pub fn compact_end(&self) -> String {
        self.end.format(COMPACT_FORMAT).to_string()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

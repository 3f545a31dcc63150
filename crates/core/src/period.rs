//! Payroll period (year + month).

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// Year and month a payroll run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for Period {
    type Error = DomainError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Period::new(raw.year, raw.month)
    }
}

impl Period {
    pub fn new(year: i32, month: u32) -> DomainResult<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(DomainError::validation(format!(
                "year must be between {MIN_YEAR} and {MAX_YEAR}, got {year}"
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds() {
        assert!(Period::new(2000, 1).is_ok());
        assert!(Period::new(2100, 12).is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Period::new(1999, 6).is_err());
        assert!(Period::new(2024, 0).is_err());
        assert!(Period::new(2024, 13).is_err());
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<Period>(r#"{"year":2024,"month":5}"#).is_ok());
        assert!(serde_json::from_str::<Period>(r#"{"year":2024,"month":14}"#).is_err());
    }

    #[test]
    fn displays_zero_padded() {
        assert_eq!(Period::new(2024, 3).unwrap().to_string(), "2024-03");
    }
}

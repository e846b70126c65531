//! Calendar dates at year, month or day granularity.
//!
//! A date is stored as an `int32` count of units since 1970 (years since 1970,
//! months since 1970-01, or days since 1970-01-01). `i32::MIN` marks a
//! missing value.

use crate::ndtype::NdType;
use crate::type_id::TypeId;
use crate::{DTypeError, Result};
use std::fmt;

/// Missing date marker.
pub const DATE_NA: i32 = i32::MIN;

/// Granularity of a date type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateUnit {
    Year,
    Month,
    Day,
}

impl fmt::Display for DateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DateUnit::Year => "year",
            DateUnit::Month => "month",
            DateUnit::Day => "day",
        })
    }
}

/// Elementwise properties of dates, in property index order.
pub(crate) const DATE_PROPERTIES: [&str; 3] = ["year", "month", "day"];

/// The `date` type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateType {
    unit: DateUnit,
}

impl DateType {
    pub fn new(unit: DateUnit) -> Self {
        DateType { unit }
    }

    #[inline]
    pub fn unit(&self) -> DateUnit {
        self.unit
    }

    /// Names of the properties available at this unit.
    pub fn property_names(&self) -> &'static [&'static str] {
        match self.unit {
            DateUnit::Year => &DATE_PROPERTIES[..1],
            DateUnit::Month => &DATE_PROPERTIES[..2],
            DateUnit::Day => &DATE_PROPERTIES[..],
        }
    }

    pub(crate) fn elwise_property_index(&self, tp: &NdType, name: &str) -> Result<usize> {
        self.property_names()
            .iter()
            .position(|p| *p == name)
            .ok_or_else(|| DTypeError::UnknownProperty {
                tp: tp.to_string(),
                name: name.to_string(),
            })
    }

    pub(crate) fn elwise_property_type(&self, index: usize) -> Option<NdType> {
        (index < self.property_names().len()).then(|| NdType::builtin(TypeId::Int32))
    }

    /// Encode a civil date as a value of this unit, dropping finer fields.
    pub fn encode(&self, year: i32, month: u32, day: u32) -> Result<i32> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return Err(DTypeError::InvalidArgument(format!(
                "invalid date {year:04}-{month:02}-{day:02}"
            )));
        }
        let value = match self.unit {
            DateUnit::Year => year as i64 - 1970,
            DateUnit::Month => (year as i64 - 1970) * 12 + (month as i64 - 1),
            DateUnit::Day => days_from_civil(year as i64, month, day),
        };
        i32::try_from(value).map_err(|_| {
            DTypeError::InvalidArgument(format!("date {year}-{month}-{day} is out of range"))
        })
    }

    /// Decode a value of this unit into `(year, month, day)`.
    ///
    /// Coarser units report the first month/day of their period. Values
    /// whose year does not fit in an `i32` decode as missing.
    pub fn decode(&self, value: i32) -> Option<(i32, u32, u32)> {
        if value == DATE_NA {
            return None;
        }
        let v = value as i64;
        let (year, month, day) = match self.unit {
            DateUnit::Year => (v + 1970, 1, 1),
            DateUnit::Month => (v.div_euclid(12) + 1970, v.rem_euclid(12) as u32 + 1, 1),
            DateUnit::Day => civil_from_days(v),
        };
        i32::try_from(year).ok().map(|y| (y, month, day))
    }

    /// Read property `index` of a stored value; missing dates propagate.
    pub(crate) fn property_value(&self, index: usize, value: i32) -> i32 {
        match self.decode(value) {
            None => DATE_NA,
            Some((y, m, d)) => match index {
                0 => y,
                1 => m as i32,
                _ => d as i32,
            },
        }
    }
}

impl fmt::Display for DateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            DateUnit::Day => f.write_str("date"),
            unit => write!(f, "date[{unit}]"),
        }
    }
}

// ============================================================================
// Proleptic Gregorian calendar
// ============================================================================

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01 (eras of 400 years, March-based years).
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

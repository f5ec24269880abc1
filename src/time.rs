//! Time-axis normalisation and cadence classification.
//!
//! Every sample is reduced to a (year, month, day) triple in one calendar and
//! then to a day offset from 1950-01-01 in that calendar. The cadence of the
//! whole axis is decided from the first gap only; later gaps are not checked
//! beyond a debug message.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Reference date for all day offsets.
pub const REFERENCE_YEAR: i32 = 1950;

/// Offsets beyond this many days (about 100,000 years) are not decoded.
const MAX_DECODED_DAYS: f64 = 3.6e7;

/// Units string written next to day offsets.
pub const REFERENCE_UNITS: &str = "days since 1950-01-01 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    /// Mixed Julian/Gregorian in CF; treated as proleptic Gregorian here
    #[default]
    Standard,
    ProlepticGregorian,
    NoLeap,
    AllLeap,
    Day360,
}

impl Calendar {
    /// Parse a CF `calendar` attribute.
    pub fn from_attr(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "standard" | "gregorian" => Some(Calendar::Standard),
            "proleptic_gregorian" => Some(Calendar::ProlepticGregorian),
            "noleap" | "365_day" => Some(Calendar::NoLeap),
            "all_leap" | "366_day" => Some(Calendar::AllLeap),
            "360_day" => Some(Calendar::Day360),
            _ => None,
        }
    }

    fn is_gregorian(self) -> bool {
        matches!(self, Calendar::Standard | Calendar::ProlepticGregorian)
    }

    /// Same day arithmetic; `standard` and `proleptic_gregorian` count alike.
    fn compatible_with(self, other: Calendar) -> bool {
        self == other || (self.is_gregorian() && other.is_gregorian())
    }

    pub fn is_leap(self, year: i32) -> bool {
        match self {
            Calendar::Standard | Calendar::ProlepticGregorian => {
                (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
            }
            Calendar::NoLeap | Calendar::Day360 => false,
            Calendar::AllLeap => true,
        }
    }

    pub fn days_in_month(self, year: i32, month: u32) -> u32 {
        if self == Calendar::Day360 {
            return 30;
        }
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 if self.is_leap(year) => 29,
            2 => 28,
            _ => 0,
        }
    }

    pub fn days_in_year(self, year: i32) -> u32 {
        match self {
            Calendar::Day360 => 360,
            _ if self.is_leap(year) => 366,
            _ => 365,
        }
    }

    fn validate(self, year: i32, month: u32, day: u32) -> Result<()> {
        if !(1..=12).contains(&month) || day == 0 || day > self.days_in_month(year, month) {
            return Err(Error::UnsupportedTimeType(format!(
                "{year:04}-{month:02}-{day:02} is not a valid {self} date"
            )));
        }
        Ok(())
    }

    /// Days from 1950-01-01 to the given date, counted in this calendar.
    pub fn day_offset(self, year: i32, month: u32, day: u32) -> Result<i64> {
        self.validate(year, month, day)?;
        if self.is_gregorian() {
            let date = gregorian(year, month, day)?;
            return Ok((date - reference_date()).num_days());
        }
        // the remaining calendars have a fixed year length
        let year_len = self.days_in_year(year) as i64;
        let in_year: i64 = (1..month)
            .map(|m| self.days_in_month(year, m) as i64)
            .sum::<i64>()
            + (day as i64 - 1);
        Ok((year - REFERENCE_YEAR) as i64 * year_len + in_year)
    }

    /// The date `days` days after the given one.
    pub fn add_days(self, (year, month, day): (i32, u32, u32), days: i64) -> Result<(i32, u32, u32)> {
        let out_of_range = || {
            Error::UnsupportedTimeType(format!(
                "{days} days after {year:04}-{month:02}-{day:02} is out of range"
            ))
        };
        if self.is_gregorian() {
            let date = Duration::try_days(days)
                .and_then(|delta| gregorian(year, month, day).ok()?.checked_add_signed(delta))
                .ok_or_else(out_of_range)?;
            return Ok((date.year(), date.month(), date.day()));
        }
        let total = self
            .day_offset(year, month, day)?
            .checked_add(days)
            .ok_or_else(out_of_range)?;
        let year_len = self.days_in_year(REFERENCE_YEAR) as i64;
        let year = i32::try_from(total.div_euclid(year_len))
            .ok()
            .and_then(|years| REFERENCE_YEAR.checked_add(years))
            .ok_or_else(out_of_range)?;
        let mut remaining = total.rem_euclid(year_len) as u32;
        let mut month = 1;
        while remaining >= self.days_in_month(year, month) {
            remaining -= self.days_in_month(year, month);
            month += 1;
        }
        Ok((year, month, remaining + 1))
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Calendar::Standard => "standard",
            Calendar::ProlepticGregorian => "proleptic_gregorian",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
        };
        f.write_str(name)
    }
}

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1).unwrap_or_default()
}

fn gregorian(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        Error::UnsupportedTimeType(format!("{year:04}-{month:02}-{day:02} is not a valid date"))
    })
}

/// One raw time sample, as found in a store or supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    /// Seconds since 1970-01-01T00:00:00 UTC
    Epoch { seconds: i64 },
    Calendar {
        year: i32,
        month: u32,
        day: u32,
        calendar: Calendar,
    },
    /// `YYYY-MM-DD`
    Iso(String),
    /// A numeric offset without a usable reference epoch
    Undecoded(f64),
}

/// A normalised date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub calendar: Calendar,
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl TimeValue {
    pub fn normalize(&self) -> Result<CalendarDate> {
        match self {
            TimeValue::Epoch { seconds } => normalize_epoch(*seconds),
            TimeValue::Calendar {
                year,
                month,
                day,
                calendar,
            } => normalize_calendar(*year, *month, *day, *calendar),
            TimeValue::Iso(text) => normalize_iso(text),
            TimeValue::Undecoded(raw) => Err(Error::UnsupportedTimeType(format!(
                "numeric time value {raw} has no reference units"
            ))),
        }
    }
}

fn normalize_epoch(seconds: i64) -> Result<CalendarDate> {
    let stamp = chrono::DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        Error::UnsupportedTimeType(format!("epoch timestamp {seconds} is out of range"))
    })?;
    let date = stamp.date_naive();
    Ok(CalendarDate {
        year: date.year(),
        month: date.month(),
        day: date.day(),
        calendar: Calendar::Standard,
    })
}

fn normalize_calendar(year: i32, month: u32, day: u32, calendar: Calendar) -> Result<CalendarDate> {
    calendar.validate(year, month, day)?;
    Ok(CalendarDate {
        year,
        month,
        day,
        calendar,
    })
}

/// Parse a `YYYY-MM-DD` string into its three components.
pub fn parse_iso(text: &str) -> Result<(i32, u32, u32)> {
    let bad = || Error::UnsupportedTimeType(format!("'{text}' is not a YYYY-MM-DD date"));
    let parts: Vec<&str> = text.trim().split('-').collect();
    if parts.len() != 3 {
        return Err(bad());
    }
    let year = parts[0].parse::<i32>().map_err(|_| bad())?;
    let month = parts[1].parse::<u32>().map_err(|_| bad())?;
    let day = parts[2].parse::<u32>().map_err(|_| bad())?;
    Ok((year, month, day))
}

fn normalize_iso(text: &str) -> Result<CalendarDate> {
    let (year, month, day) = parse_iso(text)?;
    normalize_calendar(year, month, day, Calendar::Standard)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Yearly,
    Monthly,
    Daily,
}

impl Cadence {
    fn from_gap(gap: f64) -> Option<Self> {
        if gap > 364.0 && gap < 367.0 {
            Some(Cadence::Yearly)
        } else if gap > 27.0 && gap < 32.0 {
            Some(Cadence::Monthly)
        } else if gap > 0.9 && gap < 1.1 {
            Some(Cadence::Daily)
        } else {
            None
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cadence::Yearly => "yearly",
            Cadence::Monthly => "monthly",
            Cadence::Daily => "daily",
        };
        f.write_str(name)
    }
}

/// Inclusive `[start, end]` date range given as ISO strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// A classified time axis.
#[derive(Debug, Clone)]
pub struct TimeAxis {
    pub dates: Vec<CalendarDate>,
    pub day_offset: Vec<i64>,
    calendar: Calendar,
    cadence: Option<Cadence>,
    seconds_per_step: Vec<f64>,
}

impl TimeAxis {
    /// Normalise raw samples and classify the cadence.
    pub fn classify(values: &[TimeValue]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::shape("time axis has no samples"));
        }
        let dates = values
            .iter()
            .map(TimeValue::normalize)
            .collect::<Result<Vec<_>>>()?;

        let calendar = dates[0].calendar;
        if dates.iter().any(|d| !d.calendar.compatible_with(calendar)) {
            return Err(Error::UnsupportedTimeType(
                "time axis mixes calendars".to_string(),
            ));
        }

        let day_offset = dates
            .iter()
            .map(|d| calendar.day_offset(d.year, d.month, d.day))
            .collect::<Result<Vec<_>>>()?;

        let cadence = if day_offset.len() > 1 {
            let gap = (day_offset[1] - day_offset[0]) as f64;
            let cadence = Cadence::from_gap(gap);
            if day_offset
                .windows(2)
                .skip(1)
                .any(|w| Cadence::from_gap((w[1] - w[0]) as f64) != cadence)
            {
                debug!(?cadence, "later time gaps differ from the first one");
            }
            cadence
        } else {
            None
        };

        let seconds_per_step = match cadence {
            Some(Cadence::Yearly) => dates
                .iter()
                .map(|d| calendar.days_in_year(d.year) as f64 * SECONDS_PER_DAY)
                .collect(),
            Some(Cadence::Monthly) => dates
                .iter()
                .map(|d| calendar.days_in_month(d.year, d.month) as f64 * SECONDS_PER_DAY)
                .collect(),
            Some(Cadence::Daily) => vec![SECONDS_PER_DAY; dates.len()],
            None => Vec::new(),
        };

        if let Some(cadence) = cadence {
            debug!(%cadence, samples = dates.len(), "classified time axis");
        }

        Ok(Self {
            dates,
            day_offset,
            calendar,
            cadence,
            seconds_per_step,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn cadence(&self) -> Option<Cadence> {
        self.cadence
    }

    /// Duration of every step in seconds; fails for an unclassified axis.
    pub fn seconds_per_step(&self) -> Result<&[f64]> {
        match self.cadence {
            Some(_) => Ok(&self.seconds_per_step),
            None => Err(Error::UnsupportedTimeType(format!(
                "cannot derive step durations: cadence of {} sample(s) starting {} is not yearly, monthly or daily",
                self.dates.len(),
                self.dates[0]
            ))),
        }
    }

    /// Indices whose day offset falls inside `range`; all indices without one.
    pub fn select(&self, range: Option<&DateRange>) -> Result<Vec<usize>> {
        let Some(range) = range else {
            return Ok((0..self.len()).collect());
        };
        let (y, m, d) = parse_iso(&range.start)?;
        let start = self.calendar.day_offset(y, m, d)?;
        let (y, m, d) = parse_iso(&range.end)?;
        let end = self.calendar.day_offset(y, m, d)?;
        Ok(self
            .day_offset
            .iter()
            .enumerate()
            .filter(|(_, off)| (start..=end).contains(*off))
            .map(|(i, _)| i)
            .collect())
    }
}

/// Decode raw numeric time values using CF `units` and `calendar` attributes.
///
/// Values whose units cannot be understood, and values that are not finite
/// or lie implausibly far from the base date (fill values, typically), become
/// [`TimeValue::Undecoded`].
pub fn decode_cf_time(raw: &[f64], units: Option<&str>, calendar: Option<&str>) -> Vec<TimeValue> {
    let calendar = calendar.and_then(Calendar::from_attr).unwrap_or_default();
    let Some((days_per_unit, base)) = units.and_then(parse_cf_units) else {
        return raw.iter().map(|v| TimeValue::Undecoded(*v)).collect();
    };
    raw.iter()
        .map(|v| {
            let days = (v * days_per_unit).floor();
            if !days.is_finite() || days.abs() > MAX_DECODED_DAYS {
                return TimeValue::Undecoded(*v);
            }
            match calendar.add_days(base, days as i64) {
                Ok((year, month, day)) => TimeValue::Calendar {
                    year,
                    month,
                    day,
                    calendar,
                },
                Err(_) => TimeValue::Undecoded(*v),
            }
        })
        .collect()
}

fn parse_cf_units(units: &str) -> Option<(f64, (i32, u32, u32))> {
    let mut words = units.split_whitespace();
    let days_per_unit = match words.next()?.to_lowercase().as_str() {
        "days" | "day" | "d" => 1.0,
        "hours" | "hour" | "h" => 1.0 / 24.0,
        "minutes" | "minute" | "min" => 1.0 / 1440.0,
        "seconds" | "second" | "s" => 1.0 / SECONDS_PER_DAY,
        _ => return None,
    };
    if words.next()? != "since" {
        return None;
    }
    // "1950-01-01" or "1950-01-01T00:00:00"
    let date = words.next()?.split('T').next()?;
    parse_iso(date).ok().map(|ymd| (days_per_unit, ymd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso(values: &[&str]) -> Vec<TimeValue> {
        values.iter().map(|s| TimeValue::Iso(s.to_string())).collect()
    }

    #[test]
    fn monthly_axis_uses_days_in_month() {
        let axis = TimeAxis::classify(&iso(&["2000-01-15", "2000-02-15"])).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Monthly));
        let secs = axis.seconds_per_step().unwrap();
        assert_eq!(secs[0], 31.0 * SECONDS_PER_DAY);
        assert_eq!(secs[1], 29.0 * SECONDS_PER_DAY);
    }

    #[test]
    fn yearly_axis_is_leap_aware() {
        let axis = TimeAxis::classify(&iso(&["2000-01-01", "2001-01-01"])).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Yearly));
        assert_eq!(axis.day_offset[1] - axis.day_offset[0], 366);
        assert_eq!(axis.seconds_per_step().unwrap()[0], 366.0 * SECONDS_PER_DAY);

        let axis = TimeAxis::classify(&iso(&["2001-01-01", "2002-01-01"])).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Yearly));
        assert_eq!(axis.seconds_per_step().unwrap()[0], 365.0 * SECONDS_PER_DAY);
    }

    #[test]
    fn noleap_years_are_always_365_days() {
        let values: Vec<TimeValue> = [2000, 2001]
            .iter()
            .map(|&year| TimeValue::Calendar {
                year,
                month: 7,
                day: 1,
                calendar: Calendar::NoLeap,
            })
            .collect();
        let axis = TimeAxis::classify(&values).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Yearly));
        assert_eq!(axis.seconds_per_step().unwrap()[0], 365.0 * SECONDS_PER_DAY);
    }

    #[test]
    fn daily_axis_from_epoch_seconds() {
        let day = 86400;
        let values = vec![
            TimeValue::Epoch { seconds: 0 },
            TimeValue::Epoch { seconds: day },
            TimeValue::Epoch { seconds: 2 * day },
        ];
        let axis = TimeAxis::classify(&values).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Daily));
        assert_eq!(axis.dates[1].to_string(), "1970-01-02");
        assert_eq!(axis.day_offset[0], 7305);
        assert_eq!(axis.seconds_per_step().unwrap(), &[SECONDS_PER_DAY; 3]);
    }

    #[test]
    fn unclassified_gap_fails_duration_queries() {
        let axis = TimeAxis::classify(&iso(&["2000-01-01", "2000-01-08"])).unwrap();
        assert_eq!(axis.cadence(), None);
        assert!(matches!(
            axis.seconds_per_step(),
            Err(Error::UnsupportedTimeType(_))
        ));
    }

    #[test]
    fn undecoded_and_malformed_values_are_rejected() {
        assert!(matches!(
            TimeAxis::classify(&[TimeValue::Undecoded(3.0)]),
            Err(Error::UnsupportedTimeType(_))
        ));
        assert!(matches!(
            TimeAxis::classify(&iso(&["2000/01/01"])),
            Err(Error::UnsupportedTimeType(_))
        ));
        assert!(matches!(
            TimeAxis::classify(&iso(&["2001-02-29"])),
            Err(Error::UnsupportedTimeType(_))
        ));
    }

    #[test]
    fn date_range_selects_inclusive_indices() {
        let axis = TimeAxis::classify(&iso(&[
            "2000-01-15",
            "2000-02-15",
            "2000-03-15",
            "2000-04-15",
        ]))
        .unwrap();
        let range = DateRange::new("2000-02-01", "2000-03-15");
        assert_eq!(axis.select(Some(&range)).unwrap(), vec![1, 2]);
        assert_eq!(axis.select(None).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn cf_units_decode_to_calendar_dates() {
        let values = decode_cf_time(&[0.0, 31.0], Some("days since 2000-01-01 00:00:00"), None);
        assert_eq!(
            values[1],
            TimeValue::Calendar {
                year: 2000,
                month: 2,
                day: 1,
                calendar: Calendar::Standard
            }
        );

        let values = decode_cf_time(&[24.0 * 59.0], Some("hours since 2001-01-01"), Some("noleap"));
        assert_eq!(values[0].normalize().unwrap().to_string(), "2001-03-01");

        let values = decode_cf_time(&[1.0], None, None);
        assert_eq!(values[0], TimeValue::Undecoded(1.0));
    }

    #[test]
    fn fill_and_nan_times_stay_undecoded() {
        let fill = 9.969209968386869e36;
        for calendar in ["standard", "noleap", "360_day"] {
            let values = decode_cf_time(&[fill, f64::NAN, -fill, 0.0], Some("days since 2000-01-01"), Some(calendar));
            assert_eq!(values[0], TimeValue::Undecoded(fill), "{calendar}");
            assert!(matches!(values[1], TimeValue::Undecoded(v) if v.is_nan()), "{calendar}");
            assert_eq!(values[2], TimeValue::Undecoded(-fill), "{calendar}");
            assert!(matches!(values[3], TimeValue::Calendar { year: 2000, .. }), "{calendar}");
        }
        assert!(Calendar::Standard.add_days((2000, 1, 1), i64::MAX).is_err());
        assert!(Calendar::NoLeap.add_days((2000, 1, 1), i64::MAX).is_err());
    }

    #[test]
    fn epoch_and_iso_samples_share_an_axis() {
        let values = vec![
            TimeValue::Iso("1970-01-01".to_string()),
            TimeValue::Epoch { seconds: 86400 },
            TimeValue::Calendar {
                year: 1970,
                month: 1,
                day: 3,
                calendar: Calendar::ProlepticGregorian,
            },
        ];
        let axis = TimeAxis::classify(&values).unwrap();
        assert_eq!(axis.cadence(), Some(Cadence::Daily));
        assert_eq!(axis.calendar(), Calendar::Standard);

        let mixed = vec![
            TimeValue::Iso("1970-01-01".to_string()),
            TimeValue::Calendar {
                year: 1970,
                month: 1,
                day: 2,
                calendar: Calendar::NoLeap,
            },
        ];
        assert!(matches!(TimeAxis::classify(&mixed), Err(Error::UnsupportedTimeType(_))));
    }

    #[test]
    fn day360_arithmetic_round_trips() {
        let cal = Calendar::Day360;
        let offset = cal.day_offset(1951, 2, 30).unwrap();
        assert_eq!(offset, 360 + 30 + 29);
        assert_eq!(cal.add_days((1950, 1, 1), offset).unwrap(), (1951, 2, 30));
        assert_eq!(cal.add_days((1950, 1, 1), -1).unwrap(), (1949, 12, 30));
    }
}

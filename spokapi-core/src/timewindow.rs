use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Duration;
use chrono::Local;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use chrono::TimeZone;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Meridian {
    Am,
    Pm,
    /// Not shown on the page, inferred from the other end of the window.
    Unknown,
}

impl Meridian {
    fn opposite(self) -> Self {
        match self {
            Self::Am => Self::Pm,
            Self::Pm => Self::Am,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl FromStr for Meridian {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('.', "").as_str() {
            "A" | "AM" => Ok(Self::Am),
            "P" | "PM" => Ok(Self::Pm),
            "" | "?" => Ok(Self::Unknown),
            _ => Err(Error::InvalidTime(format!("meridian: {s}"))),
        }
    }
}

impl fmt::Display for Meridian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Am => write!(f, "A"),
            Self::Pm => write!(f, "P"),
            Self::Unknown => write!(f, "?"),
        }
    }
}

/// A wall-clock time on a 12-hour clock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
    pub meridian: Meridian,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32, meridian: Meridian) -> Result<Self, Error> {
        if !(1..=12).contains(&hour) {
            return Err(Error::InvalidTime(format!("hour: {hour}")));
        }
        if minute > 59 {
            return Err(Error::InvalidTime(format!("minute: {minute}")));
        }
        Ok(ClockTime {
            hour,
            minute,
            meridian,
        })
    }

    fn is_midnight_hour(&self) -> bool {
        self.hour == 12 && self.meridian == Meridian::Am
    }

    fn to_naive_time(self) -> NaiveTime {
        let hour = match (self.hour, self.meridian) {
            (12, Meridian::Am) => 0,
            (hour, Meridian::Pm) if hour < 12 => hour + 12,
            (hour, _) => hour,
        };
        // Both fields were range-checked in `new()`.
        NaiveTime::from_hms_opt(hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}{}", self.hour, self.minute, self.meridian)
    }
}

/// The airtime of a program resolved onto a calendar date.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub runtime: Option<Duration>,
}

static RANGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d{1,2}):(\d{2})\s*([ap])?\.?\s*m?\.?\s*[-\u{2013}]\s*(\d{1,2}):(\d{2})\s*([ap])?",
    )
    .unwrap_or_else(|err| panic!("Invalid time range pattern: {err}"))
});

impl TimeWindow {
    /// Resolves `start` (and `end` if shown) onto `date`.
    ///
    /// An unknown start meridian is inferred from the end:
    ///
    /// * `start.hour > end.hour`: the opposite meridian (11:30 - 1:00 AM)
    /// * `start.hour < end.hour == 12`: the opposite meridian (11:30 - 12:30 AM)
    /// * otherwise: the meridian of the end (1:00 - 3:00 PM)
    ///
    /// The end falls on the next day when it crosses midnight.  `offset_hours`
    /// is applied to both ends after the meridians are resolved.
    pub fn resolve(
        date: NaiveDate,
        start: ClockTime,
        end: Option<ClockTime>,
        offset_hours: i64,
    ) -> Result<Self, Error> {
        let offset = Duration::hours(offset_hours);

        let end = match end {
            Some(end) => end,
            None => {
                if start.meridian == Meridian::Unknown {
                    return Err(Error::InvalidTime(format!("ambiguous: {start}")));
                }
                return Ok(TimeWindow {
                    start: date.and_time(start.to_naive_time()) + offset,
                    end: None,
                    runtime: None,
                });
            }
        };

        if end.meridian == Meridian::Unknown {
            return Err(Error::InvalidTime(format!("ambiguous: {start} - {end}")));
        }

        let mut start = start;
        if start.meridian == Meridian::Unknown {
            start.meridian = if start.hour > end.hour || (start.hour < end.hour && end.hour == 12) {
                end.meridian.opposite()
            } else {
                end.meridian
            };
        }

        let start_time = start.to_naive_time();
        let end_time = end.to_naive_time();

        // 12:45 AM - 12:15 AM spans a whole night, 12:15 AM - 12:45 AM doesn't.
        let ends_at_midnight_hour = end.is_midnight_hour()
            && (!start.is_midnight_hour() || start.minute >= end.minute);
        let end_date = if ends_at_midnight_hour || end_time < start_time {
            date.succ_opt()
                .ok_or_else(|| Error::InvalidTime(format!("date: {date}")))?
        } else {
            date
        };

        let start = date.and_time(start_time);
        let end = end_date.and_time(end_time);
        let runtime = (end - start).abs();

        Ok(TimeWindow {
            start: start + offset,
            end: Some(end + offset),
            runtime: Some(runtime),
        })
    }

    /// Parses a range like `"11:45 PM - 12:15 AM"` or `"11:45 - 1:15 AM"`.
    pub fn parse(date: NaiveDate, text: &str, offset_hours: i64) -> Result<Self, Error> {
        let caps = RANGE_REGEX
            .captures(text)
            .ok_or_else(|| Error::InvalidTime(text.to_string()))?;
        let number = |i: usize| -> Result<u32, Error> {
            caps.get(i)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .parse()
                .map_err(|_| Error::InvalidTime(text.to_string()))
        };
        let meridian = |i: usize| -> Result<Meridian, Error> {
            caps.get(i).map(|m| m.as_str()).unwrap_or("?").parse()
        };
        let start = ClockTime::new(number(1)?, number(2)?, meridian(3)?)?;
        let end = ClockTime::new(number(4)?, number(5)?, meridian(6)?)?;
        Self::resolve(date, start, Some(end), offset_hours)
    }

    pub fn start_local(&self) -> DateTime<Local> {
        localize(self.start)
    }

    pub fn end_local(&self) -> Option<DateTime<Local>> {
        self.end.map(localize)
    }
}

fn localize(naive: NaiveDateTime) -> DateTime<Local> {
    // A wall-clock time inside a DST gap doesn't exist; read it as UTC.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

//! Cron expression translation into native scheduler triggers.
//!
//! Translation deliberately covers a subset of cron: a single time of day
//! taken from the minute and hour fields, plus a weekday set or a
//! day-of-month set. Lists and steps in the minute and hour fields are not
//! expanded into multiple trigger times, and the month field is validated
//! but not honored.

use crate::error::ScheduleError;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Day of the week, ordered Sunday first as in cron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    /// All weekdays, Sunday first.
    pub const ALL: [Weekday; 7] = [
        Self::Sun,
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
    ];

    /// Maps a cron day-of-week number; both 0 and 7 are Sunday.
    #[must_use]
    pub fn from_cron(value: u8) -> Option<Self> {
        match value {
            0 | 7 => Some(Self::Sun),
            1..=6 => Some(Self::ALL[usize::from(value)]),
            _ => None,
        }
    }

    /// Three-letter uppercase code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Sun => "SUN",
            Self::Mon => "MON",
            Self::Tue => "TUE",
            Self::Wed => "WED",
            Self::Thu => "THU",
            Self::Fri => "FRI",
            Self::Sat => "SAT",
        }
    }

    /// Zero-based index, Sunday = 0.
    #[must_use]
    pub const fn index(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A 24-hour time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Midnight.
    pub const MIDNIGHT: TimeOfDay = TimeOfDay { hour: 0, minute: 0 };

    /// Creates a time of day, or `None` if out of range.
    #[must_use]
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Hour, 0-23.
    #[must_use]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute, 0-59.
    #[must_use]
    pub const fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.split_once(':')
            .and_then(|(h, m)| Self::new(h.parse().ok()?, m.parse().ok()?))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{raw}'")))
    }
}

/// The kind of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Daily,
    Weekly,
    Monthly,
    Once,
    Startup,
}

/// When a native scheduler should fire a task.
///
/// Derived fresh from a cron expression on every registration; never
/// persisted by taskward itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleTrigger {
    /// Every `interval` days at `time`.
    Daily { time: TimeOfDay, interval: u16 },
    /// Every `interval` weeks on `days` at `time`.
    Weekly {
        time: TimeOfDay,
        days: BTreeSet<Weekday>,
        interval: u16,
    },
    /// Every month on the listed calendar days at `time`.
    Monthly { time: TimeOfDay, days: BTreeSet<u8> },
    /// A single run at a local date and time.
    Once { at: NaiveDateTime },
    /// At system startup.
    Startup,
}

impl ScheduleTrigger {
    /// Returns the trigger kind.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::Daily { .. } => TriggerKind::Daily,
            Self::Weekly { .. } => TriggerKind::Weekly,
            Self::Monthly { .. } => TriggerKind::Monthly,
            Self::Once { .. } => TriggerKind::Once,
            Self::Startup => TriggerKind::Startup,
        }
    }

    /// Returns the time of day, for recurring triggers.
    #[must_use]
    pub fn time(&self) -> Option<TimeOfDay> {
        match self {
            Self::Daily { time, .. } | Self::Weekly { time, .. } | Self::Monthly { time, .. } => {
                Some(*time)
            }
            Self::Once { at } => TimeOfDay::new(
                u8::try_from(chrono::Timelike::hour(at)).unwrap_or(0),
                u8::try_from(chrono::Timelike::minute(at)).unwrap_or(0),
            ),
            Self::Startup => None,
        }
    }

    /// Returns the weekday set of a weekly trigger.
    #[must_use]
    pub fn days(&self) -> Option<&BTreeSet<Weekday>> {
        match self {
            Self::Weekly { days, .. } => Some(days),
            _ => None,
        }
    }

    /// Returns the first firing strictly after `after`, read the way cron
    /// reads the trigger. Startup triggers have no predictable next run.
    #[must_use]
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let time = match self {
            Self::Once { at } => return (*at > after).then_some(*at),
            Self::Startup => return None,
            Self::Daily { time, .. } | Self::Weekly { time, .. } | Self::Monthly { time, .. } => {
                *time
            }
        };

        // Any day-of-month set recurs within two months.
        let mut date = after.date();
        for _ in 0..=62 {
            if self.fires_on(date) {
                let candidate = date.and_hms_opt(time.hour().into(), time.minute().into(), 0)?;
                if candidate > after {
                    return Some(candidate);
                }
            }
            date = date.checked_add_days(Days::new(1))?;
        }
        None
    }

    fn fires_on(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily { interval, .. } => (date.day0() % u32::from((*interval).max(1))) == 0,
            Self::Weekly { days, .. } => days
                .iter()
                .any(|d| u32::from(d.index()) == date.weekday().num_days_from_sunday()),
            Self::Monthly { days, .. } => u8::try_from(date.day()).is_ok_and(|d| days.contains(&d)),
            Self::Once { .. } | Self::Startup => false,
        }
    }
}

impl fmt::Display for ScheduleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily { time, .. } => write!(f, "daily at {time}"),
            Self::Weekly { time, days, .. } => {
                let days: Vec<&str> = days.iter().map(Weekday::code).collect();
                write!(f, "weekly on {} at {time}", days.join(","))
            }
            Self::Monthly { time, days } => {
                let days: Vec<String> = days.iter().map(u8::to_string).collect();
                write!(f, "monthly on day {} at {time}", days.join(","))
            }
            Self::Once { at } => write!(f, "once at {at}"),
            Self::Startup => write!(f, "at startup"),
        }
    }
}

/// Bounds and aliases of one cron field.
struct FieldSpec {
    name: &'static str,
    min: u8,
    max: u8,
    aliases: &'static [&'static str],
    alias_base: u8,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    aliases: &[],
    alias_base: 0,
};

const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    aliases: &[],
    alias_base: 0,
};

const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    aliases: &[],
    alias_base: 0,
};

const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    aliases: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    alias_base: 1,
};

const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    aliases: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    alias_base: 0,
};

impl FieldSpec {
    fn value(&self, expression: &str, token: &str) -> Result<u8, ScheduleError> {
        let value = if let Some(pos) = self
            .aliases
            .iter()
            .position(|alias| alias.eq_ignore_ascii_case(token))
        {
            self.alias_base + u8::try_from(pos).unwrap_or(u8::MAX)
        } else {
            token.parse::<u8>().map_err(|_| {
                invalid(
                    expression,
                    format!("'{token}' is not a valid {} value", self.name),
                )
            })?
        };
        if value < self.min || value > self.max {
            return Err(invalid(
                expression,
                format!(
                    "{} value {value} is outside {}-{}",
                    self.name, self.min, self.max
                ),
            ));
        }
        Ok(value)
    }

    /// Validates a field and returns every value it selects.
    fn expand(&self, expression: &str, field: &str) -> Result<BTreeSet<u8>, ScheduleError> {
        let mut values = BTreeSet::new();
        for item in field.split(',') {
            if item.is_empty() {
                return Err(invalid(expression, format!("empty item in {} field", self.name)));
            }
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .parse::<u8>()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| {
                            invalid(
                                expression,
                                format!("invalid step '{step}' in {} field", self.name),
                            )
                        })?;
                    (range, step)
                }
                None => (item, 1),
            };
            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((start, end)) = range.split_once('-') {
                let start = self.value(expression, start)?;
                let end = self.value(expression, end)?;
                if start > end {
                    return Err(invalid(
                        expression,
                        format!("range {start}-{end} in {} field is reversed", self.name),
                    ));
                }
                (start, end)
            } else {
                let start = self.value(expression, range)?;
                // `5/15` means "from 5 to the end, every 15".
                let end = if item.contains('/') { self.max } else { start };
                (start, end)
            };
            values.extend((start..=end).step_by(usize::from(step)));
        }
        Ok(values)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

/// Returns the literal leading value of a concrete field.
///
/// `"9"` and `"9,17"` yield 9; `"*"` and `"*/2"` yield nothing.
fn leading_value(field: &str) -> Option<u8> {
    if field.starts_with('*') {
        return None;
    }
    let end = field.find([',', '-', '/']).unwrap_or(field.len());
    field[..end].parse().ok()
}

/// Translates a five-field cron expression into a trigger.
///
/// # Errors
///
/// Returns `ScheduleError::InvalidCronExpression` if the expression does
/// not have exactly five fields or any field fails validation.
pub fn translate(expression: &str) -> Result<ScheduleTrigger, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
        return Err(invalid(
            expression,
            format!("expected 5 fields, got {}", fields.len()),
        ));
    };

    MINUTE.expand(expression, minute)?;
    HOUR.expand(expression, hour)?;
    let month_days = DAY_OF_MONTH.expand(expression, day_of_month)?;
    MONTH.expand(expression, month)?;
    let weekdays = DAY_OF_WEEK.expand(expression, day_of_week)?;

    let time = match (leading_value(minute), leading_value(hour)) {
        (Some(m), Some(h)) => TimeOfDay::new(h, m).unwrap_or(TimeOfDay::MIDNIGHT),
        _ => TimeOfDay::MIDNIGHT,
    };

    if month != "*" {
        tracing::debug!(expression, "month restriction is not supported and is ignored");
    }

    if day_of_week != "*" {
        let days = weekdays.into_iter().filter_map(Weekday::from_cron).collect();
        return Ok(ScheduleTrigger::Weekly {
            time,
            days,
            interval: 1,
        });
    }

    if day_of_month != "*" {
        return Ok(ScheduleTrigger::Monthly {
            time,
            days: month_days,
        });
    }

    Ok(ScheduleTrigger::Daily { time, interval: 1 })
}

//! Cron-style schedule triggers

use crate::error::PipelineError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How far ahead `next_after` searches before giving up (e.g. `0 0 30 2 *`)
const SEARCH_YEARS: i32 = 5;

/// A five-field cron expression: `minute hour day-of-month month day-of-week`
///
/// Supports `*`, lists (`1,15`), ranges (`1-5`) and steps (`*/15`, `0-30/10`).
/// Day-of-week accepts 0-7 where both 0 and 7 are Sunday. When both day
/// fields are restricted a time matches if either of them does. All times
/// are evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, PipelineError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(expression, "expected 5 fields"));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7, expression)?;
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(fields[0], 0, 59, expression)?,
            hours: parse_field(fields[1], 0, 23, expression)?,
            days_of_month: parse_field(fields[2], 1, 31, expression)?,
            months: parse_field(fields[3], 1, 12, expression)?,
            days_of_week,
            day_of_month_restricted: !fields[2].starts_with('*'),
            day_of_week_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the schedule fires during the minute containing `at`
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        self.minutes.contains(&at.minute()) && self.hours.contains(&at.hour()) && self.day_matches(&at)
    }

    fn day_matches(&self, at: &NaiveDateTime) -> bool {
        if !self.months.contains(&at.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&at.day());
        let dow = self
            .days_of_week
            .contains(&at.weekday().num_days_from_sunday());

        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start.year() + SEARCH_YEARS;
        let mut t = start;

        while t.year() <= limit {
            if !self.months.contains(&t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(&t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(&t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }

        None
    }

    /// The next `count` fire times after `after`
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

impl FromStr for CronSchedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn invalid(expression: &str, reason: &str) -> PipelineError {
    PipelineError::configuration(format!("invalid cron expression '{}': {}", expression, reason))
}

fn parse_field(field: &str, min: u32, max: u32, expression: &str) -> Result<BTreeSet<u32>, PipelineError> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(expression, &format!("bad step in '{}'", part)))?;
                if step == 0 {
                    return Err(invalid(expression, "step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let number = |s: &str| -> Result<u32, PipelineError> {
            let n: u32 = s
                .parse()
                .map_err(|_| invalid(expression, &format!("bad value '{}'", s)))?;
            if n < min || n > max {
                return Err(invalid(
                    expression,
                    &format!("{} is outside {}-{}", n, min, max),
                ));
            }
            Ok(n)
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let n = number(range)?;
            (n, if step.is_some() { max } else { n })
        };

        if start > end {
            return Err(invalid(expression, &format!("empty range '{}'", range)));
        }

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }

    Ok(values)
}

/// A time-based rule that requests a pipeline run
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    pub name: String,
    pub schedule: CronSchedule,
    pub pipeline: String,
}

/// Earliest fire time across triggers, with every trigger due at that time
pub fn next_fire(
    triggers: &[ScheduleTrigger],
    after: DateTime<Utc>,
) -> Option<(DateTime<Utc>, Vec<&ScheduleTrigger>)> {
    let mut earliest: Option<(DateTime<Utc>, Vec<&ScheduleTrigger>)> = None;

    for trigger in triggers {
        let Some(at) = trigger.schedule.next_after(after) else {
            continue;
        };
        match &mut earliest {
            Some((time, due)) if at == *time => due.push(trigger),
            Some((time, _)) if at > *time => {}
            _ => earliest = Some((at, vec![trigger])),
        }
    }

    earliest
}

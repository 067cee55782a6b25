//! Schedule expressions.
//!
//! Three forms are understood:
//! - `@every <duration>`: fixed interval from start, e.g. `@every 1h30m`
//! - descriptors: `@yearly`/`@annually`, `@monthly`, `@weekly`,
//!   `@daily`/`@midnight`, `@hourly`
//! - cron fields: five (`min hour dom month dow`), six (leading seconds) or
//!   seven (trailing year). Day-of-week numbers follow the usual cron
//!   convention of `0`-`6` starting on Sunday, with `7` also meaning Sunday.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchyard_core::PipelineError;

use super::duration::parse_duration;

/// How a [`Schedule`] produces fire times.
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    /// Fire every `Duration`, measured from scheduler start.
    Every(Duration),
    /// Fire at calendar times.
    Cron(Box<::cron::Schedule>),
}

/// A validated schedule expression.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    kind: ScheduleKind,
}

impl Schedule {
    /// Parses only the `@every <duration>` form.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSchedule` for any other form, for a
    /// malformed duration and for a zero interval.
    pub fn parse_interval(expression: &str) -> Result<Self, PipelineError> {
        let trimmed = expression.trim();
        let Some(raw) = every_argument(trimmed) else {
            return Err(PipelineError::invalid_schedule(
                expression,
                "expected an '@every <duration>' expression",
            ));
        };
        let interval = parse_duration(raw)
            .map_err(|e| PipelineError::invalid_schedule(expression, e.to_string()))?;
        if interval.is_zero() {
            return Err(PipelineError::invalid_schedule(
                expression,
                "interval must be greater than zero",
            ));
        }
        Ok(Self {
            expression: trimmed.to_string(),
            kind: ScheduleKind::Every(interval),
        })
    }

    /// Parses any supported form.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSchedule` describing why the
    /// expression was rejected.
    pub fn parse(expression: &str) -> Result<Self, PipelineError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::invalid_schedule(expression, "empty expression"));
        }
        if every_argument(trimmed).is_some() || trimmed == "@every" {
            return Self::parse_interval(trimmed);
        }

        let fields = if trimmed.starts_with('@') {
            descriptor(trimmed)
                .ok_or_else(|| {
                    PipelineError::invalid_schedule(expression, "unknown schedule descriptor")
                })?
                .to_string()
        } else {
            normalize_fields(trimmed)
                .map_err(|reason| PipelineError::invalid_schedule(expression, reason))?
        };

        let schedule = ::cron::Schedule::from_str(&fields)
            .map_err(|e| PipelineError::invalid_schedule(expression, e.to_string()))?;
        Ok(Self {
            expression: trimmed.to_string(),
            kind: ScheduleKind::Cron(Box::new(schedule)),
        })
    }

    /// The expression as written, trimmed.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn kind(&self) -> &ScheduleKind {
        &self.kind
    }

    /// The fixed interval of an `@every` schedule.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self.kind {
            ScheduleKind::Every(interval) => Some(interval),
            ScheduleKind::Cron(_) => None,
        }
    }

    /// The first fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Every(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|step| after.checked_add_signed(step)),
            ScheduleKind::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for Schedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returns the duration text of an `@every <duration>` expression.
fn every_argument(expression: &str) -> Option<&str> {
    let rest = expression.strip_prefix("@every")?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn descriptor(name: &str) -> Option<&'static str> {
    Some(match name {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * Sun",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        _ => return None,
    })
}

/// Expands five-field expressions with a zero seconds field and rewrites the
/// day-of-week field into the 1-based numbering the `cron` crate expects.
fn normalize_fields(expression: &str) -> Result<String, String> {
    let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 | 7 => {}
        n => return Err(format!("expected 5, 6 or 7 fields, found {n}")),
    }
    fields[5] = day_of_week(&fields[5])?;
    Ok(fields.join(" "))
}

fn day_of_week(field: &str) -> Result<String, String> {
    let mut out = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

        if let Some((start, end)) = base.split_once('-') {
            match (weekday_number(start)?, weekday_number(end)?) {
                (Some(start), Some(7)) => {
                    if step.is_some() && start != 0 {
                        return Err(format!(
                            "day-of-week range {base:?} ending at 7 cannot take a step"
                        ));
                    }
                    match start {
                        0 => out.push(format!("1-7{suffix}")),
                        6 => out.push("7".to_string()),
                        _ => out.push(format!("{}-7", start + 1)),
                    }
                    if start != 0 {
                        out.push("1".to_string());
                    }
                }
                (Some(start), Some(end)) => {
                    out.push(format!("{}-{}{suffix}", shift(start), shift(end)));
                }
                _ => out.push(item.to_string()),
            }
        } else {
            match weekday_number(base)? {
                Some(day) => out.push(format!("{}{suffix}", shift(day))),
                None => out.push(item.to_string()),
            }
        }
    }
    Ok(out.join(","))
}

/// Parses a numeric weekday, `None` for names and wildcards.
fn weekday_number(token: &str) -> Result<Option<u8>, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<u8>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day-of-week {token} out of range 0-7")),
    }
}

fn shift(day: u8) -> u8 {
    if day == 7 {
        1
    } else {
        day + 1
    }
}

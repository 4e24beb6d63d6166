//! Due-time evaluation. Pure: no I/O, no clock reads.
//!
//! A subscription is due when the most recent cron fire instant strictly
//! before `now`, evaluated in the subscriber's timezone, is strictly after
//! its last successful send (or its creation time if nothing was sent yet).
//! Invocation timing does not matter: any run between one fire instant and
//! the next finds the subscription due until a SUCCESS is logged.
//!
//! Bad configuration never errors out of here. An unparseable cron
//! expression or unknown timezone is "not due", so a misconfigured
//! subscription stalls instead of failing its batch.

use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use drip_core::types::Subscription;
use tracing::warn;

/// Day-of-week names in standard cron numbering (0 and 7 are Sunday).
const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Decide due-ness for `sub`.
///
/// With `step_minutes` set, cron is bypassed: due once `step_minutes` have
/// elapsed since the row was last updated. Otherwise cron mode applies.
pub fn is_subscription_due(
    sub: &Subscription,
    now: DateTime<Utc>,
    last_success_at: Option<DateTime<Utc>>,
    step_minutes: Option<u32>,
) -> bool {
    match step_minutes {
        Some(minutes) => is_elapsed_due(sub.updated_at, now, minutes),
        None => is_due(
            &sub.cron_expression,
            &sub.timezone,
            now,
            last_success_at.unwrap_or(sub.created_at),
        ),
    }
}

/// Cron mode. `anchor` is the last successful send, or creation time.
pub fn is_due(cron_expression: &str, timezone: &str, now: DateTime<Utc>, anchor: DateTime<Utc>) -> bool {
    previous_fire(cron_expression, timezone, now).is_some_and(|prev| prev > anchor)
}

/// Elapsed-time acceleration mode.
pub fn is_elapsed_due(updated_at: DateTime<Utc>, now: DateTime<Utc>, step_minutes: u32) -> bool {
    now - updated_at >= Duration::minutes(i64::from(step_minutes))
}

/// Most recent fire instant strictly before `now`, or `None` when the
/// expression or timezone is invalid or no earlier fire exists.
pub fn previous_fire(cron_expression: &str, timezone: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = match parse_cron(cron_expression) {
        Ok(s) => s,
        Err(e) => {
            warn!(cron = %cron_expression, "invalid cron expression: {e}");
            return None;
        }
    };
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(%timezone, "invalid timezone");
            return None;
        }
    };

    let now_local = now.with_timezone(&tz);
    // evaluation must never take the batch down, even on a library panic
    // around a DST gap or overlap
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        schedule.previous_before(&now_local)
    }))
    .unwrap_or_else(|_| {
        warn!(cron = %cron_expression, %timezone, "cron evaluation panicked; treating as not due");
        None
    })
    .map(|t| t.with_timezone(&Utc))
}

/// A parsed 5-field cron expression.
///
/// When both day-of-month and day-of-week are restricted, a day matches if
/// either field matches. The `cron` crate intersects the two, so that case
/// is held as two schedules whose fire instants are merged.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Latest fire instant strictly before `now`.
    pub fn previous_before<Z: TimeZone>(&self, now: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(now).next_back())
            .max()
    }
}

/// Parse a standard 5-field cron expression (minute granularity).
///
/// The `cron` crate expects a leading seconds field and numbers days of the
/// week 1-7 from Sunday, so numeric day-of-week values are rewritten to
/// day names before parsing.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let &[minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(format!("expected 5 fields, got {}", fields.len()));
    };
    let dow = translate_day_of_week(dow)?;
    let build = |dom: &str, dow: &str| {
        Schedule::from_str(&format!("0 {minute} {hour} {dom} {month} {dow}"))
            .map_err(|e| e.to_string())
    };

    let schedules = if is_restricted(dom) && is_restricted(&dow) {
        vec![build(dom, "*")?, build("*", &dow)?]
    } else {
        vec![build(dom, &dow)?]
    };
    Ok(CronSchedule { schedules })
}

/// Vixie cron rule: a day field starting with `*` (or `?`) is unrestricted.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut days: Vec<String> = Vec::new();
    for item in field.split(',') {
        for day in translate_dow_item(item)?.split(',') {
            if !days.iter().any(|d| d == day) {
                days.push(day.to_string());
            }
        }
    }
    Ok(days.join(","))
}

fn translate_dow_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| format!("bad day-of-week step: {item}"))?;
            if step == 0 {
                return Err(format!("zero day-of-week step: {item}"));
            }
            (r, Some(step))
        }
        None => (item, None),
    };

    let bounds = if range == "*" {
        if step.is_none() {
            return Ok("*".to_string());
        }
        Some((0, 6))
    } else if let Some((a, b)) = range.split_once('-') {
        match (a.parse::<u32>(), b.parse::<u32>()) {
            (Ok(a), Ok(b)) => Some((a, b)),
            _ => None,
        }
    } else {
        range
            .parse::<u32>()
            .ok()
            .map(|n| if step.is_some() { (n, 6) } else { (n, n) })
    };

    // names ("Mon-Fri") and '?' are understood by the cron crate as-is
    let Some((start, end)) = bounds else {
        return Ok(item.to_string());
    };
    if start > 7 || end > 7 || start > end {
        return Err(format!("day-of-week out of range: {item}"));
    }

    let mut days: Vec<&str> = Vec::new();
    for d in (start..=end).step_by(step.unwrap_or(1) as usize) {
        let name = DAY_NAMES[(d % 7) as usize];
        if !days.contains(&name) {
            days.push(name);
        }
    }
    Ok(days.join(","))
}

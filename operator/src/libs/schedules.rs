//! Decides whether a scaling target should currently be up

use chrono::{DateTime, Datelike, Local, Timelike, Utc, Weekday};
use tracing::{event, Level};

use super::crds::ScalingSchedule;

/// Decide whether a target should currently be scaled up
///
/// A manual override always wins. Otherwise the target is up while any
/// valid window contains now and down while none does. Targets without a
/// single valid window default to up.
///
/// # Arguments
///
/// * `schedules` - The windows to evaluate
/// * `manual` - A manual override that beats every window
/// * `now` - The current wall clock time
pub fn is_active(schedules: &[ScalingSchedule], manual: Option<bool>, now: DateTime<Utc>) -> bool {
    // a manual override beats any schedule
    if let Some(active) = manual {
        return active;
    }
    let mut any_valid = false;
    for schedule in schedules {
        // windows without any weekday are invalid and skipped
        if schedule.days.is_empty() {
            continue;
        }
        any_valid = true;
        if matches(schedule, now) {
            return true;
        }
    }
    // targets without a single valid window default to up
    !any_valid
}

/// Check whether a single window contains now
///
/// # Arguments
///
/// * `schedule` - The window to check
/// * `now` - The current wall clock time
fn matches(schedule: &ScalingSchedule, now: DateTime<Utc>) -> bool {
    // project now into this windows timezone
    let (weekday, minutes) = local_parts(schedule.timezone.as_deref(), now);
    if !schedule.days.contains(&day_index(weekday)) {
        return false;
    }
    let start = parse_minutes(&schedule.start);
    let end = parse_minutes(&schedule.end);
    // windows never wrap midnight so a start beyond its end cannot match
    start <= minutes && minutes <= end
}

/// Get the weekday and minute of day for now in a windows timezone
///
/// Unknown timezones fall back to operator local time rather than failing
/// the reconcile.
///
/// # Arguments
///
/// * `timezone` - The IANA timezone name the window declared
/// * `now` - The current wall clock time
fn local_parts(timezone: Option<&str>, now: DateTime<Utc>) -> (Weekday, u32) {
    match timezone {
        Some(raw) => match raw.parse::<chrono_tz::Tz>() {
            Ok(tz) => {
                let local = now.with_timezone(&tz);
                (local.weekday(), local.hour() * 60 + local.minute())
            }
            Err(_) => {
                event!(
                    Level::WARN,
                    msg = "Falling back to local time for unknown timezone",
                    timezone = raw
                );
                let local = now.with_timezone(&Local);
                (local.weekday(), local.hour() * 60 + local.minute())
            }
        },
        None => {
            let local = now.with_timezone(&Local);
            (local.weekday(), local.hour() * 60 + local.minute())
        }
    }
}

/// Map a weekday onto the 0 = Sunday indexing schedules use
///
/// # Arguments
///
/// * `weekday` - The weekday to map
fn day_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

/// Parse an H:MM or HH:MM time string into a minute of day
///
/// Malformed strings land on minute zero rather than failing the reconcile.
///
/// # Arguments
///
/// * `raw` - The time string to parse
fn parse_minutes(raw: &str) -> u32 {
    let mut split = raw.trim().splitn(2, ':');
    let hours = split.next().and_then(|hours| hours.parse::<u32>().ok());
    let minutes = split.next().and_then(|minutes| minutes.parse::<u32>().ok());
    match (hours, minutes) {
        (Some(hours), Some(minutes)) if hours <= 23 && minutes <= 59 => hours * 60 + minutes,
        _ => 0,
    }
}

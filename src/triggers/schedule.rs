use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::models::Schedule;

/// Longest gap between two matching days of a monthly schedule (e.g. only the 31st).
const MONTHLY_SEARCH_DAYS: u64 = 400;

fn at_local(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn day_matches(schedule: &Schedule, date: NaiveDate) -> bool {
    match schedule {
        Schedule::Daily { .. } => true,
        Schedule::Weekly { days, .. } => days.contains(&date.weekday().num_days_from_sunday()),
        Schedule::Monthly { days, .. } => days.contains(&date.day()),
        Schedule::Once { .. } | Schedule::Custom { .. } => false,
    }
}

fn time_of_day(schedule: &Schedule) -> Option<NaiveTime> {
    match schedule {
        Schedule::Daily { time } | Schedule::Weekly { time, .. } | Schedule::Monthly { time, .. } => Some(*time),
        _ => None,
    }
}

fn search_span(schedule: &Schedule) -> u64 {
    match schedule {
        Schedule::Daily { .. } => 1,
        Schedule::Weekly { .. } => 7,
        _ => MONTHLY_SEARCH_DAYS,
    }
}

/// Latest occurrence `t <= now` of a recurring calendar schedule.
fn latest_calendar(schedule: &Schedule, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let time = time_of_day(schedule)?;
    let today = now.with_timezone(&offset).date_naive();
    (0..=search_span(schedule))
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .filter(|date| day_matches(schedule, *date))
        .filter_map(|date| at_local(date, time, offset))
        .find(|t| *t <= now)
}

/// First occurrence `t > after` of a recurring calendar schedule.
fn next_calendar(schedule: &Schedule, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let time = time_of_day(schedule)?;
    let today = after.with_timezone(&offset).date_naive();
    (0..=search_span(schedule))
        .filter_map(|ahead| today.checked_add_days(Days::new(ahead)))
        .filter(|date| day_matches(schedule, *date))
        .filter_map(|date| at_local(date, time, offset))
        .find(|t| *t > after)
}

fn parse_cron(expression: &str) -> Option<cron::Schedule> {
    cron::Schedule::from_str(expression).ok()
}

/// Latest occurrence of a schedule that falls inside `[now - window, now]`.
///
/// For `once` schedules the window is ignored: the date is returned as soon as it has passed.
pub fn latest_occurrence(
    schedule: &Schedule,
    now: DateTime<Utc>,
    window: Duration,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { date } => (*date <= now).then_some(*date),
        Schedule::Custom { expression } => {
            let cron = parse_cron(expression)?;
            // `after` is exclusive, so start one second before the window opens.
            let from = (now - window - Duration::seconds(1)).with_timezone(&offset);
            cron.after(&from)
                .map(|t| t.with_timezone(&Utc))
                .take_while(|t| *t <= now)
                .last()
        }
        _ => latest_calendar(schedule, now, offset).filter(|t| now - *t <= window),
    }
}

/// First occurrence strictly after `after`.
pub fn next_occurrence(schedule: &Schedule, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { date } => (*date > after).then_some(*date),
        Schedule::Custom { expression } => parse_cron(expression)?
            .after(&after.with_timezone(&offset))
            .next()
            .map(|t| t.with_timezone(&Utc)),
        _ => next_calendar(schedule, after, offset),
    }
}

/// Weekday numbers (0 = Sunday) as displayed in CLI output.
pub fn describe_days(days: &BTreeSet<u32>) -> String {
    const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    days.iter()
        .filter_map(|d| NAMES.get(*d as usize).copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// One-line human description of a schedule.
pub fn describe(schedule: &Schedule) -> String {
    match schedule {
        Schedule::Once { date } => format!("once at {}", date.to_rfc3339()),
        Schedule::Daily { time } => format!("daily at {}", time.format("%H:%M")),
        Schedule::Weekly { time, days } => format!("weekly on {} at {}", describe_days(days), time.format("%H:%M")),
        Schedule::Monthly { time, days } => {
            let days: Vec<String> = days.iter().map(|d| d.to_string()).collect();
            format!("monthly on day {} at {}", days.join(","), time.format("%H:%M"))
        }
        Schedule::Custom { expression } => format!("cron '{}'", expression),
    }
}

//! Recurrence compilation
//!
//! Converts a recurrence description into a canonical five-field cron
//! expression and computes the next fire time in the schedule's timezone.
//!
//! `next_run` fails closed: a malformed expression or unknown timezone
//! yields `None` instead of an error, so a bad schedule goes dormant rather
//! than crashing the due-schedule checker.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use crate::domain::schedule::{Frequency, RecurrenceConfig};

/// Compile a frequency + recurrence config into a canonical cron expression.
///
/// `once` has no recurring expression and returns `None`; callers must
/// special-case it and expire the schedule after it fires.
pub fn compile(frequency: Frequency, config: &RecurrenceConfig) -> Option<String> {
    let minute = config.minute;
    let hour = config.hour;

    match frequency {
        Frequency::Once => None,
        Frequency::Hourly => Some(format!("{minute} * * * *")),
        Frequency::Daily => Some(format!("{minute} {hour} * * *")),
        Frequency::Weekly => {
            let days = if config.days_of_week.is_empty() {
                // Default to Monday.
                "1".to_string()
            } else {
                config
                    .days_of_week
                    .iter()
                    .map(|d| day_to_cron(d))
                    .collect::<Vec<_>>()
                    .join(",")
            };
            Some(format!("{minute} {hour} * * {days}"))
        }
        Frequency::Monthly => {
            let day_of_month = config.day_of_month;
            Some(format!("{minute} {hour} {day_of_month} * *"))
        }
        Frequency::Custom => Some(
            config
                .cron_expression
                .clone()
                .unwrap_or_else(|| "0 0 * * *".to_string()),
        ),
    }
}

/// Next occurrence of `cron_expression` in `timezone`, strictly after
/// `after`, converted back to UTC.
pub fn next_run(
    cron_expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let tz: Tz = timezone.parse().ok()?;
    let expression = to_parser_expression(cron_expression)?;
    let schedule = CronSchedule::from_str(&expression).ok()?;

    let local = after.with_timezone(&tz);
    schedule
        .after(&local)
        .next()
        .map(|next| next.with_timezone(&Utc))
}

/// Map a lowercase day name to its standard cron ordinal (Sunday = 0).
/// Unknown names fall back to Monday, matching the weekly default.
fn day_to_cron(day: &str) -> &'static str {
    match day {
        "sunday" => "0",
        "monday" => "1",
        "tuesday" => "2",
        "wednesday" => "3",
        "thursday" => "4",
        "friday" => "5",
        "saturday" => "6",
        _ => "1",
    }
}

/// Rewrite a canonical five-field expression into the parser's dialect.
///
/// The stored form is standard cron: five fields, Sunday = 0 in the
/// day-of-week slot. The parser wants a seconds field and numbers Sunday
/// as 1, so the expression gains a leading `0` and numeric day-of-week
/// tokens shift by one. Anything that is not five fields is malformed.
fn to_parser_expression(cron_expression: &str) -> Option<String> {
    let fields: Vec<&str> = cron_expression.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let dow = translate_dow_field(fields[4])?;
    Some(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

fn translate_dow_field(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut parts = Vec::new();
    for token in field.split(',') {
        let (base, step) = match token.split_once('/') {
            Some((b, s)) => (b, Some(s)),
            None => (token, None),
        };

        let translated = if let Some((lo, hi)) = base.split_once('-') {
            format!("{}-{}", translate_dow_token(lo)?, translate_dow_token(hi)?)
        } else {
            translate_dow_token(base)?
        };

        match step {
            Some(s) => parts.push(format!("{translated}/{s}")),
            None => parts.push(translated),
        }
    }
    Some(parts.join(","))
}

fn translate_dow_token(token: &str) -> Option<String> {
    if token == "*" {
        return Some(token.to_string());
    }
    match token.parse::<u32>() {
        // Standard cron allows both 0 and 7 for Sunday.
        Ok(n) if n <= 7 => Some(((n % 7) + 1).to_string()),
        Ok(_) => None,
        // Named days ("mon", "wed") pass through untouched.
        Err(_) => Some(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(minute: u32, hour: u32) -> RecurrenceConfig {
        RecurrenceConfig {
            minute,
            hour,
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_hourly() {
        assert_eq!(
            compile(Frequency::Hourly, &config(5, 0)).as_deref(),
            Some("5 * * * *")
        );
    }

    #[test]
    fn test_compile_daily() {
        assert_eq!(
            compile(Frequency::Daily, &config(30, 9)).as_deref(),
            Some("30 9 * * *")
        );
    }

    #[test]
    fn test_compile_weekly_defaults_to_monday() {
        assert_eq!(
            compile(Frequency::Weekly, &config(0, 0)).as_deref(),
            Some("0 0 * * 1")
        );
    }

    #[test]
    fn test_compile_weekly_named_days() {
        let cfg = RecurrenceConfig {
            minute: 0,
            hour: 2,
            days_of_week: vec!["wednesday".to_string()],
            ..Default::default()
        };
        assert_eq!(
            compile(Frequency::Weekly, &cfg).as_deref(),
            Some("0 2 * * 3")
        );

        let cfg = RecurrenceConfig {
            minute: 15,
            hour: 8,
            days_of_week: vec!["monday".to_string(), "friday".to_string()],
            ..Default::default()
        };
        assert_eq!(
            compile(Frequency::Weekly, &cfg).as_deref(),
            Some("15 8 * * 1,5")
        );
    }

    #[test]
    fn test_compile_monthly() {
        let cfg = RecurrenceConfig {
            minute: 0,
            hour: 3,
            day_of_month: 15,
            ..Default::default()
        };
        assert_eq!(
            compile(Frequency::Monthly, &cfg).as_deref(),
            Some("0 3 15 * *")
        );
    }

    #[test]
    fn test_compile_custom_verbatim() {
        let cfg = RecurrenceConfig {
            cron_expression: Some("*/10 6 * * 2".to_string()),
            ..Default::default()
        };
        assert_eq!(
            compile(Frequency::Custom, &cfg).as_deref(),
            Some("*/10 6 * * 2")
        );
    }

    #[test]
    fn test_compile_once_has_no_cron() {
        assert_eq!(compile(Frequency::Once, &config(0, 9)), None);
    }

    #[test]
    fn test_next_run_daily_strictly_after() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = next_run("30 9 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap());

        // Exactly on the boundary: the result must still strictly exceed it.
        let at_fire = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let next = next_run("30 9 * * *", "UTC", at_fire).unwrap();
        assert!(next > at_fire);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 3, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_respects_timezone() {
        // 09:30 in New York during DST is 13:30 UTC.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let next = next_run("30 9 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap());
    }

    #[test]
    fn test_next_run_weekly_wednesday() {
        // 2024-01-03 was a Wednesday. At 02:01 the 02:00 slot has passed,
        // so the next fire is the following Wednesday.
        let after = Utc.with_ymd_and_hms(2024, 1, 3, 2, 1, 0).unwrap();
        let next = next_run("0 2 * * 3", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 10, 2, 0, 0).unwrap());

        // Just before the slot it fires the same day.
        let before = Utc.with_ymd_and_hms(2024, 1, 3, 1, 59, 0).unwrap();
        let next = next_run("0 2 * * 3", "UTC", before).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_sunday_numbering() {
        // 2024-01-07 was a Sunday; standard cron writes it as 0.
        let after = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let next = next_run("0 12 * * 0", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_fails_closed() {
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_run("not a cron", "UTC", after), None);
        assert_eq!(next_run("99 99 * * *", "UTC", after), None);
        assert_eq!(next_run("30 9 * * *", "Mars/Olympus", after), None);
        assert_eq!(next_run("", "UTC", after), None);
    }

    #[test]
    fn test_parser_expression_translation() {
        assert_eq!(
            to_parser_expression("30 9 * * *").as_deref(),
            Some("0 30 9 * * *")
        );
        // Day-of-week shifts by one for the parser's Sunday-is-1 dialect.
        assert_eq!(
            to_parser_expression("0 2 * * 3").as_deref(),
            Some("0 0 2 * * 4")
        );
        assert_eq!(
            to_parser_expression("0 2 * * 0,6").as_deref(),
            Some("0 0 2 * * 1,7")
        );
        assert_eq!(
            to_parser_expression("0 2 * * 1-5").as_deref(),
            Some("0 0 2 * * 2-6")
        );
        assert_eq!(to_parser_expression("bad"), None);
    }
}

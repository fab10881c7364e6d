/// Cron and interval due-ness
///
/// Standard 5-field Unix cron expressions are accepted and widened to the
/// 6-field (seconds first) form the `cron` crate parses. Cron schedules are
/// evaluated in their own IANA timezone.

use crate::schedule::types::{ScheduledWorkflow, TriggerType};
use anyhow::Result;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;

/// Prepend a zero seconds field to 5-field expressions
pub fn normalize_cron_expr(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        cron_expr.trim().to_string()
    }
}

pub fn parse_cron(cron_expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron_expr(cron_expr))
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", cron_expr, e))
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", name, e))
}

/// Interval length as a signed duration, rejecting values chrono cannot hold
pub fn interval_duration(seconds: u64) -> Result<Duration> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| anyhow::anyhow!("Interval of {} seconds is out of range", seconds))
}

/// `base + interval`, or an error when the result leaves chrono's range
pub fn interval_after(base: DateTime<Utc>, seconds: u64) -> Result<DateTime<Utc>> {
    base.checked_add_signed(interval_duration(seconds)?)
        .ok_or_else(|| anyhow::anyhow!("Interval of {} seconds overflows from {}", seconds, base))
}

/// Latest fire time at or before `now`
pub fn previous_fire(schedule: &Schedule, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cursor = (now.trunc_subsecs(0) + Duration::seconds(1)).with_timezone(&tz);
    schedule
        .after(&cursor)
        .rev()
        .take(2)
        .map(|fire| fire.with_timezone(&Utc))
        .find(|fire| *fire <= now)
}

/// First fire time strictly after `after`
pub fn next_cron_run(cron_expr: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse_cron(cron_expr)?;
    let tz = parse_timezone(timezone)?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|fire| fire.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("No upcoming run for cron expression '{}'", cron_expr))
}

/// Next expected run, or None when the trigger has no clock
pub fn next_run(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule.trigger_type {
        TriggerType::Cron => {
            let expression = schedule.cron_expression.as_deref()?;
            match next_cron_run(expression, &schedule.timezone, now) {
                Ok(next) => Some(next),
                Err(e) => {
                    tracing::error!("❌ Error calculating next run for schedule {}: {}", schedule.id, e);
                    None
                }
            }
        }
        TriggerType::Interval => {
            let seconds = schedule.interval_seconds?;
            match interval_after(schedule.last_run.unwrap_or(now), seconds) {
                Ok(next) => Some(next),
                Err(e) => {
                    tracing::error!("❌ Error calculating next run for schedule {}: {}", schedule.id, e);
                    None
                }
            }
        }
        TriggerType::Event => None,
    }
}

/// Cron fire keys already acted on, with the fire time each refers to
///
/// Keys are `{schedule_id}:{fire_time}`. Entries are evicted once their fire
/// time falls out of the evaluation window, so the map stays bounded.
#[derive(Debug, Default)]
pub struct ProcessedKeys {
    keys: HashMap<String, DateTime<Utc>>,
}

impl ProcessedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Returns false when the key was already present
    pub fn insert(&mut self, key: String, fire_time: DateTime<Utc>) -> bool {
        self.keys.insert(key, fire_time).is_none()
    }

    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        self.keys.retain(|_, fire_time| *fire_time >= cutoff);
    }
}

/// Decide whether a schedule fires at `now`
///
/// A cron fire time is claimed in `processed` when it is reported due, so the
/// same occurrence is never returned twice.
pub fn should_execute(
    schedule: &ScheduledWorkflow,
    now: DateTime<Utc>,
    check_interval: Duration,
    processed: &mut ProcessedKeys,
) -> Result<bool> {
    processed.evict_before(now - check_interval * 2);

    if !schedule.enabled || schedule.runs_exhausted() || !schedule.within_window(now) {
        return Ok(false);
    }

    match schedule.trigger_type {
        TriggerType::Cron => {
            let expression = schedule
                .cron_expression
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Cron schedule '{}' missing cron_expression", schedule.id))?;
            let cron = parse_cron(expression)?;
            let tz = parse_timezone(&schedule.timezone)?;

            let Some(fire_time) = previous_fire(&cron, tz, now) else {
                return Ok(false);
            };
            let elapsed = now - fire_time;
            if elapsed < Duration::zero() || elapsed > check_interval {
                return Ok(false);
            }
            let key = format!("{}:{}", schedule.id, fire_time.to_rfc3339());
            Ok(processed.insert(key, fire_time))
        }
        TriggerType::Interval => {
            let seconds = schedule
                .interval_seconds
                .ok_or_else(|| anyhow::anyhow!("Interval schedule '{}' missing interval_seconds", schedule.id))?;
            let interval = interval_duration(seconds)?;
            Ok(match schedule.last_run {
                None => true,
                Some(last_run) => now - last_run >= interval,
            })
        }
        TriggerType::Event => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn every_five_minutes() -> ScheduledWorkflow {
        let mut schedule = ScheduledWorkflow::new("wf", "every five", TriggerType::Cron).with_cron("*/5 * * * *");
        schedule.id = "s1".into();
        schedule
    }

    #[test]
    fn normalizes_five_field_expressions() {
        assert_eq!(normalize_cron_expr("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron_expr("0 0 * * * *"), "0 0 * * * *");
        assert!(parse_cron("invalid").is_err());
    }

    #[test]
    fn previous_fire_includes_exact_match() {
        let cron = parse_cron("*/5 * * * *").unwrap();
        assert_eq!(previous_fire(&cron, Tz::UTC, at(12, 5, 0)), Some(at(12, 5, 0)));
        assert_eq!(previous_fire(&cron, Tz::UTC, at(12, 9, 59)), Some(at(12, 5, 0)));
    }

    #[test]
    fn cron_fires_once_per_bucket() {
        let schedule = every_five_minutes();
        let window = Duration::seconds(60);
        let mut processed = ProcessedKeys::new();

        assert!(should_execute(&schedule, at(12, 5, 30), window, &mut processed).unwrap());
        assert!(!should_execute(&schedule, at(12, 5, 45), window, &mut processed).unwrap());
        assert!(!should_execute(&schedule, at(12, 6, 10), window, &mut processed).unwrap());
        assert_eq!(processed.len(), 1);

        assert!(should_execute(&schedule, at(12, 10, 20), window, &mut processed).unwrap());
        // The 12:05 claim is older than twice the window and was evicted
        assert_eq!(processed.len(), 1);
        assert!(processed.contains(&format!("s1:{}", at(12, 10, 0).to_rfc3339())));
    }

    #[test]
    fn cron_uses_schedule_timezone() {
        let schedule = every_five_minutes().with_cron("0 9 * * *").with_timezone("Asia/Jakarta");
        let mut processed = ProcessedKeys::new();
        // 09:00 in Jakarta is 02:00 UTC
        assert!(should_execute(&schedule, at(2, 0, 30), Duration::seconds(60), &mut processed).unwrap());
        assert!(!should_execute(&schedule, at(9, 0, 30), Duration::seconds(60), &mut processed).unwrap());
    }

    #[test]
    fn max_runs_and_window_block_execution() {
        let mut schedule = ScheduledWorkflow::new("wf", "interval", TriggerType::Interval).with_interval(60);
        let mut processed = ProcessedKeys::new();
        let now = at(12, 0, 0);

        schedule.max_runs = Some(3);
        schedule.current_runs = 3;
        assert!(!should_execute(&schedule, now, Duration::seconds(60), &mut processed).unwrap());

        schedule.current_runs = 2;
        assert!(should_execute(&schedule, now, Duration::seconds(60), &mut processed).unwrap());

        schedule.end_date = Some(at(11, 0, 0));
        assert!(!should_execute(&schedule, now, Duration::seconds(60), &mut processed).unwrap());
    }

    #[test]
    fn interval_due_after_elapsed() {
        let mut schedule = ScheduledWorkflow::new("wf", "interval", TriggerType::Interval).with_interval(300);
        let mut processed = ProcessedKeys::new();
        let window = Duration::seconds(60);

        assert!(should_execute(&schedule, at(12, 0, 0), window, &mut processed).unwrap());

        schedule.last_run = Some(at(12, 0, 0));
        assert!(!should_execute(&schedule, at(12, 4, 59), window, &mut processed).unwrap());
        assert!(should_execute(&schedule, at(12, 5, 0), window, &mut processed).unwrap());
        assert_eq!(next_run(&schedule, at(12, 5, 0)), Some(at(12, 5, 0)));
    }

    #[test]
    fn oversized_intervals_are_errors_not_wraparound() {
        let mut schedule = ScheduledWorkflow::new("wf", "huge", TriggerType::Interval).with_interval(u64::MAX);
        schedule.last_run = Some(at(12, 0, 0));
        let mut processed = ProcessedKeys::new();
        assert!(should_execute(&schedule, at(12, 0, 30), Duration::seconds(60), &mut processed).is_err());
        assert_eq!(next_run(&schedule, at(12, 0, 30)), None);

        // Fits in i64 but not in a chrono Duration
        schedule.interval_seconds = Some(i64::MAX as u64);
        assert!(should_execute(&schedule, at(12, 0, 30), Duration::seconds(60), &mut processed).is_err());
        assert_eq!(next_run(&schedule, at(12, 0, 30)), None);

        // A valid Duration whose sum leaves chrono's date range
        schedule.interval_seconds = Some(1_000_000_000_000_000);
        assert!(interval_duration(1_000_000_000_000_000).is_ok());
        assert!(!should_execute(&schedule, at(12, 0, 30), Duration::seconds(60), &mut processed).unwrap());
        assert_eq!(next_run(&schedule, at(12, 0, 30)), None);
    }

    #[test]
    fn event_schedules_never_tick() {
        let schedule = ScheduledWorkflow::new("wf", "on event", TriggerType::Event);
        let mut processed = ProcessedKeys::new();
        assert!(!should_execute(&schedule, at(12, 0, 0), Duration::seconds(60), &mut processed).unwrap());
        assert!(next_run(&schedule, at(12, 0, 0)).is_none());
    }

    #[test]
    fn next_cron_run_is_strictly_after() {
        assert_eq!(next_cron_run("*/5 * * * *", "UTC", at(12, 5, 0)).unwrap(), at(12, 10, 0));
        assert_eq!(next_cron_run("*/5 * * * *", "UTC", at(12, 7, 1)).unwrap(), at(12, 10, 0));
    }
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Schedule parsing and next-fire calculation.
//!
//! The calculator is purely functional: it never touches I/O or clock state,
//! the caller supplies `now`. Grammar per job type:
//!
//! - `cron`: 6-field expression (seconds, minutes, hours, day-of-month,
//!   month, day-of-week) with `@hourly`-style descriptors, evaluated in the
//!   job's IANA timezone.
//! - `interval`: seconds as a JSON integer >= 1.
//! - `one_time`: an RFC 3339 instant; such jobs have no *next* fire.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::job::JobType;

/// Calculate the next fire instant strictly after `now`.
///
/// Returns `Ok(None)` for one-time jobs: they fire at most once and their
/// initial fire time is seeded by [`initial_run_at`].
pub fn next_run(
	job_type: JobType,
	schedule: &str,
	timezone: &str,
	now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
	match job_type {
		JobType::Cron => {
			let cron_schedule = parse_cron(schedule)?;
			let tz = parse_timezone(timezone)?;

			let local_now = now.with_timezone(&tz);
			let next = cron_schedule.after(&local_now).next().ok_or_else(|| {
				CoreError::InvalidCronExpression(format!("no upcoming fire time for {schedule:?}"))
			})?;

			Ok(Some(next.with_timezone(&Utc)))
		}
		JobType::Interval => {
			let seconds = parse_interval(schedule)?;
			Ok(Some(now + Duration::seconds(seconds)))
		}
		JobType::OneTime => Ok(None),
	}
}

/// The first fire instant for a freshly created or rescheduled job.
///
/// Cron and interval jobs fire at their next computed tick; one-time jobs
/// fire at the instant encoded in the schedule itself.
pub fn initial_run_at(
	job_type: JobType,
	schedule: &str,
	timezone: &str,
	now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
	match job_type {
		JobType::OneTime => Ok(Some(parse_run_at(schedule)?)),
		_ => next_run(job_type, schedule, timezone, now),
	}
}

/// Validate a schedule under its type's grammar without computing anything.
/// Accepts exactly the inputs [`next_run`] / [`initial_run_at`] accept.
pub fn validate_schedule(job_type: JobType, schedule: &str, timezone: &str) -> Result<()> {
	match job_type {
		JobType::Cron => {
			parse_cron(schedule)?;
			parse_timezone(timezone)?;
			Ok(())
		}
		JobType::Interval => parse_interval(schedule).map(|_| ()),
		JobType::OneTime => parse_run_at(schedule).map(|_| ()),
	}
}

fn parse_cron(expression: &str) -> Result<Schedule> {
	Schedule::from_str(expression)
		.map_err(|e| CoreError::InvalidCronExpression(e.to_string()))
}

fn parse_timezone(timezone: &str) -> Result<Tz> {
	timezone
		.parse()
		.map_err(|_| CoreError::InvalidTimezone(timezone.to_string()))
}

fn parse_interval(schedule: &str) -> Result<i64> {
	let seconds: i64 = serde_json::from_str(schedule.trim())
		.map_err(|e| CoreError::InvalidInterval(e.to_string()))?;
	if seconds < 1 {
		return Err(CoreError::InvalidInterval(format!(
			"{seconds} is below the 1 second floor"
		)));
	}
	Ok(seconds)
}

fn parse_run_at(schedule: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(schedule.trim())
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| CoreError::InvalidRunAt(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use proptest::prelude::*;

	#[test]
	fn cron_every_five_seconds() {
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 2).unwrap();
		let next = next_run(JobType::Cron, "*/5 * * * * *", "UTC", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 5).unwrap());
	}

	#[test]
	fn cron_is_strictly_after_now() {
		// `now` lands exactly on a tick; the next fire must be the following one.
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 5).unwrap();
		let next = next_run(JobType::Cron, "*/5 * * * * *", "UTC", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 10).unwrap());
	}

	#[test]
	fn cron_daily_midnight() {
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 0).unwrap();
		let next = next_run(JobType::Cron, "0 0 0 * * *", "UTC", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap());
	}

	#[test]
	fn cron_respects_timezone() {
		// 9am Sydney on Jan 20 = 2026-01-19 22:00:00 UTC (AEDT is UTC+11).
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 20, 0, 0).unwrap();
		let next = next_run(JobType::Cron, "0 0 9 * * *", "Australia/Sydney", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 22, 0, 0).unwrap());
	}

	#[test]
	fn cron_descriptor() {
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 0).unwrap();
		let next = next_run(JobType::Cron, "@hourly", "UTC", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 19, 11, 0, 0).unwrap());
	}

	#[test]
	fn interval_adds_seconds() {
		let now = Utc.with_ymd_and_hms(2026, 1, 19, 10, 30, 0).unwrap();
		let next = next_run(JobType::Interval, "300", "UTC", now)
			.unwrap()
			.unwrap();
		assert_eq!(next, now + Duration::seconds(300));
	}

	#[test]
	fn one_time_has_no_next_run() {
		let next = next_run(JobType::OneTime, "2026-03-01T12:00:00Z", "UTC", Utc::now()).unwrap();
		assert!(next.is_none());
	}

	#[test]
	fn one_time_initial_run_is_the_instant() {
		let at = initial_run_at(JobType::OneTime, "2026-03-01T12:00:00Z", "UTC", Utc::now())
			.unwrap()
			.unwrap();
		assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
	}

	#[test]
	fn invalid_cron_expression_rejected() {
		assert!(next_run(JobType::Cron, "not a cron", "UTC", Utc::now()).is_err());
		// Five fields is the classic Unix form; the grammar here requires six.
		assert!(next_run(JobType::Cron, "* * * * *", "UTC", Utc::now()).is_err());
	}

	#[test]
	fn invalid_timezone_rejected() {
		assert!(next_run(JobType::Cron, "0 0 * * * *", "Mars/Olympus", Utc::now()).is_err());
	}

	#[test]
	fn invalid_interval_rejected() {
		assert!(next_run(JobType::Interval, "0", "UTC", Utc::now()).is_err());
		assert!(next_run(JobType::Interval, "-5", "UTC", Utc::now()).is_err());
		assert!(next_run(JobType::Interval, "every minute", "UTC", Utc::now()).is_err());
	}

	#[test]
	fn validation_matches_next_run() {
		let cases = [
			(JobType::Cron, "*/5 * * * * *", "UTC"),
			(JobType::Cron, "bogus", "UTC"),
			(JobType::Cron, "0 0 * * * *", "Nowhere/Else"),
			(JobType::Interval, "60", "UTC"),
			(JobType::Interval, "0", "UTC"),
			(JobType::OneTime, "2026-03-01T12:00:00Z", "UTC"),
			(JobType::OneTime, "tomorrow", "UTC"),
		];
		for (job_type, schedule, tz) in cases {
			let validated = validate_schedule(job_type, schedule, tz).is_ok();
			let computed = initial_run_at(job_type, schedule, tz, Utc::now()).is_ok();
			assert_eq!(validated, computed, "{job_type} {schedule:?} {tz}");
		}
	}

	proptest! {
		#[test]
		fn interval_next_run_is_strictly_increasing(seconds in 1i64..86_400) {
			let schedule = seconds.to_string();
			let now = Utc.with_ymd_and_hms(2026, 1, 19, 0, 0, 0).unwrap();
			let first = next_run(JobType::Interval, &schedule, "UTC", now).unwrap().unwrap();
			let second = next_run(JobType::Interval, &schedule, "UTC", first).unwrap().unwrap();
			prop_assert!(first > now);
			prop_assert!(second > first);
		}

		#[test]
		fn cron_next_run_is_strictly_increasing(step in 1u32..30, hour in 0u32..24) {
			let schedule = format!("*/{step} * {hour} * * *");
			let now = Utc.with_ymd_and_hms(2026, 1, 19, 0, 0, 0).unwrap();
			let first = next_run(JobType::Cron, &schedule, "UTC", now).unwrap().unwrap();
			let second = next_run(JobType::Cron, &schedule, "UTC", first).unwrap().unwrap();
			prop_assert!(first > now);
			prop_assert!(second > first);
		}
	}
}

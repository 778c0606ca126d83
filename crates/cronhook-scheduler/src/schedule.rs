use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cronhook_core::{Job, JobId, RegisterJob};

use crate::error::{Result, SchedulerError};

/// Parse a cron expression.
///
/// Accepts the seconds-first six/seven field form directly. Classic five-field
/// expressions get a `0` seconds field prepended, so `*/5 * * * *` fires at
/// second zero of every fifth minute.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize(expr))
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{expr}: {e}")))
}

fn normalize(expr: &str) -> Cow<'_, str> {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {expr}"))
    } else {
        Cow::Borrowed(expr)
    }
}

/// First fire instant of `job` at or after `now`.
///
/// One-shot jobs answer `run_at` while it is still ahead; recurring jobs answer
/// the first cron occurrence at or after `max(start_at, now)` that still lies
/// inside the window.
pub fn first_fire_at(job: &Job, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    if !job.is_recurring {
        return Ok(job.run_at.filter(|at| *at >= now));
    }

    let schedule = parse_cron(&job.cron_expr)?;
    let from = job.start_at.max(now);
    // `after` is exclusive; back off by a millisecond so `from` itself counts
    let candidate = schedule.after(&(from - Duration::milliseconds(1))).next();
    Ok(candidate.filter(|at| job.in_window(*at)))
}

/// Fire instant following the occurrence that just fired.
///
/// Occurrences missed while the process was down collapse into the one that
/// just fired: the search starts strictly after `max(fired, now)`.
pub fn next_fire_after(
    job: &Job,
    fired: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    if !job.is_recurring {
        return Ok(None);
    }

    let schedule = parse_cron(&job.cron_expr)?;
    let from = fired.max(now);
    let candidate = schedule.after(&from).next();
    Ok(candidate.filter(|at| job.in_window(*at)))
}

/// Validate registration input and build the job to persist.
///
/// The returned job carries [`JobId::UNASSIGNED`]; the store assigns the id.
pub fn build_job(input: RegisterJob, now: DateTime<Utc>) -> Result<Job> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(invalid("\"title\" must not be empty"));
    }
    validate_url(&input.webhook_url)?;

    let (cron_expr, run_at, start_at, end_at) = if input.is_recurring {
        parse_cron(&input.cron_expr).map_err(|e| invalid(&e.to_string()))?;

        let start_at = input
            .start_at
            .ok_or_else(|| invalid("\"start_at\" must be specified for a recurring job"))?;
        if let Some(end_at) = input.end_at {
            if end_at < now {
                return Err(invalid("\"end_at\" must be a date in the future"));
            }
            if end_at < start_at {
                return Err(invalid("\"end_at\" must be greater than or equal to \"start_at\""));
            }
        }
        (input.cron_expr.trim().to_string(), None, start_at, input.end_at)
    } else {
        let run_at = input
            .run_at
            .ok_or_else(|| invalid("\"run_at\" must be set for a one-shot job"))?;
        if run_at <= now {
            return Err(invalid("\"run_at\" must be a date in the future"));
        }
        if input.start_at.is_some_and(|s| s != run_at) || input.end_at.is_some_and(|e| e != run_at) {
            return Err(invalid("\"start_at\" and \"end_at\" must both equal \"run_at\""));
        }
        (String::new(), Some(run_at), run_at, Some(run_at))
    };

    let mut job = Job {
        id: JobId::UNASSIGNED,
        title: title.to_string(),
        description: input.description,
        cron_expr,
        is_recurring: input.is_recurring,
        run_at,
        start_at,
        end_at,
        active: true,
        failure_count: 0,
        webhook_url: input.webhook_url,
        metadata: input.metadata,
        next_fire_at: None,
        created_at: now,
    };

    job.next_fire_at = first_fire_at(&job, now)?;
    if job.next_fire_at.is_none() {
        return Err(invalid("no occurrence falls inside the validity window"));
    }
    Ok(job)
}

fn validate_url(raw: &str) -> Result<()> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| invalid(&format!("\"webhook_url\" is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(&format!("unsupported webhook scheme: {other}"))),
    }
}

fn invalid(reason: &str) -> SchedulerError {
    SchedulerError::Validation(reason.to_string())
}

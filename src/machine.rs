//! Challenge lifecycle transitions.
//!
//! Each operation takes the current settings and "now" and returns the next
//! settings plus the task-activation commands that must follow the settings
//! write. Nothing here touches the store.

use crate::errors::ChallengeError;
use crate::models::{ChallengeSettings, ConfigRequest, MAX_DAY_DURATION_HOURS, MAX_TOTAL_DAYS};
use crate::schedule;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
    Activate(u32),
    Deactivate(u32),
    DeactivateAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub settings: ChallengeSettings,
    pub commands: Vec<TaskCommand>,
    /// False when the operation was a no-op and nothing needs writing.
    pub changed: bool,
}

impl Transition {
    fn unchanged(settings: &ChallengeSettings) -> Self {
        Self {
            settings: settings.clone(),
            commands: Vec::new(),
            changed: false,
        }
    }

    fn to(settings: ChallengeSettings, commands: Vec<TaskCommand>) -> Self {
        Self {
            settings,
            commands,
            changed: true,
        }
    }
}

/// Starts (or restarts) the challenge from `now` with a fresh schedule.
pub fn start(current: &ChallengeSettings, now: DateTime<Utc>) -> Result<Transition, ChallengeError> {
    check_shape(current.total_days, current.day_duration)?;
    let mut next = current.clone();
    next.challenge_days = schedule::generate(now, next.day_duration, next.total_days + 1);
    next.is_active = true;
    next.is_paused = false;
    next.start_date = Some(now);
    next.scheduled_start_date = None;
    if next.end_date.is_some_and(|end| end <= now) {
        next.end_date = None;
    }
    next.current_day = 0;
    next.paused_at = None;
    next.resumed_at = None;
    sync_days(&mut next, now);

    Ok(Transition::to(next, vec![TaskCommand::DeactivateAll, TaskCommand::Activate(0)]))
}

/// Stops the challenge. Stopping an already stopped challenge is a no-op.
pub fn stop(current: &ChallengeSettings) -> Transition {
    let already_stopped = !current.is_active
        && !current.is_paused
        && current.current_day == 0
        && current.paused_at.is_none()
        && current.resumed_at.is_none();
    if already_stopped {
        return Transition::unchanged(current);
    }

    let mut next = current.clone();
    next.is_active = false;
    next.is_paused = false;
    next.current_day = 0;
    next.paused_at = None;
    next.resumed_at = None;
    for day in &mut next.challenge_days {
        day.is_active = false;
    }

    Transition::to(next, vec![TaskCommand::DeactivateAll])
}

pub fn pause(current: &ChallengeSettings, now: DateTime<Utc>) -> Result<Transition, ChallengeError> {
    if !current.is_active {
        return Err(ChallengeError::precondition("cannot pause: challenge is not active"));
    }
    if current.is_paused {
        return Err(ChallengeError::precondition("cannot pause: challenge is already paused"));
    }

    let mut next = current.clone();
    next.is_paused = true;
    next.paused_at = Some(now);

    Ok(Transition::to(next, vec![TaskCommand::DeactivateAll]))
}

/// Resumes on the day the pause froze, restarting that day's clock at `now`.
pub fn resume(current: &ChallengeSettings, now: DateTime<Utc>) -> Result<Transition, ChallengeError> {
    if !current.is_paused {
        return Err(ChallengeError::precondition("cannot resume: challenge is not paused"));
    }

    let paused_day = paused_day(current);
    let mut next = current.clone();
    next.challenge_days =
        schedule::regenerate_from(&current.challenge_days, paused_day, now, current.day_duration);
    next.is_paused = false;
    next.resumed_at = Some(now);
    next.current_day = paused_day;
    sync_days(&mut next, now);

    Ok(Transition::to(next, vec![TaskCommand::Activate(paused_day)]))
}

/// The day frozen by the pause.
///
/// Derived from the schedule at `paused_at`, but never earlier than the day
/// that was actually live when the pause happened.
pub fn paused_day(settings: &ChallengeSettings) -> u32 {
    let max_day = settings.max_day();
    let scheduled = match (settings.paused_at, settings.start_date) {
        (Some(paused_at), _) if !settings.challenge_days.is_empty() => {
            schedule::day_at(&settings.challenge_days, paused_at)
        }
        (Some(paused_at), Some(start)) => {
            schedule::compute_current_day(start, settings.day_duration, paused_at, max_day)
        }
        _ => 0,
    };
    scheduled.max(settings.current_day).min(max_day)
}

/// Moves from `observed_day` to the next day, or stops once the last day is done.
pub fn advance(
    current: &ChallengeSettings,
    observed_day: u32,
    now: DateTime<Utc>,
) -> Result<Transition, ChallengeError> {
    ensure_running(current, "advance")?;
    ensure_observed(current, observed_day)?;

    let next_day = observed_day + 1;
    if next_day > current.max_day() {
        return Ok(stop(current));
    }
    Ok(move_to(current, next_day, now))
}

/// Steps back one day; a no-op on day 0.
pub fn previous(
    current: &ChallengeSettings,
    observed_day: u32,
    now: DateTime<Utc>,
) -> Result<Transition, ChallengeError> {
    ensure_running(current, "go back")?;
    ensure_observed(current, observed_day)?;

    if observed_day == 0 {
        return Ok(Transition::unchanged(current));
    }
    Ok(move_to(current, observed_day - 1, now))
}

/// Jumps straight to `day` without stepping through the days in between.
pub fn set_day(current: &ChallengeSettings, day: u32, now: DateTime<Utc>) -> Result<Transition, ChallengeError> {
    ensure_running(current, "set the day")?;
    if day > current.max_day() {
        return Err(ChallengeError::invalid(format!(
            "day {day} is outside 0..={}",
            current.max_day()
        )));
    }
    if day == current.current_day {
        return Ok(Transition::unchanged(current));
    }
    Ok(move_to(current, day, now))
}

pub fn schedule_start(
    current: &ChallengeSettings,
    start_at: DateTime<Utc>,
    end_at: Option<DateTime<Utc>>,
) -> Result<Transition, ChallengeError> {
    if current.is_active {
        return Err(ChallengeError::precondition("cannot schedule: challenge is already running"));
    }
    if end_at.is_some_and(|end| end <= start_at) {
        return Err(ChallengeError::invalid("end must be after the scheduled start"));
    }

    let mut next = current.clone();
    next.scheduled_start_date = Some(start_at);
    next.end_date = end_at;
    Ok(Transition::to(next, Vec::new()))
}

pub fn configure(current: &ChallengeSettings, request: &ConfigRequest) -> Result<Transition, ChallengeError> {
    if current.is_active {
        return Err(ChallengeError::precondition("cannot reconfigure a running challenge"));
    }

    let mut next = current.clone();
    if let Some(hours) = request.day_duration {
        next.day_duration = hours;
    }
    if let Some(enabled) = request.trial_enabled {
        next.trial_enabled = enabled;
    }
    if let Some(days) = request.total_days {
        next.total_days = days;
    }
    check_shape(next.total_days, next.day_duration)?;
    Ok(Transition::to(next, Vec::new()))
}

/// Rejects schedule shapes that cannot be laid out on the calendar.
pub fn check_shape(total_days: u32, day_duration: u32) -> Result<(), ChallengeError> {
    if !(1..=MAX_DAY_DURATION_HOURS).contains(&day_duration) {
        return Err(ChallengeError::invalid(format!(
            "dayDuration must be between 1 and {MAX_DAY_DURATION_HOURS} hours"
        )));
    }
    if !(1..=MAX_TOTAL_DAYS).contains(&total_days) {
        return Err(ChallengeError::invalid(format!(
            "totalDays must be between 1 and {MAX_TOTAL_DAYS}"
        )));
    }
    Ok(())
}

pub fn should_auto_start(settings: &ChallengeSettings, now: DateTime<Utc>) -> bool {
    !settings.is_active && settings.scheduled_start_date.is_some_and(|at| now >= at)
}

/// An explicit end date has passed, or (while running) the last day has run its course.
pub fn should_auto_end(settings: &ChallengeSettings, now: DateTime<Utc>) -> bool {
    if !settings.is_active {
        return false;
    }
    if settings.end_date.is_some_and(|end| now >= end) {
        return true;
    }
    if settings.is_paused {
        return false;
    }
    settings.challenge_days.last().is_some_and(|last| {
        last.scheduled_date
            .checked_add_signed(Duration::hours(i64::from(settings.day_duration)))
            .is_some_and(|finished| now >= finished)
    })
}

fn move_to(current: &ChallengeSettings, day: u32, now: DateTime<Utc>) -> Transition {
    let from = current.current_day;
    let mut next = current.clone();
    next.current_day = day;
    sync_days(&mut next, now);
    Transition::to(next, vec![TaskCommand::Deactivate(from), TaskCommand::Activate(day)])
}

fn ensure_running(settings: &ChallengeSettings, action: &str) -> Result<(), ChallengeError> {
    if !settings.is_active {
        return Err(ChallengeError::precondition(format!("cannot {action}: challenge is not active")));
    }
    if settings.is_paused {
        return Err(ChallengeError::precondition(format!("cannot {action}: challenge is paused")));
    }
    Ok(())
}

fn ensure_observed(settings: &ChallengeSettings, observed_day: u32) -> Result<(), ChallengeError> {
    if settings.current_day != observed_day {
        return Err(ChallengeError::StaleDay {
            expected: observed_day,
            actual: settings.current_day,
        });
    }
    Ok(())
}

/// Keeps each day's flags in line with `current_day`.
fn sync_days(settings: &mut ChallengeSettings, now: DateTime<Utc>) {
    let current_day = settings.current_day;
    for day in &mut settings.challenge_days {
        let active = day.day_number == current_day;
        if active && (!day.is_active || day.activated_at.is_none()) {
            day.activated_at = Some(now);
        }
        day.is_active = active;
        day.is_completed = day.day_number < current_day;
    }
}

//! Pure session transitions and walking estimates.
//!
//! Nothing here touches storage or the network; the controller decides where
//! each computed change goes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{SessionError, SessionResult},
    models::{
        Completion, SessionState, SessionStatus, SessionUpdate, WalkingSession,
    },
};

const KMH_PER_MPH: f64 = 1.609_344;
const METERS_PER_MILE: f64 = 1_609.344;
const STRIDE_PER_HEIGHT: f64 = 0.43;

/// Options for ending a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndRequest {
    /// Replaces the computed duration and drops every derived estimate.
    pub manual_duration_minutes: Option<u64>,
    pub edit_reason: Option<String>,
}

/// Body measurements used by the estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyMetrics {
    pub weight_kg: f64,
    pub height_cm: Option<f64>,
}

pub fn provisional_id(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}-{}", now.timestamp_millis(), &suffix[..8])
}

pub fn validate_speed(speed_mph: f64) -> SessionResult<f64> {
    if speed_mph.is_finite() && speed_mph > 0.0 {
        Ok(speed_mph)
    } else {
        Err(SessionError::InvalidSpeed(speed_mph))
    }
}

pub fn new_session(
    id: String,
    user_id: &str,
    speed_mph: f64,
    now: DateTime<Utc>,
) -> WalkingSession {
    WalkingSession {
        id,
        user_id: user_id.to_string(),
        start_time: now,
        end_time: None,
        status: SessionStatus::Active,
        session_state: SessionState::Active,
        pause_start_time: None,
        total_pause_duration: 0,
        speed_mph,
        duration_minutes: None,
        distance: None,
        calories_burned: None,
        estimated_steps: None,
        is_edited: false,
        original_duration_minutes: None,
        edit_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

/// Whole seconds since start, up to `end_time` for finished sessions.
pub fn elapsed_seconds(session: &WalkingSession, now: DateTime<Utc>) -> u64 {
    seconds_between(session.start_time, session.end_time.unwrap_or(now))
}

/// Seconds of the pause in progress, zero when not paused.
pub fn current_pause_seconds(session: &WalkingSession, now: DateTime<Utc>) -> u64 {
    match (session.session_state, session.pause_start_time) {
        (SessionState::Paused, Some(paused_at)) => seconds_between(paused_at, now),
        _ => 0,
    }
}

/// Elapsed seconds minus finished pauses and the pause in progress.
pub fn active_seconds(session: &WalkingSession, now: DateTime<Utc>) -> u64 {
    elapsed_seconds(session, now)
        .saturating_sub(session.total_pause_duration)
        .saturating_sub(current_pause_seconds(session, now))
}

fn ensure_open(session: &WalkingSession) -> SessionResult<()> {
    if session.status == SessionStatus::Completed
        || session.session_state == SessionState::Completed
    {
        return Err(SessionError::AlreadyCompleted(session.id.clone()));
    }
    Ok(())
}

pub fn pause(session: &WalkingSession, now: DateTime<Utc>) -> SessionResult<SessionUpdate> {
    ensure_open(session)?;
    if session.session_state != SessionState::Active {
        return Err(SessionError::NotActive(session.id.clone()));
    }
    Ok(SessionUpdate::Pause {
        pause_start_time: now,
    })
}

/// Returns the update and the length of the pause that just ended.
pub fn resume(
    session: &WalkingSession,
    now: DateTime<Utc>,
) -> SessionResult<(SessionUpdate, u64)> {
    ensure_open(session)?;
    if session.session_state != SessionState::Paused {
        return Err(SessionError::NotPaused(session.id.clone()));
    }
    let paused_for = current_pause_seconds(session, now);
    Ok((
        SessionUpdate::Resume {
            total_pause_duration: session.total_pause_duration.saturating_add(paused_for),
        },
        paused_for,
    ))
}

pub fn change_speed(session: &WalkingSession, speed_mph: f64) -> SessionResult<SessionUpdate> {
    ensure_open(session)?;
    Ok(SessionUpdate::Speed {
        speed_mph: validate_speed(speed_mph)?,
    })
}

/// Terminal values for `end`. A manual duration skips the estimates entirely.
pub fn complete(
    session: &WalkingSession,
    now: DateTime<Utc>,
    request: &EndRequest,
    body: BodyMetrics,
) -> SessionResult<Completion> {
    ensure_open(session)?;

    // An open pause is excluded from the duration but only a resume adds
    // to the stored total.
    let total_pause_duration = session.total_pause_duration;
    let computed_minutes = active_seconds(session, now) / 60;

    match request.manual_duration_minutes {
        Some(0) => Err(SessionError::InvalidDuration(0)),
        Some(minutes) => Ok(Completion {
            end_time: now,
            total_pause_duration,
            duration_minutes: minutes,
            distance: None,
            calories_burned: None,
            estimated_steps: None,
            is_edited: true,
            original_duration_minutes: Some(computed_minutes),
            edit_reason: request.edit_reason.clone(),
        }),
        None => Ok(Completion {
            end_time: now,
            total_pause_duration,
            duration_minutes: computed_minutes,
            distance: Some(distance_miles(session.speed_mph, computed_minutes)),
            calories_burned: Some(calories(
                session.speed_mph,
                computed_minutes,
                body.weight_kg,
            )),
            estimated_steps: Some(steps(session.speed_mph, computed_minutes, body.height_cm)),
            is_edited: false,
            original_duration_minutes: None,
            edit_reason: None,
        }),
    }
}

/// Miles, rounded to two decimals.
pub fn distance_miles(speed_mph: f64, minutes: u64) -> f64 {
    let miles = speed_mph * minutes as f64 / 60.0;
    (miles * 100.0).round() / 100.0
}

fn walking_met(speed_kmh: f64) -> f64 {
    if speed_kmh < 4.0 {
        2.5
    } else if speed_kmh < 5.6 {
        3.0
    } else if speed_kmh < 6.4 {
        3.5
    } else if speed_kmh < 7.2 {
        4.0
    } else {
        4.5
    }
}

pub fn calories(speed_mph: f64, minutes: u64, weight_kg: f64) -> u32 {
    let hours = minutes as f64 / 60.0;
    let kcal = walking_met(speed_mph * KMH_PER_MPH) * weight_kg * hours;
    kcal.round().max(0.0) as u32
}

fn steps_per_minute(speed_mph: f64) -> f64 {
    if speed_mph <= 2.0 {
        80.0
    } else if speed_mph <= 3.0 {
        100.0
    } else if speed_mph <= 4.0 {
        120.0
    } else if speed_mph <= 5.0 {
        140.0
    } else {
        160.0
    }
}

/// Stride-based when height is known, cadence bands otherwise.
pub fn steps(speed_mph: f64, minutes: u64, height_cm: Option<f64>) -> u32 {
    let estimate = match height_cm.filter(|height| *height > 0.0) {
        Some(height) => {
            let stride_m = height * STRIDE_PER_HEIGHT / 100.0;
            let meters = speed_mph * minutes as f64 / 60.0 * METERS_PER_MILE;
            meters / stride_m
        }
        None => steps_per_minute(speed_mph) * minutes as f64,
    };
    estimate.round().max(0.0) as u32
}

use ulid::Ulid;

use crate::limits::{MAX_SESSION_HOURS, MIN_SESSION_HOURS, MINUTES_PER_DAY};
use crate::model::*;

use super::EngineError;

/// True when two intervals on the same date share any instant.
/// Back-to-back intervals do not conflict.
pub fn spans_conflict(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// First active appointment of the day whose interval overlaps `span`.
///
/// `day_appointments` must all belong to one provider and one date.
/// Cancelled appointments never block.
pub fn find_conflict(day_appointments: &[Appointment], span: &Span) -> Option<Ulid> {
    day_appointments
        .iter()
        .take_while(|a| a.span.start < span.end)
        .find(|a| a.status.is_active() && spans_conflict(&a.span, span))
        .map(|a| a.id)
}

/// Build a time-of-day span, rejecting empty, reversed, or past-midnight input.
pub(crate) fn validate_times(start: Minute, end: Minute) -> Result<Span, EngineError> {
    if end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidField {
            field: "end_at",
            reason: "must be within the day".into(),
        });
    }
    if start >= end {
        return Err(EngineError::InvalidField {
            field: "end_at",
            reason: "must be after start_at".into(),
        });
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_session_hours(hours: f64) -> Result<(), EngineError> {
    if !hours.is_finite() || !(MIN_SESSION_HOURS..=MAX_SESSION_HOURS).contains(&hours) {
        return Err(EngineError::InvalidField {
            field: "hours_per_session",
            reason: format!("must be between {MIN_SESSION_HOURS} and {MAX_SESSION_HOURS}"),
        });
    }
    Ok(())
}

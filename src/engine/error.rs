use chrono::Weekday;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Minute, Span, day_name};

/// Why a booking request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    UnknownClient(Ulid),
    UnknownProvider(Ulid),
    SelfBookingDenied,
    NoScheduleForDay(Weekday),
    OutsideAvailability { requested: Span },
    DurationMismatch { expected: Minute, actual: Minute },
    UnalignedSlot(Span),
    /// Carries the id of the appointment already holding the interval.
    SlotAlreadyBooked(Ulid),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::UnknownClient(id) => write!(f, "client_id: unknown client {id}"),
            BookingError::UnknownProvider(id) => write!(f, "provider_id: unknown provider {id}"),
            BookingError::SelfBookingDenied => write!(f, "cannot book an appointment with yourself"),
            BookingError::NoScheduleForDay(day) => {
                write!(f, "provider has no schedule on {}", day_name(*day))
            }
            BookingError::OutsideAvailability { requested } => {
                write!(f, "{requested} is outside the provider's availability")
            }
            BookingError::DurationMismatch { expected, actual } => write!(
                f,
                "appointment must last exactly {expected} minutes (got {actual})"
            ),
            BookingError::UnalignedSlot(span) => {
                write!(f, "{span} does not match a slot of the provider's schedule")
            }
            BookingError::SlotAlreadyBooked(id) => {
                write!(f, "slot already booked by appointment {id}")
            }
        }
    }
}

impl std::error::Error for BookingError {}

/// Why a status change was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    NotPending(AppointmentStatus),
    AlreadyCancelled,
    /// Part of the reported error set for cancellations from a status other
    /// than pending or confirmed. With the current three statuses
    /// `plan_transition` never produces it.
    InvalidStateForCancel(AppointmentStatus),
    ForbiddenActor(Ulid),
    /// Carries the appointment id.
    MissingClient(Ulid),
    /// Only `confirmed` and `cancelled` can be requested.
    UnsupportedTarget(AppointmentStatus),
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::NotPending(s) => {
                write!(f, "only pending appointments can be confirmed (status: {s})")
            }
            TransitionError::AlreadyCancelled => write!(f, "appointment is already cancelled"),
            TransitionError::InvalidStateForCancel(s) => {
                write!(f, "cannot cancel an appointment with status {s}")
            }
            TransitionError::ForbiddenActor(id) => {
                write!(f, "user {id} may not change this appointment")
            }
            TransitionError::MissingClient(id) => {
                write!(f, "appointment {id} has no client")
            }
            TransitionError::UnsupportedTarget(s) => {
                write!(f, "status: cannot move an appointment to {s}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidField {
        field: &'static str,
        reason: String,
    },
    Booking(BookingError),
    Transition(TransitionError),
    /// Carries the schedule the proposed block overlaps.
    ScheduleOverlap(Ulid),
    /// Provider uses flexible scheduling and has no fixed blocks.
    FlexibleSchedule(Ulid),
    LimitExceeded(&'static str),
    CommitTimeout,
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidField { field, reason } => write!(f, "{field}: {reason}"),
            EngineError::Booking(e) => write!(f, "{e}"),
            EngineError::Transition(e) => write!(f, "{e}"),
            EngineError::ScheduleOverlap(id) => {
                write!(f, "schedule overlaps existing schedule {id} on the same day")
            }
            EngineError::FlexibleSchedule(id) => {
                write!(f, "provider {id} uses flexible scheduling and has no fixed schedules")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CommitTimeout => write!(f, "commit timed out; nothing was recorded"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<BookingError> for EngineError {
    fn from(e: BookingError) -> Self {
        EngineError::Booking(e)
    }
}

impl From<TransitionError> for EngineError {
    fn from(e: TransitionError) -> Self {
        EngineError::Transition(e)
    }
}

/// Client-facing category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Unprocessable,
    Conflict,
    Forbidden,
    NotFound,
    Unavailable,
    Internal,
}

impl ErrorClass {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorClass::Unprocessable => 422,
            ErrorClass::Conflict => 409,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Unavailable => 503,
            ErrorClass::Internal => 500,
        }
    }

    pub fn sqlstate(self) -> &'static str {
        match self {
            ErrorClass::Unprocessable => "22023",
            ErrorClass::Conflict => "23P01",
            ErrorClass::Forbidden => "42501",
            ErrorClass::NotFound => "P0002",
            ErrorClass::Unavailable => "54000",
            ErrorClass::Internal => "XX000",
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::NotFound(_) => ErrorClass::NotFound,
            EngineError::AlreadyExists(_) => ErrorClass::Conflict,
            EngineError::InvalidField { .. } => ErrorClass::Unprocessable,
            EngineError::Booking(e) => match e {
                BookingError::SelfBookingDenied => ErrorClass::Forbidden,
                BookingError::SlotAlreadyBooked(_) => ErrorClass::Conflict,
                BookingError::UnknownClient(_)
                | BookingError::UnknownProvider(_)
                | BookingError::NoScheduleForDay(_)
                | BookingError::OutsideAvailability { .. }
                | BookingError::DurationMismatch { .. }
                | BookingError::UnalignedSlot(_) => ErrorClass::Unprocessable,
            },
            EngineError::Transition(e) => match e {
                TransitionError::MissingClient(_) => ErrorClass::Internal,
                TransitionError::UnsupportedTarget(_) => ErrorClass::Unprocessable,
                TransitionError::NotPending(_)
                | TransitionError::AlreadyCancelled
                | TransitionError::InvalidStateForCancel(_)
                | TransitionError::ForbiddenActor(_) => ErrorClass::Forbidden,
            },
            EngineError::ScheduleOverlap(_) => ErrorClass::Conflict,
            EngineError::FlexibleSchedule(_) => ErrorClass::Forbidden,
            EngineError::LimitExceeded(_) | EngineError::CommitTimeout => ErrorClass::Unavailable,
            EngineError::WalError(_) => ErrorClass::Internal,
        }
    }
}

use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus, Party};

use super::error::TransitionError;

/// A legal status change, ready to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub party: Party,
    /// Entering `confirmed` counts one service for the provider.
    pub counts_service: bool,
}

/// Which side of the appointment `actor` is on, if any.
pub fn party_of(appt: &Appointment, provider_user_id: Ulid, actor: Ulid) -> Option<Party> {
    if actor == provider_user_id {
        Some(Party::Provider)
    } else if appt.client_id == Some(actor) {
        Some(Party::Client)
    } else {
        None
    }
}

/// Decide whether `actor` may move `appt` to `desired`.
///
/// Pure: nothing is changed here, so a refusal has no side effects.
/// `pending -> confirmed` is the provider's alone; either party may cancel a
/// pending or confirmed appointment; `cancelled` is terminal.
pub fn plan_transition(
    appt: &Appointment,
    provider_user_id: Ulid,
    actor: Ulid,
    desired: AppointmentStatus,
) -> Result<Transition, TransitionError> {
    if appt.client_id.is_none() {
        return Err(TransitionError::MissingClient(appt.id));
    }
    if desired == AppointmentStatus::Pending {
        return Err(TransitionError::UnsupportedTarget(desired));
    }
    let party =
        party_of(appt, provider_user_id, actor).ok_or(TransitionError::ForbiddenActor(actor))?;

    let from = appt.status;
    match desired {
        AppointmentStatus::Cancelled => match from {
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
            AppointmentStatus::Cancelled => return Err(TransitionError::AlreadyCancelled),
        },
        _ => {
            if from != AppointmentStatus::Pending {
                return Err(TransitionError::NotPending(from));
            }
            if party != Party::Provider {
                return Err(TransitionError::ForbiddenActor(actor));
            }
        }
    }

    Ok(Transition {
        from,
        to: desired,
        party,
        counts_service: desired == AppointmentStatus::Confirmed,
    })
}

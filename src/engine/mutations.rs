use std::sync::Arc;

use async_trait::async_trait;
use chrono::Weekday;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{ActorSnapshot, StatusNotification, user_channel};
use crate::observability::{BOOKINGS_TOTAL, STATUS_TRANSITIONS_TOTAL};

use super::conflict::{validate_session_hours, validate_times};
use super::error::{BookingError, TransitionError};
use super::lifecycle::plan_transition;
use super::overlap::find_schedule_overlap;
use super::validator::validate_booking;
use super::{Engine, EngineError};

/// Fields of a schedule edit. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulePatch {
    pub day: Option<Weekday>,
    pub start: Option<Minute>,
    pub end: Option<Minute>,
    pub hours_per_session: Option<f64>,
}

/// Transactional boundary for new appointments: the availability check and
/// the insert happen as one unit per provider.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Persist `booking` as a new appointment unless it no longer validates
    /// against the provider's current schedules and appointments.
    async fn create_if_available(&self, booking: ValidatedBooking) -> Result<Appointment, EngineError>;
}

fn record_booking(outcome: &'static str) {
    metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    pub async fn register_user(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        self.wal_append(&Event::UserRegistered { id }).await?;
        self.users.insert(id);
        info!("registered user {id}");
        Ok(())
    }

    pub async fn register_provider(
        &self,
        id: Ulid,
        user_id: Ulid,
        fixed_schedule: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        let _registry = self.registry.lock().await;
        if self.providers.len() >= MAX_PROVIDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.users.contains(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }

        let event = Event::ProviderRegistered {
            id,
            user_id,
            fixed_schedule,
            service_count: 0,
        };
        self.wal_append(&event).await?;
        let ps = ProviderState::new(id, user_id, fixed_schedule, 0);
        self.providers.insert(id, Arc::new(RwLock::new(ps)));
        info!("registered provider {id} for user {user_id} (fixed_schedule={fixed_schedule})");
        Ok(())
    }

    pub async fn add_schedule(
        &self,
        id: Ulid,
        provider_id: Ulid,
        day: Weekday,
        start: Minute,
        end: Minute,
        hours_per_session: f64,
    ) -> Result<WeeklySchedule, EngineError> {
        let span = validate_times(start, end)?;
        validate_session_hours(hours_per_session)?;

        let _gate = self.write_gate.read().await;
        let rs = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = rs.write().await;
        if !guard.fixed_schedule {
            return Err(EngineError::FlexibleSchedule(provider_id));
        }
        if guard.schedules.len() >= MAX_SCHEDULES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many schedules on provider"));
        }
        if self.entity_to_provider.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(existing) = find_schedule_overlap(&guard.schedules, day, &span, None) {
            return Err(EngineError::ScheduleOverlap(existing));
        }

        let event = Event::ScheduleAdded {
            id,
            provider_id,
            day,
            span,
            hours_per_session,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("provider {provider_id}: added schedule {id} {} {span}", day_name(day));
        guard
            .schedule(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn update_schedule(
        &self,
        id: Ulid,
        patch: SchedulePatch,
    ) -> Result<WeeklySchedule, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let provider_id = guard.id;
        if !guard.fixed_schedule {
            return Err(EngineError::FlexibleSchedule(provider_id));
        }
        let current = guard.schedule(id).ok_or(EngineError::NotFound(id))?;

        let day = patch.day.unwrap_or(current.day);
        let span = validate_times(
            patch.start.unwrap_or(current.span.start),
            patch.end.unwrap_or(current.span.end),
        )?;
        let hours_per_session = patch.hours_per_session.unwrap_or(current.hours_per_session);
        validate_session_hours(hours_per_session)?;

        if let Some(existing) = find_schedule_overlap(&guard.schedules, day, &span, Some(id)) {
            return Err(EngineError::ScheduleOverlap(existing));
        }

        let event = Event::ScheduleUpdated {
            id,
            provider_id,
            day,
            span,
            hours_per_session,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("provider {provider_id}: updated schedule {id} to {} {span}", day_name(day));
        guard
            .schedule(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Delete a weekly block. Appointments booked against it keep their
    /// times and lose the schedule reference.
    pub async fn remove_schedule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let provider_id = guard.id;
        if !guard.fixed_schedule {
            return Err(EngineError::FlexibleSchedule(provider_id));
        }
        if guard.schedule(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ScheduleRemoved { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("provider {provider_id}: removed schedule {id}");
        Ok(provider_id)
    }

    /// Validate a booking request and store it as a pending appointment.
    pub async fn book_appointment(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        if !self.users.contains(&req.client_id) {
            record_booking("rejected");
            return Err(BookingError::UnknownClient(req.client_id).into());
        }
        let rs = self.get_provider(&req.provider_id).ok_or_else(|| {
            record_booking("rejected");
            EngineError::from(BookingError::UnknownProvider(req.provider_id))
        })?;

        let validated = {
            let guard = rs.read().await;
            validate_booking(&guard, &req)
        };
        let validated = match validated {
            Ok(v) => v,
            Err(e) => {
                record_booking(match e {
                    BookingError::SlotAlreadyBooked(_) => "conflict",
                    _ => "rejected",
                });
                warn!(
                    "booking {} for provider {} on {} {} refused: {e}",
                    req.id, req.provider_id, req.date, req.span
                );
                return Err(e.into());
            }
        };

        self.create_if_available(validated).await
    }

    /// Move an appointment to `desired` on behalf of `actor`, then notify
    /// both the client and the provider's owning user.
    pub async fn update_status(
        &self,
        id: Ulid,
        actor: Ulid,
        desired: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_entity_write(&id).await?;
        let provider_id = guard.id;
        let provider_user = guard.user_id;
        let appt = guard.appointment(id).ok_or(EngineError::NotFound(id))?;

        let transition = match plan_transition(appt, provider_user, actor, desired) {
            Ok(t) => t,
            Err(e @ TransitionError::MissingClient(_)) => {
                error!("appointment {id} of provider {provider_id} has no client; refusing {desired}");
                return Err(e.into());
            }
            Err(e) => {
                warn!("appointment {id}: {desired} by {actor} refused: {e}");
                return Err(e.into());
            }
        };

        let event = Event::AppointmentStatusChanged {
            id,
            provider_id,
            status: transition.to,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let service_count = guard.service_count;
        drop(guard);

        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "status" => transition.to.as_str()).increment(1);
        info!(
            "appointment {id}: {} -> {} by {actor} ({:?}); provider {provider_id} services={service_count}",
            transition.from, transition.to, transition.party
        );

        let notification = StatusNotification {
            appointment: updated.clone(),
            actor: ActorSnapshot {
                user_id: actor,
                party: transition.party,
            },
        };
        if let Some(client) = updated.client_id {
            self.notifier.publish(&user_channel(client), &notification);
        }
        self.notifier.publish(&user_channel(provider_user), &notification);

        Ok(updated)
    }
}

#[async_trait]
impl BookingRepository for Engine {
    async fn create_if_available(&self, booking: ValidatedBooking) -> Result<Appointment, EngineError> {
        let _gate = self.write_gate.read().await;
        let rs = self
            .get_provider(&booking.provider_id)
            .ok_or(BookingError::UnknownProvider(booking.provider_id))?;
        let mut guard = rs.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROVIDER {
            record_booking("rejected");
            return Err(EngineError::LimitExceeded("too many appointments on provider"));
        }
        if self.entity_to_provider.contains_key(&booking.id) {
            record_booking("rejected");
            return Err(EngineError::AlreadyExists(booking.id));
        }
        // Schedules and appointments may have changed since validation.
        let req = BookingRequest {
            id: booking.id,
            client_id: booking.client_id,
            provider_id: booking.provider_id,
            date: booking.date,
            span: booking.span,
        };
        let booking = match validate_booking(&guard, &req) {
            Ok(b) => b,
            Err(e @ BookingError::SlotAlreadyBooked(_)) => {
                record_booking("conflict");
                warn!(
                    "booking {} for provider {} on {} {} lost the race: {e}",
                    req.id, req.provider_id, req.date, req.span
                );
                return Err(e.into());
            }
            Err(e) => {
                record_booking("rejected");
                warn!(
                    "booking {} for provider {} on {} {} went stale: {e}",
                    req.id, req.provider_id, req.date, req.span
                );
                return Err(e.into());
            }
        };

        let now = self.clock.now_ms();
        let event = Event::AppointmentBooked {
            id: booking.id,
            provider_id: booking.provider_id,
            client_id: Some(booking.client_id),
            schedule_id: booking.schedule_id,
            date: booking.date,
            span: booking.span,
            status: booking.status,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            record_booking("failed");
            return Err(e);
        }
        record_booking("created");
        info!(
            "booked {} for client {} with provider {} on {} {}",
            booking.id, booking.client_id, booking.provider_id, booking.date, booking.span
        );
        guard
            .appointment(booking.id)
            .cloned()
            .ok_or(EngineError::NotFound(booking.id))
    }
}

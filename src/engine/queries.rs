use chrono::{Datelike, Weekday};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::find_conflict;
use super::slots::schedule_slots;
use super::{Engine, EngineError, SharedProviderState};

impl Engine {
    /// Bookable slots of a provider, in schedule then start order.
    ///
    /// A date listing flags slots already covered by an active appointment;
    /// a weekday listing reports every slot as available. Flexible providers
    /// have no fixed slots.
    pub async fn list_slots(
        &self,
        provider_id: Ulid,
        query: SlotQuery,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let rs = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = rs.read().await;

        let (day, booked) = match query {
            SlotQuery::Date(date) => (date.weekday(), guard.on_date(date)),
            SlotQuery::Day(day) => (day, &[][..]),
        };

        let mut out = Vec::new();
        for schedule in guard.schedules_on(day) {
            for span in schedule_slots(schedule) {
                out.push(SlotInfo {
                    schedule_id: schedule.id,
                    day,
                    span,
                    available: find_conflict(booked, &span).is_none(),
                });
            }
        }
        Ok(out)
    }

    pub async fn list_schedules(
        &self,
        provider_id: Ulid,
        day: Option<Weekday>,
    ) -> Result<Vec<WeeklySchedule>, EngineError> {
        let rs = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = rs.read().await;
        Ok(guard
            .schedules
            .iter()
            .filter(|s| day.is_none_or(|d| s.day == d))
            .cloned()
            .collect())
    }

    /// Appointments of one provider or one client, newest date first.
    pub async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, EngineError> {
        let range = match (filter.from, filter.to) {
            (Some(from), Some(to)) => {
                if from > to {
                    return Err(EngineError::InvalidField {
                        field: "appointment_date",
                        reason: "range start is after range end".into(),
                    });
                }
                if (to - from).num_days() > MAX_LISTING_DAYS {
                    return Err(EngineError::LimitExceeded("date range too wide"));
                }
                Some((from, to))
            }
            _ => None,
        };

        let keep = |a: &Appointment| {
            filter.status.is_none_or(|s| a.status == s)
                && range.is_none_or(|(from, to)| from <= a.date && a.date <= to)
        };

        let mut out = Vec::new();
        match filter.owner {
            AppointmentOwner::Provider(provider_id) => {
                let rs = self
                    .get_provider(&provider_id)
                    .ok_or(EngineError::NotFound(provider_id))?;
                let guard = rs.read().await;
                out.extend(guard.appointments.iter().filter(|a| keep(*a)).cloned());
            }
            AppointmentOwner::Client(client_id) => {
                if !self.users.contains(&client_id) {
                    return Err(EngineError::NotFound(client_id));
                }
                let shared: Vec<SharedProviderState> =
                    self.providers.iter().map(|e| e.value().clone()).collect();
                for rs in shared {
                    let guard = rs.read().await;
                    out.extend(
                        guard
                            .appointments
                            .iter()
                            .filter(|a| a.client_id == Some(client_id) && keep(*a))
                            .cloned(),
                    );
                }
            }
        }

        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.span.start.cmp(&b.span.start))
                .then(a.id.cmp(&b.id))
        });
        Ok(out)
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn provider_info(&self, id: Ulid) -> Result<ProviderInfo, EngineError> {
        let rs = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ProviderInfo {
            id: guard.id,
            user_id: guard.user_id,
            fixed_schedule: guard.fixed_schedule,
            service_count: guard.service_count,
            schedule_count: guard.schedules.len(),
            appointment_count: guard.appointments.len(),
        })
    }
}

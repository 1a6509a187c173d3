use chrono::Datelike;

use crate::model::*;

use super::conflict::find_conflict;
use super::error::BookingError;
use super::slots::schedule_slots;

/// Check a booking request against one provider's state.
///
/// Client and provider existence are resolved by the caller; this runs the
/// remaining rules in order and stops at the first failure. Providers with a
/// flexible schedule only get the conflict check.
pub fn validate_booking(
    provider: &ProviderState,
    req: &BookingRequest,
) -> Result<ValidatedBooking, BookingError> {
    if req.client_id == provider.user_id {
        return Err(BookingError::SelfBookingDenied);
    }

    let schedule_id = if provider.fixed_schedule {
        Some(match_schedule(provider, req)?.id)
    } else {
        None
    };

    if let Some(existing) = find_conflict(provider.on_date(req.date), &req.span) {
        return Err(BookingError::SlotAlreadyBooked(existing));
    }

    Ok(ValidatedBooking {
        id: req.id,
        client_id: req.client_id,
        provider_id: provider.id,
        schedule_id,
        date: req.date,
        span: req.span,
        status: AppointmentStatus::Pending,
    })
}

/// Resolve the weekly block that must contain the request, then require the
/// request to be exactly one of its slots.
fn match_schedule<'a>(
    provider: &'a ProviderState,
    req: &BookingRequest,
) -> Result<&'a WeeklySchedule, BookingError> {
    let day = req.date.weekday();
    let mut blocks = provider.schedules_on(day).peekable();
    if blocks.peek().is_none() {
        return Err(BookingError::NoScheduleForDay(day));
    }

    let block = blocks
        .find(|s| s.span.contains_span(&req.span))
        .ok_or(BookingError::OutsideAvailability { requested: req.span })?;

    let expected = block.session_minutes();
    let actual = req.span.duration();
    if actual != expected {
        return Err(BookingError::DurationMismatch { expected, actual });
    }

    if !schedule_slots(block).any(|slot| slot == req.span) {
        return Err(BookingError::UnalignedSlot(req.span));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};
    use ulid::Ulid;

    const H: Minute = 60;

    // 2025-06-16 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    fn provider(fixed: bool) -> ProviderState {
        ProviderState::new(Ulid::new(), Ulid::new(), fixed, 0)
    }

    fn with_block(ps: &mut ProviderState, day: Weekday, start: Minute, end: Minute, hours: f64) -> Ulid {
        let id = Ulid::new();
        ps.insert_schedule(WeeklySchedule {
            id,
            provider_id: ps.id,
            day,
            span: Span::new(start, end),
            hours_per_session: hours,
        });
        id
    }

    fn request(ps: &ProviderState, start: Minute, end: Minute) -> BookingRequest {
        BookingRequest {
            id: Ulid::new(),
            client_id: Ulid::new(),
            provider_id: ps.id,
            date: monday(),
            span: Span::new(start, end),
        }
    }

    fn booked(ps: &mut ProviderState, start: Minute, end: Minute, status: AppointmentStatus) -> Ulid {
        let id = Ulid::new();
        ps.insert_appointment(Appointment {
            id,
            client_id: Some(Ulid::new()),
            provider_id: ps.id,
            schedule_id: None,
            date: monday(),
            span: Span::new(start, end),
            status,
            created_at: 0,
            updated_at: 0,
        });
        id
    }

    #[test]
    fn valid_slot_is_pending_with_schedule() {
        let mut ps = provider(true);
        let sid = with_block(&mut ps, Weekday::Mon, 8 * H, 11 * H, 1.5);
        let req = request(&ps, 8 * H, 9 * H + 30);
        let ok = validate_booking(&ps, &req).unwrap();
        assert_eq!(ok.status, AppointmentStatus::Pending);
        assert_eq!(ok.schedule_id, Some(sid));
        assert_eq!(ok.id, req.id);
    }

    #[test]
    fn self_booking_denied_first() {
        let ps = provider(true);
        let mut req = request(&ps, 8 * H, 9 * H);
        req.client_id = ps.user_id;
        assert_eq!(validate_booking(&ps, &req), Err(BookingError::SelfBookingDenied));
    }

    #[test]
    fn no_schedule_for_day() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Tue, 8 * H, 12 * H, 1.0);
        let req = request(&ps, 8 * H, 9 * H);
        assert_eq!(
            validate_booking(&ps, &req),
            Err(BookingError::NoScheduleForDay(Weekday::Mon))
        );
    }

    #[test]
    fn outside_availability() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        let req = request(&ps, 11 * H + 30, 12 * H + 30);
        assert!(matches!(
            validate_booking(&ps, &req),
            Err(BookingError::OutsideAvailability { .. })
        ));
    }

    #[test]
    fn duration_mismatch() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        let req = request(&ps, 8 * H, 9 * H + 30);
        assert_eq!(
            validate_booking(&ps, &req),
            Err(BookingError::DurationMismatch { expected: 60, actual: 90 })
        );
    }

    #[test]
    fn unaligned_slot_rejected() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        let req = request(&ps, 8 * H + 15, 9 * H + 15);
        assert_eq!(
            validate_booking(&ps, &req),
            Err(BookingError::UnalignedSlot(Span::new(8 * H + 15, 9 * H + 15)))
        );
    }

    #[test]
    fn second_block_of_the_day_is_matched() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        let afternoon = with_block(&mut ps, Weekday::Mon, 14 * H, 18 * H, 0.5);
        let req = request(&ps, 15 * H, 15 * H + 30);
        assert_eq!(validate_booking(&ps, &req).unwrap().schedule_id, Some(afternoon));
    }

    #[test]
    fn overlapping_active_appointment_conflicts() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        let existing = booked(&mut ps, 9 * H, 10 * H, AppointmentStatus::Confirmed);
        let req = request(&ps, 9 * H, 10 * H);
        assert_eq!(
            validate_booking(&ps, &req),
            Err(BookingError::SlotAlreadyBooked(existing))
        );
    }

    #[test]
    fn cancelled_slot_can_be_rebooked() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        booked(&mut ps, 9 * H, 10 * H, AppointmentStatus::Cancelled);
        assert!(validate_booking(&ps, &request(&ps, 9 * H, 10 * H)).is_ok());
    }

    #[test]
    fn flexible_provider_only_checks_conflicts() {
        let mut ps = provider(false);
        let ok = validate_booking(&ps, &request(&ps, 7 * H + 10, 7 * H + 55)).unwrap();
        assert_eq!(ok.schedule_id, None);

        let existing = booked(&mut ps, 7 * H, 8 * H, AppointmentStatus::Pending);
        assert_eq!(
            validate_booking(&ps, &request(&ps, 7 * H + 30, 8 * H + 30)),
            Err(BookingError::SlotAlreadyBooked(existing))
        );
    }

    #[test]
    fn other_dates_do_not_conflict() {
        let mut ps = provider(true);
        with_block(&mut ps, Weekday::Mon, 8 * H, 12 * H, 1.0);
        booked(&mut ps, 9 * H, 10 * H, AppointmentStatus::Pending);
        let mut req = request(&ps, 9 * H, 10 * H);
        req.date = NaiveDate::from_ymd_opt(2025, 6, 23).unwrap();
        assert!(validate_booking(&ps, &req).is_ok());
    }
}

use chrono::Weekday;
use ulid::Ulid;

use crate::model::{Span, WeeklySchedule};

/// First block on `day` that overlaps `span`, ignoring the block `exclude`
/// (the one being edited). Blocks that merely touch do not overlap.
pub fn find_schedule_overlap(
    schedules: &[WeeklySchedule],
    day: Weekday,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    schedules
        .iter()
        .filter(|s| s.day == day && Some(s.id) != exclude)
        .find(|s| s.span.overlaps(span))
        .map(|s| s.id)
}

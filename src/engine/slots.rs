use std::iter::FusedIterator;

use crate::model::{Minute, Span, WeeklySchedule};

/// Fixed-length slots of a schedule window, in start order.
///
/// Lazy and restartable: clone it, or call [`slots`] again with the same
/// inputs, for an identical sequence. A remainder shorter than one session
/// at the end of the window is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slots {
    cursor: Minute,
    end: Minute,
    step: Minute,
}

pub fn slots(window: Span, session_minutes: Minute) -> Slots {
    Slots {
        cursor: window.start,
        end: window.end,
        step: session_minutes,
    }
}

/// Slots of one weekly block, session length rounded to whole minutes.
pub fn schedule_slots(schedule: &WeeklySchedule) -> Slots {
    slots(schedule.span, schedule.session_minutes())
}

impl Iterator for Slots {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.step == 0 {
            return None;
        }
        let slot_end = self.cursor.checked_add(self.step)?;
        if slot_end > self.end {
            return None;
        }
        let slot = Span::new(self.cursor, slot_end);
        self.cursor = slot_end;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.step == 0 || self.cursor >= self.end {
            0
        } else {
            ((self.end - self.cursor) / self.step) as usize
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for Slots {}

impl FusedIterator for Slots {}

use chrono::{NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Only used for audit timestamps.
pub type Ms = i64;

/// Minutes since midnight. The only time-of-day type.
pub type Minute = u32;

/// Half-open time-of-day interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_clock(self.start), format_clock(self.end))
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`, seconds dropped) into minutes since midnight.
/// `24:00` is end of day.
pub fn parse_clock(s: &str) -> Option<Minute> {
    let s = s.trim();
    if matches!(s, "24:00" | "24:00:00") {
        return Some(crate::limits::MINUTES_PER_DAY);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()?;
    Some(t.hour() * 60 + t.minute())
}

pub fn format_clock(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

// ── Weekdays ─────────────────────────────────────────────────────

const DAY_NAMES: [(Weekday, &str); 7] = [
    (Weekday::Mon, "Lunes"),
    (Weekday::Tue, "Martes"),
    (Weekday::Wed, "Miércoles"),
    (Weekday::Thu, "Jueves"),
    (Weekday::Fri, "Viernes"),
    (Weekday::Sat, "Sábado"),
    (Weekday::Sun, "Domingo"),
];

/// Stored display name of a weekday.
pub fn day_name(day: Weekday) -> &'static str {
    DAY_NAMES[day.num_days_from_monday() as usize].1
}

/// Accepts stored names in any case, with or without accents, and English
/// names (`monday`, `mon`).
pub fn parse_day(s: &str) -> Option<Weekday> {
    let folded: String = s
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect();
    match folded.as_str() {
        "lunes" => Some(Weekday::Mon),
        "martes" => Some(Weekday::Tue),
        "miercoles" => Some(Weekday::Wed),
        "jueves" => Some(Weekday::Thu),
        "viernes" => Some(Weekday::Fri),
        "sabado" => Some(Weekday::Sat),
        "domingo" => Some(Weekday::Sun),
        other => other.parse::<Weekday>().ok(),
    }
}

// ── Schedules ────────────────────────────────────────────────────

/// A provider's fixed availability block on one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub day: Weekday,
    pub span: Span,
    /// Session length in hours, as entered.
    pub hours_per_session: f64,
}

impl WeeklySchedule {
    pub fn session_minutes(&self) -> Minute {
        session_minutes(self.hours_per_session)
    }

    fn sort_key(&self) -> (u32, Minute) {
        (self.day.num_days_from_monday(), self.span.start)
    }
}

/// Session length rounded to whole minutes (1.5h → 90).
pub fn session_minutes(hours: f64) -> Minute {
    (hours * 60.0).round().max(0.0) as Minute
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" | "canceled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Active appointments block their interval.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    /// Always set by booking; `None` only on damaged records.
    pub client_id: Option<Ulid>,
    pub provider_id: Ulid,
    /// `None` when no fixed schedule constrained the booking, or the
    /// schedule was deleted afterwards.
    pub schedule_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub status: AppointmentStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Appointment {
    fn sort_key(&self) -> (NaiveDate, Minute) {
        (self.date, self.span.start)
    }
}

/// Which side of an appointment an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Client,
    Provider,
}

/// A booking request as received at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

/// A booking that passed every validation step and may be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub id: Ulid,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub schedule_id: Option<Ulid>,
    pub date: NaiveDate,
    pub span: Span,
    pub status: AppointmentStatus,
}

// ── Provider state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    /// The user account that owns this provider profile.
    pub user_id: Ulid,
    /// `true` for a fixed weekly schedule, `false` for flexible.
    pub fixed_schedule: bool,
    pub service_count: u64,
    /// Sorted by `(day, span.start)`.
    pub schedules: Vec<WeeklySchedule>,
    /// Sorted by `(date, span.start)`.
    pub appointments: Vec<Appointment>,
}

impl ProviderState {
    pub fn new(id: Ulid, user_id: Ulid, fixed_schedule: bool, service_count: u64) -> Self {
        Self {
            id,
            user_id,
            fixed_schedule,
            service_count,
            schedules: Vec::new(),
            appointments: Vec::new(),
        }
    }

    pub fn insert_schedule(&mut self, schedule: WeeklySchedule) {
        let key = schedule.sort_key();
        let pos = self.schedules.partition_point(|s| s.sort_key() <= key);
        self.schedules.insert(pos, schedule);
    }

    pub fn remove_schedule(&mut self, id: Ulid) -> Option<WeeklySchedule> {
        let pos = self.schedules.iter().position(|s| s.id == id)?;
        Some(self.schedules.remove(pos))
    }

    pub fn schedule(&self, id: Ulid) -> Option<&WeeklySchedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    /// Blocks for one weekday, in start order.
    pub fn schedules_on(&self, day: Weekday) -> impl Iterator<Item = &WeeklySchedule> {
        self.schedules.iter().filter(move |s| s.day == day)
    }

    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let key = appointment.sort_key();
        let pos = self.appointments.partition_point(|a| a.sort_key() <= key);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// All appointments (any status) on `date`, in start order.
    pub fn on_date(&self, date: NaiveDate) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.date < date);
        let hi = self.appointments.partition_point(|a| a.date <= date);
        &self.appointments[lo..hi]
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
    },
    ProviderRegistered {
        id: Ulid,
        user_id: Ulid,
        fixed_schedule: bool,
        service_count: u64,
    },
    ScheduleAdded {
        id: Ulid,
        provider_id: Ulid,
        day: Weekday,
        span: Span,
        hours_per_session: f64,
    },
    ScheduleUpdated {
        id: Ulid,
        provider_id: Ulid,
        day: Weekday,
        span: Span,
        hours_per_session: f64,
    },
    ScheduleRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        provider_id: Ulid,
        client_id: Option<Ulid>,
        schedule_id: Option<Ulid>,
        date: NaiveDate,
        span: Span,
        status: AppointmentStatus,
        created_at: Ms,
        updated_at: Ms,
    },
    AppointmentStatusChanged {
        id: Ulid,
        provider_id: Ulid,
        status: AppointmentStatus,
        at: Ms,
    },
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub fixed_schedule: bool,
    pub service_count: u64,
    pub schedule_count: usize,
    pub appointment_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotQuery {
    Date(NaiveDate),
    Day(Weekday),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub schedule_id: Ulid,
    pub day: Weekday,
    pub span: Span,
    /// False when an active appointment already covers the slot. Always true
    /// for weekday listings.
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentOwner {
    Provider(Ulid),
    Client(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub owner: AppointmentOwner,
    pub status: Option<AppointmentStatus>,
    /// Inclusive range; applied only when both ends are present.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

use crate::model::Minute;

// ── Tenancy ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 63;

// ── Per-tenant ───────────────────────────────────────────────────

pub const MAX_USERS_PER_TENANT: usize = 1_000_000;
pub const MAX_PROVIDERS_PER_TENANT: usize = 100_000;

// ── Per-provider ─────────────────────────────────────────────────

/// Weekly blocks across all seven days.
pub const MAX_SCHEDULES_PER_PROVIDER: usize = 7 * 48;
pub const MAX_APPOINTMENTS_PER_PROVIDER: usize = 200_000;

// ── Session length ───────────────────────────────────────────────

/// Shortest bookable session, in hours (about 20 minutes).
pub const MIN_SESSION_HOURS: f64 = 0.33;
pub const MAX_SESSION_HOURS: f64 = 24.0;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

// ── Queries ──────────────────────────────────────────────────────

/// Widest inclusive date range accepted by appointment listings.
pub const MAX_LISTING_DAYS: i64 = 366 * 2;

// ── Commit ───────────────────────────────────────────────────────

pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 5_000;

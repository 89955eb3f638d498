//! Hard limits applied at the engine and tenant boundaries.

use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_NOTE_LEN: usize = 4096;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 320;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No single appointment may run longer than a day.
pub const MAX_APPOINTMENT_DURATION_MS: Ms = 86_400_000;

pub const MAX_STAFF_PER_TENANT: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_STAFF: usize = 100_000;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 63;

/// Widest range a single free-window query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * 86_400_000;

/// Largest encoded WAL record. Replay treats a longer length prefix as a
/// torn tail.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

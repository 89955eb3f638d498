use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds since the epoch of shop-local wall-clock time. The only
/// instant type inside the engine; chrono is used at the edges.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but rejects empty and inverted windows instead of asserting.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    /// `aStart < bEnd && aEnd > bStart`; touching windows do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

pub fn ms_from_datetime(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

pub fn datetime_from_ms(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// The whole calendar day `[00:00, 24:00)`.
pub fn day_span(date: NaiveDate) -> Span {
    let start = ms_from_datetime(date.and_time(NaiveTime::MIN));
    Span::new(start, start + DAY_MS)
}

/// `YYYY-MM-DD HH:MM`, or the raw number if it is outside chrono's range.
pub fn format_ms(ms: Ms) -> String {
    match datetime_from_ms(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}

// ── Scheduling vocabulary ────────────────────────────────────────

/// Staff qualification tag, e.g. `GROOMER` or `DOCTOR`. Stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capability(String);

impl Capability {
    pub fn new(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return None;
        }
        Some(Self(tag.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }

    /// Pending and confirmed appointments occupy the staff member's time.
    pub fn is_blocking(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_blocking()
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(AppointmentStatus::Pending),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" | "CANCELED" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// Why a customer cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Busy,
    Reschedule,
    ChangeService,
    Other(String),
}

impl CancelReason {
    /// Known codes map to their variant; anything else is kept as free text.
    pub fn parse(text: &str) -> Self {
        match text.trim().to_uppercase().as_str() {
            "BUSY" => CancelReason::Busy,
            "RESCHEDULE" => CancelReason::Reschedule,
            "CHANGE_SERVICE" => CancelReason::ChangeService,
            _ => CancelReason::Other(text.trim().to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            CancelReason::Busy => "BUSY",
            CancelReason::Reschedule => "RESCHEDULE",
            CancelReason::ChangeService => "CHANGE_SERVICE",
            CancelReason::Other(_) => "OTHER",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            CancelReason::Busy => "unexpectedly busy",
            CancelReason::Reschedule => "wants to move to another day",
            CancelReason::ChangeService => "wants a different service",
            CancelReason::Other(text) => text,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Other(text) => f.write_str(text),
            known => f.write_str(known.code()),
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// Contact details typed in by a walk-in, kept on the appointment as entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkInContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl WalkInContact {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub pet_id: Option<Ulid>,
    pub note: Option<String>,
    /// Only ever set while `status` is `Cancelled`.
    pub cancel_reason: Option<CancelReason>,
    pub contact: Option<WalkInContact>,
}

impl Appointment {
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

pub const CUSTOMER_ROLE: &str = "USER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub email: String,
    pub role: String,
    /// One-way hash; never the credential itself.
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub name: String,
    pub capability: Capability,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub id: Ulid,
    pub name: String,
    /// Capability a staff member needs to perform services in this category.
    pub capability: Option<Capability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub category_id: Option<Ulid>,
    /// Minor currency units.
    pub price: i64,
    pub duration_min: Option<u32>,
}

impl Service {
    pub fn duration_ms(&self) -> Option<Ms> {
        self.duration_min
            .filter(|m| *m > 0)
            .map(|m| Ms::from(m) * MINUTE_MS)
    }
}

/// WAL record format. Entity records carry the full post-change state so
/// replay and compaction never have to merge partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryUpserted(ServiceCategory),
    ServiceUpserted(Service),
    StaffCreated(Staff),
    StaffUpdated(Staff),
    StaffDeleted { id: Ulid },
    CustomerCreated(Customer),
    PetCreated(Pet),
    PetRemoved { id: Ulid },
    AppointmentBooked(Appointment),
    AppointmentUpdated(Appointment),
    AppointmentDeleted { id: Ulid, staff_id: Ulid },
}

impl Event {
    /// Staff schedule the event mutates, if any.
    pub fn staff_id(&self) -> Option<Ulid> {
        match self {
            Event::AppointmentBooked(a) | Event::AppointmentUpdated(a) => Some(a.staff_id),
            Event::AppointmentDeleted { staff_id, .. } => Some(*staff_id),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// An appointment with the names of everything it references resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentView {
    pub appointment: Appointment,
    pub staff_name: Option<String>,
    pub service_name: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub pet_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffDay {
    pub staff: Staff,
    pub date: NaiveDate,
    pub slots: Vec<String>,
}

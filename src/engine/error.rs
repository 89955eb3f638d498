use std::fmt;

use ulid::Ulid;

use crate::model::{AppointmentStatus, Capability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Appointment,
    Customer,
    Pet,
    Staff,
    Service,
    Category,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Appointment => "appointment",
            EntityKind::Customer => "customer",
            EntityKind::Pet => "pet",
            EntityKind::Staff => "staff member",
            EntityKind::Service => "service",
            EntityKind::Category => "service category",
        })
    }
}

/// Which step of a booking detected the clash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The explicitly requested staff member already has a blocking
    /// appointment in the window.
    StaffBusy { staff_id: Ulid, with: Ulid },
    /// Every qualified staff member was busy during the scan.
    NoStaffFree,
    /// The window was free when checked but a concurrent commit took it
    /// before ours landed.
    LostRace { staff_id: Ulid, with: Ulid },
}

#[derive(Debug)]
pub enum EngineError {
    InvalidRequest(String),
    NotFound(EntityKind, Ulid),
    InvalidState(String),
    NoCandidates(Capability),
    Conflict(ConflictKind),
    AlreadyExists(EntityKind, Ulid),
    HasAppointments(Ulid),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    CredentialError(String),
    WalError(String),
}

impl EngineError {
    /// Only a lost commit race can succeed on an immediate retry; every other
    /// failure is a property of the request or of settled state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(ConflictKind::LostRace { .. }))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::NoCandidates(cap) => {
                write!(f, "no staff with capability {cap}")
            }
            EngineError::Conflict(ConflictKind::StaffBusy { staff_id, with }) => write!(
                f,
                "requested staff is busy for this window: {staff_id} (conflicts with appointment {with})"
            ),
            EngineError::Conflict(ConflictKind::NoStaffFree) => {
                write!(f, "no staff of the required capability is free for this window")
            }
            EngineError::Conflict(ConflictKind::LostRace { staff_id, with }) => write!(
                f,
                "window was taken concurrently on staff {staff_id} by appointment {with}"
            ),
            EngineError::AlreadyExists(kind, id) => write!(f, "{kind} already exists: {id}"),
            EngineError::HasAppointments(id) => {
                write!(f, "cannot delete staff member {id}: has appointments")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move appointment from {from} to {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CredentialError(msg) => write!(f, "credential hashing failed: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lost_race_is_retryable() {
        let staff_id = Ulid::new();
        let with = Ulid::new();
        assert!(EngineError::Conflict(ConflictKind::LostRace { staff_id, with }).is_retryable());
        assert!(!EngineError::Conflict(ConflictKind::StaffBusy { staff_id, with }).is_retryable());
        assert!(!EngineError::Conflict(ConflictKind::NoStaffFree).is_retryable());
        assert!(!EngineError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn conflict_messages_are_distinct() {
        let staff_id = Ulid::new();
        let with = Ulid::new();
        let busy = EngineError::Conflict(ConflictKind::StaffBusy { staff_id, with }).to_string();
        let none = EngineError::Conflict(ConflictKind::NoStaffFree).to_string();
        let race = EngineError::Conflict(ConflictKind::LostRace { staff_id, with }).to_string();
        assert!(busy.contains("requested staff is busy"));
        assert!(none.contains("no staff of the required capability"));
        assert!(race.contains("taken concurrently"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let id = Ulid::new();
        let msg = EngineError::NotFound(EntityKind::Pet, id).to_string();
        assert_eq!(msg, format!("pet not found: {id}"));
    }
}

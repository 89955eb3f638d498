use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, validate_span};
use super::error::{ConflictKind, EntityKind};
use super::parties::check_len;
use super::store::StaffSchedule;
use super::{apply_to_schedule, Engine, EngineError};

/// Staff/admin edit of an existing appointment. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentPatch {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<AppointmentStatus>,
    /// An empty note clears it.
    pub note: Option<String>,
    /// Accepted only together with a move to `CANCELLED`.
    pub cancel_reason: Option<CancelReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaffPatch {
    pub name: Option<String>,
    pub capability: Option<Capability>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Engine {
    // ── Appointments ─────────────────────────────────────────────

    pub async fn update_appointment(&self, id: Ulid, patch: AppointmentPatch) -> Result<Appointment, EngineError> {
        check_len(patch.note.as_deref(), MAX_NOTE_LEN, "note too long")?;
        let staff_id = self.staff_of_appointment(id)?;

        let _gate = self.commit_gate.read().await;
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;
        let mut guard = schedule.write().await;
        let current = guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;
        let mut next = current.clone();

        if patch.start.is_some() || patch.end.is_some() {
            if !current.is_blocking() {
                return Err(EngineError::InvalidState(format!(
                    "a {} appointment cannot be rescheduled",
                    current.status
                )));
            }
            let span = Span::checked(
                patch.start.unwrap_or(current.span.start),
                patch.end.unwrap_or(current.span.end),
            )
            .ok_or_else(|| EngineError::InvalidRequest("end must be after start".into()))?;
            validate_span(&span)?;
            if let Some(with) = find_conflict(&guard, &span, Some(id)) {
                return Err(EngineError::Conflict(ConflictKind::StaffBusy { staff_id, with }));
            }
            next.span = span;
        }

        if let Some(status) = patch.status
            && status != current.status
        {
            if !current.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    from: current.status,
                    to: status,
                });
            }
            next.status = status;
        }

        if let Some(reason) = patch.cancel_reason {
            if next.status != AppointmentStatus::Cancelled {
                return Err(EngineError::InvalidRequest(
                    "a cancellation reason is only accepted when cancelling".into(),
                ));
            }
            next.cancel_reason = Some(reason);
        }

        if let Some(note) = patch.note {
            let note = note.trim();
            next.note = (!note.is_empty()).then(|| note.to_string());
        }

        if next == current {
            return Ok(current);
        }

        let event = Event::AppointmentUpdated(next.clone());
        self.wal_append(&event).await?;
        apply_to_schedule(&mut guard, &event, &self.appointment_index);
        info!(appointment_id = %id, status = %next.status, "appointment updated");
        Ok(next)
    }

    pub async fn cancel_appointment(&self, id: Ulid, reason: Option<CancelReason>) -> Result<Appointment, EngineError> {
        self.update_appointment(
            id,
            AppointmentPatch {
                status: Some(AppointmentStatus::Cancelled),
                cancel_reason: reason,
                ..AppointmentPatch::default()
            },
        )
        .await
    }

    /// Hard delete, whatever the status.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let staff_id = self.staff_of_appointment(id)?;
        let _gate = self.commit_gate.read().await;
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;
        let mut guard = schedule.write().await;
        let removed = guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;

        let event = Event::AppointmentDeleted { id, staff_id };
        self.wal_append(&event).await?;
        apply_to_schedule(&mut guard, &event, &self.appointment_index);
        info!(appointment_id = %id, "appointment deleted");
        Ok(removed)
    }

    fn staff_of_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.appointment_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))
    }

    // ── Catalog ──────────────────────────────────────────────────

    pub async fn upsert_category(&self, category: ServiceCategory) -> Result<(), EngineError> {
        check_len(Some(&category.name), MAX_NAME_LEN, "category name too long")?;
        if category.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("category name is required".into()));
        }
        self.persist_registry(Event::CategoryUpserted(category)).await
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        check_len(Some(&service.name), MAX_NAME_LEN, "service name too long")?;
        if service.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("service name is required".into()));
        }
        if service.price < 0 {
            return Err(EngineError::InvalidRequest("price cannot be negative".into()));
        }
        if let Some(category_id) = service.category_id
            && !self.categories.contains_key(&category_id)
        {
            return Err(EngineError::NotFound(EntityKind::Category, category_id));
        }
        self.persist_registry(Event::ServiceUpserted(service)).await
    }

    // ── Staff ────────────────────────────────────────────────────

    pub async fn create_staff(&self, staff: Staff) -> Result<(), EngineError> {
        if self.staff.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        validate_staff(&staff)?;
        // A retired schedule still holds history under this id.
        if self.staff.contains_key(&staff.id) || self.schedules.contains_key(&staff.id) {
            return Err(EngineError::AlreadyExists(EntityKind::Staff, staff.id));
        }

        let id = staff.id;
        self.schedules
            .insert(id, Arc::new(RwLock::new(StaffSchedule::new(id))));
        if let Err(e) = self.persist_registry(Event::StaffCreated(staff)).await {
            self.schedules.remove(&id);
            return Err(e);
        }
        info!(staff_id = %id, "staff member created");
        Ok(())
    }

    /// Runs under the staff member's write lock, so it serializes with
    /// `delete_staff` and never resurrects a deleted record.
    pub async fn update_staff(&self, id: Ulid, patch: StaffPatch) -> Result<Staff, EngineError> {
        let _gate = self.commit_gate.read().await;
        let schedule = self
            .schedule(&id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, id))?;
        let guard = schedule.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(EntityKind::Staff, id));
        }
        let mut staff = self.get_staff(id)?;
        if let Some(name) = patch.name {
            staff.name = name;
        }
        if let Some(capability) = patch.capability {
            staff.capability = capability;
        }
        if let Some(phone) = patch.phone {
            staff.phone = Some(phone).filter(|p| !p.trim().is_empty());
        }
        if let Some(email) = patch.email {
            staff.email = Some(email).filter(|e| !e.trim().is_empty());
        }
        validate_staff(&staff)?;

        let event = Event::StaffUpdated(staff.clone());
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        drop(guard);
        Ok(staff)
    }

    /// Refuses while the staff member still has pending or confirmed
    /// appointments. Finished and cancelled ones stay listable.
    pub async fn delete_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let schedule = self
            .schedule(&id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, id))?;
        let mut guard = schedule.write().await;
        // Another delete may have won while this one waited for the lock.
        if guard.retired {
            return Err(EngineError::NotFound(EntityKind::Staff, id));
        }
        self.get_staff(id)?;
        if guard.has_blocking() {
            return Err(EngineError::HasAppointments(id));
        }

        let event = Event::StaffDeleted { id };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        guard.retired = true;
        if guard.is_empty() {
            self.schedules.remove(&id);
        }
        info!(staff_id = %id, "staff member deleted");
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that recreates current
    /// state. Holds the commit gate exclusively so no write lands between
    /// the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();
        self.wal.rewrite(events).await?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    async fn snapshot_events(&self) -> Vec<Event> {
        fn sorted<T: Clone, K: Ord>(map: &dashmap::DashMap<Ulid, T>, key: impl Fn(&T) -> K) -> Vec<T> {
            let mut items: Vec<T> = map.iter().map(|e| e.value().clone()).collect();
            items.sort_by_key(|t| key(t));
            items
        }

        let mut events = Vec::new();
        events.extend(sorted(&self.categories, |c| c.id).into_iter().map(Event::CategoryUpserted));
        events.extend(sorted(&self.services, |s| s.id).into_iter().map(Event::ServiceUpserted));
        events.extend(sorted(&self.staff, |s| s.id).into_iter().map(Event::StaffCreated));
        events.extend(sorted(&self.customers, |c| c.id).into_iter().map(Event::CustomerCreated));
        events.extend(sorted(&self.pets, |p| p.id).into_iter().map(Event::PetCreated));

        let mut schedules: Vec<_> = self
            .schedules
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        schedules.sort_by_key(|(id, _)| *id);
        for (_, schedule) in schedules {
            let guard = schedule.read().await;
            events.extend(guard.appointments.iter().cloned().map(Event::AppointmentBooked));
        }
        events
    }
}

fn validate_staff(staff: &Staff) -> Result<(), EngineError> {
    if staff.name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("staff name is required".into()));
    }
    check_len(Some(&staff.name), MAX_NAME_LEN, "staff name too long")?;
    check_len(staff.phone.as_deref(), MAX_PHONE_LEN, "phone number too long")?;
    check_len(staff.email.as_deref(), MAX_EMAIL_LEN, "email too long")?;
    Ok(())
}

use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability::ASSIGNMENT_PROBES_TOTAL;

use super::conflict::find_conflict;
use super::error::{ConflictKind, EntityKind};
use super::{Engine, EngineError};

/// Decides the order in which qualified staff are probed for a window. The
/// first one found free gets the appointment.
pub trait AssignmentPolicy: Send + Sync {
    fn probe_order(&self, candidates: Vec<Staff>) -> Vec<Staff>;
}

/// Ascending staff id. Deterministic: the same state always yields the
/// same pick.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstAvailable;

impl AssignmentPolicy for FirstAvailable {
    fn probe_order(&self, mut candidates: Vec<Staff>) -> Vec<Staff> {
        candidates.sort_by_key(|s| s.id);
        candidates
    }
}

impl Engine {
    /// Capability a staff member needs to perform `service`.
    pub fn required_capability(&self, service: &Service) -> Result<Capability, EngineError> {
        let category_id = service.category_id.ok_or_else(|| {
            EngineError::InvalidState(format!("service {} has no category", service.id))
        })?;
        let category = self.get_category(category_id).map_err(|_| {
            EngineError::InvalidState(format!(
                "service {} references unknown category {category_id}",
                service.id
            ))
        })?;
        category.capability.ok_or_else(|| {
            EngineError::InvalidState(format!("category {category_id} has no required capability"))
        })
    }

    /// Pick the staff member for a booking window. An explicit request is
    /// only checked for availability; otherwise qualified staff are probed
    /// in policy order.
    ///
    /// This is a read-only scan. The booking commit re-checks under the
    /// staff member's write lock.
    pub async fn assign_staff(
        &self,
        requested: Option<Ulid>,
        service: &Service,
        span: Span,
    ) -> Result<Staff, EngineError> {
        if let Some(staff_id) = requested {
            let staff = self.get_staff(staff_id)?;
            let schedule = self
                .schedule(&staff_id)
                .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
            let guard = schedule.read().await;
            return match find_conflict(&guard, &span, None) {
                Some(with) => Err(EngineError::Conflict(ConflictKind::StaffBusy { staff_id, with })),
                None => Ok(staff),
            };
        }

        let capability = self.required_capability(service)?;
        let candidates = self.list_staff(Some(&capability));
        if candidates.is_empty() {
            return Err(EngineError::NoCandidates(capability));
        }

        for staff in self.policy.probe_order(candidates) {
            metrics::counter!(ASSIGNMENT_PROBES_TOTAL).increment(1);
            // Deleted between the listing and now; skip it.
            let Some(schedule) = self.schedule(&staff.id) else {
                continue;
            };
            let guard = schedule.read().await;
            if guard.retired {
                continue;
            }
            if find_conflict(&guard, &span, None).is_none() {
                debug!(staff_id = %staff.id, %capability, "assigned staff");
                return Ok(staff);
            }
        }
        Err(EngineError::Conflict(ConflictKind::NoStaffFree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(name: &str) -> Staff {
        Staff {
            id: Ulid::new(),
            name: name.into(),
            capability: Capability::new("GROOMER").unwrap(),
            phone: None,
            email: None,
        }
    }

    #[test]
    fn first_available_orders_by_id() {
        let a = staff("a");
        let b = staff("b");
        let c = staff("c");
        let mut expected = vec![a.id, b.id, c.id];
        expected.sort();
        let ordered: Vec<Ulid> = FirstAvailable
            .probe_order(vec![c, a, b])
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ordered, expected);
    }
}

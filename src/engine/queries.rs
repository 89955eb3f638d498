use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::error::EntityKind;
use super::{Engine, EngineError};

/// Narrows `list_appointments`. All set fields must match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub staff_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    /// Appointments starting on this day.
    pub date: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.staff_id.is_none_or(|s| appointment.staff_id == s)
            && self.customer_id.is_none_or(|c| appointment.customer_id == c)
            && self.date.map(day_span).is_none_or(|d| {
                appointment.span.start >= d.start && appointment.span.start < d.end
            })
    }
}

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let staff_id = self
            .appointment_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))?;
        let guard = schedule.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Appointment, id))
    }

    /// Ordered by start, then id.
    pub async fn list_appointments(&self, filter: AppointmentFilter) -> Vec<Appointment> {
        let schedules: Vec<_> = match filter.staff_id {
            Some(staff_id) => self.schedule(&staff_id).into_iter().collect(),
            None => self.schedules.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for schedule in schedules {
            let guard = schedule.read().await;
            out.extend(guard.appointments.iter().filter(|a| filter.matches(a)).cloned());
        }
        out.sort_by_key(|a| (a.span.start, a.id));
        out
    }

    /// Attach the display names of everything the appointment references.
    pub fn appointment_view(&self, appointment: Appointment) -> AppointmentView {
        let customer = self.customers.get(&appointment.customer_id);
        AppointmentView {
            staff_name: self.staff.get(&appointment.staff_id).map(|s| s.name.clone()),
            service_name: self.services.get(&appointment.service_id).map(|s| s.name.clone()),
            customer_name: customer.as_ref().map(|c| c.name.clone()),
            customer_phone: customer.as_ref().and_then(|c| c.phone.clone()),
            pet_name: appointment
                .pet_id
                .and_then(|id| self.pets.get(&id).map(|p| p.name.clone())),
            appointment,
        }
    }

    pub fn get_staff(&self, id: Ulid) -> Result<Staff, EngineError> {
        self.staff
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(EntityKind::Staff, id))
    }

    /// Live staff, optionally only those with `capability`, by ascending id.
    pub fn list_staff(&self, capability: Option<&Capability>) -> Vec<Staff> {
        let mut staff: Vec<Staff> = self
            .staff
            .iter()
            .filter(|s| capability.is_none_or(|c| &s.capability == c))
            .map(|s| s.value().clone())
            .collect();
        staff.sort_by_key(|s| s.id);
        staff
    }

    pub fn get_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.services
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(EntityKind::Service, id))
    }

    pub fn get_category(&self, id: Ulid) -> Result<ServiceCategory, EngineError> {
        self.categories
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound(EntityKind::Category, id))
    }
}

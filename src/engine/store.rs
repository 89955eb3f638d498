use ulid::Ulid;

use crate::model::*;

/// One staff member's appointments, sorted by start. Guarded by the
/// per-staff `RwLock` in `Engine::schedules`.
#[derive(Debug, Clone)]
pub struct StaffSchedule {
    pub staff_id: Ulid,
    pub appointments: Vec<Appointment>,
    /// Set when the staff member is deleted so a writer that cloned the `Arc`
    /// before removal does not book onto a ghost schedule.
    pub retired: bool,
}

impl StaffSchedule {
    pub fn new(staff_id: Ulid) -> Self {
        Self {
            staff_id,
            appointments: Vec::new(),
            retired: false,
        }
    }

    /// Insert keeping the vector sorted by `(start, id)`.
    pub fn insert(&mut self, appointment: Appointment) {
        let key = (appointment.span.start, appointment.id);
        let pos = self
            .appointments
            .partition_point(|a| (a.span.start, a.id) < key);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Replace an appointment, re-sorting if its start moved.
    pub fn replace(&mut self, appointment: Appointment) {
        self.remove(appointment.id);
        self.insert(appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments of any status whose window overlaps `query`.
    ///
    /// Sorted by start, so everything from the first start `>= query.end`
    /// onward is skipped by binary search. Appointments are bounded by
    /// `MAX_APPOINTMENT_DURATION_MS`, so nothing starting earlier than
    /// `query.start - MAX` can reach into the window. The floor saturates
    /// so windows near `Ms::MIN` stay well defined.
    pub fn overlapping<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = &'a Appointment> + 'a {
        let hi = self.appointments.partition_point(|a| a.span.start < query.end);
        let floor = query.start.saturating_sub(crate::limits::MAX_APPOINTMENT_DURATION_MS);
        let lo = self.appointments[..hi].partition_point(|a| a.span.start < floor);
        self.appointments[lo..hi]
            .iter()
            .filter(move |a| a.span.overlaps(query))
    }

    /// Blocking windows inside `query`, fetched once for a sweep.
    pub fn blocking_spans(&self, query: &Span) -> Vec<Span> {
        self.overlapping(query)
            .filter(|a| a.is_blocking())
            .map(|a| a.span)
            .collect()
    }

    pub fn has_blocking(&self) -> bool {
        self.appointments.iter().any(|a| a.is_blocking())
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }
}

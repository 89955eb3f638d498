use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;

use super::conflict::{find_conflict, validate_span};
use super::error::{ConflictKind, EntityKind};
use super::parties::{check_len, non_blank, PetDetails, PetResolution};
use super::{apply_to_schedule, Engine, EngineError};

/// Everything a caller may send to book an appointment.
///
/// The customer is either `customer_id` or walk-in contact fields (phone is
/// the lookup key, name is required only to register a new phone). `end`
/// defaults to `start` plus the service's estimated duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Option<Ulid>,
    pub service_id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub note: Option<String>,
    pub customer_id: Option<Ulid>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub pet_id: Option<Ulid>,
    pub new_pet: Option<PetDetails>,
    pub staff_id: Option<Ulid>,
}

impl BookingRequest {
    fn contact(&self) -> Option<WalkInContact> {
        let contact = WalkInContact {
            name: non_blank(&self.customer_name).map(String::from),
            phone: non_blank(&self.customer_phone).map(String::from),
            email: non_blank(&self.customer_email).map(String::from),
        };
        (!contact.is_empty()).then_some(contact)
    }

    fn validate(&self) -> Result<Ms, EngineError> {
        let start = self
            .start
            .ok_or_else(|| EngineError::InvalidRequest("a start time is required".into()))?;
        if let Some(end) = self.end
            && end <= start
        {
            return Err(EngineError::InvalidRequest("end must be after start".into()));
        }
        check_len(self.note.as_deref(), MAX_NOTE_LEN, "note too long")?;
        check_len(non_blank(&self.customer_email), MAX_EMAIL_LEN, "email too long")?;
        check_len(non_blank(&self.customer_name), MAX_NAME_LEN, "customer name too long")?;
        Ok(start)
    }
}

fn outcome_label(result: &Result<Appointment, EngineError>) -> &'static str {
    match result {
        Ok(_) => "booked",
        Err(EngineError::Conflict(ConflictKind::LostRace { .. })) => "lost_race",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::NoCandidates(_)) => "no_candidates",
        Err(EngineError::NotFound(..)) => "not_found",
        Err(EngineError::InvalidRequest(_)) | Err(EngineError::LimitExceeded(_)) => "invalid",
        Err(_) => "error",
    }
}

impl Engine {
    /// Book a `PENDING` appointment: resolve the customer, then the pet, then
    /// the service and window, pick a staff member and commit.
    ///
    /// Nothing is written for the appointment unless the commit succeeds. A
    /// pet created by this call is removed again if the booking fails; a
    /// walk-in customer is kept, since the phone-keyed lookup makes a retry
    /// land on the same record.
    pub async fn create_appointment(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let result = self.book(req).await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        result
    }

    async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let start = req.validate()?;
        let id = req.id.unwrap_or_else(Ulid::new);
        if self.appointment_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(EntityKind::Appointment, id));
        }

        let customer = self
            .resolve_customer(
                req.customer_id,
                req.customer_name.as_deref(),
                req.customer_phone.as_deref(),
            )
            .await?;
        let pet = self
            .resolve_pet(req.pet_id, req.new_pet.as_ref(), &customer)
            .await?;

        let result = self.place(id, &req, start, &customer, pet.as_ref()).await;

        if let (Err(e), Some(PetResolution::Created(created))) = (&result, &pet) {
            warn!(pet_id = %created.id, error = %e, "booking failed, removing pet it created");
            if let Err(undo) = self.discard_pet(created.id).await {
                error!(pet_id = %created.id, error = %undo, "failed to remove orphaned pet");
            }
        }
        result
    }

    async fn place(
        &self,
        id: Ulid,
        req: &BookingRequest,
        start: Ms,
        customer: &Customer,
        pet: Option<&PetResolution>,
    ) -> Result<Appointment, EngineError> {
        let service = self.get_service(req.service_id)?;
        let end = match req.end {
            Some(end) => end,
            None => {
                let duration = service.duration_ms().ok_or_else(|| {
                    EngineError::InvalidRequest(
                        "no end time given and the service has no estimated duration".into(),
                    )
                })?;
                start + duration
            }
        };
        let span = Span::checked(start, end)
            .ok_or_else(|| EngineError::InvalidRequest("end must be after start".into()))?;
        validate_span(&span)?;

        let staff = self.assign_staff(req.staff_id, &service, span).await?;

        let appointment = Appointment {
            id,
            staff_id: staff.id,
            span,
            status: AppointmentStatus::Pending,
            service_id: service.id,
            customer_id: customer.id,
            pet_id: pet.map(|p| p.pet().id),
            note: non_blank(&req.note).map(String::from),
            cancel_reason: None,
            contact: req.contact(),
        };
        self.commit_booking(appointment).await
    }

    /// Overlap re-check and insert under the staff member's write lock.
    async fn commit_booking(&self, appointment: Appointment) -> Result<Appointment, EngineError> {
        let staff_id = appointment.staff_id;
        let _gate = self.commit_gate.read().await;
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let mut guard = schedule.write().await;
        if guard.retired {
            return Err(EngineError::NotFound(EntityKind::Staff, staff_id));
        }
        if guard.len() >= MAX_APPOINTMENTS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many appointments for staff member"));
        }
        if self.appointment_index.contains_key(&appointment.id) {
            return Err(EngineError::AlreadyExists(EntityKind::Appointment, appointment.id));
        }
        if let Some(with) = find_conflict(&guard, &appointment.span, None) {
            return Err(EngineError::Conflict(ConflictKind::LostRace { staff_id, with }));
        }

        let event = Event::AppointmentBooked(appointment.clone());
        self.wal_append(&event).await?;
        apply_to_schedule(&mut guard, &event, &self.appointment_index);
        info!(
            appointment_id = %appointment.id,
            %staff_id,
            start = %format_ms(appointment.span.start),
            "appointment booked"
        );
        Ok(appointment)
    }
}

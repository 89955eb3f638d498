use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::StaffSchedule;
use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_APPOINTMENT_DURATION_MS {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(())
}

/// First blocking appointment overlapping `span`, ignoring `exclude` (the
/// appointment being moved, if any). Caller holds the schedule lock.
pub(crate) fn find_conflict(schedule: &StaffSchedule, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    schedule
        .overlapping(span)
        .find(|a| a.is_blocking() && Some(a.id) != exclude)
        .map(|a| a.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    // 2024-06-01 00:00
    const DAY: Ms = 1_717_200_000_000;

    fn schedule_with(spans: &[(Ms, Ms, AppointmentStatus)]) -> (StaffSchedule, Vec<Ulid>) {
        let staff_id = Ulid::new();
        let mut s = StaffSchedule::new(staff_id);
        let mut ids = Vec::new();
        for (start, end, status) in spans {
            let id = Ulid::new();
            ids.push(id);
            s.insert(Appointment {
                id,
                staff_id,
                span: Span::new(*start, *end),
                status: *status,
                service_id: Ulid::nil(),
                customer_id: Ulid::nil(),
                pet_id: None,
                note: None,
                cancel_reason: None,
                contact: None,
            });
        }
        (s, ids)
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        let (s, _) = schedule_with(&[(DAY + 10 * H, DAY + 11 * H, AppointmentStatus::Pending)]);
        assert_eq!(find_conflict(&s, &Span::new(DAY + 9 * H, DAY + 10 * H), None), None);
        assert_eq!(find_conflict(&s, &Span::new(DAY + 11 * H, DAY + 12 * H), None), None);
    }

    #[test]
    fn partial_overlap_conflicts() {
        let (s, ids) = schedule_with(&[(DAY + 10 * H, DAY + 11 * H, AppointmentStatus::Confirmed)]);
        let half = H / 2;
        let hit = find_conflict(&s, &Span::new(DAY + 10 * H + half, DAY + 11 * H + half), None);
        assert_eq!(hit, Some(ids[0]));
    }

    #[test]
    fn cancelled_and_completed_do_not_block() {
        let (s, _) = schedule_with(&[
            (DAY + 10 * H, DAY + 11 * H, AppointmentStatus::Cancelled),
            (DAY + 10 * H, DAY + 11 * H, AppointmentStatus::Completed),
        ]);
        assert_eq!(find_conflict(&s, &Span::new(DAY + 10 * H, DAY + 11 * H), None), None);
    }

    #[test]
    fn excluded_appointment_is_ignored() {
        let (s, ids) = schedule_with(&[(DAY + 10 * H, DAY + 11 * H, AppointmentStatus::Pending)]);
        let moved = Span::new(DAY + 10 * H + H / 2, DAY + 11 * H + H / 2);
        assert_eq!(find_conflict(&s, &moved, Some(ids[0])), None);
    }

    #[test]
    fn validate_span_limits() {
        assert!(validate_span(&Span::new(DAY, DAY + H)).is_ok());
        assert!(matches!(
            validate_span(&Span::new(0, H)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(DAY, DAY + 25 * H)),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}

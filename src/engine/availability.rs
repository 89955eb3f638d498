use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::conflict::find_conflict;
use super::error::EntityKind;
use super::{Engine, EngineError};

impl Engine {
    /// True iff no pending or confirmed appointment of `staff_id` overlaps
    /// `span`. Takes only the staff member's read lock.
    pub async fn is_available(&self, staff_id: Ulid, span: Span) -> Result<bool, EngineError> {
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let guard = schedule.read().await;
        Ok(find_conflict(&guard, &span, None).is_none())
    }

    /// Appointments of any status on `staff_id` overlapping `span`, by start.
    pub async fn find_overlapping(&self, staff_id: Ulid, span: Span) -> Result<Vec<Appointment>, EngineError> {
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let guard = schedule.read().await;
        Ok(guard.overlapping(&span).cloned().collect())
    }

    /// Appointments of any status starting on `date` for `staff_id`.
    pub async fn find_by_staff_and_date(
        &self,
        staff_id: Ulid,
        date: chrono::NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        let day = day_span(date);
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let guard = schedule.read().await;
        Ok(guard
            .appointments
            .iter()
            .filter(|a| a.span.start >= day.start && a.span.start < day.end)
            .cloned()
            .collect())
    }

    /// Gaps between blocking appointments of `staff_id` inside `window`.
    pub async fn free_windows(&self, staff_id: Ulid, window: Span) -> Result<Vec<Span>, EngineError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let busy = schedule.read().await.blocking_spans(&window);
        Ok(gaps(&window, &busy))
    }
}

/// Collapse spans (sorted by start) so that no two overlap or touch.
pub fn merge_spans(sorted: &[Span]) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match out.last_mut() {
            Some(prev) if span.start <= prev.end => prev.end = prev.end.max(span.end),
            _ => out.push(span),
        }
    }
    out
}

/// The parts of `window` covered by none of `busy`.
pub fn gaps(window: &Span, busy: &[Span]) -> Vec<Span> {
    let mut sorted = busy.to_vec();
    sorted.sort_by_key(|s| s.start);

    let mut free = Vec::new();
    let mut cursor = window.start;
    for b in merge_spans(&sorted) {
        if b.end <= cursor {
            continue;
        }
        if b.start >= window.end {
            break;
        }
        if b.start > cursor {
            free.push(Span::new(cursor, b.start));
        }
        cursor = b.end;
    }
    if cursor < window.end {
        free.push(Span::new(cursor, window.end));
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_joins_touching_and_overlapping() {
        let merged = merge_spans(&[
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(15, 20),
            Span::new(30, 40),
        ]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);
    }

    #[test]
    fn gaps_with_nothing_busy_is_whole_window() {
        let w = Span::new(100, 200);
        assert_eq!(gaps(&w, &[]), vec![w]);
    }

    #[test]
    fn gaps_around_busy_spans() {
        let w = Span::new(0, 100);
        let busy = [Span::new(40, 60), Span::new(10, 20), Span::new(90, 120)];
        assert_eq!(
            gaps(&w, &busy),
            vec![Span::new(0, 10), Span::new(20, 40), Span::new(60, 90)]
        );
    }

    #[test]
    fn gaps_fully_covered() {
        let w = Span::new(10, 20);
        assert!(gaps(&w, &[Span::new(0, 30)]).is_empty());
    }

    #[test]
    fn gaps_ignore_spans_outside_window() {
        let w = Span::new(100, 200);
        let busy = [Span::new(0, 50), Span::new(250, 300)];
        assert_eq!(gaps(&w, &busy), vec![w]);
    }
}

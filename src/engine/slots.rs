use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::error::EntityKind;
use super::{Engine, EngineError};

/// Shop hours, in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub open_min: u32,
    pub close_min: u32,
    pub lunch_start_min: u32,
    pub lunch_end_min: u32,
    pub slot_min: u32,
}

impl Default for SlotConfig {
    /// 08:00-17:30, lunch 12:00-13:30, 30-minute slots.
    fn default() -> Self {
        Self {
            open_min: 8 * 60,
            close_min: 17 * 60 + 30,
            lunch_start_min: 12 * 60,
            lunch_end_min: 13 * 60 + 30,
            slot_min: 30,
        }
    }
}

impl SlotConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_min == 0 {
            return Err("slot length must be positive".into());
        }
        if self.open_min >= self.close_min || self.close_min > 24 * 60 {
            return Err(format!(
                "business hours {}..{} are not a window inside one day",
                self.open_min, self.close_min
            ));
        }
        if self.lunch_start_min > self.lunch_end_min {
            return Err("lunch break ends before it starts".into());
        }
        Ok(())
    }

    fn at(date: NaiveDate, minute: u32) -> Ms {
        day_span(date).start + Ms::from(minute) * MINUTE_MS
    }

    pub fn business_hours(&self, date: NaiveDate) -> Span {
        Span::new(Self::at(date, self.open_min), Self::at(date, self.close_min))
    }

    /// `None` when lunch is configured as empty.
    pub fn lunch(&self, date: NaiveDate) -> Option<Span> {
        Span::checked(
            Self::at(date, self.lunch_start_min),
            Self::at(date, self.lunch_end_min),
        )
    }
}

/// Slot starts on `date` that avoid lunch and every `busy` window.
///
/// Slots are `[cursor, cursor + slot)` stepping from opening time; the last
/// one must end by closing time. A slot that only touches a busy window is
/// free.
pub fn free_slots(config: &SlotConfig, date: NaiveDate, busy: &[Span]) -> Vec<Ms> {
    let hours = config.business_hours(date);
    let lunch = config.lunch(date);
    let step = Ms::from(config.slot_min) * MINUTE_MS;

    let mut out = Vec::new();
    let mut cursor = hours.start;
    while cursor + step <= hours.end {
        let slot = Span::new(cursor, cursor + step);
        cursor += step;
        if lunch.is_some_and(|l| l.overlaps(&slot)) {
            continue;
        }
        if busy.iter().any(|b| b.overlaps(&slot)) {
            continue;
        }
        out.push(slot.start);
    }
    out
}

/// `HH:MM` of a slot start.
pub fn format_slot(ms: Ms) -> String {
    datetime_from_ms(ms)
        .map(|dt| dt.time())
        .unwrap_or(NaiveTime::MIN)
        .format("%H:%M")
        .to_string()
}

impl Engine {
    /// Free `HH:MM` slot starts for one staff member on `date`. Reads the
    /// day's blocking appointments once under a read lock.
    pub async fn available_slots(&self, staff_id: Ulid, date: NaiveDate) -> Result<Vec<String>, EngineError> {
        let schedule = self
            .schedule(&staff_id)
            .ok_or(EngineError::NotFound(EntityKind::Staff, staff_id))?;
        let busy = schedule.read().await.blocking_spans(&day_span(date));
        Ok(free_slots(&self.slot_config, date, &busy)
            .into_iter()
            .map(format_slot)
            .collect())
    }

    /// A staff member with their free slots for the day.
    pub async fn staff_schedule(&self, staff_id: Ulid, date: NaiveDate) -> Result<StaffDay, EngineError> {
        let staff = self.get_staff(staff_id)?;
        let slots = self.available_slots(staff_id, date).await?;
        Ok(StaffDay { staff, date, slots })
    }

    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot_config
    }
}

mod assign;
mod availability;
mod booking;
mod conflict;
mod error;
mod mutations;
mod parties;
mod queries;
mod slots;
mod store;

pub use assign::{AssignmentPolicy, FirstAvailable};
pub use availability::{gaps, merge_spans};
pub use booking::BookingRequest;
pub use error::{ConflictKind, EngineError, EntityKind};
pub use mutations::{AppointmentPatch, StaffPatch};
pub use parties::{Argon2Hasher, CredentialHasher, PetDetails, PetResolution, WALK_IN_EMAIL_DOMAIN};
pub use queries::AppointmentFilter;
pub use slots::{SlotConfig, format_slot, free_slots};
pub use store::StaffSchedule;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalWriter};

pub type SharedSchedule = Arc<RwLock<StaffSchedule>>;

/// Pluggable parts of an engine.
#[derive(Clone)]
pub struct EngineOptions {
    pub slot_config: SlotConfig,
    pub policy: Arc<dyn AssignmentPolicy>,
    pub hasher: Arc<dyn CredentialHasher>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            slot_config: SlotConfig::default(),
            policy: Arc::new(FirstAvailable),
            hasher: Arc::new(Argon2Hasher),
        }
    }
}

/// Scheduling state of one shop.
///
/// Lock order: `commit_gate` (shared) before any schedule write lock.
/// Compaction takes the gate exclusively.
pub struct Engine {
    pub(super) staff: DashMap<Ulid, Staff>,
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    /// appointment id → staff id
    pub(super) appointment_index: DashMap<Ulid, Ulid>,
    pub(super) customers: DashMap<Ulid, Customer>,
    pub(super) phone_index: DashMap<String, Ulid>,
    pub(super) pets: DashMap<Ulid, Pet>,
    pub(super) services: DashMap<Ulid, Service>,
    pub(super) categories: DashMap<Ulid, ServiceCategory>,
    pub(super) walk_in_lock: Mutex<()>,
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal: WalWriter,
    pub(super) slot_config: SlotConfig,
    pub(super) policy: Arc<dyn AssignmentPolicy>,
    pub(super) hasher: Arc<dyn CredentialHasher>,
}

/// Apply an appointment event to a schedule. Caller holds its write lock.
pub(super) fn apply_to_schedule(schedule: &mut StaffSchedule, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AppointmentBooked(a) => {
            index.insert(a.id, a.staff_id);
            schedule.insert(a.clone());
        }
        Event::AppointmentUpdated(a) => schedule.replace(a.clone()),
        Event::AppointmentDeleted { id, .. } => {
            schedule.remove(*id);
            index.remove(id);
        }
        Event::StaffDeleted { .. } => schedule.retired = true,
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        Self::with_options(wal_path, EngineOptions::default())
    }

    /// Replays the WAL at `wal_path`, then starts its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn with_options(wal_path: PathBuf, options: EngineOptions) -> std::io::Result<Self> {
        options
            .slot_config
            .validate()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let events = Wal::replay(&wal_path)?;
        let wal = WalWriter::spawn(Wal::open(&wal_path)?);

        let engine = Self {
            staff: DashMap::new(),
            schedules: DashMap::new(),
            appointment_index: DashMap::new(),
            customers: DashMap::new(),
            phone_index: DashMap::new(),
            pets: DashMap::new(),
            services: DashMap::new(),
            categories: DashMap::new(),
            walk_in_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal,
            slot_config: options.slot_config,
            policy: options.policy,
            hasher: options.hasher,
        };

        // Schedules are rebuilt unshared, then published behind their locks.
        let mut schedules: HashMap<Ulid, StaffSchedule> = HashMap::new();
        for event in &events {
            if let Some(staff_id) = event.staff_id() {
                let schedule = schedules
                    .entry(staff_id)
                    .or_insert_with(|| StaffSchedule::new(staff_id));
                apply_to_schedule(schedule, event, &engine.appointment_index);
                continue;
            }
            match event {
                Event::StaffCreated(s) => {
                    schedules.entry(s.id).or_insert_with(|| StaffSchedule::new(s.id));
                }
                Event::StaffDeleted { id } => {
                    if schedules.get(id).is_some_and(|s| s.is_empty()) {
                        schedules.remove(id);
                    }
                }
                _ => {}
            }
            engine.apply_registry(event);
        }
        for (id, mut schedule) in schedules {
            schedule.retired = !engine.staff.contains_key(&id);
            engine.schedules.insert(id, Arc::new(RwLock::new(schedule)));
        }

        if !events.is_empty() {
            info!(
                path = %wal_path.display(),
                events = events.len(),
                staff = engine.staff.len(),
                appointments = engine.appointment_index.len(),
                "replayed WAL"
            );
        }
        Ok(engine)
    }

    /// Apply a registry event (anything but appointment events).
    fn apply_registry(&self, event: &Event) {
        match event {
            Event::CategoryUpserted(c) => {
                self.categories.insert(c.id, c.clone());
            }
            Event::ServiceUpserted(s) => {
                self.services.insert(s.id, s.clone());
            }
            Event::StaffCreated(s) | Event::StaffUpdated(s) => {
                self.staff.insert(s.id, s.clone());
            }
            Event::StaffDeleted { id } => {
                self.staff.remove(id);
            }
            Event::CustomerCreated(c) => {
                if let Some(phone) = &c.phone {
                    self.phone_index.insert(phone.clone(), c.id);
                }
                self.customers.insert(c.id, c.clone());
            }
            Event::PetCreated(p) => {
                self.pets.insert(p.id, p.clone());
            }
            Event::PetRemoved { id } => {
                self.pets.remove(id);
            }
            Event::AppointmentBooked(_)
            | Event::AppointmentUpdated(_)
            | Event::AppointmentDeleted { .. } => {}
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply, under the shared commit gate.
    pub(super) async fn persist_registry(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    pub fn schedule(&self, staff_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(staff_id).map(|e| e.value().clone())
    }

    pub fn staff_count(&self) -> usize {
        self.staff.len()
    }
}

use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::EntityKind;
use super::{Engine, EngineError};

/// Domain suffix of the placeholder email given to walk-in customers.
pub const WALK_IN_EMAIL_DOMAIN: &str = "petshop.local";

/// One-way hash for credentials the engine synthesizes itself.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, EngineError>;
}

/// Argon2id with default parameters, PHC string output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, EngineError> {
        use argon2::password_hash::SaltString;
        use argon2::password_hash::rand_core::OsRng;
        use argon2::{Argon2, PasswordHasher};
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| EngineError::CredentialError(e.to_string()))?;
        Ok(hash.to_string())
    }
}

/// New-pet fields carried by a booking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PetDetails {
    pub name: String,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
}

/// Whether the pet on a booking already existed. A booking that fails after
/// creating its pet removes that pet again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PetResolution {
    Existing(Pet),
    Created(Pet),
}

impl PetResolution {
    pub fn pet(&self) -> &Pet {
        match self {
            PetResolution::Existing(p) | PetResolution::Created(p) => p,
        }
    }
}

pub(crate) fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Engine {
    /// Find the booking's customer, creating a walk-in record keyed on phone
    /// if none exists yet.
    ///
    /// Concurrent walk-ins with the same phone converge on one record: the
    /// phone index is re-checked under `walk_in_lock` before inserting.
    pub async fn resolve_customer(
        &self,
        customer_id: Option<Ulid>,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer, EngineError> {
        if let Some(id) = customer_id {
            return self.get_customer(id);
        }
        let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
            return Err(EngineError::InvalidRequest(
                "must supply customer id or customer contact info".into(),
            ));
        };
        check_len(Some(phone), MAX_PHONE_LEN, "phone number too long")?;
        if let Some(existing) = self.find_customer_by_phone(phone) {
            return Ok(existing);
        }
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Err(EngineError::InvalidRequest(
                "a name is required to register a new customer".into(),
            ));
        };
        check_len(Some(name), MAX_NAME_LEN, "customer name too long")?;

        // Hashing is CPU-bound; keep it off the runtime and outside the lock.
        let hasher = self.hasher.clone();
        let secret = phone.to_string();
        let credential_hash = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| EngineError::CredentialError(e.to_string()))??;

        let _walk_in = self.walk_in_lock.lock().await;
        if let Some(existing) = self.find_customer_by_phone(phone) {
            return Ok(existing);
        }
        let customer = Customer {
            id: Ulid::new(),
            name: name.to_string(),
            phone: Some(phone.to_string()),
            email: format!("{phone}@{WALK_IN_EMAIL_DOMAIN}"),
            role: CUSTOMER_ROLE.to_string(),
            credential_hash,
        };
        self.persist_registry(Event::CustomerCreated(customer.clone())).await?;
        info!(customer_id = %customer.id, "registered walk-in customer");
        Ok(customer)
    }

    /// Explicit pet id wins; otherwise new-pet details with a name create a
    /// pet owned by `owner`; otherwise there is no pet.
    pub async fn resolve_pet(
        &self,
        pet_id: Option<Ulid>,
        details: Option<&PetDetails>,
        owner: &Customer,
    ) -> Result<Option<PetResolution>, EngineError> {
        if let Some(id) = pet_id {
            let pet = self.get_pet(id)?;
            if pet.owner_id != owner.id {
                return Err(EngineError::InvalidRequest(format!(
                    "pet {id} does not belong to customer {}",
                    owner.id
                )));
            }
            return Ok(Some(PetResolution::Existing(pet)));
        }
        let Some(details) = details.filter(|d| !d.name.trim().is_empty()) else {
            return Ok(None);
        };
        check_len(Some(details.name.trim()), MAX_NAME_LEN, "pet name too long")?;

        let pet = Pet {
            id: Ulid::new(),
            owner_id: owner.id,
            name: details.name.trim().to_string(),
            species: details.species.clone(),
            breed: details.breed.clone(),
            birth_date: details.birth_date,
            sex: details.sex.clone(),
        };
        self.persist_registry(Event::PetCreated(pet.clone())).await?;
        Ok(Some(PetResolution::Created(pet)))
    }

    /// Undo a pet created by a booking that did not commit.
    pub(super) async fn discard_pet(&self, pet_id: Ulid) -> Result<(), EngineError> {
        self.persist_registry(Event::PetRemoved { id: pet_id }).await
    }

    pub fn get_customer(&self, id: Ulid) -> Result<Customer, EngineError> {
        self.customers
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound(EntityKind::Customer, id))
    }

    pub fn find_customer_by_phone(&self, phone: &str) -> Option<Customer> {
        let id = *self.phone_index.get(phone.trim())?;
        self.customers.get(&id).map(|c| c.value().clone())
    }

    pub fn get_pet(&self, id: Ulid) -> Result<Pet, EngineError> {
        self.pets
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::NotFound(EntityKind::Pet, id))
    }

    pub fn pets_of(&self, owner_id: Ulid) -> Vec<Pet> {
        let mut pets: Vec<Pet> = self
            .pets
            .iter()
            .filter(|p| p.owner_id == owner_id)
            .map(|p| p.value().clone())
            .collect();
        pets.sort_by_key(|p| p.id);
        pets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(secret: &str, hash: &str) -> bool {
        use argon2::{Argon2, PasswordHash, PasswordVerifier};
        let parsed = PasswordHash::new(hash).unwrap();
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    #[test]
    fn argon2_hash_is_salted_and_verifiable() {
        let a = Argon2Hasher.hash("0900000000").unwrap();
        let b = Argon2Hasher.hash("0900000000").unwrap();
        assert!(a.starts_with("$argon2"));
        assert_ne!(a, b);
        assert!(!a.contains("0900000000"));
        assert!(verify("0900000000", &a));
        assert!(!verify("0911111111", &a));
    }

    #[test]
    fn non_blank_trims() {
        assert_eq!(non_blank(&Some("  x ".into())), Some("x"));
        assert_eq!(non_blank(&Some("   ".into())), None);
        assert_eq!(non_blank(&None), None);
    }
}

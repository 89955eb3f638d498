use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, EngineOptions};
use crate::limits::*;

/// One engine per shop. Each gets its own WAL file and compactor.
/// Shop = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    options: EngineOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self::with_options(data_dir, compact_threshold, EngineOptions::default())
    }

    pub fn with_options(data_dir: PathBuf, compact_threshold: u64, options: EngineOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            options,
        }
    }

    /// Get or lazily open the engine for the given shop.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        // Names that sanitize alike share one WAL file, so they share one engine.
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections may race to open the same shop.
        let entry = self.engines.entry(safe_name.clone());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::with_options(wal_path, self.options.clone())?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        entry.or_insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant = %safe_name, "shop opened");
        Ok(engine)
    }
}

/// Keep `[A-Za-z0-9_-]` so the name is safe as a file stem.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BookingRequest;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("petsched_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let shop_a = tm.get_or_create("shop_a").unwrap();
        let shop_b = tm.get_or_create("shop_b").unwrap();

        let staff_id = Ulid::new();
        let service_id = Ulid::new();
        for shop in [&shop_a, &shop_b] {
            shop.create_staff(Staff {
                id: staff_id,
                name: "Lan".into(),
                capability: Capability::new("GROOMER").unwrap(),
                phone: None,
                email: None,
            })
            .await
            .unwrap();
            shop.upsert_service(Service {
                id: service_id,
                name: "Bath".into(),
                category_id: None,
                price: 100,
                duration_min: Some(60),
            })
            .await
            .unwrap();
        }

        let start = ms_from_datetime(
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        );
        shop_a
            .create_appointment(BookingRequest {
                service_id,
                start: Some(start),
                customer_name: Some("An".into()),
                customer_phone: Some("0900000001".into()),
                staff_id: Some(staff_id),
                ..BookingRequest::default()
            })
            .await
            .unwrap();

        let span = Span::new(start, start + 3_600_000);
        assert!(!shop_a.is_available(staff_id, span).await.unwrap());
        assert!(shop_b.is_available(staff_id, span).await.unwrap());
        assert!(shop_b.find_customer_by_phone("0900000001").is_none());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_shop").unwrap();
        assert!(dir.join("my_shop.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let traversal = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        let plain = tm.get_or_create("evil").unwrap();
        assert!(Arc::ptr_eq(&traversal, &plain));
        assert!(tm.get_or_create("../..").is_err());
    }

    #[test]
    fn sanitize_keeps_safe_ascii_only() {
        assert_eq!(sanitize("pet-shop_01"), "pet-shop_01");
        assert_eq!(sanitize("cửa hàng/1"), "cahng1");
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}

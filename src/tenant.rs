use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-tenant engines. Each tenant gets its own Engine, WAL,
/// notification hub and compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    hubs: DashMap<String, Arc<NotifyHub>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    commit_timeout: Duration,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, commit_timeout: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            hubs: DashMap::new(),
            data_dir,
            compact_threshold,
            commit_timeout,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let hub = Arc::new(NotifyHub::new());
        let engine = Arc::new(
            Engine::new(wal_path, hub.clone())?.with_commit_timeout(self.commit_timeout),
        );

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        entry.or_insert(engine.clone());
        self.hubs.insert(tenant.to_string(), hub);
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!("loaded tenant {tenant}");
        Ok(engine)
    }

    /// Notification hub of a loaded tenant.
    pub fn hub(&self, tenant: &str) -> Option<Arc<NotifyHub>> {
        self.hubs.get(tenant).map(|h| h.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::user_channel;
    use chrono::Weekday;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agenda_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let user = Ulid::new();
        let provider = Ulid::new();

        // Same ids in both tenants
        for eng in [&eng_a, &eng_b] {
            eng.register_user(user).await.unwrap();
            eng.register_provider(provider, user, true).await.unwrap();
        }

        eng_a
            .add_schedule(Ulid::new(), provider, Weekday::Mon, 480, 660, 1.5)
            .await
            .unwrap();

        let slots_b = eng_b.list_slots(provider, SlotQuery::Day(Weekday::Mon)).await.unwrap();
        assert!(slots_b.is_empty());

        let slots_a = eng_a.list_slots(provider, SlotQuery::Day(Weekday::Mon)).await.unwrap();
        assert_eq!(slots_a.len(), 2);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();

        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_hub_receives_engine_notifications() {
        let dir = test_data_dir("hub");
        let tm = manager(dir);
        let eng = tm.get_or_create("clinic").unwrap();
        let hub = tm.hub("clinic").unwrap();
        assert!(tm.hub("elsewhere").is_none());

        let provider_user = Ulid::new();
        let client = Ulid::new();
        let provider = Ulid::new();
        eng.register_user(provider_user).await.unwrap();
        eng.register_user(client).await.unwrap();
        eng.register_provider(provider, provider_user, false).await.unwrap();

        let mut rx = hub.subscribe(&user_channel(client));
        let id = Ulid::new();
        eng.book_appointment(BookingRequest {
            id,
            client_id: client,
            provider_id: provider,
            date: parse_date("2025-06-17").unwrap(),
            span: Span::new(600, 660),
        })
        .await
        .unwrap();
        eng.update_status(id, provider_user, AppointmentStatus::Confirmed)
            .await
            .unwrap();

        let note = rx.recv().await.unwrap();
        assert_eq!(note.appointment.id, id);
        assert_eq!(note.appointment.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}

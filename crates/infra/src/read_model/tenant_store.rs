use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use storefront_core::TenantId;

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model lock is poisoned")]
    Poisoned,

    #[error("read model backend error: {0}")]
    Backend(String),
}

/// Key/value storage for disposable read models, partitioned by tenant.
///
/// Reads never see another tenant's rows and degrade to "absent" on backend
/// failure. Writes report failure, so a projection never advances past a row
/// it could not store.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError>;
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Drop every tenant's rows ahead of a full rebuild.
    fn clear_all(&self) -> Result<(), ReadModelError>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_all(&self) -> Result<(), ReadModelError> {
        (**self).clear_all()
    }
}

#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    rows: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let rows = self.rows.read().ok()?;
        rows.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) -> Result<(), ReadModelError> {
        let mut rows = self.rows.write().map_err(|_| ReadModelError::Poisoned)?;
        rows.entry(tenant_id).or_default().insert(key, value);
        Ok(())
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        match self.rows.read() {
            Ok(rows) => rows
                .get(&tenant_id)
                .map(|partition| partition.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    fn clear_all(&self) -> Result<(), ReadModelError> {
        self.rows.write().map_err(|_| ReadModelError::Poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_do_not_leak_between_tenants() {
        let store: InMemoryTenantStore<u32, &'static str> = InMemoryTenantStore::new();
        let a = TenantId::new();
        let b = TenantId::new();

        store.upsert(a, 1, "chair").unwrap();
        store.upsert(b, 1, "table").unwrap();

        assert_eq!(store.get(a, &1), Some("chair"));
        assert_eq!(store.get(b, &1), Some("table"));
        assert_eq!(store.list(a), vec!["chair"]);
    }

    #[test]
    fn upsert_replaces_and_clear_all_empties_every_partition() {
        let store: InMemoryTenantStore<u32, u32> = InMemoryTenantStore::new();
        let a = TenantId::new();
        let b = TenantId::new();

        store.upsert(a, 1, 10).unwrap();
        store.upsert(a, 1, 11).unwrap();
        store.upsert(b, 1, 20).unwrap();
        assert_eq!(store.get(a, &1), Some(11));

        store.clear_all().unwrap();
        assert!(store.list(a).is_empty());
        assert!(store.get(b, &1).is_none());
    }
}

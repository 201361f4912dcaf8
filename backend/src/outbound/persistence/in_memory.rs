//! Process-local versioned store.
//!
//! Rows live in a `BTreeMap` behind a `std::sync::Mutex`. Every method takes
//! the lock, does its check-and-write, and drops the guard before returning,
//! so a compare-and-swap is atomic with respect to every other caller and no
//! guard crosses an `.await`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::ports::{StoreError, VersionedStore};
use crate::domain::{Version, Versioned, VersionedRecord};

/// In-memory [`VersionedStore`] for any record kind.
///
/// # Examples
///
/// ```
/// use commerce_backend::domain::{Money, Product, ProductId, Version};
/// use commerce_backend::outbound::persistence::InMemoryVersionedStore;
///
/// let store = InMemoryVersionedStore::new();
/// let version = store.seed(Product::new(ProductId::new(1), "tea", Money::new(450), 10));
/// assert_eq!(version, Version::INITIAL);
/// assert_eq!(store.snapshot(ProductId::new(1)).map(|row| row.record.stock_quantity), Some(10));
/// ```
pub struct InMemoryVersionedStore<R: VersionedRecord> {
    rows: Mutex<BTreeMap<R::Id, Versioned<R>>>,
    offline: AtomicBool,
}

impl<R: VersionedRecord> Default for InMemoryVersionedStore<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            offline: AtomicBool::new(false),
        }
    }
}

impl<R: VersionedRecord> InMemoryVersionedStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a row at [`Version::INITIAL`].
    ///
    /// Catalogue rows are created outside the core; this stands in for that.
    pub fn seed(&self, record: R) -> Version {
        if let Ok(mut rows) = self.rows.lock() {
            rows.insert(record.id(), Versioned::new(record, Version::INITIAL));
        }
        Version::INITIAL
    }

    /// Current row without going through the async port.
    pub fn snapshot(&self, id: R::Id) -> Option<Versioned<R>> {
        self.rows.lock().ok()?.get(&id).cloned()
    }

    /// Every row in key order.
    pub fn all(&self) -> Vec<Versioned<R>> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Simulate an outage: every port call fails with `Connection` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::connection(format!("{} store is offline", R::KIND)));
        }
        Ok(())
    }

    fn lock_rows(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<R::Id, Versioned<R>>>, StoreError> {
        self.ensure_online()?;
        self.rows
            .lock()
            .map_err(|_| StoreError::query(format!("{} store mutex poisoned", R::KIND)))
    }
}

#[async_trait]
impl<R: VersionedRecord> VersionedStore<R> for InMemoryVersionedStore<R> {
    async fn read(&self, id: R::Id) -> Result<Versioned<R>, StoreError> {
        let rows = self.lock_rows()?;
        rows.get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id.to_string()))
    }

    async fn insert(&self, record: R) -> Result<Version, StoreError> {
        let mut rows = self.lock_rows()?;
        let id = record.id();
        if rows.contains_key(&id) {
            return Err(StoreError::already_exists(id.to_string()));
        }
        rows.insert(id, Versioned::new(record, Version::INITIAL));
        Ok(Version::INITIAL)
    }

    async fn compare_and_swap(
        &self,
        id: R::Id,
        expected: Version,
        record: R,
    ) -> Result<Version, StoreError> {
        let mut rows = self.lock_rows()?;
        let Some(current) = rows.get_mut(&id) else {
            return Err(StoreError::not_found(id.to_string()));
        };
        if current.version != expected {
            return Err(StoreError::conflict_between(expected, current.version));
        }
        let next = expected.next();
        *current = Versioned::new(record, next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, Product, ProductId};
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> InMemoryVersionedStore<Product> {
        let store = InMemoryVersionedStore::new();
        store.seed(Product::new(ProductId::new(1), "tea", Money::new(450), 10));
        store
    }

    #[rstest]
    #[tokio::test]
    async fn read_returns_row_and_version(store: InMemoryVersionedStore<Product>) {
        let row = store.read(ProductId::new(1)).await.expect("seeded row");
        assert_eq!(row.version, Version::INITIAL);
        assert_eq!(row.record.stock_quantity, 10);
    }

    #[rstest]
    #[tokio::test]
    async fn read_missing_row_is_not_found(store: InMemoryVersionedStore<Product>) {
        let err = store.read(ProductId::new(9)).await.expect_err("missing");
        assert_eq!(err, StoreError::not_found("product:9"));
    }

    #[rstest]
    #[tokio::test]
    async fn cas_bumps_version_exactly_once(store: InMemoryVersionedStore<Product>) {
        let row = store.read(ProductId::new(1)).await.expect("seeded row");
        let next = row.record.take_stock(4).expect("enough stock");
        let version = store
            .compare_and_swap(ProductId::new(1), row.version, next)
            .await
            .expect("fresh version");
        assert_eq!(version, Version::new(2));
        assert_eq!(
            store.snapshot(ProductId::new(1)).map(|r| r.record.stock_quantity),
            Some(6)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn stale_cas_conflicts_and_writes_nothing(store: InMemoryVersionedStore<Product>) {
        let row = store.read(ProductId::new(1)).await.expect("seeded row");
        let first = row.record.take_stock(1).expect("stock");
        let second = row.record.take_stock(2).expect("stock");
        store
            .compare_and_swap(ProductId::new(1), row.version, first)
            .await
            .expect("first writer wins");

        let err = store
            .compare_and_swap(ProductId::new(1), row.version, second)
            .await
            .expect_err("second writer is stale");
        assert_eq!(err, StoreError::version_conflict(1_u64, 2_u64));
        assert_eq!(
            store.snapshot(ProductId::new(1)).map(|r| r.record.stock_quantity),
            Some(9)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn insert_refuses_duplicates(store: InMemoryVersionedStore<Product>) {
        let err = store
            .insert(Product::new(ProductId::new(1), "dup", Money::new(1), 1))
            .await
            .expect_err("duplicate key");
        assert_eq!(err, StoreError::already_exists("product:1"));
    }

    #[rstest]
    #[tokio::test]
    async fn offline_store_fails_with_connection(store: InMemoryVersionedStore<Product>) {
        store.set_offline(true);
        let err = store.read(ProductId::new(1)).await.expect_err("offline");
        assert!(matches!(err, StoreError::Connection { .. }));
        store.set_offline(false);
        assert!(store.read(ProductId::new(1)).await.is_ok());
    }
}

//! Store wrappers that reshape timing around another [`VersionedStore`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{StoreError, VersionedStore};
use crate::domain::{Version, Versioned, VersionedRecord};

/// Yields to the scheduler after every read, the way a networked store
/// suspends between a read and the following compare-and-swap.
pub struct YieldingStore<R: VersionedRecord> {
    inner: Arc<dyn VersionedStore<R>>,
}

impl<R: VersionedRecord> YieldingStore<R> {
    pub fn new(inner: Arc<dyn VersionedStore<R>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: VersionedRecord> VersionedStore<R> for YieldingStore<R> {
    async fn read(&self, id: R::Id) -> Result<Versioned<R>, StoreError> {
        let row = self.inner.read(id).await;
        tokio::task::yield_now().await;
        row
    }

    async fn insert(&self, record: R) -> Result<Version, StoreError> {
        self.inner.insert(record).await
    }

    async fn compare_and_swap(
        &self,
        id: R::Id,
        expected: Version,
        record: R,
    ) -> Result<Version, StoreError> {
        tokio::task::yield_now().await;
        self.inner.compare_and_swap(id, expected, record).await
    }
}

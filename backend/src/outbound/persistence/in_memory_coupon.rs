//! Process-local coupon and grant store.
//!
//! Coupons and grants share one mutex so the issuance counter and the grant
//! table always change together.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::ports::{CouponGrantStore, StoreError, VersionedStore};
use crate::domain::{
    Coupon, CouponId, GrantStatus, OrderId, UserCoupon, UserId, Version, Versioned,
};

#[derive(Default)]
struct CouponTables {
    coupons: BTreeMap<CouponId, Versioned<Coupon>>,
    grants: HashMap<(UserId, CouponId), UserCoupon>,
}

/// In-memory coupon rows plus per-user grants.
#[derive(Default)]
pub struct InMemoryCouponStore {
    tables: Mutex<CouponTables>,
    offline: AtomicBool,
}

impl InMemoryCouponStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a coupon row at [`Version::INITIAL`].
    pub fn seed(&self, coupon: Coupon) -> Version {
        if let Ok(mut tables) = self.tables.lock() {
            tables
                .coupons
                .insert(coupon.id, Versioned::new(coupon, Version::INITIAL));
        }
        Version::INITIAL
    }

    /// Current coupon row.
    pub fn snapshot(&self, id: CouponId) -> Option<Versioned<Coupon>> {
        self.tables.lock().ok()?.coupons.get(&id).cloned()
    }

    /// Every grant of `coupon_id`.
    pub fn grants_for(&self, coupon_id: CouponId) -> Vec<UserCoupon> {
        self.tables
            .lock()
            .map(|tables| {
                tables
                    .grants
                    .values()
                    .filter(|grant| grant.coupon_id == coupon_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Simulate an outage: every port call fails with `Connection` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock_tables(&self) -> Result<MutexGuard<'_, CouponTables>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::connection("coupon store is offline"));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::query("coupon store mutex poisoned"))
    }
}

fn grant_key(user_id: UserId, coupon_id: CouponId) -> String {
    format!("{coupon_id}/{user_id}")
}

fn swap_coupon(
    tables: &mut CouponTables,
    id: CouponId,
    expected: Version,
    coupon: Coupon,
) -> Result<Version, StoreError> {
    let Some(current) = tables.coupons.get_mut(&id) else {
        return Err(StoreError::not_found(id.to_string()));
    };
    if current.version != expected {
        return Err(StoreError::conflict_between(expected, current.version));
    }
    let next = expected.next();
    *current = Versioned::new(coupon, next);
    Ok(next)
}

#[async_trait]
impl VersionedStore<Coupon> for InMemoryCouponStore {
    async fn read(&self, id: CouponId) -> Result<Versioned<Coupon>, StoreError> {
        let tables = self.lock_tables()?;
        tables
            .coupons
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id.to_string()))
    }

    async fn insert(&self, record: Coupon) -> Result<Version, StoreError> {
        let mut tables = self.lock_tables()?;
        if tables.coupons.contains_key(&record.id) {
            return Err(StoreError::already_exists(record.id.to_string()));
        }
        tables
            .coupons
            .insert(record.id, Versioned::new(record, Version::INITIAL));
        Ok(Version::INITIAL)
    }

    async fn compare_and_swap(
        &self,
        id: CouponId,
        expected: Version,
        record: Coupon,
    ) -> Result<Version, StoreError> {
        let mut tables = self.lock_tables()?;
        swap_coupon(&mut tables, id, expected, record)
    }
}

#[async_trait]
impl CouponGrantStore for InMemoryCouponStore {
    async fn find_grant(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
    ) -> Result<Option<UserCoupon>, StoreError> {
        let tables = self.lock_tables()?;
        Ok(tables.grants.get(&(user_id, coupon_id)).cloned())
    }

    async fn commit_issuance(
        &self,
        coupon_id: CouponId,
        expected: Version,
        coupon: Coupon,
        grant: UserCoupon,
    ) -> Result<Version, StoreError> {
        let mut tables = self.lock_tables()?;
        let key = (grant.user_id, grant.coupon_id);
        if tables.grants.contains_key(&key) {
            return Err(StoreError::already_exists(grant_key(key.0, key.1)));
        }
        let version = swap_coupon(&mut tables, coupon_id, expected, coupon)?;
        tables.grants.insert(key, grant);
        Ok(version)
    }

    async fn mark_grant_used(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock_tables()?;
        let Some(grant) = tables.grants.get_mut(&(user_id, coupon_id)) else {
            return Err(StoreError::not_found(grant_key(user_id, coupon_id)));
        };
        if grant.status != GrantStatus::Issued {
            return Ok(false);
        }
        grant.status = GrantStatus::Used;
        grant.used_order_id = Some(order_id);
        Ok(true)
    }

    async fn restore_grant(
        &self,
        user_id: UserId,
        coupon_id: CouponId,
        order_id: OrderId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock_tables()?;
        let Some(grant) = tables.grants.get_mut(&(user_id, coupon_id)) else {
            return Err(StoreError::not_found(grant_key(user_id, coupon_id)));
        };
        if grant.status != GrantStatus::Used || grant.used_order_id != Some(order_id) {
            return Ok(false);
        }
        grant.status = GrantStatus::Issued;
        grant.used_order_id = None;
        Ok(true)
    }
}

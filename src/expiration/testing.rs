//! In-memory fakes of the store, lock and host traits for engine tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::HostStatus;
use crate::{
    db::{DbError, DbResult, ExpiryRepo, LockRepo, RuleRepo, time_index_name},
    models::{CollectionRef, DeleteTarget, ExpirationRule, Identifier, RuleKey, UpsertRule},
};

/// An active rule with empty statistics.
pub fn rule(collection: &str, field: &str, retention_seconds: i64, batch: u32) -> ExpirationRule {
    let now = Utc::now();
    ExpirationRule {
        collection_id: collection.into(),
        time_field: field.into(),
        retention_seconds,
        active: true,
        batch_size: batch,
        created_at: now,
        updated_at: now,
        last_run: None,
        rows_deleted_last_run: 0,
        total_rows_deleted: 0,
        derived_index_ref: None,
    }
}

#[derive(Debug, Clone)]
pub struct DeleteCall {
    pub collection: String,
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
}

#[derive(Default)]
struct StoreState {
    rules: BTreeMap<RuleKey, ExpirationRule>,
    rows: HashMap<String, Vec<DateTime<Utc>>>,
    /// `(collection, field) -> is temporal`
    columns: HashMap<(String, String), bool>,
    indexes: BTreeSet<String>,
    deletes: Vec<DeleteCall>,
    delete_calls: usize,
    fail_delete_on_call: Option<usize>,
    stats_updates: usize,
    list_calls: usize,
}

/// Rule registry plus expiring collections, all in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    delete_delay: Mutex<Option<Duration>>,
    fail_list: AtomicBool,
    fail_stats: AtomicBool,
    fail_drop_index: AtomicBool,
}

impl MemoryStore {
    pub fn insert_rule(&self, rule: ExpirationRule) {
        self.state.lock().rules.insert(rule.key(), rule);
    }

    pub fn rule(&self, collection: &str, field: &str) -> ExpirationRule {
        self.state
            .lock()
            .rules
            .get(&RuleKey::new(collection, field))
            .cloned()
            .expect("rule should exist")
    }

    /// Create the collection if needed and append entries.
    pub fn add_rows(&self, collection: &str, times: &[DateTime<Utc>]) {
        self.state
            .lock()
            .rows
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(times);
    }

    /// Declare a column so registration can inspect it.
    pub fn add_column(&self, collection: &str, field: &str, temporal: bool) {
        let mut state = self.state.lock();
        state.rows.entry(collection.to_string()).or_default();
        state
            .columns
            .insert((collection.to_string(), field.to_string()), temporal);
    }

    pub fn row_count(&self, collection: &str) -> usize {
        self.state.lock().rows.get(collection).map_or(0, Vec::len)
    }

    /// Per-call results of every delete issued against `collection`.
    pub fn delete_results(&self, collection: &str) -> Vec<u64> {
        self.state
            .lock()
            .deletes
            .iter()
            .filter(|c| c.collection == collection)
            .map(|c| c.deleted)
            .collect()
    }

    pub fn cutoffs(&self, collection: &str) -> Vec<DateTime<Utc>> {
        self.state
            .lock()
            .deletes
            .iter()
            .filter(|c| c.collection == collection)
            .map(|c| c.cutoff)
            .collect()
    }

    /// Collections in the order they were first deleted from.
    pub fn delete_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for call in &self.state.lock().deletes {
            if order.last() != Some(&call.collection) {
                order.push(call.collection.clone());
            }
        }
        order
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }

    pub fn stats_updates(&self) -> usize {
        self.state.lock().stats_updates
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().indexes.contains(name)
    }

    /// Fail the n-th delete call (1-based, counted across collections).
    pub fn fail_delete_on_call(&self, n: usize) {
        self.state.lock().fail_delete_on_call = Some(n);
    }

    /// Make every delete call take this long before it runs.
    pub fn set_delete_delay(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    pub fn fail_drop_index(&self, fail: bool) {
        self.fail_drop_index.store(fail, Ordering::SeqCst);
    }

    fn ensure_registry(&self) -> DbResult<()> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(DbError::Internal("no such table: ttl_rules".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleRepo for MemoryStore {
    async fn upsert(&self, input: UpsertRule) -> DbResult<ExpirationRule> {
        let key = input.key();
        let now = Utc::now();
        let mut state = self.state.lock();
        let stored = state
            .rules
            .entry(key.clone())
            .and_modify(|r| {
                r.retention_seconds = input.retention_seconds;
                r.batch_size = input.batch_size;
                r.active = true;
                r.updated_at = now;
            })
            .or_insert_with(|| {
                let mut r = rule(
                    &key.collection_id,
                    &key.time_field,
                    input.retention_seconds,
                    input.batch_size,
                );
                r.created_at = now;
                r.updated_at = now;
                r
            });
        Ok(stored.clone())
    }

    async fn get(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>> {
        self.ensure_registry()?;
        Ok(self.state.lock().rules.get(key).cloned())
    }

    async fn list(&self, include_inactive: bool) -> DbResult<Vec<ExpirationRule>> {
        self.ensure_registry()?;
        let mut state = self.state.lock();
        state.list_calls += 1;
        Ok(state
            .rules
            .values()
            .filter(|r| include_inactive || r.active)
            .cloned()
            .collect())
    }

    async fn count_active(&self) -> DbResult<u64> {
        self.ensure_registry()?;
        Ok(self.state.lock().rules.values().filter(|r| r.active).count() as u64)
    }

    async fn set_active(&self, key: &RuleKey, active: bool) -> DbResult<bool> {
        let mut state = self.state.lock();
        let Some(rule) = state.rules.get_mut(key) else {
            return Ok(false);
        };
        rule.active = active;
        rule.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_index_ref(&self, key: &RuleKey, index_ref: Option<&str>) -> DbResult<()> {
        let mut state = self.state.lock();
        let rule = state.rules.get_mut(key).ok_or(DbError::NotFound)?;
        rule.derived_index_ref = index_ref.map(str::to_string);
        Ok(())
    }

    async fn remove(&self, key: &RuleKey) -> DbResult<Option<ExpirationRule>> {
        Ok(self.state.lock().rules.remove(key))
    }

    async fn update_stats(
        &self,
        key: &RuleKey,
        last_run: DateTime<Utc>,
        rows_deleted_last_run: u64,
        delta: u64,
    ) -> DbResult<()> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(DbError::Internal("database is locked".into()));
        }
        let mut state = self.state.lock();
        let rule = state.rules.get_mut(key).ok_or(DbError::NotFound)?;
        rule.last_run = Some(last_run);
        rule.rows_deleted_last_run = rows_deleted_last_run;
        rule.total_rows_deleted += delta;
        state.stats_updates += 1;
        Ok(())
    }

    async fn reset_stats(&self, key: &RuleKey) -> DbResult<bool> {
        let mut state = self.state.lock();
        let Some(rule) = state.rules.get_mut(key) else {
            return Ok(false);
        };
        rule.last_run = None;
        rule.rows_deleted_last_run = 0;
        rule.total_rows_deleted = 0;
        Ok(true)
    }
}

#[async_trait]
impl ExpiryRepo for MemoryStore {
    async fn delete_batch(
        &self,
        target: &DeleteTarget,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<u64> {
        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let collection = target.collection.to_string();
        let mut state = self.state.lock();
        state.delete_calls += 1;
        if state.fail_delete_on_call == Some(state.delete_calls) {
            return Err(DbError::Internal("connection reset".into()));
        }

        let Some(rows) = state.rows.get_mut(&collection) else {
            return Err(DbError::Internal(format!(
                "relation \"{collection}\" does not exist"
            )));
        };

        let mut deleted = 0u64;
        rows.retain(|t| {
            if deleted < u64::from(limit) && *t < cutoff {
                deleted += 1;
                false
            } else {
                true
            }
        });

        state.deletes.push(DeleteCall {
            collection,
            cutoff,
            deleted,
        });
        Ok(deleted)
    }

    async fn time_field_is_temporal(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<bool> {
        Ok(self
            .state
            .lock()
            .columns
            .get(&(collection.to_string(), field.to_string()))
            .copied()
            .unwrap_or(false))
    }

    async fn create_time_index(
        &self,
        collection: &CollectionRef,
        field: &Identifier,
    ) -> DbResult<String> {
        let name = time_index_name(collection, field)
            .map_err(|e| DbError::Validation(e.to_string()))?;
        let index = CollectionRef {
            schema: collection.schema.clone(),
            name,
        }
        .to_string();
        self.state.lock().indexes.insert(index.clone());
        Ok(index)
    }

    async fn drop_index(&self, index_ref: &str) -> DbResult<()> {
        if self.fail_drop_index.load(Ordering::SeqCst) {
            return Err(DbError::Internal("index is in use".into()));
        }
        self.state.lock().indexes.remove(index_ref);
        Ok(())
    }
}

/// Lock repository shared by every "process" in a test.
#[derive(Default)]
pub struct MemoryLock {
    held: Mutex<BTreeSet<String>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
    renews: AtomicUsize,
    renew_every: Mutex<Option<Duration>>,
}

impl MemoryLock {
    /// Ask holders to renew every `every`, like an expiring lease.
    pub fn with_renew_interval(every: Duration) -> Self {
        let lock = Self::default();
        *lock.renew_every.lock() = Some(every);
        lock
    }

    /// Forget `name` as if its lease had lapsed and another sweeper took it.
    pub fn lose(&self, name: &str) {
        self.held.lock().remove(name);
    }

    pub fn renews(&self) -> usize {
        self.renews.load(Ordering::SeqCst)
    }

    /// Pretend another sweeper holds `name`.
    pub fn hold_elsewhere(&self, name: &str) {
        self.held.lock().insert(name.to_string());
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held.lock().contains(name)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LockRepo for MemoryLock {
    async fn try_acquire(&self, name: &str) -> DbResult<bool> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(DbError::Internal("lock service unavailable".into()));
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(self.held.lock().insert(name.to_string()))
    }

    async fn renew(&self, name: &str) -> DbResult<bool> {
        self.renews.fetch_add(1, Ordering::SeqCst);
        Ok(self.held.lock().contains(name))
    }

    fn renew_interval(&self) -> Option<Duration> {
        *self.renew_every.lock()
    }

    async fn release(&self, name: &str) -> DbResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        // The lock is freed even when reporting failure, as a dropped session would
        self.held.lock().remove(name);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(DbError::Internal("connection closed".into()));
        }
        Ok(())
    }
}

/// Host whose writability is flipped by the test.
pub struct StaticHost {
    writable: AtomicBool,
    checks: AtomicUsize,
    panic_on_check: AtomicBool,
}

impl StaticHost {
    pub fn new(writable: bool) -> Self {
        Self {
            writable: AtomicBool::new(writable),
            checks: AtomicUsize::new(0),
            panic_on_check: AtomicBool::new(false),
        }
    }

    /// Make the next status check panic, killing whatever task runs it.
    pub fn panic_on_check(&self, panic: bool) {
        self.panic_on_check.store(panic, Ordering::SeqCst);
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostStatus for StaticHost {
    async fn is_writable(&self) -> DbResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        assert!(
            !self.panic_on_check.load(Ordering::SeqCst),
            "host status check panicked"
        );
        Ok(self.writable.load(Ordering::SeqCst))
    }
}

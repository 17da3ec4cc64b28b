//! The record store abstraction over the cluster state backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Read & conditional-write access to StatefulSets.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the given StatefulSet, returning `None` if it does not exist.
    ///
    /// Implementations may serve this call from a cache.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError>;

    /// Fetch the most recent state of the given StatefulSet.
    ///
    /// The returned object must reflect all prior writes made through this store. Stores whose
    /// `get` is served from a cache must override this method.
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        self.get(namespace, name).await
    }

    /// Replace the given StatefulSet, only if its current version matches `expected_version`.
    ///
    /// Returns `StoreError::Conflict` when the stored object has a different version.
    async fn update(&self, statefulset: StatefulSet, expected_version: &str) -> Result<StatefulSet, StoreError>;
}

/// An in-memory `RecordStore` with versioned objects.
///
/// Every successful write bumps the object's `resourceVersion`. Conflicts and read failures can
/// be injected to exercise the retry paths of callers.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), StatefulSet>>,
    version: AtomicUsize,
    pending_conflicts: AtomicUsize,
    fail_reads: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the given object, unconditionally assigning it a new version.
    pub async fn insert(&self, mut statefulset: StatefulSet) -> StatefulSet {
        let key = Self::key(&statefulset);
        statefulset.metadata.resource_version = Some(self.next_version());
        self.objects.lock().await.insert(key, statefulset.clone());
        statefulset
    }

    /// Fetch the given object without any fault injection.
    pub async fn peek(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.objects.lock().await.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Cause the next `count` updates to fail with a conflict.
    ///
    /// Each injected conflict bumps the version of the target object, as a concurrent writer would.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Cause all reads to fail with a backend error while set.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// The number of successful updates applied to this store.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn key(statefulset: &StatefulSet) -> (String, String) {
        (
            statefulset.metadata.namespace.clone().unwrap_or_default(),
            statefulset.metadata.name.clone().unwrap_or_default(),
        )
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| val.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected read failure")));
        }
        Ok(self.peek(namespace, name).await)
    }

    async fn update(&self, mut statefulset: StatefulSet, expected_version: &str) -> Result<StatefulSet, StoreError> {
        let key = Self::key(&statefulset);
        let mut objects = self.objects.lock().await;
        let current = objects.get_mut(&key).ok_or(StoreError::NotFound)?;
        if self.take_conflict() {
            current.metadata.resource_version = Some(self.next_version());
            return Err(StoreError::Conflict);
        }
        if current.metadata.resource_version.as_deref() != Some(expected_version) {
            return Err(StoreError::Conflict);
        }
        statefulset.metadata.resource_version = Some(self.next_version());
        *current = statefulset.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(statefulset)
    }
}

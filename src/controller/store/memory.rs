//! In-process [`ObjectStore`] for tests and dry runs
//!
//! Mimics the API server rules the reconcilers depend on: `resourceVersion` changes
//! on every write and stale writes conflict, `generation` moves only when `spec`
//! changes, and `update`/`update_status` each leave the other half untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ObjectKey, ObjectStore};
use crate::error::{Error, Result};

/// Store operation, used for write accounting and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

struct MemoryState<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    writes: Vec<(StoreOp, ObjectKey)>,
    failures: HashMap<StoreOp, String>,
}

pub struct MemoryStore<K> {
    state: Mutex<MemoryState<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                next_version: 1,
                writes: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
{
    fn state(&self) -> MutexGuard<'_, MemoryState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object as if another actor had created it
    pub fn insert(&self, mut obj: K) {
        let mut state = self.state();
        let version = state.bump();
        obj.meta_mut().resource_version = Some(version);
        if obj.meta().generation.is_none() && has_spec(&obj) {
            obj.meta_mut().generation = Some(1);
        }
        state.objects.insert(ObjectKey::of(&obj), obj);
    }

    /// Mutate a stored object in place as another actor would; not counted as a write
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) -> bool {
        let mut state = self.state();
        let version = state.bump();
        match state.objects.get_mut(key) {
            Some(obj) => {
                f(obj);
                obj.meta_mut().resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.state().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state().objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().objects.is_empty()
    }

    /// Every create/update/delete performed through the store interface
    pub fn writes(&self) -> Vec<(StoreOp, ObjectKey)> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    /// Make every subsequent `op` fail with `message`
    pub fn fail(&self, op: StoreOp, message: impl Into<String>) {
        self.state().failures.insert(op, message.into());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    fn not_found(key: &ObjectKey) -> Error {
        Error::NotFound {
            kind: K::kind(&()).to_string(),
            name: key.to_string(),
        }
    }
}

impl<K> MemoryState<K> {
    fn bump(&mut self) -> String {
        let version = self.next_version;
        self.next_version += 1;
        version.to_string()
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        match self.failures.get(&op) {
            Some(message) => Err(Error::StoreError(message.clone())),
            None => Ok(()),
        }
    }
}

fn has_spec<K: Serialize>(obj: &K) -> bool {
    serde_json::to_value(obj)
        .map(|v| v.get("spec").is_some())
        .unwrap_or(false)
}

fn field<K: Serialize>(obj: &K, name: &str) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(obj)?
        .get(name)
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

/// Copy `status` of `from` over `into`, leaving everything else alone
fn with_status<K: Serialize + DeserializeOwned>(into: &K, from: &K) -> Result<K> {
    let mut value = serde_json::to_value(into)?;
    let status = field(from, "status")?;
    if let Some(map) = value.as_object_mut() {
        if status.is_null() {
            map.remove("status");
        } else {
            map.insert("status".to_string(), status);
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        let state = self.state();
        state.check(StoreOp::Get)?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut state = self.state();
        state.check(StoreOp::Create)?;
        if state.objects.contains_key(&key) {
            return Err(Error::StoreError(format!(
                "{} {} already exists",
                K::kind(&()),
                key
            )));
        }

        let mut created = obj.clone();
        created.meta_mut().resource_version = Some(state.bump());
        if has_spec(&created) {
            created.meta_mut().generation = Some(1);
        }
        state.writes.push((StoreOp::Create, key.clone()));
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut state = self.state();
        state.check(StoreOp::Update)?;
        let existing = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&key))?;

        let sent_version = obj.meta().resource_version.as_deref();
        if sent_version.is_some() && sent_version != existing.meta().resource_version.as_deref() {
            return Err(Error::StoreError(format!(
                "conflict updating {} {}: object has been modified",
                K::kind(&()),
                key
            )));
        }

        // status is only writable through update_status
        let mut updated = with_status(obj, &existing)?;
        let generation = existing.meta().generation;
        updated.meta_mut().generation = if field(&existing, "spec")? != field(obj, "spec")? {
            generation.map(|g| g + 1)
        } else {
            generation
        };
        updated.meta_mut().resource_version = Some(state.bump());
        state.writes.push((StoreOp::Update, key.clone()));
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut state = self.state();
        state.check(StoreOp::UpdateStatus)?;
        let existing = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(&key))?;

        let mut updated = with_status(&existing, obj)?;
        updated.meta_mut().resource_version = Some(state.bump());
        state.writes.push((StoreOp::UpdateStatus, key.clone()));
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state();
        state.check(StoreOp::Delete)?;
        match state.objects.remove(key) {
            Some(_) => {
                state.writes.push((StoreOp::Delete, key.clone()));
                Ok(())
            }
            None => Err(Self::not_found(key)),
        }
    }
}

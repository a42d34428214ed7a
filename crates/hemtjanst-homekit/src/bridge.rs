//! Presentation layer the sync adapter installs accessories into

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::accessory::{Accessory, AccessoryInfo, Value};
use crate::capability::category_for;

/// Id of the bridge's own accessory
pub const ROOT_ACCESSORY_ID: u64 = 1;

/// Accessory container exposed to controllers
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn add_accessory(&self, accessory: Arc<Accessory>);
    async fn remove_accessory(&self, id: u64);
    /// Swap the accessory with the same id in one step
    async fn replace_accessory(&self, accessory: Arc<Accessory>);
}

#[derive(Default)]
struct Counters {
    adds: AtomicUsize,
    replaces: AtomicUsize,
    removes: AtomicUsize,
}

/// In-process bridge keeping accessories in a map
pub struct MemoryBridge {
    root: Arc<Accessory>,
    accessories: Mutex<BTreeMap<u64, Arc<Accessory>>>,
    counters: Counters,
}

impl MemoryBridge {
    pub fn new(info: AccessoryInfo) -> Self {
        let root = Accessory::new(ROOT_ACCESSORY_ID, info, category_for("bridge"));
        root.set_reachability(true);
        info!(name = %root.info.name, "Bridge created");
        Self {
            root: Arc::new(root),
            accessories: Mutex::new(BTreeMap::new()),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<Accessory>>> {
        self.accessories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root(&self) -> Arc<Accessory> {
        self.root.clone()
    }

    pub fn accessory(&self, id: u64) -> Option<Arc<Accessory>> {
        self.lock().get(&id).cloned()
    }

    /// Installed accessories, root excluded, ordered by id
    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn adds(&self) -> usize {
        self.counters.adds.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.counters.replaces.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.counters.removes.load(Ordering::SeqCst)
    }

    /// Deliver a controller write to a characteristic
    ///
    /// Returns false if the accessory or characteristic is unknown or the
    /// characteristic is read-only.
    pub fn write(&self, accessory_id: u64, characteristic_id: u64, value: Value) -> bool {
        let Some(accessory) = self.accessory(accessory_id) else {
            warn!(accessory_id, "Write to unknown accessory");
            return false;
        };
        match accessory.characteristic(characteristic_id) {
            Some(c) => c.write_from_remote(value),
            None => {
                warn!(accessory_id, characteristic_id, "Write to unknown characteristic");
                false
            }
        }
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    async fn add_accessory(&self, accessory: Arc<Accessory>) {
        self.counters.adds.fetch_add(1, Ordering::SeqCst);
        info!(id = accessory.id, name = %accessory.info.name, "Accessory added");
        if self.lock().insert(accessory.id, accessory).is_some() {
            warn!("Accessory id was already installed");
        }
    }

    async fn remove_accessory(&self, id: u64) {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        match self.lock().remove(&id) {
            Some(accessory) => info!(id, name = %accessory.info.name, "Accessory removed"),
            None => debug!(id, "Remove of unknown accessory"),
        }
    }

    async fn replace_accessory(&self, accessory: Arc<Accessory>) {
        self.counters.replaces.fetch_add(1, Ordering::SeqCst);
        info!(id = accessory.id, name = %accessory.info.name, "Accessory replaced");
        self.lock().insert(accessory.id, accessory);
    }
}

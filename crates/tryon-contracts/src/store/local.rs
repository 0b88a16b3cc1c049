use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::backend::{StorageBackend, StorageFault};
use crate::gallery::{sort_newest_first, GalleryItem, ItemKind};
use crate::profile::UserProfile;

pub const SETTINGS_KEY: &str = "tryon.settings";
pub const GALLERY_KEY: &str = "tryon.gallery";
pub const PROFILE_KEY: &str = "tryon.profile";

/// Receives every storage fault the store swallows.
pub type FaultHook = Arc<dyn Fn(&StorageFault) + Send + Sync>;

/// Settings, gallery and profile over a durable backend.
///
/// The store is fails-soft: a backend fault is reported to the fault hook
/// and otherwise ignored, and the in-memory copy stays authoritative for the
/// rest of the process. Each public call locks the in-memory data, mutates
/// it and flushes the touched document before releasing the lock. Faults
/// reach the hook only after the lock is released, so a hook may call back
/// into the store.
///
/// Cloning is cheap and every clone observes the same data.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<LocalStoreInner>,
}

struct LocalStoreInner {
    backend: Mutex<Option<Arc<dyn StorageBackend>>>,
    data: Mutex<StoreData>,
    fault_hook: FaultHook,
    faults: AtomicU64,
}

#[derive(Debug, Default)]
struct StoreData {
    settings: IndexMap<String, Value>,
    gallery: Vec<GalleryItem>,
    profile: Option<UserProfile>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("faults", &self.fault_count())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl LocalStore {
    /// Loads all persisted documents from `backend`. Unreadable documents
    /// start out empty.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Self {
        Self::open_with_fault_hook(backend, Arc::new(log_fault))
    }

    pub fn open_with_fault_hook(backend: Arc<dyn StorageBackend>, fault_hook: FaultHook) -> Self {
        let store = Self {
            inner: Arc::new(LocalStoreInner {
                backend: Mutex::new(Some(Arc::clone(&backend))),
                data: Mutex::new(StoreData::default()),
                fault_hook,
                faults: AtomicU64::new(0),
            }),
        };

        let settings = store
            .collapse(load_document::<IndexMap<String, Value>>(
                backend.as_ref(),
                SETTINGS_KEY,
            ))
            .flatten()
            .unwrap_or_default();
        let gallery = store
            .collapse(load_document::<Vec<GalleryItem>>(backend.as_ref(), GALLERY_KEY))
            .flatten()
            .unwrap_or_default();
        let profile = store
            .collapse(load_document::<UserProfile>(backend.as_ref(), PROFILE_KEY))
            .flatten();

        {
            let mut data = store.data();
            data.settings = settings;
            data.gallery = gallery;
            data.profile = profile;
        }
        tracing::debug!("local store opened");
        store
    }

    /// Final flush, then detach from the backend. Later calls only touch
    /// memory.
    pub fn dispose(&self) {
        let mut results = Vec::new();
        {
            let data = self.data();
            for key in [SETTINGS_KEY, GALLERY_KEY, PROFILE_KEY] {
                results.push(self.persist(&data, key));
            }
        }
        if let Ok(mut backend) = self.inner.backend.lock() {
            backend.take();
        }
        results.into_iter().for_each(|result| {
            self.collapse(result);
        });
        tracing::debug!("local store disposed");
    }

    pub fn is_attached(&self) -> bool {
        self.inner
            .backend
            .lock()
            .map(|backend| backend.is_some())
            .unwrap_or(false)
    }

    pub fn fault_count(&self) -> u64 {
        self.inner.faults.load(Ordering::Relaxed)
    }

    pub fn set_setting(&self, key: &str, value: impl Into<Value>) {
        let result = {
            let mut data = self.data();
            data.settings.insert(key.to_string(), value.into());
            self.persist(&data, SETTINGS_KEY)
        };
        self.collapse(result);
    }

    pub fn get_setting(&self, key: &str) -> Option<Value> {
        self.data().settings.get(key).cloned()
    }

    /// String settings only; other value shapes read as absent.
    pub fn get_setting_str(&self, key: &str) -> Option<String> {
        self.get_setting(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn delete_setting(&self, key: &str) {
        let result = {
            let mut data = self.data();
            if data.settings.shift_remove(key).is_none() {
                return;
            }
            self.persist(&data, SETTINGS_KEY)
        };
        self.collapse(result);
    }

    /// Appends a new item and returns its id.
    pub fn save_gallery_item(&self, uri: &str, kind: ItemKind) -> String {
        match self.try_save_gallery_item(uri, kind) {
            Ok(item) => item.id,
            Err((item, fault)) => {
                self.report(&fault);
                item.id
            }
        }
    }

    /// Like [`LocalStore::save_gallery_item`] but hands the flush fault back
    /// to the caller instead of the fault hook. The item is kept in memory
    /// either way.
    pub fn try_save_gallery_item(
        &self,
        uri: &str,
        kind: ItemKind,
    ) -> Result<GalleryItem, (GalleryItem, StorageFault)> {
        let mut data = self.data();
        let item = GalleryItem::new(uri, kind);
        data.gallery.push(item.clone());
        match self.persist(&data, GALLERY_KEY) {
            Ok(()) => Ok(item),
            Err(fault) => Err((item, fault)),
        }
    }

    pub fn get_gallery_items(&self, kind: Option<ItemKind>) -> Vec<GalleryItem> {
        self.data()
            .gallery
            .iter()
            .filter(|item| kind.map(|wanted| item.kind == wanted).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn gallery_items_newest_first(&self, kind: Option<ItemKind>) -> Vec<GalleryItem> {
        let mut items = self.get_gallery_items(kind);
        sort_newest_first(&mut items);
        items
    }

    pub fn get_gallery_item(&self, id: &str) -> Option<GalleryItem> {
        self.data().gallery.iter().find(|item| item.id == id).cloned()
    }

    pub fn delete_gallery_item(&self, id: &str) {
        self.retain_gallery(|item| item.id != id);
    }

    pub fn set_user_profile(&self, profile: UserProfile) {
        let result = {
            let mut data = self.data();
            data.profile = Some(profile);
            self.persist(&data, PROFILE_KEY)
        };
        self.collapse(result);
    }

    pub fn get_user_profile(&self) -> Option<UserProfile> {
        self.data().profile.clone()
    }

    /// Drops generated results only. Captures, settings and profile stay.
    pub fn clear_cache(&self) -> usize {
        let removed = self.retain_gallery(|item| item.kind != ItemKind::Result);
        tracing::info!(removed, "cleared cached results");
        removed
    }

    pub fn clear_seed_or_demo_data(&self) -> usize {
        let removed = self.retain_gallery(|item| !item.is_seed_or_demo());
        if removed > 0 {
            tracing::info!(removed, "purged seed/demo gallery items");
        }
        removed
    }

    pub fn clear_all_data(&self) {
        let mut results = Vec::new();
        {
            let mut data = self.data();
            *data = StoreData::default();
            if let Some(backend) = self.backend() {
                for key in [SETTINGS_KEY, GALLERY_KEY, PROFILE_KEY] {
                    results.push(backend.remove(key));
                }
            }
        }
        results.into_iter().for_each(|result| {
            self.collapse(result);
        });
        tracing::info!("cleared all local data");
    }

    fn retain_gallery<F>(&self, keep: F) -> usize
    where
        F: Fn(&GalleryItem) -> bool,
    {
        let (removed, result) = {
            let mut data = self.data();
            let before = data.gallery.len();
            data.gallery.retain(|item| keep(item));
            let removed = before - data.gallery.len();
            if removed == 0 {
                return 0;
            }
            (removed, self.persist(&data, GALLERY_KEY))
        };
        self.collapse(result);
        removed
    }

    fn data(&self) -> MutexGuard<'_, StoreData> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backend(&self) -> Option<Arc<dyn StorageBackend>> {
        self.inner
            .backend
            .lock()
            .ok()
            .and_then(|backend| backend.as_ref().map(Arc::clone))
    }

    fn persist(&self, data: &StoreData, key: &str) -> Result<(), StorageFault> {
        let Some(backend) = self.backend() else {
            return Ok(());
        };
        let encoded = match key {
            SETTINGS_KEY => serde_json::to_string(&data.settings),
            GALLERY_KEY => serde_json::to_string(&data.gallery),
            _ => match &data.profile {
                Some(profile) => serde_json::to_string(profile),
                None => return backend.remove(key),
            },
        }
        .map_err(|err| StorageFault::Encode {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        backend.set(key, &encoded)
    }

    fn collapse<T>(&self, result: Result<T, StorageFault>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(fault) => {
                self.report(&fault);
                None
            }
        }
    }

    fn report(&self, fault: &StorageFault) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
        (self.inner.fault_hook)(fault);
    }
}

fn load_document<T: DeserializeOwned>(
    backend: &dyn StorageBackend,
    key: &str,
) -> Result<Option<T>, StorageFault> {
    let Some(raw) = backend.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| StorageFault::Corrupt {
            key: key.to_string(),
            reason: err.to_string(),
        })
}

fn log_fault(fault: &StorageFault) {
    tracing::warn!(error = %fault, "local storage fault; continuing with in-memory state");
}

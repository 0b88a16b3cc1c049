mod backend;
mod local;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, StorageFault};
pub use local::{FaultHook, LocalStore, GALLERY_KEY, PROFILE_KEY, SETTINGS_KEY};

/// Setting keys shared with the provider client.
pub mod keys {
    pub const PROVIDER_API_KEY: &str = "provider_api_key";
    pub const PROVIDER_MODEL: &str = "provider_model";
}

//! Persisted data model for the try-on client: gallery items, the user
//! profile, settings, the fails-soft local store that owns them, and the
//! attempt journal.

pub mod gallery;
pub mod journal;
pub mod profile;
pub mod store;

pub use gallery::{GalleryItem, ItemKind};
pub use journal::{AttemptEvent, AttemptJournal, BlockReason, JournalEntry};
pub use profile::UserProfile;
pub use store::{LocalStore, StorageBackend, StorageFault};

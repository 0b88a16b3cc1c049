//! Provider client and generation workflow for the virtual try-on core.
//!
//! [`ProviderClient`] talks to the image-edit provider through a
//! [`ProviderTransport`]; [`TryOnWorkflow`] drives one screen's attempt from
//! input validation to a saved gallery result.

pub mod client;
pub mod config;
pub mod error;
pub mod images;
pub mod prompt;
pub mod reply;
pub mod transport;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use client::{ConnectionStatus, Generated, ProviderClient, TryOnRequest};
pub use config::{ClientOptions, ProviderConfig};
pub use error::{ErrorKind, TryOnError};
pub use images::{ImageSlot, ImageSource};
pub use reply::{ImageRef, ProviderReply};
pub use transport::{HttpTransport, ProviderTransport};
pub use workflow::{
    present, CorrectiveAction, SubmitOutcome, TryOnSuccess, TryOnWorkflow, UserFacingError,
    WorkflowState,
};

pub mod adapters;
pub mod aggregate;
pub mod alerts;
pub mod error;
pub mod merger;
pub mod model;
pub mod normalization;
pub mod notify;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use error::{AdapterError, MergeAnomaly, SyncFailure};
pub use model::{PlatformId, SyncMode};

//! Bundled task handlers
//!
//! Two handlers ship with the crate: [`generate_clusters`] exercises the
//! artifact log and progress reporting, and [`external_sync`] exercises
//! circuit-breaker integration. Both are reference implementations a
//! caller can register as-is or use as a template for their own handlers.

mod external_sync;
mod generate_clusters;

pub use external_sync::{ExternalService, ExternalServiceError, ExternalSyncHandler};
pub use generate_clusters::GenerateClustersHandler;

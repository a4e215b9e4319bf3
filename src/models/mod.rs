//! # Data Models
//!
//! Sea-ORM entities for the three kinds of store: the global store
//! (`registry_entry`, `membership`), each tenant actor's embedded store
//! ([`tenant`]), and each conversation actor's embedded store ([`conversation`]).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod conversation;
pub mod membership;
pub mod registry_entry;
pub mod tenant;

pub use membership::Entity as Membership;
pub use registry_entry::Entity as RegistryEntry;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "outpost".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

//! Database migrations for the outpost service.
//!
//! Three independent schemas live here: the global store shared across
//! tenants ([`Migrator`]), the embedded store owned by each tenant actor
//! ([`TenantMigrator`]), and the embedded store owned by each conversation
//! actor ([`ConversationMigrator`]).

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_shop_registry;
mod m2025_01_01_000002_create_memberships;

pub mod conversation;
pub mod tenant;

pub use conversation::ConversationMigrator;
pub use tenant::TenantMigrator;

/// Migrator for the global store (storefront registry and memberships).
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_shop_registry::Migration),
            Box::new(m2025_01_01_000002_create_memberships::Migration),
        ]
    }
}

//! Schema for the embedded store owned by a single tenant actor.

use sea_orm_migration::prelude::*;

mod m2025_01_02_000001_create_organization;
mod m2025_01_02_000002_create_customers_and_segments;
mod m2025_01_02_000003_create_campaigns;
mod m2025_01_02_000004_create_connected_stores;

/// Migrator applied once when a tenant actor activates.
pub struct TenantMigrator;

#[async_trait::async_trait]
impl MigratorTrait for TenantMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_02_000001_create_organization::Migration),
            Box::new(m2025_01_02_000002_create_customers_and_segments::Migration),
            Box::new(m2025_01_02_000003_create_campaigns::Migration),
            Box::new(m2025_01_02_000004_create_connected_stores::Migration),
        ]
    }
}

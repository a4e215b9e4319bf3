//! Schema for the embedded store owned by a single conversation actor.

use sea_orm_migration::prelude::*;

mod m2025_01_03_000001_create_conversation;

/// Migrator applied once when a conversation actor activates.
pub struct ConversationMigrator;

#[async_trait::async_trait]
impl MigratorTrait for ConversationMigrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2025_01_03_000001_create_conversation::Migration)]
    }
}

//! Global Connection Registry
//!
//! The one table two tenants can contend over. Claims are atomic per domain:
//! a first claim is an insert guarded by the primary key, and taking over a
//! released or own entry is a compare-and-swap on the values just read. No
//! lock is held across calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::{DomainError, is_unique_violation};
use crate::models::registry_entry;
use crate::tenant::types::StoreStatus;

/// Current owner of a storefront domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegistryEntry {
    pub domain: String,
    pub tenant_slug: String,
    pub status: StoreStatus,
    pub connected_at: DateTime<Utc>,
}

impl TryFrom<registry_entry::Model> for RegistryEntry {
    type Error = DomainError;

    fn try_from(model: registry_entry::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            domain: model.domain,
            tenant_slug: model.tenant_slug,
            status: StoreStatus::from_stored(&model.status)?,
            connected_at: model.connected_at.with_timezone(&Utc),
        })
    }
}

impl RegistryEntry {
    /// True when this entry blocks `tenant` from claiming the domain.
    pub fn blocks(&self, tenant: &str) -> bool {
        self.status == StoreStatus::Active && self.tenant_slug != tenant
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(RegistryEntry),
    /// Another tenant holds the domain
    Lost { owner: String },
}

#[async_trait]
pub trait ShopRegistry: Send + Sync {
    async fn get(&self, domain: &str) -> Result<Option<RegistryEntry>, DomainError>;

    /// Claims `domain` for `tenant` unless another tenant holds it.
    async fn claim(
        &self,
        domain: &str,
        tenant: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DomainError>;

    /// Removes the entry if `tenant` holds it. Returns whether a row was removed.
    async fn release(&self, domain: &str, tenant: &str) -> Result<bool, DomainError>;
}

pub type SharedRegistry = Arc<dyn ShopRegistry>;

/// Registry backed by the global relational store.
#[derive(Debug, Clone)]
pub struct SeaOrmShopRegistry {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmShopRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load(&self, domain: &str) -> Result<Option<registry_entry::Model>, DomainError> {
        Ok(registry_entry::Entity::find_by_id(domain.to_string())
            .one(self.db.as_ref())
            .await?)
    }

    /// Compare-and-swap from the observed row to an active claim by `tenant`.
    async fn take_over(
        &self,
        observed: &registry_entry::Model,
        tenant: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let result = registry_entry::Entity::update_many()
            .set(registry_entry::ActiveModel {
                tenant_slug: Set(tenant.to_string()),
                status: Set(StoreStatus::Active.as_str().to_string()),
                connected_at: Set(now.into()),
                updated_at: Set(now.into()),
                ..Default::default()
            })
            .filter(registry_entry::Column::Domain.eq(observed.domain.as_str()))
            .filter(registry_entry::Column::TenantSlug.eq(observed.tenant_slug.as_str()))
            .filter(registry_entry::Column::Status.eq(observed.status.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn current_owner(&self, domain: &str) -> Result<String, DomainError> {
        Ok(self
            .load(domain)
            .await?
            .map(|row| row.tenant_slug)
            .unwrap_or_default())
    }

    fn lost(domain: &str, tenant: &str, owner: String) -> ClaimOutcome {
        warn!(domain = %domain, tenant = %tenant, owner = %owner, "Registry claim lost");
        counter!("registry_claim_conflicts_total").increment(1);
        ClaimOutcome::Lost { owner }
    }
}

#[async_trait]
impl ShopRegistry for SeaOrmShopRegistry {
    async fn get(&self, domain: &str) -> Result<Option<RegistryEntry>, DomainError> {
        self.load(domain)
            .await?
            .map(RegistryEntry::try_from)
            .transpose()
    }

    async fn claim(
        &self,
        domain: &str,
        tenant: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DomainError> {
        let inserted = registry_entry::ActiveModel {
            domain: Set(domain.to_string()),
            tenant_slug: Set(tenant.to_string()),
            status: Set(StoreStatus::Active.as_str().to_string()),
            connected_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await;

        match inserted {
            Ok(row) => {
                info!(domain = %domain, tenant = %tenant, "Registry entry created");
                return Ok(ClaimOutcome::Claimed(RegistryEntry::try_from(row)?));
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(domain = %domain, "Registry entry exists, checking ownership");
            }
            Err(err) => return Err(err.into()),
        }

        let Some(observed) = self.load(domain).await? else {
            // Released between the insert and the read; the caller may retry
            return Ok(Self::lost(domain, tenant, String::new()));
        };

        let entry = RegistryEntry::try_from(observed.clone())?;
        if entry.tenant_slug == tenant && entry.status == StoreStatus::Active {
            return Ok(ClaimOutcome::Claimed(entry));
        }
        if entry.blocks(tenant) {
            return Ok(Self::lost(domain, tenant, entry.tenant_slug));
        }

        if self.take_over(&observed, tenant, now).await? {
            info!(domain = %domain, tenant = %tenant, previous = %entry.tenant_slug, "Registry entry claimed");
            let row = self
                .load(domain)
                .await?
                .ok_or_else(|| DomainError::TransientStore("registry entry vanished".into()))?;
            return Ok(ClaimOutcome::Claimed(RegistryEntry::try_from(row)?));
        }

        let owner = self.current_owner(domain).await?;
        Ok(Self::lost(domain, tenant, owner))
    }

    async fn release(&self, domain: &str, tenant: &str) -> Result<bool, DomainError> {
        let result = registry_entry::Entity::delete_many()
            .filter(registry_entry::Column::Domain.eq(domain))
            .filter(registry_entry::Column::TenantSlug.eq(tenant))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            info!(domain = %domain, tenant = %tenant, "Registry entry released");
        }
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn registry() -> SeaOrmShopRegistry {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        SeaOrmShopRegistry::new(Arc::new(db))
    }

    #[tokio::test]
    async fn second_tenant_loses_claim() {
        let registry = registry().await;
        let now = Utc::now();

        let first = registry.claim("shop1.example", "acme", now).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        let second = registry.claim("shop1.example", "other", now).await.unwrap();
        assert_eq!(
            second,
            ClaimOutcome::Lost {
                owner: "acme".into()
            }
        );

        // Reclaiming by the owner is idempotent
        let again = registry.claim("shop1.example", "acme", now).await.unwrap();
        assert!(matches!(again, ClaimOutcome::Claimed(_)));
    }

    #[tokio::test]
    async fn release_only_by_owner() {
        let registry = registry().await;
        let now = Utc::now();
        registry.claim("shop1.example", "acme", now).await.unwrap();

        assert!(!registry.release("shop1.example", "other").await.unwrap());
        assert!(registry.get("shop1.example").await.unwrap().is_some());

        assert!(registry.release("shop1.example", "acme").await.unwrap());
        assert!(registry.get("shop1.example").await.unwrap().is_none());

        let claimed = registry.claim("shop1.example", "other", now).await.unwrap();
        assert!(matches!(claimed, ClaimOutcome::Claimed(entry) if entry.tenant_slug == "other"));
    }

    #[tokio::test]
    async fn inactive_entry_can_be_taken_over() {
        let registry = registry().await;
        let now = Utc::now();
        registry.claim("shop1.example", "acme", now).await.unwrap();

        registry_entry::Entity::update_many()
            .set(registry_entry::ActiveModel {
                status: Set(StoreStatus::Error.as_str().to_string()),
                ..Default::default()
            })
            .filter(registry_entry::Column::Domain.eq("shop1.example"))
            .exec(registry.db.as_ref())
            .await
            .unwrap();

        let outcome = registry.claim("shop1.example", "other", now).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(entry) if entry.tenant_slug == "other"));
    }
}

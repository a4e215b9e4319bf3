//! Global membership table: which tenants a user may act on.
//!
//! Writes are idempotent upserts keyed by (user, tenant), so the coordinator
//! can re-drive them after a partial failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{DomainError, is_unique_violation};
use crate::models::membership;
use crate::tenant::types::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GlobalMembership {
    pub user_id: Uuid,
    pub tenant_slug: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<membership::Model> for GlobalMembership {
    type Error = DomainError;

    fn try_from(model: membership::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: model.user_id,
            tenant_slug: model.tenant_slug,
            role: Role::from_stored(&model.role)?,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Inserts or updates the (user, tenant) row. Repeating it is harmless.
    async fn upsert(
        &self,
        user_id: Uuid,
        tenant: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<GlobalMembership, DomainError>;

    async fn find(&self, user_id: Uuid, tenant: &str)
    -> Result<Option<GlobalMembership>, DomainError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GlobalMembership>, DomainError>;
}

pub type SharedMemberships = Arc<dyn MembershipStore>;

#[derive(Debug, Clone)]
pub struct SeaOrmMembershipStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmMembershipStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load(
        &self,
        user_id: Uuid,
        tenant: &str,
    ) -> Result<Option<membership::Model>, DomainError> {
        Ok(
            membership::Entity::find_by_id((user_id, tenant.to_string()))
                .one(self.db.as_ref())
                .await?,
        )
    }
}

#[async_trait]
impl MembershipStore for SeaOrmMembershipStore {
    async fn upsert(
        &self,
        user_id: Uuid,
        tenant: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<GlobalMembership, DomainError> {
        if let Some(existing) = self.load(user_id, tenant).await? {
            if existing.role == role.as_str() {
                return GlobalMembership::try_from(existing);
            }
            let mut active: membership::ActiveModel = existing.into();
            active.role = Set(role.as_str().to_string());
            active.updated_at = Set(now.into());
            return GlobalMembership::try_from(active.update(self.db.as_ref()).await?);
        }

        let inserted = membership::ActiveModel {
            user_id: Set(user_id),
            tenant_slug: Set(tenant.to_string()),
            role: Set(role.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db.as_ref())
        .await;

        match inserted {
            Ok(row) => GlobalMembership::try_from(row),
            // A concurrent upsert for the same pair got there first
            Err(err) if is_unique_violation(&err) => {
                debug!(user_id = %user_id, tenant = %tenant, "Membership inserted concurrently");
                self.load(user_id, tenant)
                    .await?
                    .map(GlobalMembership::try_from)
                    .transpose()?
                    .ok_or_else(|| DomainError::TransientStore("membership vanished".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find(
        &self,
        user_id: Uuid,
        tenant: &str,
    ) -> Result<Option<GlobalMembership>, DomainError> {
        self.load(user_id, tenant)
            .await?
            .map(GlobalMembership::try_from)
            .transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GlobalMembership>, DomainError> {
        membership::Entity::find()
            .filter(membership::Column::UserId.eq(user_id))
            .order_by_asc(membership::Column::TenantSlug)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(GlobalMembership::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_role() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let store = SeaOrmMembershipStore::new(Arc::new(db));
        let user = Uuid::new_v4();
        let now = Utc::now();

        store.upsert(user, "acme", Role::Member, now).await.unwrap();
        store.upsert(user, "acme", Role::Member, now).await.unwrap();
        store.upsert(user, "beta", Role::Owner, now).await.unwrap();

        let listed = store.list_for_user(user).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].tenant_slug, "acme");

        let promoted = store.upsert(user, "acme", Role::Admin, now).await.unwrap();
        assert_eq!(promoted.role, Role::Admin);
        assert_eq!(
            store.find(user, "acme").await.unwrap().unwrap().role,
            Role::Admin
        );
        assert!(store.find(Uuid::new_v4(), "acme").await.unwrap().is_none());
    }
}

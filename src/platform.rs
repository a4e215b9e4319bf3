//! # Platform Wiring
//!
//! Builds the actor directories, global repositories and coordinators from
//! configuration and hands them out to the HTTP surface and the tests as one
//! cloneable value.

use std::sync::Arc;

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::config::AppConfig;
use crate::conversation::types::ConversationKey;
use crate::conversation::{ConversationContext, ConversationDirectory, ConversationHandle};
use crate::crypto::CryptoKey;
use crate::error::DomainError;
use crate::launch::LaunchOrchestrator;
use crate::mail::{SharedMailer, TracingEmailSender};
use crate::messaging::{SharedProvider, provider_from_config};
use crate::normalization::TenantSlug;
use crate::repositories::{
    SeaOrmMembershipStore, SeaOrmShopRegistry, SharedMemberships, SharedRegistry,
};
use crate::session::SessionCoordinator;
use crate::storefront::StorefrontLinker;
use crate::tenant::{TenantContext, TenantDirectory, TenantHandle};

/// Collaborators a platform is assembled from.
#[derive(Clone)]
pub struct PlatformParts {
    pub registry: SharedRegistry,
    pub memberships: SharedMemberships,
    pub provider: SharedProvider,
    pub mailer: SharedMailer,
    pub clock: SharedClock,
}

impl PlatformParts {
    /// Production collaborators: sea-orm repositories over `db`, the configured
    /// messaging provider, log-backed mail and the system clock.
    pub fn from_config(config: &AppConfig, db: Arc<DatabaseConnection>) -> Result<Self> {
        let provider =
            provider_from_config(&config.messaging).context("Failed to build messaging provider")?;

        Ok(Self {
            registry: Arc::new(SeaOrmShopRegistry::new(Arc::clone(&db))),
            memberships: Arc::new(SeaOrmMembershipStore::new(db)),
            provider,
            mailer: Arc::new(TracingEmailSender),
            clock: Arc::new(SystemClock),
        })
    }
}

#[derive(Clone)]
pub struct Platform {
    pub tenants: Arc<TenantDirectory>,
    pub conversations: Arc<ConversationDirectory>,
    pub registry: SharedRegistry,
    pub memberships: SharedMemberships,
    pub storefronts: StorefrontLinker,
    pub sessions: SessionCoordinator,
    pub launcher: LaunchOrchestrator,
    pub clock: SharedClock,
}

impl Platform {
    pub fn new(config: &AppConfig, parts: PlatformParts) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("OUTPOST_CRYPTO_KEY must be configured")?;
        let crypto_key = CryptoKey::new(key_bytes).context("Invalid crypto key")?;

        let tenants = Arc::new(TenantDirectory::new(
            TenantContext {
                data_dir: config.data_dir.clone(),
                crypto_key,
                clock: Arc::clone(&parts.clock),
            },
            config.actors.clone(),
        ));
        let conversations = Arc::new(ConversationDirectory::new(
            ConversationContext {
                data_dir: config.data_dir.clone(),
                provider: parts.provider,
                sender_id: config.messaging.sender_id.clone(),
                clock: Arc::clone(&parts.clock),
            },
            config.actors.clone(),
        ));

        let storefronts = StorefrontLinker::new(
            Arc::clone(&tenants),
            Arc::clone(&parts.registry),
            Arc::clone(&parts.clock),
        );
        let sessions = SessionCoordinator::new(
            Arc::clone(&tenants),
            Arc::clone(&parts.memberships),
            parts.mailer,
            config.email_from.clone(),
            Arc::clone(&parts.clock),
        );
        let launcher = LaunchOrchestrator::new(
            Arc::clone(&tenants),
            Arc::clone(&conversations),
            config.launch.concurrency,
        );

        info!(
            data_dir = %config.data_dir,
            launch_concurrency = config.launch.concurrency,
            "Platform assembled"
        );

        Ok(Self {
            tenants,
            conversations,
            registry: parts.registry,
            memberships: parts.memberships,
            storefronts,
            sessions,
            launcher,
            clock: parts.clock,
        })
    }

    pub async fn tenant(&self, slug: &TenantSlug) -> Result<TenantHandle, DomainError> {
        self.tenants.get(slug).await
    }

    pub async fn conversation(
        &self,
        tenant: &TenantSlug,
        phone: &str,
    ) -> Result<ConversationHandle, DomainError> {
        let key = ConversationKey::new(tenant.clone(), phone)?;
        self.conversations.get(&key).await
    }

    /// Stops every actor. Calls in flight report `ActorUnavailable`.
    pub fn shutdown(&self) {
        self.conversations.shutdown();
        self.tenants.shutdown();
    }
}

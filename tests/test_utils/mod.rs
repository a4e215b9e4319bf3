//! Test utilities: in-memory stores, recording collaborators and a fully
//! wired platform.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

use outpost::clock::ManualClock;
use outpost::config::{AppConfig, IN_MEMORY_DATA_DIR, LaunchConfig};
use outpost::conversation::types::MessageStatus;
use outpost::error::DomainError;
use outpost::mail::{EmailSender, MailError, OutgoingMail};
use outpost::messaging::{MessagingProvider, OutboundRequest, ProviderError, ProviderReceipt};
use outpost::normalization::TenantSlug;
use outpost::platform::{Platform, PlatformParts};
use outpost::repositories::{
    ClaimOutcome, GlobalMembership, MembershipStore, RegistryEntry, SeaOrmMembershipStore,
    SeaOrmShopRegistry, ShopRegistry,
};
use outpost::session::Principal;
use outpost::tenant::types::Role;

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Configuration with every actor store in memory.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        data_dir: IN_MEMORY_DATA_DIR.to_string(),
        database_url: "sqlite::memory:".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![42u8; 32]),
        storefront_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        launch: LaunchConfig { concurrency: 4 },
        ..AppConfig::default()
    }
}

/// Sets up an in-memory global store with all migrations applied.
///
/// The pool is pinned to one connection so every caller sees the same database.
pub async fn setup_global_db() -> Result<Arc<DatabaseConnection>> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn slug(raw: &str) -> TenantSlug {
    TenantSlug::parse(raw).unwrap()
}

/// Provider that records every send and rejects configured recipients.
#[derive(Default)]
pub struct RecordingProvider {
    sent: Mutex<Vec<OutboundRequest>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingProvider {
    pub fn reject(&self, phone: &str) {
        self.rejected.lock().unwrap().insert(phone.to_string());
    }

    pub fn accept(&self, phone: &str) {
        self.rejected.lock().unwrap().remove(phone);
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, phone: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.to == phone)
            .count()
    }
}

#[async_trait]
impl MessagingProvider for RecordingProvider {
    async fn send(&self, request: &OutboundRequest) -> Result<ProviderReceipt, ProviderError> {
        self.sent.lock().unwrap().push(request.clone());
        if self.rejected.lock().unwrap().contains(&request.to) {
            return Err(ProviderError::Rejected {
                status: 400,
                body: "unreachable recipient".to_string(),
            });
        }
        Ok(ProviderReceipt {
            provider_message_id: format!("pm-{}", Uuid::new_v4()),
            status: MessageStatus::Sent,
        })
    }
}

/// Mailer that keeps every message.
#[derive(Default)]
pub struct RecordingMailer {
    outbox: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn outbox(&self) -> Vec<OutgoingMail> {
        self.outbox.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("relay unavailable".to_string()));
        }
        self.outbox.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Membership store whose upserts can be made to fail.
pub struct FlakyMemberships {
    inner: SeaOrmMembershipStore,
    failing: AtomicBool,
}

impl FlakyMemberships {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            inner: SeaOrmMembershipStore::new(db),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipStore for FlakyMemberships {
    async fn upsert(
        &self,
        user_id: Uuid,
        tenant: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<GlobalMembership, DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::TransientStore("global store offline".to_string()));
        }
        self.inner.upsert(user_id, tenant, role, now).await
    }

    async fn find(
        &self,
        user_id: Uuid,
        tenant: &str,
    ) -> Result<Option<GlobalMembership>, DomainError> {
        self.inner.find(user_id, tenant).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<GlobalMembership>, DomainError> {
        self.inner.list_for_user(user_id).await
    }
}

/// Registry whose reads can be made stale, reproducing two tenants that both
/// pass the ownership check before either claims.
pub struct StaleReadRegistry {
    inner: SeaOrmShopRegistry,
    stale: AtomicBool,
}

impl StaleReadRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            inner: SeaOrmShopRegistry::new(db),
            stale: AtomicBool::new(false),
        }
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShopRegistry for StaleReadRegistry {
    async fn get(&self, domain: &str) -> Result<Option<RegistryEntry>, DomainError> {
        if self.stale.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(domain).await
    }

    async fn claim(
        &self,
        domain: &str,
        tenant: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DomainError> {
        self.inner.claim(domain, tenant, now).await
    }

    async fn release(&self, domain: &str, tenant: &str) -> Result<bool, DomainError> {
        self.inner.release(domain, tenant).await
    }
}

/// A platform over in-memory stores with its test doubles exposed.
pub struct TestPlatform {
    pub config: AppConfig,
    pub platform: Platform,
    pub db: Arc<DatabaseConnection>,
    pub provider: Arc<RecordingProvider>,
    pub mailer: Arc<RecordingMailer>,
    pub memberships: Arc<FlakyMemberships>,
    pub registry: Arc<StaleReadRegistry>,
    pub clock: ManualClock,
}

impl TestPlatform {
    pub async fn new() -> Result<Self> {
        let config = test_config();
        let db = setup_global_db().await?;
        let provider = Arc::new(RecordingProvider::default());
        let mailer = Arc::new(RecordingMailer::default());
        let memberships = Arc::new(FlakyMemberships::new(Arc::clone(&db)));
        let registry = Arc::new(StaleReadRegistry::new(Arc::clone(&db)));
        let clock = ManualClock::new(epoch());

        let platform = Platform::new(
            &config,
            PlatformParts {
                registry: registry.clone(),
                memberships: memberships.clone(),
                provider: provider.clone(),
                mailer: mailer.clone(),
                clock: Arc::new(clock.clone()),
            },
        )?;

        Ok(Self {
            config,
            platform,
            db,
            provider,
            mailer,
            memberships,
            registry,
            clock,
        })
    }

    /// Creates `slug` owned by a fresh user and returns that owner.
    pub async fn tenant_with_owner(&self, raw_slug: &str) -> Result<Principal> {
        let owner = Principal::new(Uuid::new_v4());
        self.platform
            .sessions
            .create_organization(
                &owner,
                &slug(raw_slug),
                format!("{raw_slug} inc"),
                None,
                Some(format!("owner@{raw_slug}.example")),
            )
            .await?;
        Ok(owner)
    }
}

//! # Tenant Actor
//!
//! One actor per tenant slug. It owns the tenant's embedded store
//! (organization, members, invitations, customers, segments, campaigns and
//! connected storefronts) and is the only writer to it.

pub mod store;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

use crate::actor::{Actor, ActorDirectory, ActorHandle, Reply};
use crate::clock::SharedClock;
use crate::crypto::CryptoKey;
use crate::db::{StoreLocation, open_embedded_store};
use crate::error::DomainError;
use crate::normalization::TenantSlug;
use migration::TenantMigrator;

pub use store::{INVITATION_TTL_DAYS, TenantStore};
use types::{
    AcceptedInvitation, Campaign, CampaignTargets, ConnectedStore, Customer, ImportReport,
    Invitation, IssuedInvitation, LaunchTally, Member, NewCampaign, NewCustomer, NewSegment,
    Organization, Role, Segment, StoreCredentials,
};

/// Shared dependencies of every tenant actor.
#[derive(Clone)]
pub struct TenantContext {
    pub data_dir: String,
    pub crypto_key: CryptoKey,
    pub clock: SharedClock,
}

pub type TenantDirectory = ActorDirectory<TenantActor>;
pub type TenantHandle = ActorHandle<TenantActor>;

pub enum TenantMessage {
    CreateOrganization {
        name: String,
        logo_url: Option<String>,
        owner: Uuid,
        owner_email: Option<String>,
        reply: Reply<(Organization, Member)>,
    },
    GetOrganization {
        reply: Reply<Organization>,
    },
    GetMembers {
        reply: Reply<Vec<Member>>,
    },
    GetMember {
        user_id: Uuid,
        reply: Reply<Option<Member>>,
    },
    CreateInvitation {
        email: String,
        role: Role,
        invited_by: Uuid,
        reply: Reply<IssuedInvitation>,
    },
    ListInvitations {
        reply: Reply<Vec<Invitation>>,
    },
    AcceptInvitation {
        token: String,
        user_id: Uuid,
        reply: Reply<AcceptedInvitation>,
    },
    RevokeInvitation {
        invitation_id: Uuid,
        revoked_by: Uuid,
        reply: Reply<Invitation>,
    },
    CreateCustomer {
        input: NewCustomer,
        reply: Reply<Customer>,
    },
    ImportCustomers {
        rows: Vec<NewCustomer>,
        reply: Reply<ImportReport>,
    },
    ListCustomers {
        reply: Reply<Vec<Customer>>,
    },
    CreateSegment {
        input: NewSegment,
        reply: Reply<Segment>,
    },
    ListSegments {
        reply: Reply<Vec<Segment>>,
    },
    AddCustomersToSegment {
        segment_id: Uuid,
        customer_ids: Vec<Uuid>,
        reply: Reply<Vec<Uuid>>,
    },
    ListSegmentMembers {
        segment_id: Uuid,
        reply: Reply<Vec<Customer>>,
    },
    CreateCampaign {
        input: NewCampaign,
        reply: Reply<Campaign>,
    },
    GetCampaign {
        campaign_id: Uuid,
        reply: Reply<Campaign>,
    },
    ListCampaigns {
        reply: Reply<Vec<Campaign>>,
    },
    SetCampaignSegments {
        campaign_id: Uuid,
        segment_ids: Vec<Uuid>,
        reply: Reply<Campaign>,
    },
    ResolveCampaignTargets {
        campaign_id: Uuid,
        reply: Reply<CampaignTargets>,
    },
    RecordLaunch {
        campaign_id: Uuid,
        tally: LaunchTally,
        reply: Reply<Campaign>,
    },
    MarkCampaignFailed {
        campaign_id: Uuid,
        reply: Reply<Campaign>,
    },
    ConnectStore {
        credentials: StoreCredentials,
        reply: Reply<ConnectedStore>,
    },
    DisconnectStore {
        domain: String,
        reply: Reply<Option<ConnectedStore>>,
    },
    ListConnectedStores {
        reply: Reply<Vec<ConnectedStore>>,
    },
    StoreAccessToken {
        domain: String,
        reply: Reply<String>,
    },
}

pub struct TenantActor {
    store: TenantStore,
    clock: SharedClock,
    durable: bool,
}

#[async_trait]
impl Actor for TenantActor {
    type Key = TenantSlug;
    type Message = TenantMessage;
    type Context = TenantContext;

    const KIND: &'static str = "tenant";

    async fn activate(key: &TenantSlug, context: &TenantContext) -> Result<Self, DomainError> {
        let location = StoreLocation::resolve(&context.data_dir, format!("tenants/{key}.sqlite"));
        let db = open_embedded_store::<TenantMigrator>(&location).await?;
        let store = TenantStore::open(key.clone(), db, context.crypto_key.clone()).await?;

        Ok(Self {
            store,
            clock: context.clock.clone(),
            durable: location.is_durable(),
        })
    }

    fn passivates(&self) -> bool {
        self.durable
    }

    async fn handle(&mut self, message: TenantMessage) {
        let now = self.clock.now();
        let store = &mut self.store;

        match message {
            TenantMessage::CreateOrganization {
                name,
                logo_url,
                owner,
                owner_email,
                reply,
            } => {
                let result = store
                    .create_organization(&name, logo_url, owner, owner_email, now)
                    .await;
                let _ = reply.send(result);
            }
            TenantMessage::GetOrganization { reply } => {
                let _ = reply.send(store.get_organization().await);
            }
            TenantMessage::GetMembers { reply } => {
                let _ = reply.send(store.get_members().await);
            }
            TenantMessage::GetMember { user_id, reply } => {
                let _ = reply.send(store.get_member(user_id).await);
            }
            TenantMessage::CreateInvitation {
                email,
                role,
                invited_by,
                reply,
            } => {
                let _ = reply.send(store.create_invitation(&email, role, invited_by, now).await);
            }
            TenantMessage::ListInvitations { reply } => {
                let _ = reply.send(store.list_invitations(now).await);
            }
            TenantMessage::AcceptInvitation {
                token,
                user_id,
                reply,
            } => {
                let _ = reply.send(store.accept_invitation(&token, user_id, now).await);
            }
            TenantMessage::RevokeInvitation {
                invitation_id,
                revoked_by,
                reply,
            } => {
                let _ = reply.send(store.revoke_invitation(invitation_id, revoked_by, now).await);
            }
            TenantMessage::CreateCustomer { input, reply } => {
                let _ = reply.send(store.create_customer(&input, now).await);
            }
            TenantMessage::ImportCustomers { rows, reply } => {
                let _ = reply.send(store.import_customers(&rows, now).await);
            }
            TenantMessage::ListCustomers { reply } => {
                let _ = reply.send(store.list_customers().await);
            }
            TenantMessage::CreateSegment { input, reply } => {
                let _ = reply.send(store.create_segment(&input, now).await);
            }
            TenantMessage::ListSegments { reply } => {
                let _ = reply.send(store.list_segments().await);
            }
            TenantMessage::AddCustomersToSegment {
                segment_id,
                customer_ids,
                reply,
            } => {
                let result = store
                    .add_customers_to_segment(segment_id, &customer_ids, now)
                    .await;
                let _ = reply.send(result);
            }
            TenantMessage::ListSegmentMembers { segment_id, reply } => {
                let _ = reply.send(store.list_segment_members(segment_id).await);
            }
            TenantMessage::CreateCampaign { input, reply } => {
                let _ = reply.send(store.create_campaign(&input, now).await);
            }
            TenantMessage::GetCampaign { campaign_id, reply } => {
                let _ = reply.send(store.get_campaign(campaign_id).await);
            }
            TenantMessage::ListCampaigns { reply } => {
                let _ = reply.send(store.list_campaigns().await);
            }
            TenantMessage::SetCampaignSegments {
                campaign_id,
                segment_ids,
                reply,
            } => {
                let result = store
                    .set_campaign_segments(campaign_id, &segment_ids, now)
                    .await;
                let _ = reply.send(result);
            }
            TenantMessage::ResolveCampaignTargets { campaign_id, reply } => {
                let _ = reply.send(store.resolve_campaign_targets(campaign_id).await);
            }
            TenantMessage::RecordLaunch {
                campaign_id,
                tally,
                reply,
            } => {
                let _ = reply.send(store.record_launch(campaign_id, tally, now).await);
            }
            TenantMessage::MarkCampaignFailed { campaign_id, reply } => {
                let _ = reply.send(store.mark_campaign_failed(campaign_id, now).await);
            }
            TenantMessage::ConnectStore { credentials, reply } => {
                let _ = reply.send(store.connect_store(&credentials, now).await);
            }
            TenantMessage::DisconnectStore { domain, reply } => {
                let _ = reply.send(store.disconnect_store(&domain, now).await);
            }
            TenantMessage::ListConnectedStores { reply } => {
                let _ = reply.send(store.list_connected_stores().await);
            }
            TenantMessage::StoreAccessToken { domain, reply } => {
                let _ = reply.send(store.store_access_token(&domain).await);
            }
        }
    }
}

/// Typed requests against a tenant actor.
impl ActorHandle<TenantActor> {
    pub async fn create_organization(
        &self,
        name: String,
        logo_url: Option<String>,
        owner: Uuid,
        owner_email: Option<String>,
    ) -> Result<(Organization, Member), DomainError> {
        self.ask("create_organization", |reply| {
            TenantMessage::CreateOrganization {
                name,
                logo_url,
                owner,
                owner_email,
                reply,
            }
        })
        .await
    }

    pub async fn get_organization(&self) -> Result<Organization, DomainError> {
        self.ask("get_organization", |reply| TenantMessage::GetOrganization {
            reply,
        })
        .await
    }

    pub async fn get_members(&self) -> Result<Vec<Member>, DomainError> {
        self.ask("get_members", |reply| TenantMessage::GetMembers { reply })
            .await
    }

    pub async fn get_member(&self, user_id: Uuid) -> Result<Option<Member>, DomainError> {
        self.ask("get_member", |reply| TenantMessage::GetMember { user_id, reply })
            .await
    }

    pub async fn create_invitation(
        &self,
        email: String,
        role: Role,
        invited_by: Uuid,
    ) -> Result<IssuedInvitation, DomainError> {
        self.ask("create_invitation", |reply| TenantMessage::CreateInvitation {
            email,
            role,
            invited_by,
            reply,
        })
        .await
    }

    pub async fn list_invitations(&self) -> Result<Vec<Invitation>, DomainError> {
        self.ask("list_invitations", |reply| TenantMessage::ListInvitations {
            reply,
        })
        .await
    }

    pub async fn accept_invitation(
        &self,
        token: String,
        user_id: Uuid,
    ) -> Result<AcceptedInvitation, DomainError> {
        self.ask("accept_invitation", |reply| TenantMessage::AcceptInvitation {
            token,
            user_id,
            reply,
        })
        .await
    }

    pub async fn revoke_invitation(
        &self,
        invitation_id: Uuid,
        revoked_by: Uuid,
    ) -> Result<Invitation, DomainError> {
        self.ask("revoke_invitation", |reply| TenantMessage::RevokeInvitation {
            invitation_id,
            revoked_by,
            reply,
        })
        .await
    }

    pub async fn create_customer(&self, input: NewCustomer) -> Result<Customer, DomainError> {
        self.ask("create_customer", |reply| TenantMessage::CreateCustomer {
            input,
            reply,
        })
        .await
    }

    pub async fn import_customers(
        &self,
        rows: Vec<NewCustomer>,
    ) -> Result<ImportReport, DomainError> {
        self.ask("import_customers", |reply| TenantMessage::ImportCustomers {
            rows,
            reply,
        })
        .await
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, DomainError> {
        self.ask("list_customers", |reply| TenantMessage::ListCustomers { reply })
            .await
    }

    pub async fn create_segment(&self, input: NewSegment) -> Result<Segment, DomainError> {
        self.ask("create_segment", |reply| TenantMessage::CreateSegment {
            input,
            reply,
        })
        .await
    }

    pub async fn list_segments(&self) -> Result<Vec<Segment>, DomainError> {
        self.ask("list_segments", |reply| TenantMessage::ListSegments { reply })
            .await
    }

    pub async fn add_customers_to_segment(
        &self,
        segment_id: Uuid,
        customer_ids: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, DomainError> {
        self.ask("add_customers_to_segment", |reply| {
            TenantMessage::AddCustomersToSegment {
                segment_id,
                customer_ids,
                reply,
            }
        })
        .await
    }

    pub async fn list_segment_members(&self, segment_id: Uuid) -> Result<Vec<Customer>, DomainError> {
        self.ask("list_segment_members", |reply| {
            TenantMessage::ListSegmentMembers { segment_id, reply }
        })
        .await
    }

    pub async fn create_campaign(&self, input: NewCampaign) -> Result<Campaign, DomainError> {
        self.ask("create_campaign", |reply| TenantMessage::CreateCampaign {
            input,
            reply,
        })
        .await
    }

    pub async fn get_campaign(&self, campaign_id: Uuid) -> Result<Campaign, DomainError> {
        self.ask("get_campaign", |reply| TenantMessage::GetCampaign {
            campaign_id,
            reply,
        })
        .await
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, DomainError> {
        self.ask("list_campaigns", |reply| TenantMessage::ListCampaigns { reply })
            .await
    }

    pub async fn set_campaign_segments(
        &self,
        campaign_id: Uuid,
        segment_ids: Vec<Uuid>,
    ) -> Result<Campaign, DomainError> {
        self.ask("set_campaign_segments", |reply| {
            TenantMessage::SetCampaignSegments {
                campaign_id,
                segment_ids,
                reply,
            }
        })
        .await
    }

    pub async fn resolve_campaign_targets(
        &self,
        campaign_id: Uuid,
    ) -> Result<CampaignTargets, DomainError> {
        self.ask("resolve_campaign_targets", |reply| {
            TenantMessage::ResolveCampaignTargets { campaign_id, reply }
        })
        .await
    }

    pub async fn record_launch(
        &self,
        campaign_id: Uuid,
        tally: LaunchTally,
    ) -> Result<Campaign, DomainError> {
        self.ask("record_launch", |reply| TenantMessage::RecordLaunch {
            campaign_id,
            tally,
            reply,
        })
        .await
    }

    pub async fn mark_campaign_failed(&self, campaign_id: Uuid) -> Result<Campaign, DomainError> {
        self.ask("mark_campaign_failed", |reply| {
            TenantMessage::MarkCampaignFailed { campaign_id, reply }
        })
        .await
    }

    pub async fn connect_store(
        &self,
        credentials: StoreCredentials,
    ) -> Result<ConnectedStore, DomainError> {
        self.ask("connect_store", |reply| TenantMessage::ConnectStore {
            credentials,
            reply,
        })
        .await
    }

    pub async fn disconnect_store(
        &self,
        domain: String,
    ) -> Result<Option<ConnectedStore>, DomainError> {
        self.ask("disconnect_store", |reply| TenantMessage::DisconnectStore {
            domain,
            reply,
        })
        .await
    }

    pub async fn list_connected_stores(&self) -> Result<Vec<ConnectedStore>, DomainError> {
        self.ask("list_connected_stores", |reply| {
            TenantMessage::ListConnectedStores { reply }
        })
        .await
    }

    pub async fn store_access_token(&self, domain: String) -> Result<String, DomainError> {
        self.ask("store_access_token", |reply| TenantMessage::StoreAccessToken {
            domain,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ActorConfig;
    use crate::config::IN_MEMORY_DATA_DIR;
    use crate::tenant::types::InvitationStatus;

    fn directory(clock: ManualClock) -> TenantDirectory {
        TenantDirectory::new(
            TenantContext {
                data_dir: IN_MEMORY_DATA_DIR.to_string(),
                crypto_key: CryptoKey::new(vec![9u8; 32]).unwrap(),
                clock: Arc::new(clock),
            },
            ActorConfig::default(),
        )
    }

    async fn provisioned(directory: &TenantDirectory) -> (TenantHandle, Uuid) {
        let handle = directory
            .get(&TenantSlug::parse("acme").unwrap())
            .await
            .unwrap();
        let owner = Uuid::new_v4();
        handle
            .create_organization("Acme".into(), None, owner, None)
            .await
            .unwrap();
        (handle, owner)
    }

    #[tokio::test]
    async fn invitation_lifecycle_through_the_mailbox() {
        let clock = ManualClock::new(Utc::now());
        let directory = directory(clock.clone());
        let (tenant, owner) = provisioned(&directory).await;

        let issued = tenant
            .create_invitation("new@acme.test".into(), Role::Member, owner)
            .await
            .unwrap();
        let duplicate = tenant
            .create_invitation("NEW@acme.test".into(), Role::Admin, owner)
            .await;
        assert!(matches!(duplicate, Err(DomainError::AlreadyExists { .. })));

        let user = Uuid::new_v4();
        let accepted = tenant
            .accept_invitation(issued.token.clone(), user)
            .await
            .unwrap();
        assert!(!accepted.replayed);
        assert_eq!(accepted.member.role, Role::Member);

        let replay = tenant
            .accept_invitation(issued.token.clone(), user)
            .await
            .unwrap();
        assert!(replay.replayed);

        let stranger = tenant.accept_invitation(issued.token, Uuid::new_v4()).await;
        assert!(matches!(
            stranger,
            Err(DomainError::InvitationAlreadyAccepted { .. })
        ));
        assert_eq!(tenant.get_members().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_invitation_flips_on_access() {
        let clock = ManualClock::new(Utc::now());
        let directory = directory(clock.clone());
        let (tenant, owner) = provisioned(&directory).await;

        let issued = tenant
            .create_invitation("late@acme.test".into(), Role::Member, owner)
            .await
            .unwrap();
        clock.advance(Duration::days(INVITATION_TTL_DAYS) + Duration::minutes(1));

        let result = tenant.accept_invitation(issued.token, Uuid::new_v4()).await;
        assert!(matches!(result, Err(DomainError::InvitationExpired { .. })));

        let listed = tenant.list_invitations().await.unwrap();
        assert_eq!(listed[0].status, InvitationStatus::Expired);

        // A new invitation for the same address is allowed once the old one expired
        tenant
            .create_invitation("late@acme.test".into(), Role::Member, owner)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn revoked_invitation_cannot_be_accepted() {
        let directory = directory(ManualClock::new(Utc::now()));
        let (tenant, owner) = provisioned(&directory).await;

        let issued = tenant
            .create_invitation("gone@acme.test".into(), Role::Admin, owner)
            .await
            .unwrap();
        let revoked = tenant
            .revoke_invitation(issued.invitation.id, owner)
            .await
            .unwrap();
        assert_eq!(revoked.status, InvitationStatus::Revoked);

        let result = tenant.accept_invitation(issued.token, Uuid::new_v4()).await;
        assert!(matches!(result, Err(DomainError::InvitationRevoked { .. })));
    }

    #[tokio::test]
    async fn only_admins_invite() {
        let directory = directory(ManualClock::new(Utc::now()));
        let (tenant, owner) = provisioned(&directory).await;

        let issued = tenant
            .create_invitation("plain@acme.test".into(), Role::Member, owner)
            .await
            .unwrap();
        let member = Uuid::new_v4();
        tenant.accept_invitation(issued.token, member).await.unwrap();

        let result = tenant
            .create_invitation("other@acme.test".into(), Role::Member, member)
            .await;
        assert!(matches!(result, Err(DomainError::Unauthorized(_))));
    }
}

//! Operations over one tenant's embedded store.
//!
//! Only the owning tenant actor calls into this module, one call at a time.
//! Every mutating operation runs inside a single transaction; returning early
//! drops the transaction and rolls back everything it wrote.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::{self, CryptoKey};
use crate::error::{DomainError, Resource};
use crate::models::tenant::{
    campaign, campaign_segment, connected_store, customer, invitation, member, organization,
    segment, segment_member,
};
use crate::normalization::{TenantSlug, normalize_domain, normalize_email, normalize_phone};
use crate::tenant::types::{
    AcceptedInvitation, Campaign, CampaignStatus, CampaignTargets, ConnectedStore, Customer,
    CustomerStatus, ImportReport, ImportRowError, Invitation, InvitationStatus, IssuedInvitation,
    LaunchTally, Member, NewCampaign, NewCustomer, NewSegment, Organization, Role, Segment,
    SegmentKind, SegmentStatus, StoreCredentials, StoreStatus,
};

/// Lifetime of an invitation from creation.
pub const INVITATION_TTL_DAYS: i64 = 7;

static TIMEZONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(UTC|[A-Za-z]+(/[A-Za-z0-9_+\-]+)+)$").expect("timezone pattern is valid")
});

/// Customer input after validation and normalization.
#[derive(Debug, Clone)]
struct ValidCustomer {
    email: Option<String>,
    phone: Option<String>,
    email_opt_in: bool,
    sms_opt_in: bool,
    tags: Vec<String>,
}

fn validate_customer(input: &NewCustomer) -> Result<ValidCustomer, DomainError> {
    let email = input
        .email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(normalize_email)
        .transpose()?;
    let phone = input
        .phone
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(normalize_phone)
        .transpose()?;

    if email.is_none() && phone.is_none() {
        return Err(DomainError::validation(
            "contact",
            "a customer needs an email or a phone number",
        ));
    }

    let tags: BTreeSet<String> = input
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(ValidCustomer {
        email,
        phone,
        email_opt_in: input.email_opt_in,
        sms_opt_in: input.sms_opt_in,
        tags: tags.into_iter().collect(),
    })
}

fn require_name(field: &'static str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(field, "must not be empty"));
    }
    if trimmed.len() > 200 {
        return Err(DomainError::validation(field, "must be at most 200 characters"));
    }
    Ok(trimmed.to_string())
}

/// Tenant-local state behind the actor's mailbox.
pub struct TenantStore {
    slug: TenantSlug,
    db: DatabaseConnection,
    crypto_key: CryptoKey,
    provisioned: bool,
}

impl TenantStore {
    /// Wraps an opened, migrated store.
    pub async fn open(
        slug: TenantSlug,
        db: DatabaseConnection,
        crypto_key: CryptoKey,
    ) -> Result<Self, DomainError> {
        let provisioned = organization::Entity::find().one(&db).await?.is_some();
        Ok(Self {
            slug,
            db,
            crypto_key,
            provisioned,
        })
    }

    pub fn slug(&self) -> &TenantSlug {
        &self.slug
    }

    fn require_provisioned(&self) -> Result<(), DomainError> {
        if self.provisioned {
            Ok(())
        } else {
            Err(DomainError::not_found(Resource::Tenant, &self.slug))
        }
    }

    // ---- organization -------------------------------------------------

    pub async fn create_organization(
        &mut self,
        name: &str,
        logo_url: Option<String>,
        owner: Uuid,
        owner_email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Organization, Member), DomainError> {
        let name = require_name("name", name)?;
        let owner_email = owner_email.as_deref().map(normalize_email).transpose()?;

        let txn = self.db.begin().await?;

        if organization::Entity::find().one(&txn).await?.is_some() {
            return Err(DomainError::already_exists(Resource::Tenant, &self.slug));
        }

        let org = organization::ActiveModel {
            slug: Set(self.slug.to_string()),
            name: Set(name),
            logo_url: Set(logo_url),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let owner = member::ActiveModel {
            user_id: Set(owner),
            email: Set(owner_email),
            role: Set(Role::Owner.as_str().to_string()),
            joined_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        self.provisioned = true;

        info!(tenant = %self.slug, owner = %owner.user_id, "Organization created");
        Ok((org.into(), Member::try_from(owner)?))
    }

    pub async fn get_organization(&self) -> Result<Organization, DomainError> {
        organization::Entity::find()
            .one(&self.db)
            .await?
            .map(Organization::from)
            .ok_or_else(|| DomainError::not_found(Resource::Tenant, &self.slug))
    }

    // ---- members ------------------------------------------------------

    pub async fn get_members(&self) -> Result<Vec<Member>, DomainError> {
        self.require_provisioned()?;
        member::Entity::find()
            .order_by_asc(member::Column::JoinedAt)
            .order_by_asc(member::Column::UserId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Member::try_from)
            .collect()
    }

    pub async fn get_member(&self, user_id: Uuid) -> Result<Option<Member>, DomainError> {
        self.require_provisioned()?;
        member::Entity::find_by_id(user_id)
            .one(&self.db)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn require_role<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        allowed: &[Role],
    ) -> Result<Member, DomainError> {
        let member = member::Entity::find_by_id(user_id)
            .one(conn)
            .await?
            .map(Member::try_from)
            .transpose()?
            .ok_or_else(|| {
                DomainError::Unauthorized(format!("user is not a member of '{}'", self.slug))
            })?;

        if !allowed.contains(&member.role) {
            return Err(DomainError::Unauthorized(format!(
                "role '{}' may not perform this action",
                member.role
            )));
        }
        Ok(member)
    }

    // ---- invitations --------------------------------------------------

    /// Flips pending invitations whose expiry has passed to `expired`.
    async fn expire_stale_invitations<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<usize, DomainError> {
        let pending = invitation::Entity::find()
            .filter(invitation::Column::Status.eq(InvitationStatus::Pending.as_str()))
            .all(conn)
            .await?;

        let mut expired = 0;
        for row in pending {
            if row.expires_at.with_timezone(&Utc) >= now {
                continue;
            }
            let mut active: invitation::ActiveModel = row.into();
            active.status = Set(InvitationStatus::Expired.as_str().to_string());
            active.update(conn).await?;
            expired += 1;
        }

        if expired > 0 {
            debug!(tenant = %self.slug, expired, "Expired stale invitations");
        }
        Ok(expired)
    }

    pub async fn create_invitation(
        &self,
        email: &str,
        role: Role,
        invited_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvitation, DomainError> {
        self.require_provisioned()?;
        let email = normalize_email(email)?;
        if role == Role::Owner {
            return Err(DomainError::validation(
                "role",
                "owner membership cannot be granted by invitation",
            ));
        }

        let txn = self.db.begin().await?;
        self.require_role(&txn, invited_by, &[Role::Owner, Role::Admin])
            .await?;
        self.expire_stale_invitations(&txn, now).await?;

        let already_member = member::Entity::find()
            .filter(member::Column::Email.eq(email.as_str()))
            .one(&txn)
            .await?;
        if already_member.is_some() {
            return Err(DomainError::already_exists(Resource::Member, &email));
        }

        let pending = invitation::Entity::find()
            .filter(invitation::Column::Email.eq(email.as_str()))
            .filter(invitation::Column::Status.eq(InvitationStatus::Pending.as_str()))
            .one(&txn)
            .await?;
        if pending.is_some() {
            return Err(DomainError::AlreadyExists {
                resource: Resource::Invitation,
                key: format!("pending invitation for {email}"),
            });
        }

        let token = crypto::generate_invitation_token();
        let created = invitation::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email),
            role: Set(role.as_str().to_string()),
            status: Set(InvitationStatus::Pending.as_str().to_string()),
            token_digest: Set(crypto::token_digest(&token)),
            invited_by: Set(invited_by),
            expires_at: Set((now + Duration::days(INVITATION_TTL_DAYS)).into()),
            created_at: Set(now.into()),
            accepted_at: Set(None),
            accepted_by: Set(None),
            revoked_at: Set(None),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(tenant = %self.slug, invitation_id = %created.id, role = %role, "Invitation created");
        Ok(IssuedInvitation {
            invitation: Invitation::try_from(created)?,
            token,
        })
    }

    pub async fn list_invitations(&self, now: DateTime<Utc>) -> Result<Vec<Invitation>, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;
        self.expire_stale_invitations(&txn, now).await?;
        let rows = invitation::Entity::find()
            .order_by_desc(invitation::Column::CreatedAt)
            .all(&txn)
            .await?;
        txn.commit().await?;

        rows.into_iter().map(Invitation::try_from).collect()
    }

    pub async fn accept_invitation(
        &self,
        token: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptedInvitation, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;

        let row = invitation::Entity::find()
            .filter(invitation::Column::TokenDigest.eq(crypto::token_digest(token)))
            .one(&txn)
            .await?
            .ok_or_else(|| DomainError::not_found(Resource::Invitation, "token"))?;
        let invite = Invitation::try_from(row.clone())?;

        match invite.status {
            InvitationStatus::Pending if invite.expires_at < now => {
                let mut active: invitation::ActiveModel = row.into();
                active.status = Set(InvitationStatus::Expired.as_str().to_string());
                active.update(&txn).await?;
                // The expiry flip is durable even though the call fails
                txn.commit().await?;
                return Err(DomainError::InvitationExpired {
                    expired_at: invite.expires_at,
                });
            }
            InvitationStatus::Expired => {
                return Err(DomainError::InvitationExpired {
                    expired_at: invite.expires_at,
                });
            }
            InvitationStatus::Revoked => {
                return Err(DomainError::InvitationRevoked {
                    revoked_at: invite.revoked_at.unwrap_or(invite.created_at),
                });
            }
            InvitationStatus::Accepted => {
                let accepted_at = invite.accepted_at.unwrap_or(invite.created_at);
                if invite.accepted_by != Some(user_id) {
                    return Err(DomainError::InvitationAlreadyAccepted { accepted_at });
                }
                let member = self
                    .ensure_member(&txn, user_id, &invite.email, invite.role, accepted_at)
                    .await?;
                txn.commit().await?;
                debug!(tenant = %self.slug, user_id = %user_id, "Invitation accept replayed");
                return Ok(AcceptedInvitation {
                    member,
                    replayed: true,
                });
            }
            InvitationStatus::Pending => {}
        }

        let member = self
            .ensure_member(&txn, user_id, &invite.email, invite.role, now)
            .await?;

        let mut active: invitation::ActiveModel = row.into();
        active.status = Set(InvitationStatus::Accepted.as_str().to_string());
        active.accepted_at = Set(Some(now.into()));
        active.accepted_by = Set(Some(user_id));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(tenant = %self.slug, user_id = %user_id, role = %member.role, "Invitation accepted");
        Ok(AcceptedInvitation {
            member,
            replayed: false,
        })
    }

    async fn ensure_member<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        email: &str,
        role: Role,
        joined_at: DateTime<Utc>,
    ) -> Result<Member, DomainError> {
        if let Some(existing) = member::Entity::find_by_id(user_id).one(conn).await? {
            return Member::try_from(existing);
        }

        let inserted = member::ActiveModel {
            user_id: Set(user_id),
            email: Set(Some(email.to_string())),
            role: Set(role.as_str().to_string()),
            joined_at: Set(joined_at.into()),
        }
        .insert(conn)
        .await?;
        Member::try_from(inserted)
    }

    pub async fn revoke_invitation(
        &self,
        invitation_id: Uuid,
        revoked_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Invitation, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;
        self.require_role(&txn, revoked_by, &[Role::Owner, Role::Admin])
            .await?;
        self.expire_stale_invitations(&txn, now).await?;

        let row = invitation::Entity::find_by_id(invitation_id)
            .one(&txn)
            .await?
            .ok_or_else(|| DomainError::not_found(Resource::Invitation, invitation_id))?;
        let invite = Invitation::try_from(row.clone())?;

        let result = match invite.status {
            InvitationStatus::Pending => {
                let mut active: invitation::ActiveModel = row.into();
                active.status = Set(InvitationStatus::Revoked.as_str().to_string());
                active.revoked_at = Set(Some(now.into()));
                Invitation::try_from(active.update(&txn).await?)
            }
            InvitationStatus::Revoked => Ok(invite),
            InvitationStatus::Accepted => Err(DomainError::InvitationAlreadyAccepted {
                accepted_at: invite.accepted_at.unwrap_or(invite.created_at),
            }),
            InvitationStatus::Expired => Err(DomainError::InvitationExpired {
                expired_at: invite.expires_at,
            }),
        };

        // Commit the expiry sweep regardless of the outcome
        txn.commit().await?;
        result
    }

    // ---- customers ----------------------------------------------------

    async fn find_contact_clash<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidate: &ValidCustomer,
    ) -> Result<Option<String>, DomainError> {
        if let Some(ref phone) = candidate.phone {
            let clash = customer::Entity::find()
                .filter(customer::Column::Phone.eq(phone.as_str()))
                .one(conn)
                .await?;
            if clash.is_some() {
                return Ok(Some(phone.clone()));
            }
        }
        if let Some(ref email) = candidate.email {
            let clash = customer::Entity::find()
                .filter(customer::Column::Email.eq(email.as_str()))
                .one(conn)
                .await?;
            if clash.is_some() {
                return Ok(Some(email.clone()));
            }
        }
        Ok(None)
    }

    async fn insert_customer<C: ConnectionTrait>(
        conn: &C,
        valid: ValidCustomer,
        now: DateTime<Utc>,
    ) -> Result<Customer, DomainError> {
        let inserted = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(valid.email),
            phone: Set(valid.phone),
            email_opt_in: Set(valid.email_opt_in),
            sms_opt_in: Set(valid.sms_opt_in),
            tags: Set(json!(valid.tags)),
            status: Set(CustomerStatus::Active.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(conn)
        .await?;
        Customer::try_from(inserted)
    }

    pub async fn create_customer(
        &self,
        input: &NewCustomer,
        now: DateTime<Utc>,
    ) -> Result<Customer, DomainError> {
        self.require_provisioned()?;
        let valid = validate_customer(input)?;

        let txn = self.db.begin().await?;
        if let Some(contact) = self.find_contact_clash(&txn, &valid).await? {
            return Err(DomainError::already_exists(Resource::Customer, contact));
        }
        let created = Self::insert_customer(&txn, valid, now).await?;
        txn.commit().await?;

        Ok(created)
    }

    /// Validates every row, then commits all valid, non-duplicate rows together.
    pub async fn import_customers(
        &self,
        rows: &[NewCustomer],
        now: DateTime<Utc>,
    ) -> Result<ImportReport, DomainError> {
        self.require_provisioned()?;

        let mut errors = Vec::new();
        let mut duplicates = Vec::new();
        let mut seen_contacts = HashSet::new();
        let mut accepted = Vec::new();

        let txn = self.db.begin().await?;

        for (row, input) in rows.iter().enumerate() {
            let valid = match validate_customer(input) {
                Ok(valid) => valid,
                Err(err) => {
                    errors.push(ImportRowError {
                        row,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let contacts: Vec<String> = valid
                .phone
                .iter()
                .chain(valid.email.iter())
                .cloned()
                .collect();
            if let Some(repeated) = contacts.iter().find(|c| seen_contacts.contains(*c)) {
                duplicates.push(ImportRowError {
                    row,
                    reason: format!("'{repeated}' appears earlier in this import"),
                });
                continue;
            }
            if let Some(existing) = self.find_contact_clash(&txn, &valid).await? {
                duplicates.push(ImportRowError {
                    row,
                    reason: format!("customer '{existing}' already exists"),
                });
                continue;
            }

            seen_contacts.extend(contacts);
            accepted.push(valid);
        }

        let mut imported = Vec::with_capacity(accepted.len());
        for valid in accepted {
            imported.push(Self::insert_customer(&txn, valid, now).await?);
        }
        txn.commit().await?;

        info!(
            tenant = %self.slug,
            imported = imported.len(),
            duplicates = duplicates.len(),
            errors = errors.len(),
            "Customer import finished"
        );
        Ok(ImportReport {
            imported,
            duplicates,
            errors,
        })
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, DomainError> {
        self.require_provisioned()?;
        customer::Entity::find()
            .order_by_asc(customer::Column::CreatedAt)
            .order_by_asc(customer::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Customer::try_from)
            .collect()
    }

    // ---- segments -----------------------------------------------------

    pub async fn create_segment(
        &self,
        input: &NewSegment,
        now: DateTime<Utc>,
    ) -> Result<Segment, DomainError> {
        self.require_provisioned()?;
        let name = require_name("name", &input.name)?;

        match (input.kind, &input.query) {
            (SegmentKind::Automatic, None) => {
                return Err(DomainError::validation(
                    "query",
                    "automatic segments need a query definition",
                ));
            }
            (SegmentKind::Manual | SegmentKind::ExternalSync, Some(_)) => {
                return Err(DomainError::validation(
                    "query",
                    "only automatic segments take a query definition",
                ));
            }
            _ => {}
        }

        let txn = self.db.begin().await?;
        let clash = segment::Entity::find()
            .filter(segment::Column::Name.eq(name.as_str()))
            .one(&txn)
            .await?;
        if clash.is_some() {
            return Err(DomainError::already_exists(Resource::Segment, &name));
        }

        let query = input
            .query
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| DomainError::validation("query", err.to_string()))?;

        let created = segment::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            kind: Set(input.kind.as_str().to_string()),
            status: Set(SegmentStatus::Active.as_str().to_string()),
            query: Set(query),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        Segment::try_from(created)
    }

    pub async fn list_segments(&self) -> Result<Vec<Segment>, DomainError> {
        self.require_provisioned()?;
        segment::Entity::find()
            .order_by_asc(segment::Column::CreatedAt)
            .order_by_asc(segment::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Segment::try_from)
            .collect()
    }

    async fn load_segment<C: ConnectionTrait>(
        conn: &C,
        segment_id: Uuid,
    ) -> Result<Segment, DomainError> {
        segment::Entity::find_by_id(segment_id)
            .one(conn)
            .await?
            .map(Segment::try_from)
            .transpose()?
            .ok_or_else(|| DomainError::not_found(Resource::Segment, segment_id))
    }

    /// Adds customers to a manual or externally synced segment.
    ///
    /// Either every listed customer is added or none is.
    pub async fn add_customers_to_segment(
        &self,
        segment_id: Uuid,
        customer_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;

        let target = Self::load_segment(&txn, segment_id).await?;
        if target.kind == SegmentKind::Automatic {
            return Err(DomainError::validation(
                "segment_id",
                "membership of automatic segments is computed from their query",
            ));
        }

        let unique: BTreeSet<Uuid> = customer_ids.iter().copied().collect();
        for customer_id in &unique {
            if customer::Entity::find_by_id(*customer_id)
                .one(&txn)
                .await?
                .is_none()
            {
                return Err(DomainError::not_found(Resource::Customer, customer_id));
            }
            if segment_member::Entity::find_by_id((segment_id, *customer_id))
                .one(&txn)
                .await?
                .is_some()
            {
                return Err(DomainError::Conflict(format!(
                    "customer '{customer_id}' is already in segment '{}'",
                    target.name
                )));
            }
        }

        for customer_id in &unique {
            segment_member::ActiveModel {
                segment_id: Set(segment_id),
                customer_id: Set(*customer_id),
                added_at: Set(now.into()),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        Ok(unique.into_iter().collect())
    }

    async fn segment_customers<C: ConnectionTrait>(
        conn: &C,
        target: &Segment,
    ) -> Result<Vec<Customer>, DomainError> {
        if target.kind == SegmentKind::Automatic {
            let query = target.query.clone().unwrap_or_default();
            let everyone = customer::Entity::find().all(conn).await?;
            let mut matched = Vec::new();
            for row in everyone {
                let candidate = Customer::try_from(row)?;
                if query.matches(&candidate) {
                    matched.push(candidate);
                }
            }
            return Ok(matched);
        }

        let member_ids: Vec<Uuid> = segment_member::Entity::find()
            .filter(segment_member::Column::SegmentId.eq(target.id))
            .all(conn)
            .await?
            .into_iter()
            .map(|m| m.customer_id)
            .collect();
        if member_ids.is_empty() {
            return Ok(Vec::new());
        }

        customer::Entity::find()
            .filter(customer::Column::Id.is_in(member_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(Customer::try_from)
            .collect()
    }

    pub async fn list_segment_members(&self, segment_id: Uuid) -> Result<Vec<Customer>, DomainError> {
        self.require_provisioned()?;
        let target = Self::load_segment(&self.db, segment_id).await?;
        Self::segment_customers(&self.db, &target).await
    }

    // ---- campaigns ----------------------------------------------------

    async fn load_campaign<C: ConnectionTrait>(
        conn: &C,
        campaign_id: Uuid,
    ) -> Result<(campaign::Model, Vec<Uuid>), DomainError> {
        let row = campaign::Entity::find_by_id(campaign_id)
            .one(conn)
            .await?
            .ok_or_else(|| DomainError::not_found(Resource::Campaign, campaign_id))?;
        let segment_ids = campaign_segment::Entity::find()
            .filter(campaign_segment::Column::CampaignId.eq(campaign_id))
            .order_by_asc(campaign_segment::Column::SegmentId)
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.segment_id)
            .collect();
        Ok((row, segment_ids))
    }

    async fn replace_campaign_segments<C: ConnectionTrait>(
        conn: &C,
        campaign_id: Uuid,
        segment_ids: &BTreeSet<Uuid>,
    ) -> Result<(), DomainError> {
        for segment_id in segment_ids {
            Self::load_segment(conn, *segment_id).await?;
        }

        campaign_segment::Entity::delete_many()
            .filter(campaign_segment::Column::CampaignId.eq(campaign_id))
            .exec(conn)
            .await?;

        for segment_id in segment_ids {
            campaign_segment::ActiveModel {
                campaign_id: Set(campaign_id),
                segment_id: Set(*segment_id),
            }
            .insert(conn)
            .await?;
        }
        Ok(())
    }

    pub async fn create_campaign(
        &self,
        input: &NewCampaign,
        now: DateTime<Utc>,
    ) -> Result<Campaign, DomainError> {
        self.require_provisioned()?;
        let name = require_name("name", &input.name)?;
        if input.message_template.trim().is_empty() {
            return Err(DomainError::validation(
                "message_template",
                "must not be empty",
            ));
        }
        if !TIMEZONE_PATTERN.is_match(&input.timezone) {
            return Err(DomainError::validation(
                "timezone",
                "must be an IANA timezone name such as Europe/Berlin",
            ));
        }

        let txn = self.db.begin().await?;
        let campaign_id = Uuid::new_v4();
        let row = campaign::ActiveModel {
            id: Set(campaign_id),
            name: Set(name),
            kind: Set(input.kind.as_str().to_string()),
            status: Set(CampaignStatus::Draft.as_str().to_string()),
            timezone: Set(input.timezone.clone()),
            message_template: Set(input.message_template.clone()),
            launched_at: Set(None),
            targeted_count: Set(0),
            contacted_count: Set(0),
            failed_count: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let segment_ids: BTreeSet<Uuid> = input.segment_ids.iter().copied().collect();
        Self::replace_campaign_segments(&txn, campaign_id, &segment_ids).await?;
        txn.commit().await?;

        Campaign::from_model(row, segment_ids.into_iter().collect())
    }

    pub async fn get_campaign(&self, campaign_id: Uuid) -> Result<Campaign, DomainError> {
        self.require_provisioned()?;
        let (row, segment_ids) = Self::load_campaign(&self.db, campaign_id).await?;
        Campaign::from_model(row, segment_ids)
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, DomainError> {
        self.require_provisioned()?;
        let rows = campaign::Entity::find()
            .order_by_asc(campaign::Column::CreatedAt)
            .order_by_asc(campaign::Column::Id)
            .all(&self.db)
            .await?;

        let mut links: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for link in campaign_segment::Entity::find().all(&self.db).await? {
            links.entry(link.campaign_id).or_default().push(link.segment_id);
        }

        rows.into_iter()
            .map(|row| {
                let mut segment_ids = links.remove(&row.id).unwrap_or_default();
                segment_ids.sort_unstable();
                Campaign::from_model(row, segment_ids)
            })
            .collect()
    }

    /// Replaces a campaign's target segments; rejected once the campaign has launched.
    pub async fn set_campaign_segments(
        &self,
        campaign_id: Uuid,
        segment_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Campaign, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;
        let (row, _) = Self::load_campaign(&txn, campaign_id).await?;
        if row.launched_at.is_some() {
            return Err(DomainError::Conflict(format!(
                "campaign '{campaign_id}' has launched; its targets are frozen"
            )));
        }

        let unique: BTreeSet<Uuid> = segment_ids.iter().copied().collect();
        Self::replace_campaign_segments(&txn, campaign_id, &unique).await?;

        let mut active: campaign::ActiveModel = row.into();
        active.updated_at = Set(now.into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Campaign::from_model(updated, unique.into_iter().collect())
    }

    /// Resolves a campaign's segments to the customers it targets, each exactly once.
    pub async fn resolve_campaign_targets(
        &self,
        campaign_id: Uuid,
    ) -> Result<CampaignTargets, DomainError> {
        self.require_provisioned()?;
        let (row, segment_ids) = Self::load_campaign(&self.db, campaign_id).await?;
        let campaign = Campaign::from_model(row, segment_ids)?;

        let mut customers: BTreeMap<Uuid, Customer> = BTreeMap::new();
        for segment_id in &campaign.segment_ids {
            let target = Self::load_segment(&self.db, *segment_id).await?;
            for customer in Self::segment_customers(&self.db, &target).await? {
                customers.entry(customer.id).or_insert(customer);
            }
        }

        Ok(CampaignTargets {
            campaign,
            customers: customers.into_values().collect(),
        })
    }

    /// Records the outcome of a non-dry-run launch and activates the campaign.
    pub async fn record_launch(
        &self,
        campaign_id: Uuid,
        tally: LaunchTally,
        now: DateTime<Utc>,
    ) -> Result<Campaign, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;
        let (row, segment_ids) = Self::load_campaign(&txn, campaign_id).await?;
        let status = CampaignStatus::from_stored(&row.status)?;
        if !status.accepts_launch() {
            return Err(DomainError::Conflict(format!(
                "campaign '{campaign_id}' is {status} and cannot be launched"
            )));
        }

        let launched_at = row.launched_at.unwrap_or_else(|| now.into());
        let mut active: campaign::ActiveModel = row.into();
        active.status = Set(CampaignStatus::Active.as_str().to_string());
        active.launched_at = Set(Some(launched_at));
        active.targeted_count = Set(tally.targeted);
        active.contacted_count = Set(tally.contacted);
        active.failed_count = Set(tally.failed);
        active.updated_at = Set(now.into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Campaign::from_model(updated, segment_ids)
    }

    /// Marks a campaign whose targets could not be resolved as failed.
    pub async fn mark_campaign_failed(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Campaign, DomainError> {
        self.require_provisioned()?;
        let txn = self.db.begin().await?;
        let (row, segment_ids) = Self::load_campaign(&txn, campaign_id).await?;

        let mut active: campaign::ActiveModel = row.into();
        active.status = Set(CampaignStatus::Failed.as_str().to_string());
        active.updated_at = Set(now.into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Campaign::from_model(updated, segment_ids)
    }

    // ---- connected storefronts ----------------------------------------

    /// Writes the tenant-local half of a storefront connection.
    pub async fn connect_store(
        &self,
        credentials: &StoreCredentials,
        now: DateTime<Utc>,
    ) -> Result<ConnectedStore, DomainError> {
        self.require_provisioned()?;
        let domain = normalize_domain(&credentials.domain)?;
        if credentials.access_token.trim().is_empty() {
            return Err(DomainError::validation("access_token", "must not be empty"));
        }

        let ciphertext = crypto::encrypt_store_token(
            &self.crypto_key,
            self.slug.as_str(),
            &domain,
            &credentials.access_token,
        )
        .map_err(|err| {
            tracing::error!(tenant = %self.slug, domain = %domain, "Token encryption failed");
            DomainError::TransientStore(err.to_string())
        })?;

        let txn = self.db.begin().await?;

        let other_active = connected_store::Entity::find()
            .filter(connected_store::Column::Status.eq(StoreStatus::Active.as_str()))
            .filter(connected_store::Column::Domain.ne(domain.as_str()))
            .one(&txn)
            .await?;
        if let Some(other) = other_active {
            return Err(DomainError::Conflict(format!(
                "tenant '{}' already has an active storefront '{}'",
                self.slug, other.domain
            )));
        }

        let existing = connected_store::Entity::find_by_id(domain.clone())
            .one(&txn)
            .await?;
        let saved = match existing {
            Some(row) => {
                let mut active: connected_store::ActiveModel = row.into();
                active.status = Set(StoreStatus::Active.as_str().to_string());
                active.scope = Set(credentials.scope.clone());
                active.access_token_ciphertext = Set(Some(ciphertext));
                active.connected_at = Set(now.into());
                active.disconnected_at = Set(None);
                active.updated_at = Set(now.into());
                active.update(&txn).await?
            }
            None => {
                connected_store::ActiveModel {
                    domain: Set(domain.clone()),
                    status: Set(StoreStatus::Active.as_str().to_string()),
                    scope: Set(credentials.scope.clone()),
                    access_token_ciphertext: Set(Some(ciphertext)),
                    connected_at: Set(now.into()),
                    last_sync_at: Set(None),
                    disconnected_at: Set(None),
                    updated_at: Set(now.into()),
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;

        ConnectedStore::try_from(saved)
    }

    /// Marks a storefront disconnected. Unknown domains are a no-op.
    pub async fn disconnect_store(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConnectedStore>, DomainError> {
        self.require_provisioned()?;
        let domain = normalize_domain(domain)?;

        let txn = self.db.begin().await?;
        let Some(row) = connected_store::Entity::find_by_id(domain).one(&txn).await? else {
            return Ok(None);
        };

        if row.status == StoreStatus::Disconnected.as_str() {
            return ConnectedStore::try_from(row).map(Some);
        }

        let mut active: connected_store::ActiveModel = row.into();
        active.status = Set(StoreStatus::Disconnected.as_str().to_string());
        active.access_token_ciphertext = Set(None);
        active.disconnected_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        ConnectedStore::try_from(updated).map(Some)
    }

    pub async fn list_connected_stores(&self) -> Result<Vec<ConnectedStore>, DomainError> {
        self.require_provisioned()?;
        connected_store::Entity::find()
            .order_by_asc(connected_store::Column::ConnectedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(ConnectedStore::try_from)
            .collect()
    }

    /// Decrypts the access token of an active storefront connection.
    pub async fn store_access_token(&self, domain: &str) -> Result<String, DomainError> {
        self.require_provisioned()?;
        let domain = normalize_domain(domain)?;
        let row = connected_store::Entity::find_by_id(domain.clone())
            .one(&self.db)
            .await?
            .filter(|row| row.status == StoreStatus::Active.as_str())
            .ok_or_else(|| DomainError::not_found(Resource::Store, &domain))?;

        let ciphertext = row
            .access_token_ciphertext
            .ok_or_else(|| DomainError::not_found(Resource::Store, &domain))?;

        crypto::decrypt_store_token(&self.crypto_key, self.slug.as_str(), &domain, &ciphertext)
            .map_err(|err| {
                tracing::error!(tenant = %self.slug, domain = %domain, "Token decryption failed");
                DomainError::TransientStore(err.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreLocation, open_embedded_store};
    use crate::tenant::types::{CampaignKind, SegmentQuery};
    use migration::TenantMigrator;

    async fn provisioned_store() -> (TenantStore, Uuid) {
        let db = open_embedded_store::<TenantMigrator>(&StoreLocation::InMemory)
            .await
            .unwrap();
        let mut store = TenantStore::open(
            TenantSlug::parse("acme").unwrap(),
            db,
            CryptoKey::new(vec![3u8; 32]).unwrap(),
        )
        .await
        .unwrap();
        let owner = Uuid::new_v4();
        store
            .create_organization("Acme", None, owner, Some("owner@acme.test".into()), Utc::now())
            .await
            .unwrap();
        (store, owner)
    }

    fn phone_customer(phone: &str) -> NewCustomer {
        NewCustomer {
            phone: Some(phone.to_string()),
            sms_opt_in: true,
            ..NewCustomer::default()
        }
    }

    #[tokio::test]
    async fn operations_require_an_organization() {
        let db = open_embedded_store::<TenantMigrator>(&StoreLocation::InMemory)
            .await
            .unwrap();
        let store = TenantStore::open(
            TenantSlug::parse("ghost").unwrap(),
            db,
            CryptoKey::new(vec![3u8; 32]).unwrap(),
        )
        .await
        .unwrap();

        assert!(matches!(
            store.list_customers().await,
            Err(DomainError::NotFound {
                resource: Resource::Tenant,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn organization_is_created_once() {
        let (mut store, owner) = provisioned_store().await;

        let again = store
            .create_organization("Acme 2", None, owner, None, Utc::now())
            .await;
        assert!(matches!(again, Err(DomainError::AlreadyExists { .. })));

        let members = store.get_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, Role::Owner);
    }

    #[tokio::test]
    async fn duplicate_customer_contacts_are_rejected() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();

        store
            .create_customer(&phone_customer("+1 555 010 2030"), now)
            .await
            .unwrap();
        let clash = store
            .create_customer(&phone_customer("+15550102030"), now)
            .await;
        assert!(matches!(clash, Err(DomainError::AlreadyExists { .. })));

        let missing_channel = store.create_customer(&NewCustomer::default(), now).await;
        assert!(matches!(missing_channel, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn import_reports_rows_and_keeps_valid_ones() {
        let (store, _) = provisioned_store().await;
        store
            .create_customer(&phone_customer("+15550000001"), Utc::now())
            .await
            .unwrap();

        let rows = vec![
            phone_customer("+15550000002"),
            phone_customer("+15550000001"),
            phone_customer("12"),
            phone_customer("+15550000002"),
            NewCustomer {
                email: Some("ada@example.com".into()),
                ..NewCustomer::default()
            },
        ];
        let report = store.import_customers(&rows, Utc::now()).await.unwrap();

        assert_eq!(report.imported.len(), 2);
        assert_eq!(
            report.duplicates.iter().map(|d| d.row).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(store.list_customers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn adding_an_existing_member_writes_nothing() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let c1 = store.create_customer(&phone_customer("+15550000001"), now).await.unwrap();
        let c2 = store.create_customer(&phone_customer("+15550000002"), now).await.unwrap();
        let seg = store
            .create_segment(
                &NewSegment {
                    name: "VIP".into(),
                    kind: SegmentKind::Manual,
                    query: None,
                },
                now,
            )
            .await
            .unwrap();

        store.add_customers_to_segment(seg.id, &[c1.id], now).await.unwrap();
        let conflict = store
            .add_customers_to_segment(seg.id, &[c2.id, c1.id], now)
            .await;
        assert!(matches!(conflict, Err(DomainError::Conflict(_))));

        let members = store.list_segment_members(seg.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, c1.id);

        let unknown = store
            .add_customers_to_segment(seg.id, &[Uuid::new_v4()], now)
            .await;
        assert!(matches!(unknown, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn automatic_segments_resolve_from_query() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let mut tagged = phone_customer("+15550000001");
        tagged.tags = vec!["VIP".into()];
        let vip = store.create_customer(&tagged, now).await.unwrap();
        store.create_customer(&phone_customer("+15550000002"), now).await.unwrap();

        let seg = store
            .create_segment(
                &NewSegment {
                    name: "Auto VIP".into(),
                    kind: SegmentKind::Automatic,
                    query: Some(SegmentQuery {
                        tags_any: vec!["vip".into()],
                        ..SegmentQuery::default()
                    }),
                },
                now,
            )
            .await
            .unwrap();

        let members = store.list_segment_members(seg.id).await.unwrap();
        assert_eq!(members.iter().map(|c| c.id).collect::<Vec<_>>(), vec![vip.id]);

        let manual_add = store.add_customers_to_segment(seg.id, &[vip.id], now).await;
        assert!(matches!(manual_add, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn campaign_targets_freeze_after_launch() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let campaign = store
            .create_campaign(
                &NewCampaign {
                    name: "Spring".into(),
                    kind: CampaignKind::Broadcast,
                    timezone: "Europe/Berlin".into(),
                    message_template: "Hello!".into(),
                    segment_ids: vec![],
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        let launched = store
            .record_launch(
                campaign.id,
                LaunchTally {
                    targeted: 0,
                    contacted: 0,
                    failed: 0,
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(launched.status, CampaignStatus::Active);
        assert!(launched.launched_at.is_some());

        let frozen = store.set_campaign_segments(campaign.id, &[], now).await;
        assert!(matches!(frozen, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn paused_campaign_is_not_relaunched() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let created = store
            .create_campaign(
                &NewCampaign {
                    name: "Winter".into(),
                    kind: CampaignKind::Broadcast,
                    timezone: "UTC".into(),
                    message_template: "Hello!".into(),
                    segment_ids: vec![],
                },
                now,
            )
            .await
            .unwrap();

        let row = campaign::Entity::find_by_id(created.id)
            .one(&store.db)
            .await
            .unwrap()
            .unwrap();
        let mut paused: campaign::ActiveModel = row.into();
        paused.status = Set(CampaignStatus::Paused.as_str().to_string());
        paused.update(&store.db).await.unwrap();

        let relaunch = store
            .record_launch(
                created.id,
                LaunchTally {
                    targeted: 1,
                    contacted: 1,
                    failed: 0,
                },
                now,
            )
            .await;
        assert!(matches!(relaunch, Err(DomainError::Conflict(_))));

        let campaign = store.get_campaign(created.id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert!(campaign.launched_at.is_none());
        assert!(!CampaignStatus::Completed.accepts_launch());
        assert!(CampaignStatus::Failed.accepts_launch());
    }

    #[tokio::test]
    async fn dangling_segment_link_fails_resolution() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let segment = store
            .create_segment(
                &NewSegment {
                    name: "VIP".into(),
                    kind: SegmentKind::Manual,
                    query: None,
                },
                now,
            )
            .await
            .unwrap();
        let campaign = store
            .create_campaign(
                &NewCampaign {
                    name: "Orphaned".into(),
                    kind: CampaignKind::Broadcast,
                    timezone: "UTC".into(),
                    message_template: "Hi".into(),
                    segment_ids: vec![segment.id],
                },
                now,
            )
            .await
            .unwrap();

        segment::Entity::delete_by_id(segment.id)
            .exec(&store.db)
            .await
            .unwrap();

        let result = store.resolve_campaign_targets(campaign.id).await;
        assert!(matches!(
            result,
            Err(DomainError::NotFound {
                resource: Resource::Segment,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn campaign_timezone_is_validated() {
        let (store, _) = provisioned_store().await;
        let result = store
            .create_campaign(
                &NewCampaign {
                    name: "Bad tz".into(),
                    kind: CampaignKind::Automated,
                    timezone: "not a zone".into(),
                    message_template: "Hi".into(),
                    segment_ids: vec![],
                },
                Utc::now(),
            )
            .await;
        assert!(matches!(
            result,
            Err(DomainError::Validation {
                field: "timezone",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn tenant_keeps_one_active_storefront() {
        let (store, _) = provisioned_store().await;
        let now = Utc::now();
        let creds = |domain: &str| StoreCredentials {
            domain: domain.into(),
            access_token: "shpat_abc".into(),
            scope: "read_customers".into(),
        };

        store.connect_store(&creds("Shop1.Example"), now).await.unwrap();
        assert_eq!(
            store.store_access_token("shop1.example").await.unwrap(),
            "shpat_abc"
        );

        let second = store.connect_store(&creds("shop2.example"), now).await;
        assert!(matches!(second, Err(DomainError::Conflict(_))));

        let disconnected = store.disconnect_store("shop1.example", now).await.unwrap();
        assert_eq!(disconnected.unwrap().status, StoreStatus::Disconnected);
        assert!(store.store_access_token("shop1.example").await.is_err());

        assert!(store.disconnect_store("never.example", now).await.unwrap().is_none());
        store.connect_store(&creds("shop2.example"), now).await.unwrap();
    }
}

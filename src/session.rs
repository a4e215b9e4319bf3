//! # Session and Membership Coordinator
//!
//! Answers "which tenants can this principal act on" from the global membership
//! table and keeps that table consistent with the membership rows each tenant
//! actor owns. Tenant-local writes always go first; the global write follows
//! and is an idempotent upsert keyed by (user, tenant). A failed global write
//! never rolls back the local one. It surfaces as
//! [`DomainError::ReconciliationRequired`] and is repaired by repeating the
//! call or by [`SessionCoordinator::reconcile_memberships`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::DomainError;
use crate::mail::{SharedMailer, invitation_mail};
use crate::normalization::TenantSlug;
use crate::repositories::{GlobalMembership, SharedMemberships};
use crate::tenant::TenantDirectory;
use crate::tenant::types::{
    AcceptedInvitation, Invitation, IssuedInvitation, Member, Organization, Role,
};

/// Roles allowed to manage a tenant's members, storefronts and launches.
pub const MANAGERS: &[Role] = &[Role::Owner, Role::Admin];
/// Every role.
pub const ANY_ROLE: &[Role] = &[Role::Owner, Role::Admin, Role::Member];

/// The authenticated caller, as resolved by the upstream session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub user_id: Uuid,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// Result of re-driving a tenant's local memberships into the global table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MembershipReconciliation {
    pub tenant_slug: String,
    /// Local members inspected
    pub checked: usize,
    /// Global rows that were missing or carried a stale role
    pub written: usize,
}

#[derive(Clone)]
pub struct SessionCoordinator {
    tenants: Arc<TenantDirectory>,
    memberships: SharedMemberships,
    mailer: SharedMailer,
    email_from: String,
    clock: SharedClock,
}

impl SessionCoordinator {
    pub fn new(
        tenants: Arc<TenantDirectory>,
        memberships: SharedMemberships,
        mailer: SharedMailer,
        email_from: String,
        clock: SharedClock,
    ) -> Self {
        Self {
            tenants,
            memberships,
            mailer,
            email_from,
            clock,
        }
    }

    /// Checks that `principal` holds one of `roles` in `tenant`.
    pub async fn authorize(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
        roles: &[Role],
    ) -> Result<GlobalMembership, DomainError> {
        let membership = self
            .memberships
            .find(principal.user_id, tenant.as_str())
            .await?
            .ok_or_else(|| {
                DomainError::Unauthorized(format!("not a member of tenant '{tenant}'"))
            })?;

        if !roles.contains(&membership.role) {
            return Err(DomainError::Unauthorized(format!(
                "role '{}' may not perform this action in tenant '{tenant}'",
                membership.role
            )));
        }
        Ok(membership)
    }

    /// Tenants the principal can act on.
    pub async fn tenants_for(
        &self,
        principal: &Principal,
    ) -> Result<Vec<GlobalMembership>, DomainError> {
        self.memberships.list_for_user(principal.user_id).await
    }

    /// Creates the tenant with `principal` as owner, then publishes the owner
    /// membership globally.
    ///
    /// A repeat by the recorded owner is a replay: the local rows stay as they
    /// are and the global write is re-driven.
    pub async fn create_organization(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
        name: String,
        logo_url: Option<String>,
        owner_email: Option<String>,
    ) -> Result<(Organization, Member), DomainError> {
        let handle = self.tenants.get(tenant).await?;
        let (organization, owner) = match handle
            .create_organization(name, logo_url, principal.user_id, owner_email)
            .await
        {
            Ok(created) => created,
            Err(err @ DomainError::AlreadyExists { .. }) => {
                match handle.get_member(principal.user_id).await? {
                    Some(member) if member.role == Role::Owner => {
                        (handle.get_organization().await?, member)
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        self.publish_membership(tenant, principal.user_id, Role::Owner)
            .await?;
        info!(tenant = %tenant, owner = %principal.user_id, "Organization owner published");
        Ok((organization, owner))
    }

    pub async fn get_organization(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
    ) -> Result<Organization, DomainError> {
        self.authorize(principal, tenant, ANY_ROLE).await?;
        self.tenants.get(tenant).await?.get_organization().await
    }

    pub async fn list_members(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
    ) -> Result<Vec<Member>, DomainError> {
        self.authorize(principal, tenant, ANY_ROLE).await?;
        self.tenants.get(tenant).await?.get_members().await
    }

    /// Issues an invitation and mails the token to the invitee.
    ///
    /// Mail is a single attempt; a failed send is logged and the invitation
    /// stands.
    pub async fn create_invitation(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
        email: String,
        role: Role,
    ) -> Result<IssuedInvitation, DomainError> {
        self.authorize(principal, tenant, MANAGERS).await?;
        let handle = self.tenants.get(tenant).await?;
        let issued = handle
            .create_invitation(email, role, principal.user_id)
            .await?;
        let organization = handle.get_organization().await?;

        let mail = invitation_mail(
            &self.email_from,
            &issued.invitation.email,
            &organization.name,
            issued.invitation.role.as_str(),
            &issued.token,
        );
        if let Err(err) = self.mailer.send(&mail).await {
            warn!(
                tenant = %tenant,
                invitation_id = %issued.invitation.id,
                error = %err,
                "Invitation mail could not be sent"
            );
        }

        Ok(issued)
    }

    pub async fn list_invitations(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
    ) -> Result<Vec<Invitation>, DomainError> {
        self.authorize(principal, tenant, MANAGERS).await?;
        self.tenants.get(tenant).await?.list_invitations().await
    }

    pub async fn revoke_invitation(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
        invitation_id: Uuid,
    ) -> Result<Invitation, DomainError> {
        self.authorize(principal, tenant, MANAGERS).await?;
        self.tenants
            .get(tenant)
            .await?
            .revoke_invitation(invitation_id, principal.user_id)
            .await
    }

    /// Accepts an invitation for `principal`.
    ///
    /// The invitee has no global membership yet, so this is the one tenant
    /// operation that does not go through [`Self::authorize`]. Replays by the
    /// same user re-drive the global write.
    pub async fn accept_invitation(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
        token: String,
    ) -> Result<AcceptedInvitation, DomainError> {
        let accepted = self
            .tenants
            .get(tenant)
            .await?
            .accept_invitation(token, principal.user_id)
            .await?;

        self.publish_membership(tenant, principal.user_id, accepted.member.role)
            .await?;
        info!(
            tenant = %tenant,
            user_id = %principal.user_id,
            role = %accepted.member.role,
            replayed = accepted.replayed,
            "Invitation accepted"
        );
        Ok(accepted)
    }

    /// Reconciles on behalf of `principal`.
    ///
    /// Authorized against the tenant's own member rows, since a missing global
    /// row is exactly what this repairs.
    pub async fn reconcile_as(
        &self,
        principal: &Principal,
        tenant: &TenantSlug,
    ) -> Result<MembershipReconciliation, DomainError> {
        let member = self
            .tenants
            .get(tenant)
            .await?
            .get_member(principal.user_id)
            .await?
            .ok_or_else(|| {
                DomainError::Unauthorized(format!("not a member of tenant '{tenant}'"))
            })?;
        if !MANAGERS.contains(&member.role) {
            return Err(DomainError::Unauthorized(format!(
                "role '{}' may not reconcile memberships in tenant '{tenant}'",
                member.role
            )));
        }
        self.reconcile_memberships(tenant).await
    }

    /// Re-drives every local membership of `tenant` into the global table.
    pub async fn reconcile_memberships(
        &self,
        tenant: &TenantSlug,
    ) -> Result<MembershipReconciliation, DomainError> {
        let members = self.tenants.get(tenant).await?.get_members().await?;
        let mut report = MembershipReconciliation {
            tenant_slug: tenant.to_string(),
            checked: members.len(),
            written: 0,
        };

        let now = self.clock.now();
        let mut current: HashMap<Uuid, Role> = HashMap::new();
        for member in &members {
            if let Some(global) = self.memberships.find(member.user_id, tenant.as_str()).await? {
                current.insert(global.user_id, global.role);
            }
        }

        for member in members {
            if current.get(&member.user_id) == Some(&member.role) {
                continue;
            }
            self.memberships
                .upsert(member.user_id, tenant.as_str(), member.role, now)
                .await?;
            report.written += 1;
        }

        if report.written > 0 {
            info!(tenant = %tenant, written = report.written, "Global memberships reconciled");
        }
        Ok(report)
    }

    async fn publish_membership(
        &self,
        tenant: &TenantSlug,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), DomainError> {
        match self
            .memberships
            .upsert(user_id, tenant.as_str(), role, self.clock.now())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(tenant = %tenant, user_id = %user_id, error = %err, "Global membership write failed after local write");
                Err(DomainError::ReconciliationRequired {
                    subject: format!("membership of user '{user_id}' in tenant '{tenant}'"),
                    detail: format!(
                        "tenant membership is recorded but the global membership write failed: {err}"
                    ),
                })
            }
        }
    }
}

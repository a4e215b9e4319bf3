//! Domain types owned by a tenant actor.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::DomainError;
use crate::macros::string_enum;
use crate::models::tenant::{
    campaign, connected_store, customer, invitation, member, organization, segment,
};

string_enum!(
    /// Membership role within a tenant.
    Role {
        Owner => "owner",
        Admin => "admin",
        Member => "member",
    }
);

string_enum!(InvitationStatus {
    Pending => "pending",
    Accepted => "accepted",
    Expired => "expired",
    Revoked => "revoked",
});

string_enum!(CustomerStatus {
    Active => "active",
    Unsubscribed => "unsubscribed",
    Blocked => "blocked",
});

string_enum!(
    /// How a segment's membership is determined.
    SegmentKind {
        Manual => "manual",
        Automatic => "automatic",
        ExternalSync => "external_sync",
    }
);

string_enum!(SegmentStatus {
    Active => "active",
    Archived => "archived",
});

string_enum!(CampaignKind {
    Broadcast => "broadcast",
    Automated => "automated",
});

string_enum!(
    /// Campaign lifecycle state.
    CampaignStatus {
        Draft => "draft",
        Scheduled => "scheduled",
        Active => "active",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
    }
);

impl CampaignStatus {
    /// Paused and completed campaigns stay put until someone moves them.
    pub fn accepts_launch(self) -> bool {
        !matches!(self, CampaignStatus::Paused | CampaignStatus::Completed)
    }
}

string_enum!(
    /// State of a tenant's link to an external storefront.
    StoreStatus {
        Active => "active",
        Disconnected => "disconnected",
        Error => "error",
    }
);

fn utc(value: chrono::DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub slug: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<organization::Model> for Organization {
    fn from(model: organization::Model) -> Self {
        Self {
            slug: model.slug,
            name: model.name,
            logo_url: model.logo_url,
            created_at: utc(model.created_at),
        }
    }
}

/// Tenant-local membership record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Member {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

impl TryFrom<member::Model> for Member {
    type Error = DomainError;

    fn try_from(model: member::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: model.user_id,
            email: model.email,
            role: Role::from_stored(&model.role)?,
            joined_at: utc(model.joined_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<invitation::Model> for Invitation {
    type Error = DomainError;

    fn try_from(model: invitation::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            email: model.email,
            role: Role::from_stored(&model.role)?,
            status: InvitationStatus::from_stored(&model.status)?,
            invited_by: model.invited_by,
            expires_at: utc(model.expires_at),
            created_at: utc(model.created_at),
            accepted_at: model.accepted_at.map(utc),
            accepted_by: model.accepted_by,
            revoked_at: model.revoked_at.map(utc),
        })
    }
}

/// A freshly created invitation together with its one-time token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    /// Plain token; only its digest is stored
    pub token: String,
}

/// Result of accepting an invitation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptedInvitation {
    pub member: Member,
    /// True when this user had already accepted the same invitation
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_opt_in: bool,
    pub sms_opt_in: bool,
    pub tags: Vec<String>,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<customer::Model> for Customer {
    type Error = DomainError;

    fn try_from(model: customer::Model) -> Result<Self, Self::Error> {
        let tags = serde_json::from_value(model.tags).unwrap_or_default();
        Ok(Self {
            id: model.id,
            email: model.email,
            phone: model.phone,
            email_opt_in: model.email_opt_in,
            sms_opt_in: model.sms_opt_in,
            tags,
            status: CustomerStatus::from_stored(&model.status)?,
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        })
    }
}

/// Input for creating or importing a customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewCustomer {
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub email_opt_in: bool,
    #[serde(default)]
    pub sms_opt_in: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Problem with a single row of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImportRowError {
    /// Zero-based row index in the submitted batch
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImportReport {
    pub imported: Vec<Customer>,
    /// Rows that collide with an existing customer or an earlier row
    pub duplicates: Vec<ImportRowError>,
    /// Rows that failed validation
    pub errors: Vec<ImportRowError>,
}

/// Membership rule for automatic segments. Every present criterion must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SegmentQuery {
    /// Customer carries at least one of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_any: Vec<String>,
    /// Customer carries all of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_all: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CustomerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_opt_in: Option<bool>,
}

impl SegmentQuery {
    pub fn matches(&self, customer: &Customer) -> bool {
        let tags: BTreeSet<&str> = customer.tags.iter().map(String::as_str).collect();

        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| tags.contains(t.as_str())) {
            return false;
        }
        if !self.tags_all.iter().all(|t| tags.contains(t.as_str())) {
            return false;
        }
        if self.status.is_some_and(|status| status != customer.status) {
            return false;
        }
        if self
            .sms_opt_in
            .is_some_and(|opt_in| opt_in != customer.sms_opt_in)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub kind: SegmentKind,
    pub status: SegmentStatus,
    pub query: Option<SegmentQuery>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<segment::Model> for Segment {
    type Error = DomainError;

    fn try_from(model: segment::Model) -> Result<Self, Self::Error> {
        let query = match model.query {
            Some(value) => Some(serde_json::from_value(value).map_err(|err| {
                DomainError::TransientStore(format!("unreadable segment query: {err}"))
            })?),
            None => None,
        };
        Ok(Self {
            id: model.id,
            name: model.name,
            kind: SegmentKind::from_stored(&model.kind)?,
            status: SegmentStatus::from_stored(&model.status)?,
            query,
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSegment {
    pub name: String,
    pub kind: SegmentKind,
    #[serde(default)]
    pub query: Option<SegmentQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub kind: CampaignKind,
    pub status: CampaignStatus,
    pub timezone: String,
    pub message_template: String,
    pub segment_ids: Vec<Uuid>,
    pub launched_at: Option<DateTime<Utc>>,
    pub targeted_count: i32,
    pub contacted_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub(crate) fn from_model(
        model: campaign::Model,
        segment_ids: Vec<Uuid>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: model.id,
            name: model.name,
            kind: CampaignKind::from_stored(&model.kind)?,
            status: CampaignStatus::from_stored(&model.status)?,
            timezone: model.timezone,
            message_template: model.message_template,
            segment_ids,
            launched_at: model.launched_at.map(utc),
            targeted_count: model.targeted_count,
            contacted_count: model.contacted_count,
            failed_count: model.failed_count,
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCampaign {
    pub name: String,
    pub kind: CampaignKind,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub message_template: String,
    #[serde(default)]
    pub segment_ids: Vec<Uuid>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A campaign together with the deduplicated customers its segments resolve to.
#[derive(Debug, Clone)]
pub struct CampaignTargets {
    pub campaign: Campaign,
    pub customers: Vec<Customer>,
}

/// Counters written back to a campaign once a launch finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTally {
    pub targeted: i32,
    pub contacted: i32,
    pub failed: i32,
}

/// Connected storefront as exposed to callers; the access token never leaves the actor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectedStore {
    pub domain: String,
    pub status: StoreStatus,
    pub scope: String,
    pub connected_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl TryFrom<connected_store::Model> for ConnectedStore {
    type Error = DomainError;

    fn try_from(model: connected_store::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            domain: model.domain,
            status: StoreStatus::from_stored(&model.status)?,
            scope: model.scope,
            connected_at: utc(model.connected_at),
            last_sync_at: model.last_sync_at.map(utc),
            disconnected_at: model.disconnected_at.map(utc),
        })
    }
}

/// Output of the storefront token exchange, input to the connect protocol.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreCredentials {
    pub domain: String,
    pub access_token: String,
    #[serde(default)]
    pub scope: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(tags: &[&str], sms_opt_in: bool) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            email: None,
            phone: Some("+15550000001".to_string()),
            email_opt_in: false,
            sms_opt_in,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status: CustomerStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn string_enums_parse_their_own_text() {
        assert_eq!(SegmentKind::parse("external_sync"), Some(SegmentKind::ExternalSync));
        assert_eq!(CampaignStatus::Active.as_str(), "active");
        assert_eq!(StoreStatus::parse("gone"), None);
        assert!(Role::from_stored("superuser").is_err());
    }

    #[test]
    fn empty_query_matches_everyone() {
        assert!(SegmentQuery::default().matches(&customer(&[], false)));
    }

    #[test]
    fn query_criteria_are_conjunctive() {
        let query = SegmentQuery {
            tags_any: vec!["vip".to_string(), "loyal".to_string()],
            tags_all: vec!["newsletter".to_string()],
            status: Some(CustomerStatus::Active),
            sms_opt_in: Some(true),
        };

        assert!(query.matches(&customer(&["vip", "newsletter"], true)));
        assert!(!query.matches(&customer(&["vip"], true)));
        assert!(!query.matches(&customer(&["newsletter"], true)));
        assert!(!query.matches(&customer(&["loyal", "newsletter"], false)));
    }
}

//! Conversation and message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::DomainError;
use crate::macros::string_enum;
use crate::models::conversation::{message, thread};
use crate::normalization::{TenantSlug, normalize_phone};

/// Namespace for deterministic conversation ids.
const CONVERSATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f75_7470_6f73_742d_636f_6e76_6572_7361);

string_enum!(
    /// Lifecycle of a conversation thread.
    ConversationStatus {
        Active => "active",
        Paused => "paused",
        Resolved => "resolved",
        Archived => "archived",
    }
);

string_enum!(Direction {
    Inbound => "inbound",
    Outbound => "outbound",
});

string_enum!(MessageKind {
    Text => "text",
    Template => "template",
    Media => "media",
});

string_enum!(
    /// Delivery state of a message. Inbound messages are always `received`.
    MessageStatus {
        Pending => "pending",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Failed => "failed",
        Received => "received",
    }
);

impl MessageStatus {
    /// Position on the outbound delivery path; `None` for states off that path.
    pub const fn delivery_rank(self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed | MessageStatus::Received => None,
        }
    }
}

/// Actor key: one conversation per (tenant, customer phone).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    tenant: TenantSlug,
    phone: String,
}

impl ConversationKey {
    pub fn new(tenant: TenantSlug, raw_phone: &str) -> Result<Self, DomainError> {
        Ok(Self {
            tenant,
            phone: normalize_phone(raw_phone)?,
        })
    }

    pub fn tenant(&self) -> &TenantSlug {
        &self.tenant
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Stable id derived from the key; equal keys always yield equal ids.
    pub fn conversation_id(&self) -> Uuid {
        Uuid::new_v5(
            &CONVERSATION_NAMESPACE,
            format!("{}:{}", self.tenant, self.phone).as_bytes(),
        )
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.phone)
    }
}

fn utc(value: chrono::DateTime<chrono::FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_slug: String,
    pub customer_phone: String,
    pub status: ConversationStatus,
    pub origin_campaign_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<thread::Model> for Conversation {
    type Error = DomainError;

    fn try_from(model: thread::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            tenant_slug: model.tenant_slug,
            customer_phone: model.customer_phone,
            status: ConversationStatus::from_stored(&model.status)?,
            origin_campaign_id: model.origin_campaign_id,
            last_message_at: model.last_message_at.map(utc),
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub sequence: i64,
    pub direction: Direction,
    pub content: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<message::Model> for Message {
    type Error = DomainError;

    fn try_from(model: message::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            sequence: model.sequence,
            direction: Direction::from_stored(&model.direction)?,
            content: model.content,
            kind: MessageKind::from_stored(&model.kind)?,
            status: MessageStatus::from_stored(&model.status)?,
            provider_message_id: model.provider_message_id,
            idempotency_key: model.idempotency_key,
            error: model.error,
            created_at: utc(model.created_at),
            sent_at: model.sent_at.map(utc),
            delivered_at: model.delivered_at.map(utc),
            read_at: model.read_at.map(utc),
            failed_at: model.failed_at.map(utc),
        })
    }
}

/// A conversation with its full message log in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnsuredConversation {
    pub conversation: Conversation,
    pub created: bool,
}

/// Request to send one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutboundMessage {
    pub content: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    /// Repeating a key returns the original message instead of sending again
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendOutcome {
    pub message: Message,
    /// True when the idempotency key matched an earlier message
    pub replayed: bool,
}

/// Provider-neutral inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InboundMessage {
    pub external_message_id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InboundOutcome {
    pub message: Message,
    /// True when this external message id had already been recorded
    pub duplicate: bool,
}

/// Status callback from the messaging provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryUpdate {
    pub provider_message_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub error: Option<String>,
}

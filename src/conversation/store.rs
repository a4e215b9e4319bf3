//! Operations over one conversation's embedded store.
//!
//! The message log is append-only. A send first commits the message as
//! `pending`, then calls the provider, then records `sent` or `failed` on the
//! same row; a provider failure never removes the row. Sending again under an
//! idempotency key whose latest attempt failed appends a fresh attempt.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::conversation::types::{
    Conversation, ConversationKey, ConversationStatus, ConversationView, DeliveryUpdate,
    Direction, EnsuredConversation, InboundMessage, InboundOutcome, Message, MessageStatus,
    OutboundMessage, SendOutcome,
};
use crate::error::{DomainError, Resource};
use crate::messaging::{OutboundRequest, SharedProvider};
use crate::models::conversation::{message, thread};

const MAX_CONTENT_CHARS: usize = 4096;

/// Key recorded on the `attempt`-th send under `key`; the first send keeps `key`.
fn retry_key(key: &str, attempt: usize) -> String {
    format!("{key}:attempt-{attempt}")
}

/// Stamps the milestone timestamp that belongs to `status`.
fn stamp_status(active: &mut message::ActiveModel, status: MessageStatus, at: DateTime<Utc>) {
    active.status = Set(status.as_str().to_string());
    match status {
        MessageStatus::Sent => active.sent_at = Set(Some(at.into())),
        MessageStatus::Delivered => active.delivered_at = Set(Some(at.into())),
        MessageStatus::Read => active.read_at = Set(Some(at.into())),
        MessageStatus::Failed => active.failed_at = Set(Some(at.into())),
        MessageStatus::Pending | MessageStatus::Received => {}
    }
}

pub struct ConversationStore {
    key: ConversationKey,
    db: DatabaseConnection,
    provider: SharedProvider,
    sender_id: String,
    clock: SharedClock,
    header: Option<thread::Model>,
}

impl ConversationStore {
    pub async fn open(
        key: ConversationKey,
        db: DatabaseConnection,
        provider: SharedProvider,
        sender_id: String,
        clock: SharedClock,
    ) -> Result<Self, DomainError> {
        let header = thread::Entity::find().one(&db).await?;
        Ok(Self {
            key,
            db,
            provider,
            sender_id,
            clock,
            header,
        })
    }

    /// Returns the header row, inserting it when absent. Does not touch the cache.
    async fn load_or_create_header<C: ConnectionTrait>(
        &self,
        conn: &C,
        origin_campaign_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<(thread::Model, bool), DomainError> {
        if let Some(ref header) = self.header {
            return Ok((header.clone(), false));
        }

        let created = thread::ActiveModel {
            id: Set(self.key.conversation_id()),
            tenant_slug: Set(self.key.tenant().to_string()),
            customer_phone: Set(self.key.phone().to_string()),
            status: Set(ConversationStatus::Active.as_str().to_string()),
            origin_campaign_id: Set(origin_campaign_id),
            last_message_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(conn)
        .await?;

        Ok((created, true))
    }

    fn require_header(&self) -> Result<&thread::Model, DomainError> {
        self.header
            .as_ref()
            .ok_or_else(|| DomainError::not_found(Resource::Conversation, &self.key))
    }

    async fn next_sequence<C: ConnectionTrait>(conn: &C) -> Result<i64, DomainError> {
        let last = message::Entity::find()
            .order_by_desc(message::Column::Sequence)
            .one(conn)
            .await?;
        Ok(last.map_or(1, |m| m.sequence + 1))
    }

    pub async fn ensure_conversation(
        &mut self,
        origin_campaign_id: Option<Uuid>,
    ) -> Result<EnsuredConversation, DomainError> {
        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let (header, created) = self
            .load_or_create_header(&txn, origin_campaign_id, now)
            .await?;
        txn.commit().await?;

        if created {
            info!(conversation = %self.key, "Conversation created");
        }
        self.header = Some(header.clone());
        Ok(EnsuredConversation {
            conversation: Conversation::try_from(header)?,
            created,
        })
    }

    pub async fn get_conversation(&self) -> Result<ConversationView, DomainError> {
        let header = self.require_header()?.clone();
        let messages = message::Entity::find()
            .order_by_asc(message::Column::Sequence)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConversationView {
            conversation: Conversation::try_from(header)?,
            messages,
        })
    }

    pub async fn send_message(&mut self, request: OutboundMessage) -> Result<SendOutcome, DomainError> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(DomainError::validation("content", "must not be empty"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DomainError::validation(
                "content",
                format!("must be at most {MAX_CONTENT_CHARS} characters"),
            ));
        }

        let mut idempotency_key = request.idempotency_key.clone();
        if let Some(ref key) = request.idempotency_key {
            let attempts = message::Entity::find()
                .filter(
                    Condition::any()
                        .add(message::Column::IdempotencyKey.eq(key.as_str()))
                        .add(message::Column::IdempotencyKey.like(format!("{key}:attempt-%"))),
                )
                .order_by_desc(message::Column::Sequence)
                .all(&self.db)
                .await?;
            if let Some(latest) = attempts.first() {
                if latest.status != MessageStatus::Failed.as_str() {
                    debug!(conversation = %self.key, idempotency_key = %key, "Send replayed");
                    return Ok(SendOutcome {
                        message: Message::try_from(latest.clone())?,
                        replayed: true,
                    });
                }
                let attempt = attempts.len() + 1;
                debug!(conversation = %self.key, idempotency_key = %key, attempt, "Retrying failed send");
                idempotency_key = Some(retry_key(key, attempt));
            }
        }

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let (header, _) = self.load_or_create_header(&txn, None, now).await?;
        if header.status == ConversationStatus::Archived.as_str() {
            return Err(DomainError::Conflict(format!(
                "conversation '{}' is archived",
                self.key
            )));
        }

        let pending = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            sequence: Set(Self::next_sequence(&txn).await?),
            direction: Set(Direction::Outbound.as_str().to_string()),
            content: Set(content.to_string()),
            kind: Set(request.kind.as_str().to_string()),
            status: Set(MessageStatus::Pending.as_str().to_string()),
            provider_message_id: Set(None),
            idempotency_key: Set(idempotency_key),
            error: Set(None),
            created_at: Set(now.into()),
            sent_at: Set(None),
            delivered_at: Set(None),
            read_at: Set(None),
            failed_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut touched: thread::ActiveModel = header.into();
        touched.last_message_at = Set(Some(now.into()));
        touched.updated_at = Set(now.into());
        let header = touched.update(&txn).await?;
        txn.commit().await?;
        self.header = Some(header);

        let outcome = self
            .provider
            .send(&OutboundRequest {
                to: self.key.phone().to_string(),
                from: self.sender_id.clone(),
                content: content.to_string(),
                kind: request.kind,
            })
            .await;

        let finished = self.clock.now();
        let mut active: message::ActiveModel = pending.into();
        match outcome {
            Ok(receipt) => {
                active.provider_message_id = Set(Some(receipt.provider_message_id));
                stamp_status(&mut active, MessageStatus::Sent, finished);
                if receipt.status.delivery_rank() > MessageStatus::Sent.delivery_rank() {
                    stamp_status(&mut active, receipt.status, finished);
                }
                counter!("outbound_messages_total", "status" => "sent").increment(1);
            }
            Err(err) => {
                warn!(conversation = %self.key, error = %err, "Outbound message failed");
                active.error = Set(Some(err.to_string()));
                stamp_status(&mut active, MessageStatus::Failed, finished);
                counter!("outbound_messages_total", "status" => "failed").increment(1);
            }
        }
        let saved = active.update(&self.db).await?;

        Ok(SendOutcome {
            message: Message::try_from(saved)?,
            replayed: false,
        })
    }

    pub async fn record_inbound_message(
        &mut self,
        inbound: InboundMessage,
    ) -> Result<InboundOutcome, DomainError> {
        let existing = message::Entity::find()
            .filter(message::Column::ProviderMessageId.eq(inbound.external_message_id.as_str()))
            .one(&self.db)
            .await?;
        if let Some(existing) = existing {
            return Ok(InboundOutcome {
                message: Message::try_from(existing)?,
                duplicate: true,
            });
        }

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let (header, _) = self.load_or_create_header(&txn, None, now).await?;

        let stored = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            sequence: Set(Self::next_sequence(&txn).await?),
            direction: Set(Direction::Inbound.as_str().to_string()),
            content: Set(inbound.content),
            kind: Set(inbound.kind.as_str().to_string()),
            status: Set(MessageStatus::Received.as_str().to_string()),
            provider_message_id: Set(Some(inbound.external_message_id)),
            idempotency_key: Set(None),
            error: Set(None),
            created_at: Set(inbound.timestamp.into()),
            sent_at: Set(None),
            delivered_at: Set(None),
            read_at: Set(None),
            failed_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let reopen = header.status == ConversationStatus::Resolved.as_str()
            || header.status == ConversationStatus::Archived.as_str();
        let last_message_at = match header.last_message_at {
            Some(previous) if previous.with_timezone(&Utc) > inbound.timestamp => previous,
            _ => inbound.timestamp.into(),
        };

        let mut touched: thread::ActiveModel = header.into();
        if reopen {
            touched.status = Set(ConversationStatus::Active.as_str().to_string());
        }
        touched.last_message_at = Set(Some(last_message_at));
        touched.updated_at = Set(now.into());
        let header = touched.update(&txn).await?;
        txn.commit().await?;

        if reopen {
            info!(conversation = %self.key, "Conversation reopened by inbound message");
        }
        self.header = Some(header);
        counter!("inbound_messages_total").increment(1);

        Ok(InboundOutcome {
            message: Message::try_from(stored)?,
            duplicate: false,
        })
    }

    pub async fn update_status(
        &mut self,
        status: ConversationStatus,
    ) -> Result<Conversation, DomainError> {
        let header = self.require_header()?.clone();
        let now = self.clock.now();

        let mut active: thread::ActiveModel = header.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(now.into());
        let updated = active.update(&self.db).await?;

        self.header = Some(updated.clone());
        Conversation::try_from(updated)
    }

    /// Applies a provider status callback. Stale or backward updates are ignored.
    pub async fn record_delivery_status(
        &self,
        update: DeliveryUpdate,
    ) -> Result<Message, DomainError> {
        if matches!(update.status, MessageStatus::Pending | MessageStatus::Received) {
            return Err(DomainError::validation(
                "status",
                "delivery callbacks carry sent, delivered, read or failed",
            ));
        }

        let row = message::Entity::find()
            .filter(message::Column::ProviderMessageId.eq(update.provider_message_id.as_str()))
            .one(&self.db)
            .await?
            .ok_or_else(|| DomainError::not_found(Resource::Message, &update.provider_message_id))?;
        let current = Message::try_from(row.clone())?;

        if current.direction == Direction::Inbound {
            return Err(DomainError::validation(
                "provider_message_id",
                "refers to an inbound message",
            ));
        }

        let advances = match (current.status, update.status) {
            (MessageStatus::Failed | MessageStatus::Read, _) => false,
            (_, MessageStatus::Failed) => true,
            (from, to) => to.delivery_rank() > from.delivery_rank(),
        };
        if !advances {
            debug!(
                conversation = %self.key,
                from = %current.status,
                to = %update.status,
                "Ignoring stale delivery update"
            );
            return Ok(current);
        }

        let mut active: message::ActiveModel = row.into();
        stamp_status(&mut active, update.status, self.clock.now());
        if update.status == MessageStatus::Failed {
            active.error = Set(update.error.or_else(|| Some("reported failed by provider".into())));
        }
        Message::try_from(active.update(&self.db).await?)
    }
}

//! # Conversation Actor
//!
//! One actor per (tenant, customer phone). Each owns its own embedded store
//! with the thread header and message log, independent of the tenant's store.

pub mod store;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

use crate::actor::{Actor, ActorDirectory, ActorHandle, Reply};
use crate::clock::SharedClock;
use crate::db::{StoreLocation, open_embedded_store};
use crate::error::DomainError;
use crate::messaging::SharedProvider;
use crate::normalization::phone_digits;
use migration::ConversationMigrator;

pub use store::ConversationStore;
use types::{
    Conversation, ConversationKey, ConversationStatus, ConversationView, DeliveryUpdate,
    EnsuredConversation, InboundMessage, InboundOutcome, Message, OutboundMessage, SendOutcome,
};

#[derive(Clone)]
pub struct ConversationContext {
    pub data_dir: String,
    pub provider: SharedProvider,
    pub sender_id: String,
    pub clock: SharedClock,
}

pub type ConversationDirectory = ActorDirectory<ConversationActor>;
pub type ConversationHandle = ActorHandle<ConversationActor>;

pub enum ConversationMessage {
    Ensure {
        origin_campaign_id: Option<Uuid>,
        reply: Reply<EnsuredConversation>,
    },
    Get {
        reply: Reply<ConversationView>,
    },
    Send {
        request: OutboundMessage,
        reply: Reply<SendOutcome>,
    },
    RecordInbound {
        inbound: InboundMessage,
        reply: Reply<InboundOutcome>,
    },
    UpdateStatus {
        status: ConversationStatus,
        reply: Reply<Conversation>,
    },
    RecordDelivery {
        update: DeliveryUpdate,
        reply: Reply<Message>,
    },
}

pub struct ConversationActor {
    store: ConversationStore,
    durable: bool,
}

#[async_trait]
impl Actor for ConversationActor {
    type Key = ConversationKey;
    type Message = ConversationMessage;
    type Context = ConversationContext;

    const KIND: &'static str = "conversation";

    async fn activate(
        key: &ConversationKey,
        context: &ConversationContext,
    ) -> Result<Self, DomainError> {
        let relative = format!(
            "conversations/{}/{}.sqlite",
            key.tenant(),
            phone_digits(key.phone())
        );
        let location = StoreLocation::resolve(&context.data_dir, relative);
        let db = open_embedded_store::<ConversationMigrator>(&location).await?;
        let store = ConversationStore::open(
            key.clone(),
            db,
            context.provider.clone(),
            context.sender_id.clone(),
            context.clock.clone(),
        )
        .await?;

        Ok(Self {
            store,
            durable: location.is_durable(),
        })
    }

    fn passivates(&self) -> bool {
        self.durable
    }

    async fn handle(&mut self, message: ConversationMessage) {
        match message {
            ConversationMessage::Ensure {
                origin_campaign_id,
                reply,
            } => {
                let _ = reply.send(self.store.ensure_conversation(origin_campaign_id).await);
            }
            ConversationMessage::Get { reply } => {
                let _ = reply.send(self.store.get_conversation().await);
            }
            ConversationMessage::Send { request, reply } => {
                let _ = reply.send(self.store.send_message(request).await);
            }
            ConversationMessage::RecordInbound { inbound, reply } => {
                let _ = reply.send(self.store.record_inbound_message(inbound).await);
            }
            ConversationMessage::UpdateStatus { status, reply } => {
                let _ = reply.send(self.store.update_status(status).await);
            }
            ConversationMessage::RecordDelivery { update, reply } => {
                let _ = reply.send(self.store.record_delivery_status(update).await);
            }
        }
    }
}

impl ActorHandle<ConversationActor> {
    /// Creates the conversation if absent; `created` tells which happened.
    pub async fn ensure_conversation(
        &self,
        origin_campaign_id: Option<Uuid>,
    ) -> Result<EnsuredConversation, DomainError> {
        self.ask("ensure_conversation", |reply| ConversationMessage::Ensure {
            origin_campaign_id,
            reply,
        })
        .await
    }

    pub async fn get_conversation(&self) -> Result<ConversationView, DomainError> {
        self.ask("get_conversation", |reply| ConversationMessage::Get { reply })
            .await
    }

    pub async fn send_message(&self, request: OutboundMessage) -> Result<SendOutcome, DomainError> {
        self.ask("send_message", |reply| ConversationMessage::Send {
            request,
            reply,
        })
        .await
    }

    pub async fn record_inbound_message(
        &self,
        inbound: InboundMessage,
    ) -> Result<InboundOutcome, DomainError> {
        self.ask("record_inbound_message", |reply| {
            ConversationMessage::RecordInbound { inbound, reply }
        })
        .await
    }

    pub async fn update_status(
        &self,
        status: ConversationStatus,
    ) -> Result<Conversation, DomainError> {
        self.ask("update_status", |reply| ConversationMessage::UpdateStatus {
            status,
            reply,
        })
        .await
    }

    pub async fn record_delivery_status(
        &self,
        update: DeliveryUpdate,
    ) -> Result<Message, DomainError> {
        self.ask("record_delivery_status", |reply| {
            ConversationMessage::RecordDelivery { update, reply }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{ActorConfig, IN_MEMORY_DATA_DIR};
    use crate::conversation::types::{MessageKind, MessageStatus};
    use crate::messaging::{MessagingProvider, OutboundRequest, ProviderError, ProviderReceipt};
    use crate::normalization::TenantSlug;

    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        reject: AtomicBool,
    }

    #[async_trait]
    impl MessagingProvider for ScriptedProvider {
        async fn send(&self, _request: &OutboundRequest) -> Result<ProviderReceipt, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(ProviderError::Rejected {
                    status: 400,
                    body: "invalid recipient".into(),
                });
            }
            Ok(ProviderReceipt {
                provider_message_id: format!("pm-{n}"),
                status: MessageStatus::Sent,
            })
        }
    }

    fn directory(provider: Arc<ScriptedProvider>) -> ConversationDirectory {
        ConversationDirectory::new(
            ConversationContext {
                data_dir: IN_MEMORY_DATA_DIR.to_string(),
                provider,
                sender_id: "outpost".into(),
                clock: Arc::new(SystemClock),
            },
            ActorConfig::default(),
        )
    }

    #[tokio::test]
    async fn idle_conversation_passivates_and_keeps_its_log() {
        let data_dir = tempfile::TempDir::new().unwrap();
        let directory = ConversationDirectory::new(
            ConversationContext {
                data_dir: data_dir.path().display().to_string(),
                provider: Arc::new(ScriptedProvider::default()),
                sender_id: "outpost".into(),
                clock: Arc::new(SystemClock),
            },
            ActorConfig {
                idle_timeout_ms: 100,
                ..ActorConfig::default()
            },
        );

        let handle = directory.get(&key("+15550102030")).await.unwrap();
        handle.send_message(text("Welcome!", Some("k1"))).await.unwrap();
        assert_eq!(directory.active_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(directory.active_count(), 0);

        let revived = directory.get(&key("+15550102030")).await.unwrap();
        let view = revived.get_conversation().await.unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].status, MessageStatus::Sent);

        let replay = revived.send_message(text("Welcome!", Some("k1"))).await.unwrap();
        assert!(replay.replayed);
    }

    #[tokio::test]
    async fn in_memory_conversation_never_passivates() {
        let directory = ConversationDirectory::new(
            ConversationContext {
                data_dir: IN_MEMORY_DATA_DIR.to_string(),
                provider: Arc::new(ScriptedProvider::default()),
                sender_id: "outpost".into(),
                clock: Arc::new(SystemClock),
            },
            ActorConfig {
                idle_timeout_ms: 100,
                ..ActorConfig::default()
            },
        );

        let handle = directory.get(&key("+15550102030")).await.unwrap();
        handle.ensure_conversation(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(directory.active_count(), 1);
        handle.get_conversation().await.unwrap();
    }

    fn key(phone: &str) -> ConversationKey {
        ConversationKey::new(TenantSlug::parse("acme").unwrap(), phone).unwrap()
    }

    fn text(content: &str, idempotency_key: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            content: content.into(),
            kind: MessageKind::Text,
            idempotency_key: idempotency_key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn ensure_reports_creation_once() {
        let directory = directory(Arc::default());
        let handle = directory.get(&key("+15550102030")).await.unwrap();

        let campaign = Uuid::new_v4();
        let first = handle.ensure_conversation(Some(campaign)).await.unwrap();
        let second = handle.ensure_conversation(None).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.conversation.origin_campaign_id, Some(campaign));
        assert_eq!(first.conversation.id, key("+15550102030").conversation_id());
    }

    #[tokio::test]
    async fn get_before_any_message_is_not_found() {
        let directory = directory(Arc::default());
        let handle = directory.get(&key("+15550102030")).await.unwrap();

        assert!(matches!(
            handle.get_conversation().await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn idempotent_send_calls_provider_once() {
        let provider = Arc::new(ScriptedProvider::default());
        let directory = directory(provider.clone());
        let handle = directory.get(&key("+15550102030")).await.unwrap();

        let first = handle.send_message(text("Welcome!", Some("k1"))).await.unwrap();
        let again = handle.send_message(text("Welcome!", Some("k1"))).await.unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(first.message.id, again.message.id);
        assert_eq!(first.message.status, MessageStatus::Sent);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let view = handle.get_conversation().await.unwrap();
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_recorded_not_rolled_back() {
        let provider = Arc::new(ScriptedProvider {
            reject: AtomicBool::new(true),
            ..ScriptedProvider::default()
        });
        let directory = directory(provider);
        let handle = directory.get(&key("+15550102030")).await.unwrap();

        let outcome = handle.send_message(text("Hello", None)).await.unwrap();
        assert_eq!(outcome.message.status, MessageStatus::Failed);
        assert!(outcome.message.error.unwrap().contains("invalid recipient"));
        assert!(outcome.message.failed_at.is_some());

        // A retry is a new message; the failed one stays in the log
        handle.send_message(text("Hello", None)).await.unwrap();
        let view = handle.get_conversation().await.unwrap();
        assert_eq!(
            view.messages.iter().map(|m| m.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn failed_keyed_send_is_retried_as_new_attempt() {
        let provider = Arc::new(ScriptedProvider {
            reject: AtomicBool::new(true),
            ..ScriptedProvider::default()
        });
        let directory = directory(provider.clone());
        let handle = directory.get(&key("+15550102030")).await.unwrap();

        let failed = handle.send_message(text("Hello", Some("k1"))).await.unwrap();
        assert_eq!(failed.message.status, MessageStatus::Failed);

        provider.reject.store(false, Ordering::SeqCst);
        let retried = handle.send_message(text("Hello", Some("k1"))).await.unwrap();
        assert!(!retried.replayed);
        assert_eq!(retried.message.status, MessageStatus::Sent);
        assert_eq!(retried.message.idempotency_key.as_deref(), Some("k1:attempt-2"));

        let replay = handle.send_message(text("Hello", Some("k1"))).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.message.id, retried.message.id);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let view = handle.get_conversation().await.unwrap();
        let statuses: Vec<_> = view.messages.iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![MessageStatus::Failed, MessageStatus::Sent]);
    }

    #[tokio::test]
    async fn inbound_is_deduplicated_and_reopens_thread() {
        let directory = directory(Arc::default());
        let handle = directory.get(&key("+15550102030")).await.unwrap();
        handle.ensure_conversation(None).await.unwrap();
        handle
            .update_status(ConversationStatus::Archived)
            .await
            .unwrap();

        let archived_send = handle.send_message(text("ping", None)).await;
        assert!(matches!(archived_send, Err(DomainError::Conflict(_))));

        let inbound = InboundMessage {
            external_message_id: "wamid.1".into(),
            from: "+15550102030".into(),
            to: "outpost".into(),
            content: "hi again".into(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
        };
        let first = handle.record_inbound_message(inbound.clone()).await.unwrap();
        let second = handle.record_inbound_message(inbound).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        let view = handle.get_conversation().await.unwrap();
        assert_eq!(view.conversation.status, ConversationStatus::Active);
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn delivery_updates_only_move_forward() {
        let directory = directory(Arc::default());
        let handle = directory.get(&key("+15550102030")).await.unwrap();
        let sent = handle.send_message(text("Order shipped", None)).await.unwrap();
        let provider_id = sent.message.provider_message_id.clone().unwrap();

        let update = |status| DeliveryUpdate {
            provider_message_id: provider_id.clone(),
            status,
            error: None,
        };

        let read = handle.record_delivery_status(update(MessageStatus::Read)).await.unwrap();
        assert_eq!(read.status, MessageStatus::Read);
        assert!(read.read_at.is_some());

        let stale = handle
            .record_delivery_status(update(MessageStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(stale.status, MessageStatus::Read);

        let unknown = handle
            .record_delivery_status(DeliveryUpdate {
                provider_message_id: "nope".into(),
                status: MessageStatus::Delivered,
                error: None,
            })
            .await;
        assert!(matches!(unknown, Err(DomainError::NotFound { .. })));
    }
}

//! # Campaign Launch Orchestrator
//!
//! Resolves a campaign's segments to distinct customers through the tenant
//! actor, then contacts each customer through its conversation actor. The
//! orchestrator keeps no state of its own: per-customer effects live in the
//! conversation actors and the summary counters are written back to the
//! campaign once, at the end.
//!
//! Re-running a launch is safe. The first message for a customer carries an
//! idempotency key derived from (campaign id, customer phone), so a second run
//! finds the message already in the conversation log and does not send again.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::conversation::ConversationDirectory;
use crate::conversation::types::{ConversationKey, MessageKind, MessageStatus, OutboundMessage};
use crate::error::{DomainError, Resource};
use crate::normalization::TenantSlug;
use crate::tenant::TenantDirectory;
use crate::tenant::types::{Customer, LaunchTally};

/// Namespace for first-message idempotency keys.
const FIRST_MESSAGE_NAMESPACE: Uuid = Uuid::from_u128(0x6f75_7470_6f73_742d_6c61_756e_6368_0001);

/// Idempotency key of the first message a campaign sends to `phone`.
pub fn first_message_key(campaign_id: Uuid, phone: &str) -> String {
    Uuid::new_v5(
        &FIRST_MESSAGE_NAMESPACE,
        format!("{campaign_id}:{phone}").as_bytes(),
    )
    .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LaunchSummary {
    pub campaign_id: Uuid,
    pub dry_run: bool,
    /// Distinct customers the campaign's segments resolved to
    pub total_customers: usize,
    pub conversations_created: usize,
    pub messages_sent: usize,
    /// Customers whose first message was already in their conversation
    pub already_contacted: usize,
    /// One human-readable entry per customer that could not be contacted
    pub errors: Vec<String>,
}

/// Outcome of contacting one customer.
#[derive(Debug)]
enum Contact {
    Sent { created: bool },
    AlreadyContacted { created: bool },
    Failed(String),
}

#[derive(Clone)]
pub struct LaunchOrchestrator {
    tenants: Arc<TenantDirectory>,
    conversations: Arc<ConversationDirectory>,
    concurrency: usize,
}

impl LaunchOrchestrator {
    pub fn new(
        tenants: Arc<TenantDirectory>,
        conversations: Arc<ConversationDirectory>,
        concurrency: usize,
    ) -> Self {
        Self {
            tenants,
            conversations,
            concurrency: concurrency.max(1),
        }
    }

    /// Launches (or, with `dry_run`, simulates launching) a campaign.
    pub async fn launch(
        &self,
        tenant: &TenantSlug,
        campaign_id: Uuid,
        dry_run: bool,
    ) -> Result<LaunchSummary, DomainError> {
        let started = Instant::now();
        let handle = self.tenants.get(tenant).await?;

        let targets = match handle.resolve_campaign_targets(campaign_id).await {
            Ok(targets) => targets,
            Err(err @ DomainError::NotFound {
                resource: Resource::Segment,
                ..
            }) => {
                warn!(tenant = %tenant, campaign_id = %campaign_id, error = %err, "Campaign targets could not be resolved");
                if !dry_run {
                    handle.mark_campaign_failed(campaign_id).await?;
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if !dry_run && !targets.campaign.status.accepts_launch() {
            return Err(DomainError::Conflict(format!(
                "campaign '{campaign_id}' is {} and cannot be launched",
                targets.campaign.status
            )));
        }

        let mut summary = LaunchSummary {
            campaign_id,
            dry_run,
            total_customers: targets.customers.len(),
            ..LaunchSummary::default()
        };

        let mut reachable = Vec::with_capacity(targets.customers.len());
        for customer in targets.customers {
            match contact_phone(&customer) {
                Ok(phone) => reachable.push((customer.id, phone)),
                Err(reason) => summary.errors.push(reason),
            }
        }

        if dry_run {
            info!(
                tenant = %tenant,
                campaign_id = %campaign_id,
                total_customers = summary.total_customers,
                "Dry run launch computed"
            );
            counter!("campaign_launches_total", "mode" => "dry_run").increment(1);
            return Ok(summary);
        }

        let content = targets.campaign.message_template.clone();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(reachable.len());

        for (customer_id, phone) in reachable {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DomainError::TransientStore("launch fan-out closed".into()))?;
            let conversations = Arc::clone(&self.conversations);
            let tenant = tenant.clone();
            let content = content.clone();

            let task = tokio::spawn(async move {
                let _permit = permit;
                contact_customer(&conversations, tenant, campaign_id, &phone, content).await
            });
            handles.push((customer_id, task));
        }

        for (customer_id, task) in handles {
            match task.await {
                Ok(Contact::Sent { created }) => {
                    summary.messages_sent += 1;
                    summary.conversations_created += usize::from(created);
                }
                Ok(Contact::AlreadyContacted { created }) => {
                    summary.already_contacted += 1;
                    summary.conversations_created += usize::from(created);
                }
                Ok(Contact::Failed(reason)) => {
                    summary.errors.push(format!("customer {customer_id}: {reason}"));
                }
                Err(join_err) => {
                    error!(customer_id = %customer_id, error = %join_err, "Launch task panicked or was cancelled");
                    summary
                        .errors
                        .push(format!("customer {customer_id}: task aborted"));
                }
            }
        }

        let tally = LaunchTally {
            targeted: count(summary.total_customers),
            contacted: count(summary.messages_sent + summary.already_contacted),
            failed: count(summary.errors.len()),
        };
        handle.record_launch(campaign_id, tally).await?;

        counter!("campaign_launches_total", "mode" => "live").increment(1);
        counter!("campaign_launch_messages_total", "outcome" => "sent")
            .increment(summary.messages_sent as u64);
        counter!("campaign_launch_messages_total", "outcome" => "failed")
            .increment(summary.errors.len() as u64);
        histogram!("campaign_launch_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            tenant = %tenant,
            campaign_id = %campaign_id,
            total_customers = summary.total_customers,
            conversations_created = summary.conversations_created,
            messages_sent = summary.messages_sent,
            already_contacted = summary.already_contacted,
            errors = summary.errors.len(),
            "Campaign launched"
        );
        Ok(summary)
    }
}

fn count(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Phone a customer can be messaged on, or the reason they cannot.
fn contact_phone(customer: &Customer) -> Result<String, String> {
    let Some(ref phone) = customer.phone else {
        return Err(format!("customer {}: no phone number", customer.id));
    };
    if !customer.sms_opt_in {
        return Err(format!("customer {}: not opted in to messages", customer.id));
    }
    Ok(phone.clone())
}

async fn contact_customer(
    conversations: &ConversationDirectory,
    tenant: TenantSlug,
    campaign_id: Uuid,
    phone: &str,
    content: String,
) -> Contact {
    let attempt = async {
        let key = ConversationKey::new(tenant, phone)?;
        let conversation = conversations.get(&key).await?;
        let ensured = conversation.ensure_conversation(Some(campaign_id)).await?;
        let outcome = conversation
            .send_message(OutboundMessage {
                content,
                kind: MessageKind::Text,
                idempotency_key: Some(first_message_key(campaign_id, key.phone())),
            })
            .await?;
        Ok::<_, DomainError>((ensured.created, outcome))
    };

    match attempt.await {
        Ok((created, outcome)) if outcome.message.status == MessageStatus::Failed => {
            let reason = outcome
                .message
                .error
                .unwrap_or_else(|| "provider rejected the message".to_string());
            debug!(campaign_id = %campaign_id, created, "First message failed; a relaunch sends a new attempt");
            Contact::Failed(reason)
        }
        Ok((created, outcome)) if outcome.replayed => Contact::AlreadyContacted { created },
        Ok((created, _)) => Contact::Sent { created },
        Err(err) => {
            if err.is_retryable() {
                debug!(campaign_id = %campaign_id, error = %err, "Transient failure contacting customer");
            }
            Contact::Failed(err.to_string())
        }
    }
}

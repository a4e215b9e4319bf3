//! # Storefront Linking
//!
//! Connects tenants to external storefront domains across two stores: the
//! tenant's own `connected_stores` row and the global registry entry. The
//! tenant-local write goes first because it is cheap to undo; the registry
//! claim goes second because it is the one that enforces exclusivity.

pub mod webhook;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::clock::SharedClock;
use crate::error::DomainError;
use crate::normalization::{TenantSlug, normalize_domain};
use crate::repositories::{ClaimOutcome, SharedRegistry};
use crate::tenant::TenantDirectory;
use crate::tenant::types::{ConnectedStore, StoreCredentials};

/// What an uninstall notification did.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UninstallOutcome {
    pub domain: String,
    /// Tenant whose store was disconnected, if any tenant held the domain
    pub tenant_slug: Option<String>,
}

#[derive(Clone)]
pub struct StorefrontLinker {
    tenants: Arc<TenantDirectory>,
    registry: SharedRegistry,
    clock: SharedClock,
}

impl StorefrontLinker {
    pub fn new(tenants: Arc<TenantDirectory>, registry: SharedRegistry, clock: SharedClock) -> Self {
        Self {
            tenants,
            registry,
            clock,
        }
    }

    /// Connects `credentials.domain` to `tenant`.
    ///
    /// Losing the registry claim after the local write undoes the local write
    /// and reports [`DomainError::ReconciliationRequired`].
    pub async fn connect(
        &self,
        tenant: &TenantSlug,
        credentials: StoreCredentials,
    ) -> Result<ConnectedStore, DomainError> {
        let domain = normalize_domain(&credentials.domain)?;
        let handle = self.tenants.get(tenant).await?;

        if let Some(entry) = self.registry.get(&domain).await?
            && entry.blocks(tenant.as_str())
        {
            info!(tenant = %tenant, domain = %domain, owner = %entry.tenant_slug, "Storefront already connected elsewhere");
            return Err(DomainError::ShopAlreadyConnected {
                domain,
                owner: entry.tenant_slug,
            });
        }

        let connected = handle
            .connect_store(StoreCredentials {
                domain: domain.clone(),
                ..credentials
            })
            .await?;

        let claim = self
            .registry
            .claim(&domain, tenant.as_str(), self.clock.now())
            .await;

        match claim {
            Ok(ClaimOutcome::Claimed(_)) => {
                info!(tenant = %tenant, domain = %domain, "Storefront connected");
                Ok(connected)
            }
            Ok(ClaimOutcome::Lost { owner }) => {
                let compensation = handle.disconnect_store(domain.clone()).await;
                let detail = match compensation {
                    Ok(_) => format!(
                        "claimed concurrently by tenant '{owner}'; local connection was rolled back"
                    ),
                    Err(ref err) => format!(
                        "claimed concurrently by tenant '{owner}'; rolling back the local connection failed: {err}"
                    ),
                };
                warn!(tenant = %tenant, domain = %domain, owner = %owner, compensated = compensation.is_ok(), "Registry claim lost after local connect");
                Err(DomainError::ReconciliationRequired {
                    subject: format!("storefront '{domain}'"),
                    detail,
                })
            }
            Err(err) => match handle.disconnect_store(domain.clone()).await {
                Ok(_) => {
                    warn!(tenant = %tenant, domain = %domain, error = %err, "Registry claim failed; local connection rolled back");
                    Err(err)
                }
                Err(rollback) => {
                    error!(tenant = %tenant, domain = %domain, error = %err, rollback_error = %rollback, "Registry claim and rollback both failed");
                    Err(DomainError::ReconciliationRequired {
                        subject: format!("storefront '{domain}'"),
                        detail: format!(
                            "registry claim failed ({err}) and the local connection could not be rolled back ({rollback})"
                        ),
                    })
                }
            },
        }
    }

    /// Removes the registry entry, then marks the local store disconnected.
    /// Disconnecting a domain the tenant never connected succeeds with `None`.
    pub async fn disconnect(
        &self,
        tenant: &TenantSlug,
        domain: &str,
    ) -> Result<Option<ConnectedStore>, DomainError> {
        let domain = normalize_domain(domain)?;
        let handle = self.tenants.get(tenant).await?;
        // Fails NotFound for unprovisioned tenants before touching the registry
        handle.get_organization().await?;

        self.registry.release(&domain, tenant.as_str()).await?;
        let store = handle.disconnect_store(domain.clone()).await?;

        if store.is_some() {
            info!(tenant = %tenant, domain = %domain, "Storefront disconnected");
        }
        Ok(store)
    }

    /// Handles a verified uninstall notification for `domain`.
    pub async fn handle_uninstall(&self, domain: &str) -> Result<UninstallOutcome, DomainError> {
        let domain = normalize_domain(domain)?;
        let Some(entry) = self.registry.get(&domain).await? else {
            info!(domain = %domain, "Uninstall for unclaimed storefront ignored");
            return Ok(UninstallOutcome {
                domain,
                tenant_slug: None,
            });
        };

        let tenant = TenantSlug::parse(&entry.tenant_slug)?;
        self.disconnect(&tenant, &domain).await?;

        Ok(UninstallOutcome {
            domain,
            tenant_slug: Some(entry.tenant_slug),
        })
    }

    pub async fn list_connected(&self, tenant: &TenantSlug) -> Result<Vec<ConnectedStore>, DomainError> {
        self.tenants.get(tenant).await?.list_connected_stores().await
    }
}

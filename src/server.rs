//! # Server Configuration
//!
//! Router assembly and the serve loop. Operator-authenticated routes live
//! under `/api/v1`; the storefront webhook authenticates by signature.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::platform::Platform;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub platform: Platform,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/tenants", post(handlers::tenants::create_tenant))
        .route("/me/tenants", get(handlers::tenants::my_tenants))
        .route("/tenants/{slug}", get(handlers::tenants::get_tenant))
        .route("/tenants/{slug}/members", get(handlers::tenants::list_members))
        .route(
            "/tenants/{slug}/members/reconcile",
            post(handlers::tenants::reconcile_members),
        )
        .route(
            "/tenants/{slug}/invitations",
            post(handlers::tenants::create_invitation).get(handlers::tenants::list_invitations),
        )
        .route(
            "/tenants/{slug}/invitations/accept",
            post(handlers::tenants::accept_invitation),
        )
        .route(
            "/tenants/{slug}/invitations/{invitation_id}/revoke",
            post(handlers::tenants::revoke_invitation),
        )
        .route(
            "/tenants/{slug}/customers",
            post(handlers::customers::create_customer).get(handlers::customers::list_customers),
        )
        .route(
            "/tenants/{slug}/customers/import",
            post(handlers::customers::import_customers),
        )
        .route(
            "/tenants/{slug}/segments",
            post(handlers::customers::create_segment).get(handlers::customers::list_segments),
        )
        .route(
            "/tenants/{slug}/segments/{segment_id}/customers",
            post(handlers::customers::add_segment_customers)
                .get(handlers::customers::list_segment_customers),
        )
        .route(
            "/tenants/{slug}/campaigns",
            post(handlers::campaigns::create_campaign).get(handlers::campaigns::list_campaigns),
        )
        .route(
            "/tenants/{slug}/campaigns/{campaign_id}",
            get(handlers::campaigns::get_campaign),
        )
        .route(
            "/tenants/{slug}/campaigns/{campaign_id}/segments",
            put(handlers::campaigns::set_campaign_segments),
        )
        .route(
            "/tenants/{slug}/campaigns/{campaign_id}/launch",
            post(handlers::campaigns::launch_campaign),
        )
        .route(
            "/tenants/{slug}/stores",
            post(handlers::storefronts::connect_store).get(handlers::storefronts::list_stores),
        )
        .route(
            "/tenants/{slug}/stores/{domain}",
            axum::routing::delete(handlers::storefronts::disconnect_store),
        )
        .route(
            "/tenants/{slug}/conversations/{phone}",
            get(handlers::conversations::get_conversation),
        )
        .route(
            "/tenants/{slug}/conversations/{phone}/messages",
            post(handlers::conversations::send_message),
        )
        .route(
            "/tenants/{slug}/conversations/{phone}/status",
            put(handlers::conversations::update_conversation_status),
        )
        .route(
            "/webhooks/messages/{slug}",
            post(handlers::webhooks::inbound_message),
        )
        .route(
            "/webhooks/deliveries/{slug}",
            post(handlers::webhooks::delivery_status),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route(
            "/webhooks/storefront",
            post(handlers::webhooks::storefront_webhook),
        )
        .nest("/api/v1", api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Starts the server with the given configuration
pub async fn run_server(config: Arc<AppConfig>, platform: Platform) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {e}"))?;

    let state = AppState {
        config: Arc::clone(&config),
        platform: platform.clone(),
    };
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    platform.shutdown();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::tenants::create_tenant,
        crate::handlers::tenants::get_tenant,
        crate::handlers::tenants::my_tenants,
        crate::handlers::tenants::list_members,
        crate::handlers::tenants::reconcile_members,
        crate::handlers::tenants::create_invitation,
        crate::handlers::tenants::list_invitations,
        crate::handlers::tenants::accept_invitation,
        crate::handlers::tenants::revoke_invitation,
        crate::handlers::customers::create_customer,
        crate::handlers::customers::list_customers,
        crate::handlers::customers::import_customers,
        crate::handlers::customers::create_segment,
        crate::handlers::customers::list_segments,
        crate::handlers::customers::add_segment_customers,
        crate::handlers::customers::list_segment_customers,
        crate::handlers::campaigns::create_campaign,
        crate::handlers::campaigns::list_campaigns,
        crate::handlers::campaigns::get_campaign,
        crate::handlers::campaigns::set_campaign_segments,
        crate::handlers::campaigns::launch_campaign,
        crate::handlers::storefronts::connect_store,
        crate::handlers::storefronts::disconnect_store,
        crate::handlers::storefronts::list_stores,
        crate::handlers::conversations::get_conversation,
        crate::handlers::conversations::send_message,
        crate::handlers::conversations::update_conversation_status,
        crate::handlers::webhooks::storefront_webhook,
        crate::handlers::webhooks::inbound_message,
        crate::handlers::webhooks::delivery_status,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
        )
    ),
    modifiers(&BearerAuth),
    info(
        title = "Outpost API",
        description = "Multi-tenant messaging and commerce backend",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

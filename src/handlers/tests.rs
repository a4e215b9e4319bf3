//! # Tests for Handlers
//!
//! Router-level tests over an in-memory platform.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::USER_ID_HEADER;
use crate::config::{AppConfig, IN_MEMORY_DATA_DIR};
use crate::handlers::root;
use crate::platform::{Platform, PlatformParts};
use crate::server::{AppState, create_app};

const TOKEN: &str = "handler-test-token";

async fn test_state() -> AppState {
    let config = AppConfig {
        profile: "test".to_string(),
        data_dir: IN_MEMORY_DATA_DIR.to_string(),
        operator_tokens: vec![TOKEN.to_string()],
        crypto_key: Some(vec![9u8; 32]),
        ..AppConfig::default()
    };

    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1);
    let db = Database::connect(opt).await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let parts = PlatformParts::from_config(&config, Arc::new(db)).unwrap();
    let platform = Platform::new(&config, parts).unwrap();
    AppState {
        config: Arc::new(config),
        platform,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let service_info = root().await.0;

    assert_eq!(service_info.service, "outpost");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn root_is_public() {
    let app = create_app(test_state().await);

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["service"], "outpost");
}

#[tokio::test]
async fn api_requires_operator_token() {
    let app = create_app(test_state().await);

    let response = app
        .oneshot(
            Request::get("/api/v1/me/tenants")
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_tenant_then_list_mine() {
    let app = create_app(test_state().await);
    let user = Uuid::new_v4().to_string();

    let created = app
        .clone()
        .oneshot(
            Request::post("/api/v1/tenants")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(USER_ID_HEADER, &user)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "slug": "acme", "name": "Acme" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    assert_eq!(created["organization"]["slug"], "acme");
    assert_eq!(created["owner"]["role"], "owner");

    let mine = app
        .oneshot(
            Request::get("/api/v1/me/tenants")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(USER_ID_HEADER, &user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(mine.status(), StatusCode::OK);
    let mine = body_json(mine).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["tenant_slug"], "acme");
}

#[tokio::test]
async fn outsiders_are_forbidden() {
    let state = test_state().await;
    let app = create_app(state);
    let owner = Uuid::new_v4().to_string();

    app.clone()
        .oneshot(
            Request::post("/api/v1/tenants")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(USER_ID_HEADER, &owner)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "slug": "acme", "name": "Acme" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::get("/api/v1/tenants/acme/customers")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_slug_is_a_bad_request() {
    let app = create_app(test_state().await);

    let response = app
        .oneshot(
            Request::get("/api/v1/tenants/Not_A_Slug")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

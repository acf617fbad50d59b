// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{gate_middleware, Principal, PrincipalKind},
    state::AppState,
};

pub mod health;
pub mod session;

/// Gate-only router: health, session endpoints and docs.
pub fn router(state: AppState) -> Router {
    router_with(state, Router::new())
}

/// Wrap `downstream` routes with the gate.
///
/// Every route, including the fallback, runs behind the gate middleware, so
/// downstream handlers can rely on the `Auth` extractor.
pub fn router_with(state: AppState, downstream: Router<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let session_routes = Router::new()
        .route("/api/auth/wallet", post(session::wallet_login))
        .route("/api/auth/logout", post(session::logout))
        .route("/api/auth/me", get(session::current_principal))
        .route("/logout", get(session::logout).post(session::logout));

    Router::new()
        .merge(health_routes)
        .merge(session_routes)
        .merge(downstream)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), gate_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

/// Fallback for unknown routes. Runs behind the gate, so unknown protected
/// paths still redirect anonymous callers to the login page.
async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        session::wallet_login,
        session::logout,
        session::current_principal
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            session::WalletLoginRequest,
            session::WalletLoginResponse,
            session::LogoutResponse,
            Principal,
            PrincipalKind
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Session", description = "Wallet sign-in, logout and principal lookup")
    )
)]
struct ApiDoc;

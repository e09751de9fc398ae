//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, metrics)
//! - Put the rate limiter in front of `/auth` and the gateway in front of
//!   everything that needs a principal
//! - Serve until the shutdown token fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::handlers;
use super::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};
use crate::accounts::{AccountService, Role};
use crate::config::ServerConfig;
use crate::observability::metrics;
use crate::security::{rate_limit_middleware, require_auth, require_role, AuthGateway, RateLimiter};

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub gateway: Arc<AuthGateway>,
    /// `None` disables rate limiting.
    pub limiter: Option<Arc<RateLimiter>>,
}

/// HTTP server for the account API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        Self {
            router: build_router(config, state),
        }
    }

    /// Run the server on `listener` until `shutdown` is cancelled.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
    let authenticated = middleware::from_fn_with_state(state.gateway.clone(), require_auth);
    let admin_only = middleware::from_fn_with_state(ADMIN_ONLY, require_role);

    let mut auth = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh-token", post(handlers::refresh_token))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/reset-password", post(handlers::reset_password))
        .merge(
            Router::new()
                .route("/logout", post(handlers::logout))
                .route_layer(authenticated.clone()),
        );
    if let Some(limiter) = &state.limiter {
        auth = auth.layer(middleware::from_fn_with_state(
            limiter.clone(),
            rate_limit_middleware,
        ));
    }

    let users = Router::new()
        .route("/me", get(handlers::me).put(handlers::update_me))
        .route("/me/password", put(handlers::change_password))
        .merge(
            Router::new()
                .route("/", get(handlers::list_users))
                .route(
                    "/{id}",
                    get(handlers::get_user)
                        .put(handlers::set_role)
                        .delete(handlers::delete_user),
                )
                .route("/{id}/role", put(handlers::set_role))
                .route("/{id}/purge", delete(handlers::purge_user))
                .route_layer(admin_only.clone()),
        )
        .route_layer(authenticated.clone());

    let admin = Router::new()
        .route("/dashboard", get(handlers::dashboard))
        .route_layer(admin_only)
        .route_layer(authenticated);

    let api = Router::new()
        .nest("/auth", auth)
        .nest("/users", users)
        .nest("/admin", admin);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(count_requests))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id(request),
                    )
                }))
                .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                .layer(RequestBodyLimitLayer::new(config.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_secs,
                ))),
        )
}

async fn count_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics::record_request(method.as_str(), response.status().as_u16());
    response
}

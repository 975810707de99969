use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::ConnectInfo,
    extract::DefaultBodyLimit,
    http::{request::Request, HeaderName, StatusCode},
    routing::{delete, get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::resolve_client_ip,
    core::{AppConfig, AppState},
    handlers::{
        auth::{change_password, login, logout, me, refresh, register},
        connections::{
            approve_connection_request, create_connection_request, delete_connection_request,
            list_connection_requests, list_connections, remove_connection,
        },
        feed::feed,
        messages::{delete_message, get_thread, inbox, send_direct, send_message},
        profile::{get_user_profile, list_user_updates, lookup_users, update_my_profile},
        search::search,
        updates::{add_comment, delete_update, get_update, list_comments, post_update},
    },
    network::IpNetwork,
    types::{health, metrics},
};

#[derive(Clone)]
struct TrustedClientIpKeyExtractor {
    trusted_proxy_cidrs: Arc<Vec<IpNetwork>>,
}

impl TrustedClientIpKeyExtractor {
    fn new(trusted_proxy_cidrs: Arc<Vec<IpNetwork>>) -> Self {
        Self {
            trusted_proxy_cidrs,
        }
    }
}

impl KeyExtractor for TrustedClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        let resolved =
            resolve_client_ip(req.headers(), peer_ip, self.trusted_proxy_cidrs.as_slice());
        Ok(resolved.ip().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.max_body_bytes == 0 {
        return Err(anyhow!("max body bytes must be at least 1 byte"));
    }
    if config.request_timeout.is_zero() {
        return Err(anyhow!("request timeout must be greater than zero"));
    }
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!(
            "global rate limit must be at least 1 request per minute"
        ));
    }
    if config.auth_route_requests_per_minute == 0 {
        return Err(anyhow!(
            "auth route rate limit must be at least 1 request per minute"
        ));
    }
    if config.search_query_max_chars == 0 {
        return Err(anyhow!("search query max chars must be at least 1"));
    }
    if config.search_result_limit_max == 0 {
        return Err(anyhow!(
            "search result limit max must be at least 1 result per request"
        ));
    }
    if config.search_query_timeout.is_zero() {
        return Err(anyhow!("search query timeout must be greater than zero"));
    }
    Ok(())
}

/// Build the axum router with global security middleware.
///
/// # Errors
/// Returns an error if configured security limits are invalid.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    validate_config(config)?;

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(TrustedClientIpKeyExtractor::new(Arc::new(
                config.trusted_proxy_cidrs.clone(),
            )))
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    let routes = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/password", post(change_password))
        .route("/users/me/profile", patch(update_my_profile))
        .route("/users/lookup", post(lookup_users))
        .route("/users/{user_id}/profile", get(get_user_profile))
        .route("/users/{user_id}/updates", get(list_user_updates))
        .route("/users/{user_id}/messages", post(send_direct))
        .route("/updates", post(post_update))
        .route("/updates/{update_id}", get(get_update).delete(delete_update))
        .route(
            "/updates/{update_id}/comments",
            get(list_comments).post(add_comment),
        )
        .route("/feed", get(feed))
        .route("/connections", get(list_connections))
        .route("/connections/{user_id}", delete(remove_connection))
        .route(
            "/connections/requests",
            post(create_connection_request).get(list_connection_requests),
        )
        .route(
            "/connections/requests/{request_id}/approve",
            post(approve_connection_request),
        )
        .route(
            "/connections/requests/{request_id}",
            delete(delete_connection_request),
        )
        .route("/messages/inbox", get(inbox))
        .route(
            "/pairs/{pair_id}/messages",
            get(get_thread).post(send_message),
        )
        .route(
            "/pairs/{pair_id}/messages/{message_id}",
            delete(delete_message),
        )
        .route("/search", get(search));

    Ok(routes
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}

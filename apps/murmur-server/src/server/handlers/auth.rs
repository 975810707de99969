use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use murmur_core::Username;
use ulid::Ulid;

use crate::server::{
    auth::{
        authenticate, enforce_auth_route_rate_limit, extract_client_ip, hash_password,
        hash_refresh_token, issue_tokens, now_unix, validate_password, verify_password, ClientIp,
    },
    auth_repository::{
        refresh_session_ttl_unix, AuthPersistence, AuthRepository, RefreshCheckError,
    },
    core::{AppState, ACCESS_TOKEN_TTL_SECS},
    db::ensure_db_schema,
    errors::AuthFailure,
    handlers::ApiJson,
    types::{
        AuthResponse, CaptchaToken, ChangePasswordRequest, HcaptchaVerifyResponse, LoginRequest,
        MeResponse, RefreshRequest, RegisterRequest, RegisterResponse,
    },
};

const MAX_REFRESH_TOKEN_CHARS: usize = 512;

pub(crate) async fn verify_captcha_token(
    state: &AppState,
    client_ip: ClientIp,
    token: Option<String>,
) -> Result<(), AuthFailure> {
    let Some(config) = state.runtime.captcha.clone() else {
        return Ok(());
    };

    let token = token
        .ok_or(AuthFailure::CaptchaFailed)
        .and_then(|raw| CaptchaToken::try_from(raw).map_err(|()| AuthFailure::CaptchaFailed))?;

    let mut form_data = vec![
        ("secret", config.secret.clone()),
        ("response", token.as_str().to_owned()),
        ("sitekey", config.site_key.clone()),
    ];
    if let Some(remote_ip) = client_ip.ip() {
        form_data.push(("remoteip", remote_ip.to_string()));
    }
    let response = state
        .http_client
        .post(&config.verify_url)
        .timeout(config.verify_timeout)
        .form(&form_data)
        .send()
        .await
        .map_err(|error| {
            tracing::warn!(event = "auth.captcha", outcome = "verify_unreachable", error = %error);
            AuthFailure::CaptchaFailed
        })?;
    let verify: HcaptchaVerifyResponse = response
        .json()
        .await
        .map_err(|_| AuthFailure::CaptchaFailed)?;
    if !verify.success {
        tracing::info!(event = "auth.captcha", outcome = "rejected");
        return Err(AuthFailure::CaptchaFailed);
    }
    Ok(())
}

fn client_ip_of(
    state: &AppState,
    headers: &HeaderMap,
    connect_info: Option<&Extension<ConnectInfo<SocketAddr>>>,
) -> ClientIp {
    extract_client_ip(state, headers, connect_info.map(|value| value.0 .0.ip()))
}

fn refresh_token_has_valid_shape(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_REFRESH_TOKEN_CHARS
}

pub(crate) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AuthFailure> {
    let client_ip = client_ip_of(&state, &headers, connect_info.as_ref());
    enforce_auth_route_rate_limit(&state, client_ip, "register").await?;
    verify_captcha_token(&state, client_ip, payload.captcha_token).await?;

    let username = Username::try_from(payload.username).map_err(|_| AuthFailure::InvalidRequest)?;
    validate_password(&payload.password)?;
    let password_hash = hash_password(&payload.password).map_err(|_| AuthFailure::Internal)?;
    ensure_db_schema(&state).await?;

    let created = AuthRepository::from_state(&state)
        .create_user_if_missing(
            &username,
            &password_hash,
            payload.is_public.unwrap_or(true),
            now_unix(),
        )
        .await?;

    if !created {
        tracing::info!(event = "auth.register", outcome = "existing_user");
        return Ok(Json(RegisterResponse { accepted: true }));
    }

    tracing::info!(event = "auth.register", outcome = "created");

    Ok(Json(RegisterResponse { accepted: true }))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthFailure> {
    let client_ip = client_ip_of(&state, &headers, connect_info.as_ref());
    enforce_auth_route_rate_limit(&state, client_ip, "login").await?;

    let username = Username::try_from(payload.username).map_err(|_| AuthFailure::Unauthorized)?;
    validate_password(&payload.password).map_err(|_| AuthFailure::Unauthorized)?;
    ensure_db_schema(&state).await?;

    let now = now_unix();
    let repository = AuthRepository::from_state(&state);
    let user_id = repository
        .verify_credentials(
            &username,
            &payload.password,
            &state.dummy_password_hash,
            now,
        )
        .await?;
    let Some(user_id) = user_id else {
        tracing::warn!(event = "auth.login", outcome = "invalid_credentials");
        return Err(AuthFailure::Unauthorized);
    };

    let session_id = Ulid::new().to_string();
    let (access_token, refresh_token, refresh_hash) =
        issue_tokens(&state, user_id, username.as_str(), &session_id)
            .map_err(|_| AuthFailure::Internal)?;
    repository
        .insert_session(
            &session_id,
            user_id,
            refresh_hash,
            refresh_session_ttl_unix(now),
        )
        .await?;

    tracing::info!(event = "auth.login", outcome = "success", user_id = %user_id);

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        expires_in_secs: ACCESS_TOKEN_TTL_SECS,
    }))
}

pub(crate) async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthFailure> {
    let client_ip = client_ip_of(&state, &headers, connect_info.as_ref());
    enforce_auth_route_rate_limit(&state, client_ip, "refresh").await?;

    if !refresh_token_has_valid_shape(&payload.refresh_token) {
        tracing::warn!(event = "auth.refresh", outcome = "invalid_token_format");
        return Err(AuthFailure::Unauthorized);
    }
    ensure_db_schema(&state).await?;

    let now = now_unix();
    let repository = AuthRepository::from_state(&state);
    let refresh_check = repository
        .check_refresh_token(&payload.refresh_token, now)
        .await
        .map_err(|error| match error {
            RefreshCheckError::ReplayDetected { session_id } => {
                tracing::warn!(event = "auth.refresh", outcome = "replay_detected", session_id = %session_id);
                AuthFailure::Unauthorized
            }
            RefreshCheckError::Unauthorized { session_id } => {
                tracing::warn!(event = "auth.refresh", outcome = "rejected", session_id = %session_id);
                AuthFailure::Unauthorized
            }
            RefreshCheckError::Internal => AuthFailure::Internal,
        })?;

    let session_id = refresh_check.session_id;
    let user_id = refresh_check.user_id;
    let account = repository
        .find_account(user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;

    let (access_token, refresh_token, refresh_hash) =
        issue_tokens(&state, user_id, &account.username, &session_id)
            .map_err(|_| AuthFailure::Internal)?;
    repository
        .rotate_refresh_token(
            &session_id,
            refresh_check.presented_hash,
            refresh_hash,
            now,
            refresh_session_ttl_unix(now),
        )
        .await?;

    tracing::info!(event = "auth.refresh", outcome = "success", session_id = %session_id, user_id = %user_id);

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        expires_in_secs: ACCESS_TOKEN_TTL_SECS,
    }))
}

pub(crate) async fn logout(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<StatusCode, AuthFailure> {
    if !refresh_token_has_valid_shape(&payload.refresh_token) {
        tracing::warn!(event = "auth.logout", outcome = "invalid_token_format");
        return Err(AuthFailure::Unauthorized);
    }
    ensure_db_schema(&state).await?;

    let session_id = payload
        .refresh_token
        .split('.')
        .next()
        .ok_or(AuthFailure::Unauthorized)?
        .to_owned();
    let token_hash = hash_refresh_token(&payload.refresh_token);
    let user_id = AuthRepository::from_state(&state)
        .revoke_session_with_token(&session_id, token_hash)
        .await
        .map_err(|_| {
            tracing::warn!(event = "auth.logout", outcome = "hash_mismatch", session_id = %session_id);
            AuthFailure::Unauthorized
        })?;
    tracing::info!(event = "auth.logout", outcome = "success", session_id = %session_id, user_id = %user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AuthFailure> {
    let auth = authenticate(&state, &headers).await?;
    let account = AuthRepository::from_state(&state)
        .find_account(auth.user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;

    Ok(Json(MeResponse {
        user_id: account.user_id.to_string(),
        username: account.username,
        is_public: account.is_public,
        joined_at_unix: account.joined_at_unix,
    }))
}

/// Replaces the caller's password and signs out every other session.
/// The session that made the request stays valid.
pub(crate) async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<StatusCode, AuthFailure> {
    let client_ip = client_ip_of(&state, &headers, connect_info.as_ref());
    enforce_auth_route_rate_limit(&state, client_ip, "password").await?;
    let auth = authenticate(&state, &headers).await?;
    validate_password(&payload.new_password)?;

    let repository = AuthRepository::from_state(&state);
    let stored_hash = repository
        .password_hash(auth.user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;
    if !verify_password(&stored_hash, &payload.current_password) {
        tracing::warn!(event = "auth.password", outcome = "invalid_credentials", user_id = %auth.user_id);
        return Err(AuthFailure::Unauthorized);
    }

    let next_hash = hash_password(&payload.new_password).map_err(|_| AuthFailure::Internal)?;
    repository
        .set_password_hash(auth.user_id, &next_hash)
        .await?;
    let revoked = repository
        .revoke_other_sessions(auth.user_id, &auth.session_id)
        .await?;

    tracing::info!(
        event = "auth.password",
        outcome = "changed",
        user_id = %auth.user_id,
        revoked_sessions = revoked
    );
    Ok(StatusCode::NO_CONTENT)
}

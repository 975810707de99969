use std::{
    net::IpAddr,
    sync::atomic::Ordering,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use argon2::{
    password_hash::rand_core::{OsRng, RngCore},
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use murmur_core::UserId;
use pasetors::{
    claims::{Claims, ClaimsValidationRules},
    local,
    token::UntrustedToken,
    version4::V4,
    Local,
};
use sha2::{Digest, Sha256};

use super::{
    auth_repository::{AuthPersistence, AuthRepository},
    core::{
        AppConfig, AppState, AuthContext, CaptchaConfig, ACCESS_TOKEN_TTL_SECS,
        RATE_LIMIT_SWEEP_INTERVAL_SECS,
    },
    db::ensure_db_schema,
    errors::AuthFailure,
    network::IpNetwork,
};

const MAX_X_FORWARDED_FOR_HEADER_CHARS: usize = 512;
const MAX_X_FORWARDED_FOR_ENTRY_CHARS: usize = 64;
const UNKNOWN_CLIENT_IP: &str = "unknown";
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientIpSource {
    Peer,
    Forwarded,
}

impl ClientIpSource {
    #[must_use]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Forwarded => "forwarded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClientIp {
    ip: Option<IpAddr>,
    source: ClientIpSource,
}

impl ClientIp {
    #[must_use]
    pub(crate) fn ip(self) -> Option<IpAddr> {
        self.ip
    }

    #[must_use]
    pub(crate) fn source(self) -> ClientIpSource {
        self.source
    }

    #[must_use]
    pub(crate) fn normalized(self) -> String {
        self.ip
            .map_or_else(|| String::from(UNKNOWN_CLIENT_IP), |ip| ip.to_string())
    }

    fn peer(ip: Option<IpAddr>) -> Self {
        Self {
            ip,
            source: ClientIpSource::Peer,
        }
    }

    fn forwarded(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            source: ClientIpSource::Forwarded,
        }
    }
}

pub(crate) fn validate_password(value: &str) -> Result<(), AuthFailure> {
    if (12..=128).contains(&value.len()) {
        Ok(())
    } else {
        Err(AuthFailure::InvalidRequest)
    }
}

pub(crate) fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hash failed: {e}"))?
        .to_string();
    Ok(hash)
}

pub(crate) fn verify_password(stored_hash: &str, supplied_password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(supplied_password.as_bytes(), &parsed)
        .is_ok()
}

/// Mints an access token bound to `session_id` and a fresh refresh token
/// of the form `{session_id}.{secret}`. Only the refresh token's hash is stored.
pub(crate) fn issue_tokens(
    state: &AppState,
    user_id: UserId,
    username: &str,
    session_id: &str,
) -> anyhow::Result<(String, String, [u8; 32])> {
    let ttl = u64::try_from(ACCESS_TOKEN_TTL_SECS).unwrap_or(0);
    let mut claims = Claims::new_expires_in(&Duration::from_secs(ttl))
        .map_err(|e| anyhow!("claims init failed: {e}"))?;
    claims
        .subject(&user_id.to_string())
        .map_err(|e| anyhow!("claim sub failed: {e}"))?;
    claims
        .add_additional("username", username)
        .map_err(|e| anyhow!("claim username failed: {e}"))?;
    claims
        .add_additional("sid", session_id)
        .map_err(|e| anyhow!("claim sid failed: {e}"))?;

    let access_token = local::encrypt(&state.token_key, &claims, None, None)
        .map_err(|e| anyhow!("access token mint failed: {e}"))?;

    let mut refresh_secret = [0_u8; 32];
    OsRng.fill_bytes(&mut refresh_secret);
    let refresh_secret = URL_SAFE_NO_PAD.encode(refresh_secret);
    let refresh_token = format!("{session_id}.{refresh_secret}");
    let refresh_hash = hash_refresh_token(&refresh_token);

    Ok((access_token, refresh_token, refresh_hash))
}

pub(crate) fn verify_access_token(state: &AppState, token: &str) -> anyhow::Result<Claims> {
    let untrusted = UntrustedToken::<Local, V4>::try_from(token).map_err(|e| anyhow!("{e}"))?;
    let validation_rules = ClaimsValidationRules::new();
    let trusted = local::decrypt(&state.token_key, &untrusted, &validation_rules, None, None)
        .map_err(|e| anyhow!("token decrypt failed: {e}"))?;
    trusted
        .payload_claims()
        .cloned()
        .ok_or_else(|| anyhow!("token claims missing"))
}

pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthFailure> {
    let access_token = bearer_token(headers).ok_or(AuthFailure::Unauthorized)?;
    authenticate_with_token(state, access_token).await
}

/// Like [`authenticate`], but an absent `Authorization` header yields an
/// anonymous viewer. A header that is present must still carry a valid token.
pub(crate) async fn authenticate_optional(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<AuthContext>, AuthFailure> {
    if !headers.contains_key(AUTHORIZATION) {
        return Ok(None);
    }
    authenticate(state, headers).await.map(Some)
}

pub(crate) async fn authenticate_with_token(
    state: &AppState,
    access_token: &str,
) -> Result<AuthContext, AuthFailure> {
    let claims = verify_access_token(state, access_token).map_err(|_| AuthFailure::Unauthorized)?;
    let subject = claims
        .get_claim("sub")
        .and_then(serde_json::Value::as_str)
        .ok_or(AuthFailure::Unauthorized)?;
    let session_id = claims
        .get_claim("sid")
        .and_then(serde_json::Value::as_str)
        .ok_or(AuthFailure::Unauthorized)?
        .to_owned();
    let user_id = UserId::try_from(subject.to_owned()).map_err(|_| AuthFailure::Unauthorized)?;

    ensure_db_schema(state).await?;
    let account = AuthRepository::from_state(state)
        .find_account(user_id)
        .await?
        .ok_or(AuthFailure::Unauthorized)?;
    Ok(AuthContext {
        user_id,
        username: account.username,
        session_id,
    })
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

pub(crate) fn hash_refresh_token(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

pub(crate) fn now_unix() -> i64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

async fn maybe_sweep_rate_limit_state(state: &AppState, now: i64) {
    let last = state.rate_limit_last_sweep_unix.load(Ordering::Relaxed);
    if now.saturating_sub(last) < RATE_LIMIT_SWEEP_INTERVAL_SECS {
        return;
    }
    if state
        .rate_limit_last_sweep_unix
        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
        .is_err()
    {
        return;
    }

    state.auth_route_hits.write().await.retain(|_, route_hits| {
        route_hits.retain(|timestamp| now.saturating_sub(*timestamp) < RATE_LIMIT_WINDOW_SECS);
        !route_hits.is_empty()
    });
}

pub(crate) fn build_captcha_config(config: &AppConfig) -> anyhow::Result<Option<CaptchaConfig>> {
    match (
        &config.captcha_hcaptcha_site_key,
        &config.captcha_hcaptcha_secret,
    ) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => {
            Err(anyhow!("hcaptcha site key and secret must be set together"))
        }
        (Some(site_key), Some(secret)) => {
            let site_key = site_key.trim();
            let secret = secret.trim();
            if site_key.is_empty() || secret.is_empty() {
                return Err(anyhow!("hcaptcha site key and secret cannot be empty"));
            }
            let verify_url = validate_captcha_verify_url(&config.captcha_verify_url)?;
            if config.captcha_verify_timeout.is_zero()
                || config.captcha_verify_timeout > Duration::from_secs(10)
            {
                return Err(anyhow!(
                    "captcha verify timeout must be between 1 and 10 seconds"
                ));
            }
            Ok(Some(CaptchaConfig {
                site_key: site_key.to_owned(),
                secret: secret.to_owned(),
                verify_url,
                verify_timeout: config.captcha_verify_timeout,
            }))
        }
    }
}

pub(crate) fn validate_captcha_verify_url(value: &str) -> anyhow::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 256 {
        return Err(anyhow!("captcha verify url is invalid"));
    }
    if trimmed.starts_with("https://")
        || trimmed.starts_with("http://127.0.0.1")
        || trimmed.starts_with("http://localhost")
    {
        return Ok(trimmed.to_owned());
    }
    Err(anyhow!(
        "captcha verify url must use https://, or localhost http:// for tests"
    ))
}

pub(crate) async fn enforce_auth_route_rate_limit(
    state: &AppState,
    client_ip: ClientIp,
    route: &str,
) -> Result<(), AuthFailure> {
    let ip = client_ip.normalized();
    let key = format!("{route}:{ip}");
    let now = now_unix();
    maybe_sweep_rate_limit_state(state, now).await;

    let mut hits = state.auth_route_hits.write().await;
    let route_hits = hits.entry(key).or_default();
    route_hits.retain(|timestamp| now.saturating_sub(*timestamp) < RATE_LIMIT_WINDOW_SECS);
    let max_hits =
        usize::try_from(state.runtime.auth_route_requests_per_minute).unwrap_or(usize::MAX);
    if route_hits.len() >= max_hits {
        tracing::warn!(
            event = "auth.rate_limit",
            route = %route,
            client_ip = %ip,
            client_ip_source = client_ip.source().as_str()
        );
        return Err(AuthFailure::RateLimited);
    }
    route_hits.push(now);
    Ok(())
}

pub(crate) fn resolve_client_ip(
    headers: &HeaderMap,
    peer_ip: Option<IpAddr>,
    trusted_proxy_cidrs: &[IpNetwork],
) -> ClientIp {
    let Some(peer_ip) = peer_ip else {
        return ClientIp::peer(None);
    };
    let peer_is_trusted = trusted_proxy_cidrs
        .iter()
        .any(|network| network.contains(peer_ip));
    if peer_is_trusted {
        if let Some(forwarded_ip) = parse_forwarded_ip(headers) {
            return ClientIp::forwarded(forwarded_ip);
        }
    }
    ClientIp::peer(Some(peer_ip))
}

#[must_use]
pub(crate) fn extract_client_ip(
    state: &AppState,
    headers: &HeaderMap,
    peer_ip: Option<IpAddr>,
) -> ClientIp {
    resolve_client_ip(
        headers,
        peer_ip,
        state.runtime.trusted_proxy_cidrs.as_slice(),
    )
}

fn parse_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.len() <= MAX_X_FORWARDED_FOR_HEADER_CHARS)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_X_FORWARDED_FOR_ENTRY_CHARS)
        .and_then(|value| value.parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::{
        authenticate_optional, build_captcha_config, enforce_auth_route_rate_limit, hash_password,
        issue_tokens, resolve_client_ip, validate_password, verify_access_token, verify_password,
        ClientIp, ClientIpSource,
    };
    use crate::server::core::{AppConfig, AppState};
    use crate::server::errors::AuthFailure;
    use crate::server::network::IpNetwork;
    use axum::http::HeaderMap;
    use murmur_core::UserId;

    #[test]
    fn captcha_config_keeps_site_key_and_default_verify_url() {
        let config = AppConfig {
            captcha_hcaptcha_site_key: Some(String::from("10000000-ffff-ffff-ffff-000000000001")),
            captcha_hcaptcha_secret: Some(String::from(
                "0x0000000000000000000000000000000000000000",
            )),
            ..AppConfig::default()
        };

        let captcha = build_captcha_config(&config)
            .expect("captcha config should build")
            .expect("captcha should be enabled");

        assert_eq!(captcha.site_key, "10000000-ffff-ffff-ffff-000000000001");
        assert_eq!(captcha.verify_url, "https://api.hcaptcha.com/siteverify");
    }

    #[test]
    fn captcha_config_rejects_plain_http_remote_verify_url() {
        let config = AppConfig {
            captcha_hcaptcha_site_key: Some(String::from("site")),
            captcha_hcaptcha_secret: Some(String::from("secret")),
            captcha_verify_url: String::from("http://hcaptcha.example/siteverify"),
            ..AppConfig::default()
        };
        assert!(build_captcha_config(&config).is_err());
    }

    #[test]
    fn password_length_bounds_are_enforced() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("twelve-chars").is_ok());
        assert!(validate_password(&"p".repeat(129)).is_err());
    }

    #[test]
    fn password_hash_verifies_only_original_password() {
        let hash = hash_password("super-secure-password").expect("hash should build");
        assert!(verify_password(&hash, "super-secure-password"));
        assert!(!verify_password(&hash, "super-secure-passwore"));
        assert!(!verify_password("not-a-phc-string", "super-secure-password"));
    }

    #[test]
    fn access_token_carries_subject_and_session() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let user_id = UserId::new();
        let (access_token, refresh_token, _) =
            issue_tokens(&state, user_id, "alice", "session-1").expect("tokens should mint");

        assert!(refresh_token.starts_with("session-1."));
        let claims = verify_access_token(&state, &access_token).expect("token should verify");
        assert_eq!(
            claims.get_claim("sub").and_then(serde_json::Value::as_str),
            Some(user_id.to_string().as_str())
        );
        assert_eq!(
            claims.get_claim("sid").and_then(serde_json::Value::as_str),
            Some("session-1")
        );

        let other = AppState::new(&AppConfig::default()).expect("state should initialize");
        assert!(verify_access_token(&other, &access_token).is_err());
    }

    #[tokio::test]
    async fn optional_auth_allows_missing_header_but_rejects_garbage() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        let anonymous = authenticate_optional(&state, &HeaderMap::new())
            .await
            .expect("missing header is anonymous");
        assert!(anonymous.is_none());

        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "Bearer not-a-token".parse().expect("valid header"),
        );
        assert!(matches!(
            authenticate_optional(&state, &headers).await,
            Err(AuthFailure::Unauthorized)
        ));
    }

    #[test]
    fn client_ip_defaults_to_peer_when_proxy_is_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.21".parse().expect("valid header"),
        );
        let resolved = resolve_client_ip(
            &headers,
            Some("10.10.0.4".parse().expect("valid ip")),
            &Vec::new(),
        );
        assert_eq!(resolved.source(), ClientIpSource::Peer);
        assert_eq!(resolved.normalized(), "10.10.0.4");
    }

    #[test]
    fn client_ip_uses_forwarded_value_when_peer_proxy_is_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.44, 203.0.113.10".parse().expect("valid header"),
        );
        let trusted = vec![IpNetwork::try_from(String::from("10.0.0.0/8")).expect("valid cidr")];
        let resolved = resolve_client_ip(
            &headers,
            Some("10.2.0.8".parse().expect("valid ip")),
            &trusted,
        );
        assert_eq!(resolved.source(), ClientIpSource::Forwarded);
        assert_eq!(resolved.normalized(), "198.51.100.44");
    }

    #[test]
    fn client_ip_rejects_malformed_forwarded_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.44:80".parse().expect("valid header"),
        );
        let trusted = vec![IpNetwork::try_from(String::from("10.0.0.0/8")).expect("valid cidr")];
        let resolved = resolve_client_ip(
            &headers,
            Some("10.2.0.8".parse().expect("valid ip")),
            &trusted,
        );
        assert_eq!(resolved.source(), ClientIpSource::Peer);
        assert_eq!(resolved.normalized(), "10.2.0.8");
    }

    #[test]
    fn missing_peer_normalizes_to_unknown() {
        let resolved = resolve_client_ip(&HeaderMap::new(), None, &Vec::new());
        assert!(resolved.ip().is_none());
        assert_eq!(resolved.normalized(), "unknown");
    }

    #[tokio::test]
    async fn auth_rate_limit_sweep_prunes_stale_keys() {
        let state = AppState::new(&AppConfig::default()).expect("state should initialize");
        state
            .auth_route_hits
            .write()
            .await
            .insert(String::from("register:198.51.100.9"), vec![0]);

        let client_ip = ClientIp::peer(Some("198.51.100.10".parse().expect("valid ip")));
        enforce_auth_route_rate_limit(&state, client_ip, "register")
            .await
            .expect("rate limit should allow fresh key");

        let hits = state.auth_route_hits.read().await;
        assert!(!hits.contains_key("register:198.51.100.9"));
        assert!(hits.contains_key("register:198.51.100.10"));
    }

    #[tokio::test]
    async fn auth_rate_limit_rejects_after_configured_budget() {
        let state = AppState::new(&AppConfig {
            auth_route_requests_per_minute: 2,
            ..AppConfig::default()
        })
        .expect("state should initialize");
        let client_ip = ClientIp::peer(Some("198.51.100.77".parse().expect("valid ip")));

        for _ in 0..2 {
            enforce_auth_route_rate_limit(&state, client_ip, "login")
                .await
                .expect("within budget");
        }
        assert!(matches!(
            enforce_auth_route_rate_limit(&state, client_ip, "login").await,
            Err(AuthFailure::RateLimited)
        ));
        enforce_auth_route_rate_limit(&state, client_ip, "register")
            .await
            .expect("other routes have their own budget");
    }
}

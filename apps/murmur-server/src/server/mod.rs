pub(crate) mod auth;
pub(crate) mod auth_repository;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod errors;
pub(crate) mod graph_repository;
pub(crate) mod handlers;
pub(crate) mod message_repository;
pub(crate) mod metrics;
pub(crate) mod network;
pub(crate) mod post_repository;
pub(crate) mod router;
pub(crate) mod search;
pub(crate) mod session_store;
#[cfg(test)]
mod tests;
pub(crate) mod types;
pub(crate) mod visibility;

pub use self::core::{
    AppConfig, ACCESS_TOKEN_TTL_SECS, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS, REFRESH_TOKEN_TTL_SECS,
};
pub use errors::init_tracing;
pub use network::{parse_trusted_proxy_cidrs, InvalidIpNetwork, IpNetwork};
pub use router::build_router;

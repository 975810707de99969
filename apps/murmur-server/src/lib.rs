#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, init_tracing, parse_trusted_proxy_cidrs, AppConfig, InvalidIpNetwork,
    IpNetwork, ACCESS_TOKEN_TTL_SECS, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS, REFRESH_TOKEN_TTL_SECS,
};

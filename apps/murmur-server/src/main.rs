#![forbid(unsafe_code)]

use std::net::SocketAddr;

use murmur_server::{build_router, init_tracing, parse_trusted_proxy_cidrs, AppConfig};
use tokio::net::TcpListener;

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let database_url = std::env::var("MURMUR_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("MURMUR_DATABASE_URL is required for runtime"))?;
    let trusted_proxy_cidrs = optional_env("MURMUR_TRUSTED_PROXY_CIDRS")
        .map(|raw| {
            parse_trusted_proxy_cidrs(&raw)
                .map_err(|e| anyhow::anyhow!("invalid MURMUR_TRUSTED_PROXY_CIDRS {raw:?}: {e}"))
        })
        .transpose()?
        .unwrap_or_default();
    let app_config = AppConfig {
        trusted_proxy_cidrs,
        captcha_hcaptcha_site_key: optional_env("MURMUR_HCAPTCHA_SITE_KEY"),
        captcha_hcaptcha_secret: optional_env("MURMUR_HCAPTCHA_SECRET"),
        database_url: Some(database_url),
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("MURMUR_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid MURMUR_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "murmur-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

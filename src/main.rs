use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vuln_dispatch_relay::auth::Credentials;
use vuln_dispatch_relay::clock::{Clock, SystemClock};
use vuln_dispatch_relay::config::RelayConfig;
use vuln_dispatch_relay::dedup::DedupStore;
use vuln_dispatch_relay::github::OctocrabApi;
use vuln_dispatch_relay::relay::{Relay, RelaySettings};
use vuln_dispatch_relay::server::{AppState, build_router};
use vuln_dispatch_relay::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("invalid configuration")?;

    let level = config.log_level.to_lowercase();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vuln_dispatch_relay={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    telemetry::init_metrics().context("failed to install metrics recorder")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let credentials = Credentials::from_config(&config, clock.clone());
    let dedup = DedupStore::from_config(&config.dedup, clock);
    let api = OctocrabApi::new(config.api_url.as_str(), config.api_version.as_str())
        .context("failed to build GitHub client")?;

    tracing::info!(
        owner = config.owner.as_deref().unwrap_or("<unset>"),
        event_type = %config.event_type,
        credentials = credentials.mode(),
        dedup = dedup.backend(),
        dedup_ttl_secs = dedup.ttl().as_secs(),
        topics = ?config.topics.required(),
        topic_mode = %config.topics.mode(),
        "Starting relay"
    );
    if config.owner.is_none() {
        tracing::warn!("GH_OWNER is not set; alerts will be rejected until it is");
    }

    let relay = Relay::new(RelaySettings::from_config(&config), api, credentials, dedup);
    let app = build_router(AppState::new(relay, config.webhook_secret.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

//! Server entry point.

use sandboxed_relay::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sandboxed_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(default_model = %config.default_model, "loaded configuration");

    let addr = format!("{}:{}", config.host, config.port);
    info!("starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}

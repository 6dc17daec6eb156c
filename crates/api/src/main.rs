use std::sync::Arc;

use anyhow::Context;
use invrecon_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    invrecon_observability::init(&settings.log);

    let services = invrecon_api::app::services::build_services(&settings)
        .await
        .context("failed to initialise ledger store")?;
    let app = invrecon_api::app::build_app(Arc::new(services));

    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        address = %listener.local_addr()?,
        environment = %settings.environment,
        "listening"
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

use anyhow::Context;

use fiscalflow_infra::FiscalConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fiscalflow_observability::init();

    let config = FiscalConfig::load().context("loading configuration")?;
    let services = fiscalflow_api::app::services::build_services(&config).await?;
    let app = fiscalflow_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

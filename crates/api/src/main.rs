use anyhow::Context;

use exportkit_infra::ExportConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    exportkit_observability::init();

    let config = ExportConfig::from_env().context("invalid configuration")?;
    let app = exportkit_api::app::build_app(&config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, bucket = %config.bucket, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

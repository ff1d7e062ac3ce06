use chat_service::config::ChatConfig;
use chat_service::services::metrics::init_metrics;
use chat_service::services::providers::openai::OpenAiProvider;
use chat_service::services::providers::CompletionProvider;
use chat_service::startup::Application;
use service_core::observability::init_tracing;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ChatConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let provider: Arc<dyn CompletionProvider> =
        Arc::new(OpenAiProvider::new(&config.openai).map_err(|e| {
            tracing::error!("Failed to initialize OpenAI provider: {}", e);
            anyhow::anyhow!("Provider error: {}", e)
        })?);

    let app = Application::build(config, provider).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        anyhow::anyhow!("Startup error: {}", e)
    })?;

    app.run_until_stopped().await?;

    Ok(())
}

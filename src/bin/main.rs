use poem::listener::TcpListener;
use visual_abstract::settings::get_config;
use visual_abstract::{AppState, init_openapi_route};

use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config()?;

    // Logging to File
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level())
        .init();

    tracing::info!("Initializing Visual Abstract Service...");
    tracing::info!("using {} as environment variables", config.source());
    tracing::info!("run with config: {:?}", redacted(&config));

    let app_state = Arc::new(AppState::from_config(&config)?);

    tracing::info!("Pipeline initialized successfully");

    let app = init_openapi_route(app_state.clone(), &config);
    tracing::info!("run server on {}:{}", config.host, config.port);
    poem::Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run(app)
        .await?;
    Ok(())
}

fn redacted(config: &visual_abstract::settings::Config) -> visual_abstract::settings::Config {
    let mut config = config.clone();
    if !config.openai_api_key.is_empty() {
        config.openai_api_key = "***".to_string();
    }
    config
}

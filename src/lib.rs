use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use poem::{
    EndpointExt, Route,
    middleware::{AddData, AddDataEndpoint, Cors, CorsEndpoint},
};
use poem_openapi::OpenApiService;

use crate::core::metadata::CrossRefClient;
use crate::core::openai::OpenAiClient;
use crate::core::pipeline::Pipeline;
use crate::settings::Config;

use crate::routes::abstracts::ApiAbstract;

pub mod core;
pub mod routes;
pub mod schemas;
pub mod settings;

const USER_AGENT: &str = concat!("visual-abstract/", env!("CARGO_PKG_VERSION"));

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Builds the shared HTTP client and API clients once for the whole
    /// process.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        if config.openai_api_key.is_empty() {
            tracing::warn!(
                "OPENAI_API_KEY is not set, summarization and image generation will fail"
            );
        }

        let openai = Arc::new(OpenAiClient::new(http.clone(), config.openai_settings()));
        let crossref = Arc::new(CrossRefClient::new(http.clone(), &config.crossref_base_url));
        let pipeline =
            Pipeline::new(http, crossref, openai.clone(), openai, config.pipeline_config()?);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            request_timeout: config.request_timeout(),
        })
    }
}

pub fn init_openapi_route(
    app_state: Arc<AppState>,
    config: &Config,
) -> CorsEndpoint<AddDataEndpoint<Route, Arc<AppState>>> {
    let prefix = config.prefix.clone().unwrap_or("/".to_string());
    let openapi_route =
        OpenApiService::new(ApiAbstract, "Visual Abstract API", env!("CARGO_PKG_VERSION"))
            .server(prefix.clone());

    let openapi_json_endpoint = openapi_route.spec_endpoint();
    let ui = openapi_route.swagger_ui();
    Route::new()
        .nest(prefix, openapi_route)
        .nest("/docs", ui)
        .at("openapi.json", openapi_json_endpoint)
        .with(AddData::new(app_state))
        .with(Cors::new())
}

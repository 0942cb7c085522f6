pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::ConversionConfig;
use crate::models::ConversionKind;
use crate::services::converter::create_converter;
use crate::services::pipeline::ConversionPipeline;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::docx_to_pdf,
        api::handlers::convert::pdf_to_jpg,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::convert::ConvertUpload,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "convert", description = "Batch document conversion endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: ConversionConfig,
    pub docx_pipeline: Arc<ConversionPipeline>,
    pub pdf_pipeline: Arc<ConversionPipeline>,
}

impl AppState {
    /// Wire both pipelines to the external tools named in `config`
    pub fn new(config: ConversionConfig) -> Self {
        let docx_pipeline = ConversionPipeline::new(
            create_converter(ConversionKind::DocxToPdf, &config),
            &config,
        );
        let pdf_pipeline = ConversionPipeline::new(
            create_converter(ConversionKind::PdfToJpg, &config),
            &config,
        );
        Self::with_pipelines(config, docx_pipeline, pdf_pipeline)
    }

    pub fn with_pipelines(
        config: ConversionConfig,
        docx_pipeline: ConversionPipeline,
        pdf_pipeline: ConversionPipeline,
    ) -> Self {
        Self {
            config,
            docx_pipeline: Arc::new(docx_pipeline),
            pdf_pipeline: Arc::new(pdf_pipeline),
        }
    }
}

fn cors_layer(config: &ConversionConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE])
        .allow_credentials(true)
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(api::handlers::convert::CONVERSION_ERRORS_HEADER),
        ])
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/docx-to-pdf/", post(api::handlers::convert::docx_to_pdf))
        .route("/docx-to-pdf", post(api::handlers::convert::docx_to_pdf))
        .route("/pdf-to-jpg/", post(api::handlers::convert::pdf_to_jpg))
        .route("/pdf-to-jpg", post(api::handlers::convert::pdf_to_jpg))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .layer(axum::extract::DefaultBodyLimit::max(state.config.body_limit()))
        .with_state(state)
}

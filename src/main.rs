// Geopoint Stats v0.1
use axum::{
    routing::{delete, get},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod cli;
mod config;
mod errors;
mod helpers;
mod models;
mod routes;
mod services;

use cli::{Cli, Command, ExtractArgs};
use config::AppConfig;
use errors::AppError;
use routes::queries::AppState;
use services::earth_engine::EarthEngineClient;
use services::extractor::{extract_all, ExtractionPlan};
use services::session::QuerySession;

/// Geopoint Stats API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Geopoint Stats API",
        version = "0.1.0",
        description = "Regional vegetation index, soil moisture and land surface temperature \
            means for a point and a date range, computed by Earth Engine. Results are kept \
            in an in-memory session that can be listed, exported as CSV and cleared.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Queries", description = "Indicator queries and the result session"),
    ),
    paths(
        routes::health::health_check,
        routes::queries::create_query,
        routes::queries::list_queries,
        routes::queries::export_queries,
        routes::queries::clear_queries,
        routes::queries::delete_query,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::queries::QueryRequest,
            routes::queries::ClearResponse,
            services::session::SessionEntry,
            models::IndicatorResult,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geopoint_stats=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.cmd {
        Command::Clean { input, output } => {
            services::coordinates::clean_export(&input, &output)?;
            Ok(())
        }
        Command::Extract(args) => extract(args, &AppConfig::from_env()?).await,
        Command::Combine { dir, output } => {
            if services::export::combine_dir(&dir, &output)?.is_none() {
                tracing::warn!("Nothing to combine in {}", dir.display());
            }
            Ok(())
        }
        Command::Serve { port } => serve(port, &AppConfig::from_env()?).await,
    }
}

async fn extract(args: ExtractArgs, config: &AppConfig) -> Result<(), AppError> {
    let client = EarthEngineClient::from_config(config)?;
    let placemarks = services::coordinates::load_placemarks(&args.input)?;
    if placemarks.is_empty() {
        tracing::warn!("No usable placemarks in {}", args.input.display());
        return Ok(());
    }

    let plan = ExtractionPlan {
        start: args.start,
        end: args.end,
        window_days: args.window_days,
        radius_m: args.radius_m,
        skip_existing: args.skip_existing,
    };

    let summary = extract_all(
        &client,
        &placemarks,
        &plan,
        &config.retry_policy(),
        &args.output_dir,
        args.concurrency,
    )
    .await?;

    if summary.failed.is_empty() {
        return Ok(());
    }
    for (city, error) in &summary.failed {
        tracing::error!("'{}' failed: {}", city, error);
    }
    Err(AppError::InternalError(format!(
        "{} of {} points failed; rerun to resume from their checkpoints",
        summary.failed.len(),
        placemarks.len()
    )))
}

async fn serve(port: u16, config: &AppConfig) -> Result<(), AppError> {
    let app_state = AppState {
        session: QuerySession::new(),
        ee_client: EarthEngineClient::from_config(config)?,
        retry: config.retry_policy(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    let query_routes = Router::new()
        .route(
            "/api/v1/queries",
            get(routes::queries::list_queries)
                .post(routes::queries::create_query)
                .delete(routes::queries::clear_queries),
        )
        .route(
            "/api/v1/queries/export",
            get(routes::queries::export_queries),
        )
        .route("/api/v1/queries/:id", delete(routes::queries::delete_query))
        .with_state(app_state);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(query_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!("Swagger UI available at http://localhost:{}/swagger-ui/", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

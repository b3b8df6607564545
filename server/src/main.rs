// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use axum::http::{HeaderName, HeaderValue};
use clap::Parser;
use streak_server::config::{ServerArgs, ServerConfig};
use streak_server::identity::USER_ID_HEADER;
use streak_server::state::AppState;
use streak_server::{database, routes};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = match ServerConfig::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting up the server...");

    let db_pool = match database::establish_connection_pool(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database connection was made successfully.");
            pool
        }
        Err(e) => {
            tracing::error!("Failed to connect with the database: {:?}", e);
            std::process::exit(1);
        }
    };

    let state = AppState::new(db_pool)
        .with_calendar(config.calendar)
        .with_max_message_len(config.max_message_len);

    let app = routes::create_router(state)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http());

    let (addr, server) = match routes::start_server(&config.bind_addr.to_string(), app).await {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!("Failed to start the server: {:?}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        utc_offset = %config.calendar.offset(),
        max_message_len = config.max_message_len,
        "The server listens on http://{}",
        addr
    );

    if let Err(e) = server.await {
        tracing::error!("Server task failed: {e}");
        std::process::exit(1);
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers([
        HeaderName::from_static("content-type"),
        HeaderName::from_static("accept"),
        HeaderName::from_static(USER_ID_HEADER),
    ]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

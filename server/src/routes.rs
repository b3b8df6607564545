// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::handlers;
use crate::realtime;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Creates and configures the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        // Caller's tasks: list and create
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/api/tasks/{id}", axum::routing::delete(handlers::delete_task))
        // Streak completion for today
        .route("/api/tasks/{id}/complete", put(handlers::complete_task))
        .route(
            "/api/groups",
            get(handlers::list_groups).post(handlers::create_group),
        )
        .route("/api/groups/{id}", get(handlers::get_group))
        .route("/api/groups/{id}/join", post(handlers::join_group))
        .route(
            "/api/groups/{id}/messages",
            get(handlers::list_group_messages),
        )
        // Real-time group chat
        .route("/ws", get(realtime::ws_handler))
        // Adds the shared state to the application
        .with_state(state)
}

/// Binds `addr` and serves `app` on a background task.
/// Returns the bound address, useful when `addr` asks for port 0.
pub async fn start_server(addr: &str, app: Router) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let bound_addr = listener
        .local_addr()
        .context("Failed to read bound address")?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::completion::{self, CompletionError};
use crate::database;
use crate::identity::CallerId;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use streak_common::{ChatMessage, CreateGroupPayload, CreateTaskPayload, Group, RejectReason, Task};
use tracing::{debug, error, info};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

/// Liveness probe.
pub async fn root() -> &'static str {
    "Habit Streak API is running..."
}

// --- Tasks ---

/// Handler for listing the caller's tasks.
pub async fn list_tasks(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = database::list_tasks_for_user(&state.pool, &user_id).await?;
    info!("Successfully retrieved {} tasks for {}.", tasks.len(), user_id);
    Ok(Json(tasks))
}

/// Handler for creating a new task.
pub async fn create_task(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    payload: Result<Json<CreateTaskPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let Json(payload) = payload?;
    debug!("Received request to create task for user: {}", user_id);
    let title = payload.title.trim();
    if title.is_empty() {
        error!("Validation failed: Task title is empty.");
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            RejectReason::Validation,
            "Task title cannot be empty.",
        ));
    }

    let payload = CreateTaskPayload {
        title: title.to_string(),
        description: payload
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    };
    let new_task = database::create_task_in_db(&state.pool, &user_id, payload).await?;

    info!("Task created successfully with ID: {}", new_task.id);

    Ok((StatusCode::CREATED, Json(new_task)))
}

/// Handler for marking a task complete for today.
pub async fn complete_task(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    task_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Task>, AppError> {
    let Path(task_id) = task_id?;
    let today = state.calendar.today();
    debug!("Completing task {} for {} on {}", task_id, user_id, today);

    let task =
        completion::complete_task(&state.pool, &state.task_locks, task_id, &user_id, today)
            .await?;

    Ok(Json(task))
}

/// Handler for deleting a task by ID.
pub async fn delete_task(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    task_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Path(task_id) = task_id?;
    debug!("Attempting to delete task with ID: {}", task_id);

    // Hold the task's lock so a completion in flight finishes first.
    let guard = state.task_locks.acquire(task_id).await;
    let deleted = database::find_one_and_delete_task(&state.pool, task_id, &user_id).await?;
    drop(guard);

    match deleted {
        Some(task) => {
            state.task_locks.forget(task_id);
            info!("Task with ID {} deleted successfully.", task_id);
            Ok(Json(serde_json::json!({
                "message": "Task deleted successfully.",
                "task": task,
            })))
        }
        None => match database::find_task_by_id(&state.pool, task_id).await? {
            Some(_) => Err(CompletionError::NotAuthorized.into()),
            None => {
                state.task_locks.forget(task_id);
                Err(CompletionError::NotFound.into())
            }
        },
    }
}

// --- Groups ---

/// Handler for creating a group; the caller becomes its first member.
pub async fn create_group(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    payload: Result<Json<CreateGroupPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let Json(payload) = payload?;
    let name = payload.name.trim();
    let description = payload.description.trim();
    if name.is_empty() || description.is_empty() {
        error!("Validation failed: Group name or description is empty.");
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            RejectReason::Validation,
            "Group name and description cannot be empty.",
        ));
    }

    match database::create_group_in_db(&state.pool, &user_id, name, description).await? {
        Some(group) => {
            info!("Group '{}' created with ID: {}", group.name, group.id);
            Ok((StatusCode::CREATED, Json(group)))
        }
        None => Err(AppError::new(
            StatusCode::CONFLICT,
            RejectReason::DuplicateGroupName,
            "Group with that name already exists.",
        )),
    }
}

/// Handler for listing every group.
pub async fn list_groups(
    State(state): State<AppState>,
    CallerId(_user_id): CallerId,
) -> Result<Json<Vec<Group>>, AppError> {
    let groups = database::list_groups(&state.pool).await?;
    info!("Successfully retrieved {} groups.", groups.len());
    Ok(Json(groups))
}

/// Handler for a single group with its members.
pub async fn get_group(
    State(state): State<AppState>,
    CallerId(_user_id): CallerId,
    group_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Group>, AppError> {
    let Path(group_id) = group_id?;
    database::find_group_by_id(&state.pool, group_id)
        .await?
        .map(Json)
        .ok_or_else(|| group_not_found(group_id))
}

/// Handler for joining a group's persisted membership.
pub async fn join_group(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    group_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Group>, AppError> {
    let Path(group_id) = group_id?;
    if !database::group_exists(&state.pool, group_id).await? {
        return Err(group_not_found(group_id));
    }
    if !database::add_group_member(&state.pool, group_id, &user_id).await? {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            RejectReason::AlreadyMember,
            "User is already a member of this group.",
        ));
    }
    info!("User {} joined group {}.", user_id, group_id);

    database::find_group_by_id(&state.pool, group_id)
        .await?
        .map(Json)
        .ok_or_else(|| group_not_found(group_id))
}

#[derive(Deserialize, Debug, Default)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Handler for a group's stored chat history, oldest first.
pub async fn list_group_messages(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    group_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let Path(group_id) = group_id?;
    let Query(query) = query?;
    if !database::group_exists(&state.pool, group_id).await? {
        return Err(group_not_found(group_id));
    }
    if !database::is_group_member(&state.pool, group_id, &user_id).await? {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            RejectReason::NotAuthorized,
            "Only group members can read its messages.",
        ));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = database::list_group_messages(&state.pool, group_id, limit).await?;
    Ok(Json(messages))
}

fn group_not_found(group_id: i64) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        RejectReason::NotFound,
        &format!("Group with ID {group_id} not found."),
    )
}

// --- Custom Error Handling ---

/// Error returned by every handler: an HTTP status, a stable reason code
/// and a human-readable message.
#[derive(Debug)]
pub struct AppError {
    code: StatusCode,
    reason: RejectReason,
    message: String,
}

impl AppError {
    pub(crate) fn new(code: StatusCode, reason: RejectReason, message: &str) -> Self {
        Self {
            code,
            reason,
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code
    }

    pub fn reason(&self) -> RejectReason {
        self.reason
    }
}

/// Store failures surface as a generic 500; details go to the log only.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal server error: {:?}", err);
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            reason: RejectReason::PersistenceFailure,
            message: "An internal error occurred.".to_string(),
        }
    }
}

// Malformed requests keep axum's status and text but carry a stable code.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), RejectReason::Validation, &rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, RejectReason::Validation, &rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, RejectReason::Validation, &rejection.body_text())
    }
}

impl From<CompletionError> for AppError {
    fn from(err: CompletionError) -> Self {
        let (code, reason) = match err {
            CompletionError::Persistence(inner) => return inner.into(),
            CompletionError::NotFound => (StatusCode::NOT_FOUND, RejectReason::NotFound),
            CompletionError::NotAuthorized => (StatusCode::FORBIDDEN, RejectReason::NotAuthorized),
            CompletionError::AlreadyCompletedToday => {
                (StatusCode::CONFLICT, RejectReason::AlreadyCompletedToday)
            }
        };
        Self::new(code, reason, &err.to_string())
    }
}

/// Allows Axum to convert our `AppError` into an HTTP `Response`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            "Responding with error: status_code={}, code={}, message={}",
            self.code.as_u16(),
            self.reason,
            self.message
        );
        (
            self.code,
            Json(serde_json::json!({ "error": self.message, "code": self.reason })),
        )
            .into_response()
    }
}

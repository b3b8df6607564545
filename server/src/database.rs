// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::collections::HashMap;
use streak_common::{ChatMessage, CreateTaskPayload, Group, Task};
use tracing::{debug, info};

const SCHEMA: [(&str, &str); 5] = [
    (
        "tasks",
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NULL,
            created_at TIMESTAMP NOT NULL,
            streak_count INTEGER NOT NULL DEFAULT 0 CHECK (streak_count >= 0),
            last_completed_at DATE NULL,
            CHECK (streak_count = 0 OR last_completed_at IS NOT NULL)
        );
        "#,
    ),
    (
        "idx_tasks_user",
        "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks (user_id);",
    ),
    (
        "chat_groups",
        r#"
        CREATE TABLE IF NOT EXISTS chat_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            creator_id TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );
        "#,
    ),
    (
        "group_members",
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            group_id INTEGER NOT NULL REFERENCES chat_groups (id),
            user_id TEXT NOT NULL,
            joined_at TIMESTAMP NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );
        "#,
    ),
    (
        "chat_messages",
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL REFERENCES chat_groups (id),
            author_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );
        "#,
    ),
];

/// Establishes the database connection pool.
/// If the database does not exist, it creates it, then makes sure the schema is in place.
pub async fn establish_connection_pool(database_url: &str) -> Result<SqlitePool> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!("Creating database {}", database_url);
        if let Some(parent) = database_file_dir(database_url) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Sqlite::create_database(database_url)
            .await
            .context("Failed to create database")?;
    } else {
        info!("Database already exists.");
    }

    let pool = SqlitePool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

// Directory holding the database file of a `sqlite://` URL, if it has one.
fn database_file_dir(database_url: &str) -> Option<&std::path::Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

/// Creates every table and index the server needs. Safe to run repeatedly.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for (name, statement) in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create '{name}'"))?;
        debug!("'{}' is ready.", name);
    }
    Ok(())
}

// --- Tasks ---

/// Inserts a new task owned by `user_id`. Streak fields start empty.
pub async fn create_task_in_db(
    pool: &SqlitePool,
    user_id: &str,
    payload: CreateTaskPayload,
) -> Result<Task> {
    let created_at = Utc::now();

    debug!(
        "Insert values: user_id={}, title={}, description={:?}, created_at={}",
        user_id, payload.title, payload.description, created_at
    );

    let id = sqlx::query(
        "INSERT INTO tasks (user_id, title, description, created_at, streak_count, last_completed_at) VALUES (?, ?, ?, ?, 0, NULL)",
    )
    .bind(user_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to insert task into DB")?
    .last_insert_rowid();

    Ok(Task {
        id,
        user_id: user_id.to_string(),
        title: payload.title,
        description: payload.description,
        created_at,
        streak_count: 0,
        last_completed_at: None,
    })
}

/// Retrieves all tasks owned by `user_id`, newest first.
pub async fn list_tasks_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE user_id = ? ORDER BY created_at DESC, id DESC;",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to retrieve tasks from DB")?;

    Ok(tasks)
}

/// Finds a task by id regardless of owner. `None` when absent.
pub async fn find_task_by_id(pool: &SqlitePool, task_id: i64) -> Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to load task with ID: {task_id}"))
}

/// Writes a new streak only if the row still holds the streak that was read
/// as `previous`. Returns false when another writer got there first.
pub async fn save_task_streak(
    pool: &SqlitePool,
    previous: &Task,
    streak_count: u32,
    last_completed_at: NaiveDate,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET streak_count = ?, last_completed_at = ? \
         WHERE id = ? AND streak_count = ? AND last_completed_at IS ?",
    )
    .bind(streak_count)
    .bind(last_completed_at)
    .bind(previous.id)
    .bind(previous.streak_count)
    .bind(previous.last_completed_at)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to update streak of task with ID: {}", previous.id))?;

    Ok(result.rows_affected() > 0)
}

/// Deletes a task owned by `user_id` and returns it. `None` if no such task.
pub async fn find_one_and_delete_task(
    pool: &SqlitePool,
    task_id: i64,
    user_id: &str,
) -> Result<Option<Task>> {
    debug!("Attempting to delete task with ID: {}", task_id);
    let deleted = sqlx::query_as::<_, Task>(
        "DELETE FROM tasks WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("Failed to delete task with ID: {task_id}"))?;

    info!(
        "Deleted {} rows for task ID: {}",
        usize::from(deleted.is_some()),
        task_id
    );

    Ok(deleted)
}

// --- Groups ---

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    name: String,
    description: String,
    creator_id: String,
    created_at: DateTime<Utc>,
}

impl GroupRow {
    fn into_group(self, members: Vec<String>) -> Group {
        Group {
            id: self.id,
            name: self.name,
            description: self.description,
            creator_id: self.creator_id,
            members,
            created_at: self.created_at,
        }
    }
}

async fn members_of(pool: &SqlitePool, group_id: i64) -> Result<Vec<String>> {
    let members: Vec<(String,)> = sqlx::query_as(
        "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY joined_at ASC, user_id ASC",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to load members of group with ID: {group_id}"))?;

    Ok(members.into_iter().map(|(user_id,)| user_id).collect())
}

/// Creates a group with its creator as the first member.
/// Returns `None` if a group with the same name already exists.
pub async fn create_group_in_db(
    pool: &SqlitePool,
    creator_id: &str,
    name: &str,
    description: &str,
) -> Result<Option<Group>> {
    let created_at = Utc::now();
    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    let result = sqlx::query(
        "INSERT INTO chat_groups (name, description, creator_id, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .bind(description)
    .bind(creator_id)
    .bind(created_at)
    .execute(&mut *tx)
    .await
    .context("Failed to insert group into DB")?;

    if result.rows_affected() == 0 {
        debug!("Group name '{}' is already taken.", name);
        return Ok(None);
    }
    let id = result.last_insert_rowid();

    sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(creator_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to add group creator as member")?;

    tx.commit().await.context("Failed to commit group creation")?;

    Ok(Some(Group {
        id,
        name: name.to_string(),
        description: description.to_string(),
        creator_id: creator_id.to_string(),
        members: vec![creator_id.to_string()],
        created_at,
    }))
}

/// Retrieves every group with its members, newest first.
pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<Group>> {
    let rows = sqlx::query_as::<_, GroupRow>(
        "SELECT * FROM chat_groups ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to retrieve groups from DB")?;

    let memberships: Vec<(i64, String)> = sqlx::query_as(
        "SELECT group_id, user_id FROM group_members ORDER BY joined_at ASC, user_id ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to retrieve group members from DB")?;

    let mut members: HashMap<i64, Vec<String>> = HashMap::new();
    for (group_id, user_id) in memberships {
        members.entry(group_id).or_default().push(user_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let group_members = members.remove(&row.id).unwrap_or_default();
            row.into_group(group_members)
        })
        .collect())
}

/// Finds a group by id with its members. `None` when absent.
pub async fn find_group_by_id(pool: &SqlitePool, group_id: i64) -> Result<Option<Group>> {
    let row = sqlx::query_as::<_, GroupRow>("SELECT * FROM chat_groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to load group with ID: {group_id}"))?;

    match row {
        Some(row) => {
            let members = members_of(pool, group_id).await?;
            Ok(Some(row.into_group(members)))
        }
        None => Ok(None),
    }
}

pub async fn group_exists(pool: &SqlitePool, group_id: i64) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM chat_groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to look up group with ID: {group_id}"))?;
    Ok(found.is_some())
}

pub async fn is_group_member(pool: &SqlitePool, group_id: i64, user_id: &str) -> Result<bool> {
    let found: Option<(i64,)> =
        sqlx::query_as("SELECT group_id FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("Failed to check group membership")?;
    Ok(found.is_some())
}

/// Adds `user_id` to the group's persisted members.
/// Returns false if the user was already a member.
pub async fn add_group_member(pool: &SqlitePool, group_id: i64, user_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("Failed to add member to group with ID: {group_id}"))?;

    Ok(result.rows_affected() > 0)
}

// --- Chat messages ---

/// Stores a chat message. The creation timestamp is assigned here.
pub async fn insert_chat_message(
    pool: &SqlitePool,
    group_id: i64,
    author_id: &str,
    display_name: &str,
    body: &str,
) -> Result<ChatMessage> {
    let created_at = Utc::now();

    let id = sqlx::query(
        "INSERT INTO chat_messages (group_id, author_id, display_name, body, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(group_id)
    .bind(author_id)
    .bind(display_name)
    .bind(body)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to insert chat message into DB")?
    .last_insert_rowid();

    Ok(ChatMessage {
        id,
        group_id,
        author_id: author_id.to_string(),
        display_name: display_name.to_string(),
        body: body.to_string(),
        created_at,
    })
}

/// Returns the latest `limit` messages of a group, oldest first.
/// Ties on the timestamp fall back to insertion order.
pub async fn list_group_messages(
    pool: &SqlitePool,
    group_id: i64,
    limit: u32,
) -> Result<Vec<ChatMessage>> {
    let messages = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM ( \
            SELECT * FROM chat_messages WHERE group_id = ? ORDER BY created_at DESC, id DESC LIMIT ? \
         ) ORDER BY created_at ASC, id ASC",
    )
    .bind(group_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to retrieve messages of group with ID: {group_id}"))?;

    Ok(messages)
}

/// In-memory pool with the full schema, shared by the unit tests.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory SQLite");
    init_schema(&pool)
        .await
        .expect("Failed to create schema in test DB");
    pool
}

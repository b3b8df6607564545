// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::database;
use crate::locks::TaskLocks;
use crate::streak::{self, StreakError};
use anyhow::anyhow;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use streak_common::Task;
use tracing::{debug, info, warn};

// Conditional writes that lose to another process are re-read this many times.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Task not found.")]
    NotFound,
    #[error("Task belongs to another user.")]
    NotAuthorized,
    #[error("Task already completed today.")]
    AlreadyCompletedToday,
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl From<StreakError> for CompletionError {
    fn from(err: StreakError) -> Self {
        match err {
            StreakError::AlreadyCompletedToday => Self::AlreadyCompletedToday,
        }
    }
}

/// Marks `task_id` complete on `today` for `caller`.
///
/// Read, decide and write happen under the task's lock, and the write is
/// conditional on the streak that was read, so concurrent attempts on the
/// same day yield exactly one increment.
pub async fn complete_task(
    pool: &SqlitePool,
    locks: &TaskLocks,
    task_id: i64,
    caller: &str,
    today: NaiveDate,
) -> Result<Task, CompletionError> {
    let _guard = locks.acquire(task_id).await;

    for attempt in 1..=MAX_ATTEMPTS {
        let task = database::find_task_by_id(pool, task_id)
            .await?
            .ok_or(CompletionError::NotFound)?;
        if task.user_id != caller {
            return Err(CompletionError::NotAuthorized);
        }

        let completion =
            streak::evaluate_completion(task.last_completed_at, task.streak_count, today)?;

        if database::save_task_streak(
            pool,
            &task,
            completion.streak_count,
            completion.last_completed_at,
        )
        .await?
        {
            info!(
                task_id,
                streak = completion.streak_count,
                transition = ?completion.transition,
                "task completed"
            );
            return Ok(Task {
                streak_count: completion.streak_count,
                last_completed_at: Some(completion.last_completed_at),
                ..task
            });
        }

        warn!(task_id, attempt, "task changed while completing, re-reading");
    }

    debug!(task_id, "giving up after {} attempts", MAX_ATTEMPTS);
    Err(anyhow!("task {task_id} kept changing during completion").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use std::sync::Arc;
    use streak_common::CreateTaskPayload;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn new_task(pool: &SqlitePool, owner: &str) -> Task {
        database::create_task_in_db(
            pool,
            owner,
            CreateTaskPayload {
                title: "Meditate".to_string(),
                description: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_completion_yields_one() {
        let pool = test_pool().await;
        let locks = TaskLocks::new();
        let task = new_task(&pool, "u1").await;

        let done = complete_task(&pool, &locks, task.id, "u1", day(2024, 1, 10))
            .await
            .unwrap();
        assert_eq!(done.streak_count, 1);
        assert_eq!(done.last_completed_at, Some(day(2024, 1, 10)));
    }

    #[tokio::test]
    async fn test_consecutive_days_then_gap() {
        let pool = test_pool().await;
        let locks = TaskLocks::new();
        let task = new_task(&pool, "u1").await;

        for (i, d) in [10, 11, 12].into_iter().enumerate() {
            let done = complete_task(&pool, &locks, task.id, "u1", day(2024, 1, d))
                .await
                .unwrap();
            assert_eq!(done.streak_count as usize, i + 1);
        }

        let done = complete_task(&pool, &locks, task.id, "u1", day(2024, 1, 15))
            .await
            .unwrap();
        assert_eq!(done.streak_count, 1);

        let stored = database::find_task_by_id(&pool, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.streak_count, 1);
        assert_eq!(stored.last_completed_at, Some(day(2024, 1, 15)));
    }

    #[tokio::test]
    async fn test_second_completion_same_day_leaves_task_unchanged() {
        let pool = test_pool().await;
        let locks = TaskLocks::new();
        let task = new_task(&pool, "u1").await;

        complete_task(&pool, &locks, task.id, "u1", day(2024, 1, 10))
            .await
            .unwrap();
        let again = complete_task(&pool, &locks, task.id, "u1", day(2024, 1, 10)).await;
        assert!(matches!(again, Err(CompletionError::AlreadyCompletedToday)));

        let stored = database::find_task_by_id(&pool, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.streak_count, 1);
        assert_eq!(stored.last_completed_at, Some(day(2024, 1, 10)));
    }

    #[tokio::test]
    async fn test_missing_and_foreign_tasks() {
        let pool = test_pool().await;
        let locks = TaskLocks::new();
        let task = new_task(&pool, "u1").await;

        let missing = complete_task(&pool, &locks, 999, "u1", day(2024, 1, 10)).await;
        assert!(matches!(missing, Err(CompletionError::NotFound)));

        let foreign = complete_task(&pool, &locks, task.id, "u2", day(2024, 1, 10)).await;
        assert!(matches!(foreign, Err(CompletionError::NotAuthorized)));

        let stored = database::find_task_by_id(&pool, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.streak_count, 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let pool = test_pool().await;
        let locks = TaskLocks::new();
        let task = new_task(&pool, "u1").await;
        pool.close().await;

        let result = complete_task(&pool, &locks, task.id, "u1", day(2024, 1, 10)).await;
        assert!(matches!(result, Err(CompletionError::Persistence(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_increment_once() {
        let pool = test_pool().await;
        let locks = Arc::new(TaskLocks::new());
        let task = new_task(&pool, "u1").await;
        let today = day(2024, 1, 11);

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                let locks = Arc::clone(&locks);
                tokio::spawn(async move {
                    complete_task(&pool, &locks, task.id, "u1", today).await
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(CompletionError::AlreadyCompletedToday) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(rejected, 15);
        let stored = database::find_task_by_id(&pool, task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.streak_count, 1);
    }
}

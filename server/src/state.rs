// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::calendar::Calendar;
use crate::locks::TaskLocks;
use crate::rooms::RoomRegistry;
use sqlx::SqlitePool;
use std::sync::Arc;

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Everything a request or connection handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub rooms: Arc<RoomRegistry>,
    pub task_locks: Arc<TaskLocks>,
    pub calendar: Calendar,
    pub max_message_len: usize,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            rooms: Arc::new(RoomRegistry::new()),
            task_locks: Arc::new(TaskLocks::new()),
            calendar: Calendar::utc(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }
}

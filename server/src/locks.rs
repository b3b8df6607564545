// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// Idle entries are swept once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-task async locks so completions of one task run one at a time while
/// different tasks proceed independently.
#[derive(Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `task_id`. Released when the guard drops.
    pub async fn acquire(&self, task_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the table itself holds idle entries.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(task_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the entry of a deleted task.
    pub fn forget(&self, task_id: i64) {
        self.locks.lock().remove(&task_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Streak state machine.
//!
//! Decides how a habit's consecutive-completion count evolves when it is
//! completed on a given calendar day. Everything here is pure: the caller
//! reads the task, asks for a decision, and writes the result back under
//! its own per-task serialization.
use chrono::NaiveDate;

/// How a completion moved the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First completion ever.
    Started,
    /// Completed the day after the previous completion.
    Continued,
    /// A gap of two or more days, or a previous day in the future.
    Reset,
}

/// Result of a successful completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub streak_count: u32,
    pub last_completed_at: NaiveDate,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreakError {
    #[error("task already completed today")]
    AlreadyCompletedToday,
}

/// Evaluates a completion attempted on `today`.
///
/// Total over its inputs: a last-completed day after `today` (clock skew)
/// resets like any other gap.
pub fn evaluate_completion(
    last_completed_at: Option<NaiveDate>,
    current_streak: u32,
    today: NaiveDate,
) -> Result<Completion, StreakError> {
    let Some(last) = last_completed_at else {
        return Ok(Completion {
            streak_count: 1,
            last_completed_at: today,
            transition: Transition::Started,
        });
    };

    let (streak_count, transition) = match today.signed_duration_since(last).num_days() {
        0 => return Err(StreakError::AlreadyCompletedToday),
        1 => (current_streak.saturating_add(1), Transition::Continued),
        _ => (1, Transition::Reset),
    };

    Ok(Completion {
        streak_count,
        last_completed_at: today,
        transition,
    })
}

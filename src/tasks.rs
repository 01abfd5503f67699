//! Task visibility: the cached `isActive` flags and the unlock rule.

use crate::errors::ChallengeError;
use crate::machine::TaskCommand;
use crate::models::{ChallengeSettings, Task};
use crate::repository::{Repository, TASKS_COLLECTION};
use crate::store::{DocumentStore, WriteOp, server_timestamp};
use serde_json::{Map, Value};
use tracing::debug;

/// Applies `commands` to the task cache flags in one atomic batch.
///
/// Commands are applied in order, so a deactivation followed by an
/// activation never leaves two days visible at once. Returns how many task
/// documents were written.
pub async fn apply_commands(repo: &Repository, commands: &[TaskCommand]) -> Result<usize, ChallengeError> {
    let mut ops = Vec::new();
    for command in commands {
        let (tasks, active) = match *command {
            TaskCommand::Activate(day) => (repo.tasks_for_day(day).await?, true),
            TaskCommand::Deactivate(day) => (repo.tasks_for_day(day).await?, false),
            TaskCommand::DeactivateAll => (repo.tasks().await?, false),
        };
        if tasks.is_empty() {
            debug!(?command, "no tasks to flip");
        }
        ops.extend(tasks.iter().map(|task| set_active_op(task, active)));
    }

    let written = ops.len();
    repo.store().batch(ops).await?;
    Ok(written)
}

pub async fn activate_tasks_for_day(repo: &Repository, day: u32) -> Result<usize, ChallengeError> {
    apply_commands(repo, &[TaskCommand::Activate(day)]).await
}

pub async fn deactivate_tasks_for_day(repo: &Repository, day: u32) -> Result<usize, ChallengeError> {
    apply_commands(repo, &[TaskCommand::Deactivate(day)]).await
}

/// The authoritative unlock rule; a task's own `isActive` flag is only a cache.
pub fn is_task_unlocked(settings: &ChallengeSettings, task: &Task) -> bool {
    if !settings.is_active || settings.is_paused {
        return false;
    }
    if task.day_number == 0 && !settings.trial_enabled {
        return false;
    }
    task.day_number <= settings.current_day
}

fn set_active_op(task: &Task, active: bool) -> WriteOp {
    let mut fields = Map::new();
    fields.insert("isActive".to_string(), Value::Bool(active));
    fields.insert("updatedAt".to_string(), server_timestamp());
    WriteOp::update(TASKS_COLLECTION, &task.id, fields)
}

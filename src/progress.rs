//! Participant task completion and points.

use crate::errors::ChallengeError;
use crate::models::{Task, UserProgress};
use crate::repository::Repository;
use crate::tasks::is_task_unlocked;
use std::collections::BTreeMap;
use tracing::info;

/// Returns the participant, creating an empty record on first sign-in.
pub async fn ensure_participant(
    repo: &Repository,
    user_id: &str,
    display_name: &str,
) -> Result<UserProgress, ChallengeError> {
    if user_id.trim().is_empty() {
        return Err(ChallengeError::invalid("user id must not be empty"));
    }
    if let Some(user) = repo.participant(user_id).await? {
        return Ok(user);
    }
    let user = UserProgress::new(user_id, display_name);
    repo.save_participant(&user).await?;
    info!(user_id, "created participant");
    Ok(user)
}

/// Marks `task_id` done or not done for `user_id`.
pub async fn toggle_task(
    repo: &Repository,
    user_id: &str,
    task_id: &str,
    completed: bool,
) -> Result<UserProgress, ChallengeError> {
    let settings = repo.load_settings().await?;
    let task = repo
        .task(task_id)
        .await?
        .ok_or_else(|| ChallengeError::NotFound(format!("task {task_id}")))?;
    if !is_task_unlocked(&settings, &task) {
        return Err(ChallengeError::precondition(format!(
            "task {task_id} for day {} is locked",
            task.day_number
        )));
    }
    let mut user = repo
        .participant(user_id)
        .await?
        .ok_or_else(|| ChallengeError::NotFound(format!("participant {user_id}")))?;

    apply_toggle(&mut user, &task, completed);
    repo.save_participant(&user).await?;
    Ok(user)
}

/// Clears a participant's progress while keeping the record.
pub async fn reset_participant(repo: &Repository, user_id: &str) -> Result<UserProgress, ChallengeError> {
    let mut user = repo
        .participant(user_id)
        .await?
        .ok_or_else(|| ChallengeError::NotFound(format!("participant {user_id}")))?;
    user.progress.clear();
    user.points.clear();
    user.total_points = 0;
    user.rank = None;
    repo.save_participant(&user).await?;
    info!(user_id, "reset participant progress");
    Ok(user)
}

pub async fn delete_participant(repo: &Repository, user_id: &str) -> Result<(), ChallengeError> {
    repo.delete_participant(user_id).await?;
    info!(user_id, "deleted participant");
    Ok(())
}

/// Records the toggle and recomputes the total in the same mutation.
pub fn apply_toggle(user: &mut UserProgress, task: &Task, completed: bool) {
    user.progress.insert(task.id.clone(), completed);
    user.points.insert(task.id.clone(), task.points);
    user.total_points = total_points(&user.progress, &user.points);
}

pub fn total_points(progress: &BTreeMap<String, bool>, points: &BTreeMap<String, u32>) -> u64 {
    progress
        .iter()
        .filter(|(_, done)| **done)
        .map(|(task_id, _)| u64::from(points.get(task_id).copied().unwrap_or(0)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::ChallengeDefaults;
    use crate::service::ChallengeService;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn task(id: &str, day: u32, points: u32) -> Task {
        Task {
            id: id.to_string(),
            day_number: day,
            points,
            is_active: false,
            title: id.to_string(),
            description: String::new(),
            category: None,
            difficulty: None,
            tips: Vec::new(),
        }
    }

    async fn running() -> ChallengeService {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
        let repo = Repository::new(Arc::new(MemoryStore::new(clock.clone())), ChallengeDefaults::default());
        for (id, day, points) in [("t0", 0, 5), ("t1", 1, 10), ("t2", 2, 20)] {
            repo.upsert_task(&task(id, day, points)).await.unwrap();
        }
        let service = ChallengeService::new(repo, clock);
        service.start().await.unwrap();
        service.advance_to_next_day(0).await.unwrap();
        service
    }

    #[test]
    fn total_tracks_every_toggle() {
        let mut user = UserProgress::new("u1", "Amina");
        let steps = [
            (task("a", 0, 5), true),
            (task("b", 1, 10), true),
            (task("a", 0, 5), false),
            (task("c", 1, 7), true),
            (task("b", 1, 10), false),
            (task("a", 0, 5), true),
        ];
        for (task, completed) in &steps {
            apply_toggle(&mut user, task, *completed);
            let expected: u64 = user
                .progress
                .iter()
                .filter(|(_, done)| **done)
                .map(|(id, _)| u64::from(user.points[id]))
                .sum();
            assert_eq!(user.total_points, expected);
        }
        assert_eq!(user.total_points, 12);
    }

    #[tokio::test]
    async fn toggling_unlocked_task_updates_points() {
        let service = running().await;
        let repo = service.repository();
        ensure_participant(repo, "u1", "Amina").await.unwrap();

        let user = toggle_task(repo, "u1", "t1", true).await.unwrap();
        assert_eq!(user.total_points, 10);
        let user = toggle_task(repo, "u1", "t0", true).await.unwrap();
        assert_eq!(user.total_points, 15);
        let user = toggle_task(repo, "u1", "t1", false).await.unwrap();
        assert_eq!(user.total_points, 5);
        assert_eq!(repo.participant("u1").await.unwrap().unwrap().total_points, 5);
    }

    #[tokio::test]
    async fn future_day_task_is_locked() {
        let service = running().await;
        let repo = service.repository();
        ensure_participant(repo, "u1", "Amina").await.unwrap();
        let err = toggle_task(repo, "u1", "t2", true).await.unwrap_err();
        assert!(matches!(err, ChallengeError::Precondition(_)));
    }

    #[tokio::test]
    async fn ensure_participant_is_idempotent_and_reset_clears() {
        let service = running().await;
        let repo = service.repository();
        ensure_participant(repo, "u1", "Amina").await.unwrap();
        toggle_task(repo, "u1", "t1", true).await.unwrap();

        let again = ensure_participant(repo, "u1", "Someone else").await.unwrap();
        assert_eq!(again.display_name, "Amina");
        assert_eq!(again.total_points, 10);

        let reset = reset_participant(repo, "u1").await.unwrap();
        assert_eq!(reset.total_points, 0);
        assert!(reset.progress.is_empty());

        delete_participant(repo, "u1").await.unwrap();
        assert!(repo.participant("u1").await.unwrap().is_none());
    }
}

use crate::errors::{ChallengeError, StoreError};
use crate::models::{LeaderboardEntry, UserProgress};
use crate::repository::{Repository, USERS_COLLECTION};
use crate::store::{DocumentStore, WriteOp};
use serde_json::{Map, Value};
use tracing::debug;

/// Orders participants by points; equal totals share a rank (1, 1, 3).
pub fn build_leaderboard(participants: &[UserProgress]) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&UserProgress> = participants.iter().collect();
    sorted.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut entries = Vec::with_capacity(sorted.len());
    let mut rank = 0;
    let mut previous_total = None;
    for (position, user) in sorted.into_iter().enumerate() {
        if previous_total != Some(user.total_points) {
            rank = position as u32 + 1;
            previous_total = Some(user.total_points);
        }
        entries.push(LeaderboardEntry {
            rank,
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            total_points: user.total_points,
            completed_tasks: user.progress.values().filter(|done| **done).count(),
        });
    }
    entries
}

const RANK_ATTEMPTS: usize = 3;

/// The current standings, without touching the stored ranks.
pub async fn leaderboard(repo: &Repository) -> Result<Vec<LeaderboardEntry>, ChallengeError> {
    Ok(build_leaderboard(&repo.participants().await?))
}

/// Recomputes ranks and writes them back in one batch.
///
/// A participant deleted between the read and the write fails the batch; the
/// standings are then rebuilt from a fresh read.
pub async fn rank_participants(repo: &Repository) -> Result<Vec<LeaderboardEntry>, ChallengeError> {
    let mut attempt = 1;
    loop {
        let entries = leaderboard(repo).await?;
        let ops = entries
            .iter()
            .map(|entry| {
                let mut fields = Map::new();
                fields.insert("rank".to_string(), Value::from(entry.rank));
                WriteOp::update(USERS_COLLECTION, &entry.user_id, fields)
            })
            .collect();
        match repo.store().batch(ops).await {
            Ok(()) => return Ok(entries),
            Err(StoreError::NotFound { id, .. }) if attempt < RANK_ATTEMPTS => {
                debug!(participant = %id, attempt, "participant vanished while ranking, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::ChallengeDefaults;
    use crate::store::{FaultyStore, MemoryStore};
    use chrono::Utc;
    use std::sync::Arc;

    fn user(id: &str, name: &str, total: u64) -> UserProgress {
        let mut user = UserProgress::new(id, name);
        user.total_points = total;
        user
    }

    #[test]
    fn ties_share_rank_and_sort_by_name() {
        let board = build_leaderboard(&[
            user("u1", "Zara", 30),
            user("u2", "Amina", 50),
            user("u3", "Bilal", 30),
            user("u4", "Dawood", 10),
        ]);
        let ranked: Vec<_> = board
            .iter()
            .map(|entry| (entry.rank, entry.display_name.as_str()))
            .collect();
        assert_eq!(
            ranked,
            vec![(1, "Amina"), (2, "Bilal"), (2, "Zara"), (4, "Dawood")]
        );
    }

    #[test]
    fn empty_board() {
        assert!(build_leaderboard(&[]).is_empty());
    }

    #[tokio::test]
    async fn ranks_are_written_back() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo = Repository::new(Arc::new(MemoryStore::new(clock)), ChallengeDefaults::default());
        repo.save_participant(&user("u1", "Zara", 5)).await.unwrap();
        repo.save_participant(&user("u2", "Amina", 9)).await.unwrap();

        let standings = leaderboard(&repo).await.unwrap();
        assert_eq!(standings[0].user_id, "u2");
        assert_eq!(repo.participant("u2").await.unwrap().unwrap().rank, None);

        rank_participants(&repo).await.unwrap();
        assert_eq!(repo.participant("u2").await.unwrap().unwrap().rank, Some(1));
        assert_eq!(repo.participant("u1").await.unwrap().unwrap().rank, Some(2));
    }

    #[tokio::test]
    async fn ranking_survives_a_concurrent_delete() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(FaultyStore::new(Arc::new(MemoryStore::new(clock))));
        let repo = Repository::new(store.clone(), ChallengeDefaults::default());
        repo.save_participant(&user("u1", "Zara", 5)).await.unwrap();
        repo.save_participant(&user("u2", "Amina", 9)).await.unwrap();

        store.vanish_batches(1);
        let entries = rank_participants(&repo).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(repo.participant("u1").await.unwrap().unwrap().rank, Some(2));

        store.vanish_batches(RANK_ATTEMPTS);
        assert!(matches!(
            rank_participants(&repo).await,
            Err(ChallengeError::Store(StoreError::NotFound { .. }))
        ));
    }
}

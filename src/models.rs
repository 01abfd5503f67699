use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_DAY_DURATION_HOURS: u32 = 24;
pub const DEFAULT_TOTAL_DAYS: u32 = 14;
pub const MAX_DAY_DURATION_HOURS: u32 = 24 * 366;
pub const MAX_TOTAL_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDay {
    pub day_number: u32,
    pub scheduled_date: DateTime<Utc>,
    pub tracking_date: DateTime<Utc>,
    pub is_active: bool,
    pub is_completed: bool,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

/// The singleton `settings/challenge` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSettings {
    #[serde(default)]
    pub id: Option<String>,
    pub is_active: bool,
    pub is_paused: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub current_day: u32,
    pub day_duration: u32,
    pub trial_enabled: bool,
    /// Challenge days excluding the trial day; the schedule holds `total_days + 1` entries.
    pub total_days: u32,
    #[serde(default)]
    pub challenge_days: Vec<ChallengeDay>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    /// Bumped on every committed write; guards compare-and-swap saves.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChallengeSettings {
    pub fn new(id: Option<String>, total_days: u32, day_duration: u32, trial_enabled: bool) -> Self {
        Self {
            id,
            is_active: false,
            is_paused: false,
            start_date: None,
            scheduled_start_date: None,
            end_date: None,
            current_day: 0,
            day_duration,
            trial_enabled,
            total_days,
            challenge_days: Vec::new(),
            paused_at: None,
            resumed_at: None,
            revision: 0,
            updated_at: None,
        }
    }

    /// Highest valid day index.
    pub fn max_day(&self) -> u32 {
        match self.challenge_days.len() {
            0 => self.total_days,
            len => (len - 1) as u32,
        }
    }

    pub fn status(&self) -> ChallengeStatus {
        match (self.is_active, self.is_paused) {
            (true, true) => ChallengeStatus::Paused,
            (true, false) => ChallengeStatus::Active,
            (false, _) if self.start_date.is_some() => ChallengeStatus::Stopped,
            (false, _) => ChallengeStatus::NotStarted,
        }
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self::new(None, DEFAULT_TOTAL_DAYS, DEFAULT_DAY_DURATION_HOURS, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeStatus {
    NotStarted,
    Active,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    pub day_number: u32,
    pub points: u32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub progress: BTreeMap<String, bool>,
    #[serde(default)]
    pub points: BTreeMap<String, u32>,
    #[serde(default)]
    pub total_points: u64,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProgress {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            progress: BTreeMap::new(),
            points: BTreeMap::new(),
            total_points: 0,
            rank: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRequest {
    pub current_day: u32,
}

#[derive(Debug, Deserialize)]
pub struct SetDayRequest {
    pub day: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub day_duration: Option<u32>,
    pub trial_enabled: Option<bool>,
    pub total_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRequest {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub task_id: String,
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub status: ChallengeStatus,
    pub settings: ChallengeSettings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub total_points: u64,
    pub completed_tasks: usize,
}

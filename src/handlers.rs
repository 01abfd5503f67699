use crate::errors::AppError;
use crate::leaderboard;
use crate::models::{
    ChallengeResponse, ChallengeSettings, ConfigRequest, DayRequest, LeaderboardEntry,
    ParticipantRequest, ScheduleRequest, SetDayRequest, Task, TaskView, ToggleRequest, UserProgress,
};
use crate::progress;
use crate::state::AppState;
use crate::tasks::is_task_unlocked;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

type ChallengeResult = Result<Json<ChallengeResponse>, AppError>;

pub async fn get_challenge(State(state): State<AppState>) -> ChallengeResult {
    respond(state.service.settings().await?)
}

pub async fn start(State(state): State<AppState>) -> ChallengeResult {
    respond(state.service.start().await?)
}

pub async fn stop(State(state): State<AppState>) -> ChallengeResult {
    respond(state.service.stop().await?)
}

pub async fn pause(State(state): State<AppState>) -> ChallengeResult {
    respond(state.service.pause().await?)
}

pub async fn resume(State(state): State<AppState>) -> ChallengeResult {
    respond(state.service.resume().await?)
}

pub async fn advance(State(state): State<AppState>, Json(payload): Json<DayRequest>) -> ChallengeResult {
    respond(state.service.advance_to_next_day(payload.current_day).await?)
}

pub async fn previous(State(state): State<AppState>, Json(payload): Json<DayRequest>) -> ChallengeResult {
    respond(state.service.go_to_previous_day(payload.current_day).await?)
}

pub async fn set_day(State(state): State<AppState>, Json(payload): Json<SetDayRequest>) -> ChallengeResult {
    respond(state.service.set_current_day(payload.day).await?)
}

pub async fn schedule(State(state): State<AppState>, Json(payload): Json<ScheduleRequest>) -> ChallengeResult {
    respond(
        state
            .service
            .schedule_start(payload.start_at, payload.end_at)
            .await?,
    )
}

pub async fn configure(State(state): State<AppState>, Json(payload): Json<ConfigRequest>) -> ChallengeResult {
    respond(state.service.configure(&payload).await?)
}

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<TaskView>>, AppError> {
    let settings = state.service.settings().await?;
    let views = state
        .repo()
        .tasks()
        .await?
        .into_iter()
        .map(|task| TaskView {
            unlocked: is_task_unlocked(&settings, &task),
            task,
        })
        .collect();
    Ok(Json(views))
}

pub async fn put_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut task): Json<Task>,
) -> Result<Json<Task>, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::bad_request("task id must not be empty"));
    }
    task.id = id.to_string();
    state.repo().upsert_task(&task).await?;
    Ok(Json(task))
}

pub async fn get_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProgress>, AppError> {
    let user = state.repo().participant(&id).await?.ok_or_else(|| AppError {
        status: StatusCode::NOT_FOUND,
        message: format!("participant {id} not found"),
    })?;
    Ok(Json(user))
}

pub async fn ensure_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ParticipantRequest>,
) -> Result<Json<UserProgress>, AppError> {
    let user = progress::ensure_participant(state.repo(), &id, &payload.display_name).await?;
    Ok(Json(user))
}

pub async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<UserProgress>, AppError> {
    let user = progress::toggle_task(state.repo(), &id, &payload.task_id, payload.completed).await?;
    Ok(Json(user))
}

pub async fn reset_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProgress>, AppError> {
    Ok(Json(progress::reset_participant(state.repo(), &id).await?))
}

pub async fn delete_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    progress::delete_participant(state.repo(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leaderboard(State(state): State<AppState>) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(leaderboard::leaderboard(state.repo()).await?))
}

pub async fn rank(State(state): State<AppState>) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    Ok(Json(leaderboard::rank_participants(state.repo()).await?))
}

fn respond(settings: ChallengeSettings) -> ChallengeResult {
    Ok(Json(ChallengeResponse {
        status: settings.status(),
        settings,
    }))
}

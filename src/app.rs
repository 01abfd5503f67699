use crate::handlers;
use crate::state::AppState;
use axum::{routing::{get, post, put}, Router};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/challenge", get(handlers::get_challenge))
        .route("/api/challenge/start", post(handlers::start))
        .route("/api/challenge/stop", post(handlers::stop))
        .route("/api/challenge/pause", post(handlers::pause))
        .route("/api/challenge/resume", post(handlers::resume))
        .route("/api/challenge/advance", post(handlers::advance))
        .route("/api/challenge/previous", post(handlers::previous))
        .route("/api/challenge/day", post(handlers::set_day))
        .route("/api/challenge/schedule", post(handlers::schedule))
        .route("/api/challenge/config", post(handlers::configure))
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks/:id", put(handlers::put_task))
        .route(
            "/api/users/:id",
            get(handlers::get_participant)
                .post(handlers::ensure_participant)
                .delete(handlers::delete_participant),
        )
        .route("/api/users/:id/toggle", post(handlers::toggle))
        .route("/api/users/:id/reset", post(handlers::reset_participant))
        .route("/api/leaderboard", get(handlers::leaderboard))
        .route("/api/leaderboard/rank", post(handlers::rank))
        .with_state(state)
}

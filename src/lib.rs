pub mod app;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod leaderboard;
pub mod machine;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod repository;
pub mod schedule;
pub mod service;
pub mod state;
pub mod storage;
pub mod store;
pub mod tasks;

pub use app::router;
pub use config::Config;
pub use service::ChallengeService;
pub use state::AppState;

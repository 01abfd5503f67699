//! Runs lifecycle transitions against the store.
//!
//! Every operation reads the authoritative settings, asks [`machine`] for the
//! next state, commits the settings document guarded by its revision, then
//! issues the task-flag batch. Errors are returned to the caller untouched.

use crate::clock::Clock;
use crate::errors::ChallengeError;
use crate::machine::{self, Transition};
use crate::models::{ChallengeSettings, ConfigRequest};
use crate::repository::Repository;
use crate::tasks;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ChallengeService {
    repo: Repository,
    clock: Arc<dyn Clock>,
}

impl ChallengeService {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn settings(&self) -> Result<ChallengeSettings, ChallengeError> {
        self.repo.load_settings().await
    }

    pub async fn start(&self) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::start(&current, self.now())?;
        let settings = self.commit(&current, transition).await?;
        info!(max_day = settings.max_day(), "challenge started");
        Ok(settings)
    }

    pub async fn stop(&self) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::stop(&current);
        if transition.changed {
            info!(day = current.current_day, "challenge stopped");
        }
        self.commit(&current, transition).await
    }

    pub async fn pause(&self) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::pause(&current, self.now())?;
        info!(day = current.current_day, "challenge paused");
        self.commit(&current, transition).await
    }

    pub async fn resume(&self) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::resume(&current, self.now())?;
        let settings = self.commit(&current, transition).await?;
        info!(day = settings.current_day, "challenge resumed");
        Ok(settings)
    }

    /// Advances from `observed_day`, failing with `StaleDay` if the stored day moved on.
    pub async fn advance_to_next_day(&self, observed_day: u32) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::advance(&current, observed_day, self.now())?;
        let settings = self.commit(&current, transition).await?;
        if settings.is_active {
            info!(from = observed_day, to = settings.current_day, "advanced challenge day");
        } else {
            info!(day = observed_day, "last day finished, challenge stopped");
        }
        Ok(settings)
    }

    pub async fn go_to_previous_day(&self, observed_day: u32) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::previous(&current, observed_day, self.now())?;
        let settings = self.commit(&current, transition).await?;
        info!(from = observed_day, to = settings.current_day, "moved challenge day back");
        Ok(settings)
    }

    pub async fn set_current_day(&self, day: u32) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::set_day(&current, day, self.now())?;
        let settings = self.commit(&current, transition).await?;
        info!(from = current.current_day, to = day, "set challenge day");
        Ok(settings)
    }

    pub async fn schedule_start(
        &self,
        start_at: DateTime<Utc>,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::schedule_start(&current, start_at, end_at)?;
        info!(%start_at, ?end_at, "challenge start scheduled");
        self.commit(&current, transition).await
    }

    pub async fn configure(&self, request: &ConfigRequest) -> Result<ChallengeSettings, ChallengeError> {
        let current = self.repo.load_settings().await?;
        let transition = machine::configure(&current, request)?;
        self.commit(&current, transition).await
    }

    /// Starts the challenge once its scheduled start has passed. Safe to call every tick.
    pub async fn check_and_start_challenge(&self) -> Result<bool, ChallengeError> {
        let current = self.repo.load_settings().await?;
        if !machine::should_auto_start(&current, self.now()) {
            return Ok(false);
        }
        let transition = machine::start(&current, self.now())?;
        match self.commit(&current, transition).await {
            Ok(_) => {
                info!("scheduled challenge start reached, challenge started");
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                info!("challenge was started concurrently");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn check_and_end_challenge(&self) -> Result<bool, ChallengeError> {
        let current = self.repo.load_settings().await?;
        if !machine::should_auto_end(&current, self.now()) {
            return Ok(false);
        }
        let transition = machine::stop(&current);
        match self.commit(&current, transition).await {
            Ok(_) => {
                info!("challenge end reached, challenge stopped");
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                info!("challenge was changed concurrently while ending");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn commit(
        &self,
        current: &ChallengeSettings,
        transition: Transition,
    ) -> Result<ChallengeSettings, ChallengeError> {
        if !transition.changed {
            return Ok(transition.settings);
        }
        let saved = self
            .repo
            .save_settings(&transition.settings, current.revision)
            .await?;
        if let Err(err) = tasks::apply_commands(&self.repo, &transition.commands).await {
            warn!("settings saved but task flags were not updated: {err}");
            return Err(err);
        }
        Ok(saved)
    }
}

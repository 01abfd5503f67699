//! Typed access to the three collections the challenge uses.

use crate::errors::{ChallengeError, StoreError};
use crate::models::{ChallengeSettings, Task, UserProgress};
use crate::store::{DocumentStore, Listener, Query, Subscription, WriteOp, server_timestamp};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SETTINGS_COLLECTION: &str = "settings";
pub const SETTINGS_ID: &str = "challenge";
pub const TASKS_COLLECTION: &str = "tasks";
pub const USERS_COLLECTION: &str = "users";

/// Values used when the settings document has to be created on first run.
#[derive(Debug, Clone)]
pub struct ChallengeDefaults {
    pub challenge_id: Option<String>,
    pub total_days: u32,
    pub day_duration: u32,
    pub trial_enabled: bool,
}

impl Default for ChallengeDefaults {
    fn default() -> Self {
        let settings = ChallengeSettings::default();
        Self {
            challenge_id: settings.id,
            total_days: settings.total_days,
            day_duration: settings.day_duration,
            trial_enabled: settings.trial_enabled,
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
    defaults: ChallengeDefaults,
}

impl Repository {
    pub fn new(store: Arc<dyn DocumentStore>, defaults: ChallengeDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Reads the settings singleton, creating it from the defaults if absent.
    pub async fn load_settings(&self) -> Result<ChallengeSettings, ChallengeError> {
        if let Some(document) = self.store.get(SETTINGS_COLLECTION, SETTINGS_ID).await? {
            return Ok(from_document(document)?);
        }

        let defaults = &self.defaults;
        let settings = ChallengeSettings::new(
            defaults.challenge_id.clone(),
            defaults.total_days,
            defaults.day_duration,
            defaults.trial_enabled,
        );
        let ops = vec![
            WriteOp::verify(SETTINGS_COLLECTION, SETTINGS_ID, "revision", Value::Null),
            WriteOp::set(SETTINGS_COLLECTION, SETTINGS_ID, settings_document(&settings)?),
        ];
        match self.store.batch(ops).await {
            Ok(()) => {
                info!(total_days = settings.total_days, "created default challenge settings");
                Ok(settings)
            }
            Err(StoreError::Conflict { .. }) => {
                debug!("settings were created concurrently, reading them back");
                let document = self
                    .store
                    .get(SETTINGS_COLLECTION, SETTINGS_ID)
                    .await?
                    .ok_or_else(|| ChallengeError::NotFound("challenge settings".to_string()))?;
                Ok(from_document(document)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes `settings` only if nobody else has written since `expected_revision`.
    pub async fn save_settings(
        &self,
        settings: &ChallengeSettings,
        expected_revision: u64,
    ) -> Result<ChallengeSettings, ChallengeError> {
        let mut next = settings.clone();
        next.revision = expected_revision + 1;
        let ops = vec![
            WriteOp::verify(SETTINGS_COLLECTION, SETTINGS_ID, "revision", json!(expected_revision)),
            WriteOp::set(SETTINGS_COLLECTION, SETTINGS_ID, settings_document(&next)?),
        ];
        self.store.batch(ops).await?;
        Ok(next)
    }

    /// Pushes every committed settings document to `on_change`.
    pub async fn subscribe_settings(
        &self,
        on_change: impl Fn(ChallengeSettings) + Send + Sync + 'static,
    ) -> Result<Subscription, ChallengeError> {
        let listener: Listener = Arc::new(move |documents: &[(String, Value)]| {
            for (_, document) in documents {
                match from_document::<ChallengeSettings>(document.clone()) {
                    Ok(settings) => on_change(settings),
                    Err(err) => warn!("ignoring unreadable settings document: {err}"),
                }
            }
        });
        Ok(self
            .store
            .subscribe(SETTINGS_COLLECTION, Query::All, listener)
            .await?)
    }

    pub async fn task(&self, id: &str) -> Result<Option<Task>, ChallengeError> {
        match self.store.get(TASKS_COLLECTION, id).await? {
            Some(document) => Ok(Some(with_id(from_document::<Task>(document)?, id, |task, id| {
                task.id = id
            }))),
            None => Ok(None),
        }
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, ChallengeError> {
        self.query_tasks(&Query::All).await
    }

    pub async fn tasks_for_day(&self, day: u32) -> Result<Vec<Task>, ChallengeError> {
        self.query_tasks(&Query::field_equals("dayNumber", day)).await
    }

    pub async fn upsert_task(&self, task: &Task) -> Result<(), ChallengeError> {
        if task.id.is_empty() {
            return Err(ChallengeError::invalid("task id must not be empty"));
        }
        let mut document = to_document(task)?;
        document["updatedAt"] = server_timestamp();
        self.store.set(TASKS_COLLECTION, &task.id, document).await?;
        Ok(())
    }

    pub async fn participant(&self, id: &str) -> Result<Option<UserProgress>, ChallengeError> {
        match self.store.get(USERS_COLLECTION, id).await? {
            Some(document) => Ok(Some(with_id(
                from_document::<UserProgress>(document)?,
                id,
                |user, id| user.id = id,
            ))),
            None => Ok(None),
        }
    }

    pub async fn participants(&self) -> Result<Vec<UserProgress>, ChallengeError> {
        let documents = self.store.query(USERS_COLLECTION, &Query::All).await?;
        documents
            .into_iter()
            .map(|(id, document)| {
                let user = from_document::<UserProgress>(document)?;
                Ok(with_id(user, &id, |user, id| user.id = id))
            })
            .collect()
    }

    pub async fn save_participant(&self, user: &UserProgress) -> Result<(), ChallengeError> {
        let mut document = to_document(user)?;
        document["updatedAt"] = server_timestamp();
        if user.created_at.is_none() {
            document["createdAt"] = server_timestamp();
        }
        self.store.set(USERS_COLLECTION, &user.id, document).await?;
        Ok(())
    }

    pub async fn delete_participant(&self, id: &str) -> Result<(), ChallengeError> {
        self.store.delete(USERS_COLLECTION, id).await?;
        Ok(())
    }

    async fn query_tasks(&self, query: &Query) -> Result<Vec<Task>, ChallengeError> {
        let documents = self.store.query(TASKS_COLLECTION, query).await?;
        documents
            .into_iter()
            .map(|(id, document)| {
                let task = from_document::<Task>(document)?;
                Ok(with_id(task, &id, |task, id| task.id = id))
            })
            .collect()
    }
}

fn settings_document(settings: &ChallengeSettings) -> Result<Value, StoreError> {
    let mut document = to_document(settings)?;
    document["updatedAt"] = server_timestamp();
    Ok(document)
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn from_document<T: DeserializeOwned>(document: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(document)?)
}

/// Document ids live in the key; older documents may not carry them in the body.
fn with_id<T>(mut value: T, id: &str, assign: impl FnOnce(&mut T, String)) -> T {
    assign(&mut value, id.to_string());
    value
}

//! Keeps the challenge day in step with the IST calendar.
//!
//! A tick runs on start-up and then on a fixed interval. Failures inside a
//! tick are logged and swallowed; the next tick is the retry.

use crate::errors::StoreError;
use crate::schedule;
use crate::service::ChallengeService;
use crate::storage::{load_json, persist_json};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Device-local key/value storage for the "already advanced today" marker.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryMarkerStore {
    values: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Markers kept in a small JSON file so they survive restarts.
pub struct FileMarkerStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileMarkerStore {
    pub async fn open(path: PathBuf) -> Self {
        let values = load_json(&path).await;
        Self {
            path,
            values: Mutex::new(values),
        }
    }
}

#[async_trait]
impl MarkerStore for FileMarkerStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        persist_json(&self.path, &next).await?;
        *values = next;
        Ok(())
    }
}

pub fn marker_key(challenge_id: Option<&str>) -> String {
    format!("lastDayAdvancement_{}", challenge_id.unwrap_or("default"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not running and nothing scheduled.
    Idle,
    /// Scheduled start not reached yet.
    Waiting,
    Started,
    Ended,
    Paused,
    AlreadyAdvancedToday,
    InSync { day: u32 },
    Advanced { from: u32, to: u32 },
    Rewound { from: u32, to: u32 },
    Failed,
}

pub struct Reconciler {
    service: ChallengeService,
    markers: Arc<dyn MarkerStore>,
}

impl Reconciler {
    pub fn new(service: ChallengeService, markers: Arc<dyn MarkerStore>) -> Self {
        Self { service, markers }
    }

    /// One pass of the reconciliation algorithm.
    pub async fn tick(&self) -> ReconcileOutcome {
        let settings = match self.service.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("reconcile: failed to load settings: {err}");
                return ReconcileOutcome::Failed;
            }
        };

        if !settings.is_active {
            if settings.scheduled_start_date.is_none() {
                return ReconcileOutcome::Idle;
            }
            return match self.service.check_and_start_challenge().await {
                Ok(true) => ReconcileOutcome::Started,
                Ok(false) => ReconcileOutcome::Waiting,
                Err(err) => {
                    warn!("reconcile: scheduled start failed: {err}");
                    ReconcileOutcome::Failed
                }
            };
        }

        match self.service.check_and_end_challenge().await {
            Ok(true) => return ReconcileOutcome::Ended,
            Ok(false) => {}
            Err(err) => warn!("reconcile: end check failed: {err}"),
        }

        if settings.is_paused {
            return ReconcileOutcome::Paused;
        }

        let today = schedule::ist_date_string(self.service.now());
        let key = marker_key(settings.id.as_deref());
        match self.markers.get(&key).await {
            Ok(Some(marked)) if marked == today => return ReconcileOutcome::AlreadyAdvancedToday,
            Ok(_) => {}
            Err(err) => warn!("reconcile: failed to read advancement marker: {err}"),
        }

        let current = settings.current_day;
        let expected = schedule::day_scheduled_on(&settings.challenge_days, &today)
            .map_or(current, |day| day.min(settings.max_day()));

        let outcome = if expected > current {
            for day in current..expected {
                if let Err(err) = self.service.advance_to_next_day(day).await {
                    warn!(day, "reconcile: advance failed: {err}");
                    return ReconcileOutcome::Failed;
                }
            }
            ReconcileOutcome::Advanced {
                from: current,
                to: expected,
            }
        } else if expected < current {
            if let Err(err) = self.service.set_current_day(expected).await {
                warn!(day = expected, "reconcile: rewind failed: {err}");
                return ReconcileOutcome::Failed;
            }
            ReconcileOutcome::Rewound {
                from: current,
                to: expected,
            }
        } else {
            return ReconcileOutcome::InSync { day: current };
        };

        if let Err(err) = self.markers.set(&key, &today).await {
            warn!("reconcile: failed to write advancement marker: {err}");
        }
        outcome
    }

    /// Runs [`Reconciler::tick`] immediately and then every `interval` until stopped.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReconcileHandle {
        let (live_tx, mut live_rx) = watch::channel(true);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = live_rx.changed() => {
                        if changed.is_err() || !*live_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let outcome = self.tick().await;
                if !*live_rx.borrow() {
                    debug!(?outcome, "reconciler stopped mid-tick, discarding outcome");
                    break;
                }
                match &outcome {
                    ReconcileOutcome::Advanced { .. }
                    | ReconcileOutcome::Rewound { .. }
                    | ReconcileOutcome::Started
                    | ReconcileOutcome::Ended => info!(?outcome, "reconciled challenge"),
                    _ => debug!(?outcome, "reconcile tick"),
                }
                outcome_tx.send_replace(Some(outcome));
            }
        });

        ReconcileHandle {
            live: live_tx,
            outcomes: outcome_rx,
            join,
        }
    }
}

pub struct ReconcileHandle {
    live: watch::Sender<bool>,
    outcomes: watch::Receiver<Option<ReconcileOutcome>>,
    join: JoinHandle<()>,
}

impl ReconcileHandle {
    /// Receives the outcome of every tick that completed while the loop was live.
    pub fn outcomes(&self) -> watch::Receiver<Option<ReconcileOutcome>> {
        self.outcomes.clone()
    }

    /// Stops scheduling ticks; an in-flight tick finishes but its outcome is dropped.
    pub async fn shutdown(self) {
        self.live.send_replace(false);
        if let Err(err) = self.join.await {
            warn!("reconciler task ended abnormally: {err}");
        }
    }
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};

use crate::adapters::fiftyfive_api::{ApiClientError, ChargerApi};
use crate::domain::charger::ChargerCollection;
use crate::domain::poll_schedule::{Clock, PollIntervals, PollSchedule, TimestampMs};

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("reauthentication required: {0}")]
    AuthFailed(String),
    #[error("update failed: {0}")]
    UpdateFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum CoordinatorStatus {
    Pending,
    Ok,
    UpdateFailed(String),
    ReauthRequired(String),
}

/// Periodically fetches every charger of one account and publishes the
/// result. The interval adapts to the observed charging state and to the
/// fast polling window armed after a session start.
pub struct PollingCoordinator {
    entry_id: String,
    api: Arc<dyn ChargerApi>,
    clock: Arc<dyn Clock>,
    schedule: Mutex<PollSchedule>,
    snapshot: watch::Sender<Arc<ChargerCollection>>,
    status: watch::Sender<CoordinatorStatus>,
    refresh_requested: Notify,
}

impl PollingCoordinator {
    pub fn new(
        entry_id: impl Into<String>,
        api: Arc<dyn ChargerApi>,
        clock: Arc<dyn Clock>,
        intervals: PollIntervals,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ChargerCollection::default()));
        let (status, _) = watch::channel(CoordinatorStatus::Pending);

        Self {
            entry_id: entry_id.into(),
            api,
            clock,
            schedule: Mutex::new(PollSchedule::new(intervals)),
            snapshot,
            status,
            refresh_requested: Notify::new(),
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Last published collection; empty until the first successful poll.
    pub fn data(&self) -> Arc<ChargerCollection> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ChargerCollection>> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    pub fn update_interval(&self) -> Duration {
        self.with_schedule(|schedule| schedule.current_interval())
    }

    pub fn is_fast_polling(&self) -> bool {
        let now = self.clock.now();
        self.with_schedule(|schedule| schedule.is_fast_polling(now))
    }

    pub fn fast_polling_until(&self) -> Option<TimestampMs> {
        self.with_schedule(|schedule| schedule.fast_polling_until())
    }

    fn with_schedule<T>(&self, op: impl FnOnce(&mut PollSchedule) -> T) -> T {
        let mut schedule = match self.schedule.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        op(&mut schedule)
    }

    /// Runs one poll cycle. The published collection is only replaced when
    /// the fetch succeeds.
    pub async fn refresh(&self) -> Result<(), CoordinatorError> {
        let chargers = match self.api.fetch_all().await {
            Ok(chargers) => chargers,
            Err(ApiClientError::Authentication(message)) => {
                tracing::error!(
                    entry_id = %self.entry_id,
                    error = %message,
                    "charger cloud rejected credentials; reauthentication required"
                );
                self.status
                    .send_replace(CoordinatorStatus::ReauthRequired(message.clone()));
                return Err(CoordinatorError::AuthFailed(message));
            }
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(entry_id = %self.entry_id, error = %message, "poll cycle failed");
                self.status
                    .send_replace(CoordinatorStatus::UpdateFailed(message.clone()));
                return Err(CoordinatorError::UpdateFailed(message));
            }
        };

        let charging = chargers.is_charging();
        let now = self.clock.now();
        let decision = self.with_schedule(|schedule| schedule.evaluate(charging, now));

        if decision.changed {
            tracing::info!(
                entry_id = %self.entry_id,
                interval_secs = decision.interval.as_secs(),
                mode = ?decision.mode,
                "poll interval changed"
            );
        }

        tracing::debug!(
            entry_id = %self.entry_id,
            chargers = chargers.len(),
            charging,
            "published charger snapshot"
        );
        self.snapshot.send_replace(Arc::new(chargers));
        self.status.send_replace(CoordinatorStatus::Ok);

        Ok(())
    }

    /// Setup-time refresh. Unlike the poll loop, any failure here aborts the
    /// entry setup.
    pub async fn first_refresh(&self) -> Result<(), CoordinatorError> {
        tracing::debug!(entry_id = %self.entry_id, "running first refresh");
        self.refresh().await
    }

    /// Forces the charging interval for the fast polling window and asks the
    /// poll loop for an immediate refresh.
    pub fn start_fast_polling(&self) -> TimestampMs {
        let now = self.clock.now();
        let deadline = self.with_schedule(|schedule| schedule.arm_fast_polling(now));
        tracing::debug!(entry_id = %self.entry_id, "fast polling started");
        self.request_refresh();
        deadline
    }

    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Poll loop. Ends on shutdown or once the credentials are rejected.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = self.update_interval();

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.refresh_requested.notified() => {
                    tracing::debug!(entry_id = %self.entry_id, "out of band refresh requested");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(CoordinatorError::AuthFailed(_)) = self.refresh().await {
                break;
            }
        }

        tracing::info!(entry_id = %self.entry_id, "poll loop stopped");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use crate::adapters::fiftyfive_api::{ApiClientError, ChargerApi};
    use crate::domain::charger::ChargerCollection;
    use crate::domain::poll_schedule::{Clock, TimestampMs};

    #[derive(Default)]
    pub struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        pub fn set(&self, millis: i64) {
            self.now.store(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> TimestampMs {
            TimestampMs(self.now.load(Ordering::SeqCst))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FetchFailure {
        Authentication,
        Communication,
    }

    /// Charger API fake: scripted fetch results plus a log of commands.
    #[derive(Default)]
    pub struct ScriptedApi {
        fetches: Mutex<VecDeque<Result<ChargerCollection, FetchFailure>>>,
        pub last: Mutex<Option<ChargerCollection>>,
        pub commands: Mutex<Vec<String>>,
        fail_commands: bool,
        authorized_cards: Vec<String>,
    }

    impl ScriptedApi {
        pub fn returning(collection: ChargerCollection) -> Self {
            Self {
                last: Mutex::new(Some(collection)),
                ..Self::default()
            }
        }

        pub fn with_cards(mut self, cards: &[&str]) -> Self {
            self.authorized_cards = cards.iter().map(ToString::to_string).collect();
            self
        }

        pub fn failing_commands(mut self) -> Self {
            self.fail_commands = true;
            self
        }

        pub fn push_fetch(&self, result: Result<ChargerCollection, FetchFailure>) {
            if let Ok(mut fetches) = self.fetches.lock() {
                fetches.push_back(result);
            }
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn command(&self, command: String) -> Result<(), ApiClientError> {
            if self.fail_commands {
                return Err(ApiClientError::Communication("gateway timeout".to_string()));
            }
            if let Ok(mut commands) = self.commands.lock() {
                commands.push(command);
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ChargerApi for ScriptedApi {
        async fn fetch_all(&self) -> Result<ChargerCollection, ApiClientError> {
            let scripted = self.fetches.lock().ok().and_then(|mut f| f.pop_front());
            match scripted {
                Some(Ok(collection)) => {
                    if let Ok(mut last) = self.last.lock() {
                        *last = Some(collection.clone());
                    }
                    Ok(collection)
                }
                Some(Err(FetchFailure::Authentication)) => Err(ApiClientError::Authentication(
                    "Invalid credentials".to_string(),
                )),
                Some(Err(FetchFailure::Communication)) => Err(ApiClientError::Communication(
                    "connection reset".to_string(),
                )),
                None => self
                    .last
                    .lock()
                    .ok()
                    .and_then(|last| last.clone())
                    .ok_or_else(|| ApiClientError::Authentication("Invalid credentials".to_string())),
            }
        }

        async fn start_session(&self, charger: &str, card_id: &str) -> Result<(), ApiClientError> {
            if !self.authorized_cards.iter().any(|card| card == card_id) {
                return Err(ApiClientError::InvalidCard {
                    charger: charger.to_string(),
                    card_id: card_id.to_string(),
                });
            }
            self.command(format!("start {charger} {card_id}"))
        }

        async fn stop_session(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("stop {charger}"))
        }

        async fn soft_reset(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("soft_reset {charger}"))
        }

        async fn hard_reset(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("hard_reset {charger}"))
        }

        async fn unlock_connector(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("unlock_connector {charger}"))
        }

        async fn block(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("block {charger}"))
        }

        async fn unblock(&self, charger: &str) -> Result<(), ApiClientError> {
            self.command(format!("unblock {charger}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::watch;

    use super::testing::{FetchFailure, ManualClock, ScriptedApi};
    use super::{CoordinatorError, CoordinatorStatus, PollingCoordinator};
    use crate::domain::charger::{ChargerCollection, snapshot_from};
    use crate::domain::poll_schedule::{PollIntervals, TimestampMs};

    fn collection(statuses: &[(&str, &str)]) -> ChargerCollection {
        ChargerCollection::new(
            statuses
                .iter()
                .map(|(idx, status)| snapshot_from(json!({"IDX": idx, "STATUS": status})))
                .collect(),
        )
    }

    fn coordinator(api: Arc<ScriptedApi>, clock: Arc<ManualClock>) -> PollingCoordinator {
        PollingCoordinator::new("entry-1", api, clock, PollIntervals::default())
    }

    #[actix_web::test]
    async fn publishes_snapshot_and_selects_charging_interval() {
        let api = Arc::new(ScriptedApi::default());
        api.push_fetch(Ok(collection(&[("A1", "0"), ("B2", "1")])));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));

        coordinator.refresh().await.expect("refresh should succeed");

        assert_eq!(coordinator.data().len(), 2);
        assert_eq!(coordinator.update_interval(), Duration::from_secs(5));
        assert_eq!(coordinator.status(), CoordinatorStatus::Ok);
    }

    #[actix_web::test]
    async fn idle_account_uses_idle_interval() {
        let api = Arc::new(ScriptedApi::default());
        api.push_fetch(Ok(collection(&[("A1", "1")])));
        api.push_fetch(Ok(collection(&[("A1", "")])));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));

        coordinator.refresh().await.expect("first refresh");
        coordinator.refresh().await.expect("second refresh");

        assert_eq!(coordinator.update_interval(), Duration::from_secs(300));
    }

    #[actix_web::test]
    async fn authentication_failure_keeps_previous_snapshot() {
        let api = Arc::new(ScriptedApi::default());
        api.push_fetch(Ok(collection(&[("A1", "0")])));
        api.push_fetch(Err(FetchFailure::Authentication));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));
        coordinator.refresh().await.expect("first refresh");

        let result = coordinator.refresh().await;

        assert!(matches!(result, Err(CoordinatorError::AuthFailed(_))));
        assert!(matches!(
            coordinator.status(),
            CoordinatorStatus::ReauthRequired(_)
        ));
        assert!(coordinator.data().contains("A1"));
    }

    #[actix_web::test]
    async fn communication_failure_is_recoverable_and_keeps_snapshot() {
        let api = Arc::new(ScriptedApi::default());
        api.push_fetch(Ok(collection(&[("A1", "0")])));
        api.push_fetch(Err(FetchFailure::Communication));
        api.push_fetch(Ok(collection(&[("A1", "0"), ("B2", "0")])));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));
        coordinator.refresh().await.expect("first refresh");

        let failed = coordinator.refresh().await;
        assert!(matches!(failed, Err(CoordinatorError::UpdateFailed(_))));
        assert_eq!(coordinator.data().len(), 1);

        coordinator.refresh().await.expect("recovered refresh");
        assert_eq!(coordinator.data().len(), 2);
        assert_eq!(coordinator.status(), CoordinatorStatus::Ok);
    }

    #[actix_web::test]
    async fn fast_polling_forces_charging_interval_while_idle() {
        let api = Arc::new(ScriptedApi::returning(collection(&[("A1", "0")])));
        let clock = Arc::new(ManualClock::default());
        clock.set(10_000);
        let coordinator = coordinator(api, Arc::clone(&clock));

        let deadline = coordinator.start_fast_polling();
        assert_eq!(deadline, TimestampMs(40_000));

        clock.set(12_000);
        coordinator.refresh().await.expect("refresh during window");
        assert_eq!(coordinator.update_interval(), Duration::from_secs(5));

        clock.set(40_000);
        coordinator.refresh().await.expect("refresh after window");
        assert_eq!(coordinator.update_interval(), Duration::from_secs(300));
        assert!(!coordinator.is_fast_polling());
    }

    #[actix_web::test]
    async fn start_fast_polling_requests_immediate_refresh() {
        let api = Arc::new(ScriptedApi::returning(collection(&[("A1", "0")])));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));

        coordinator.start_fast_polling();

        let notified = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.refresh_requested.notified(),
        )
        .await;
        assert!(notified.is_ok());
    }

    #[actix_web::test]
    async fn subscribers_observe_each_publish() {
        let api = Arc::new(ScriptedApi::returning(collection(&[("A1", "0")])));
        let coordinator = coordinator(api, Arc::new(ManualClock::default()));
        let mut receiver = coordinator.subscribe();

        coordinator.refresh().await.expect("refresh");

        assert!(receiver.has_changed().expect("sender alive"));
        assert!(receiver.borrow_and_update().contains("A1"));
    }

    #[actix_web::test]
    async fn poll_loop_refreshes_on_request_and_stops_on_shutdown() {
        let api = Arc::new(ScriptedApi::returning(collection(&[("A1", "0")])));
        let coordinator = Arc::new(coordinator(api, Arc::new(ManualClock::default())));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut receiver = coordinator.subscribe();

        let handle = actix_web::rt::spawn(Arc::clone(&coordinator).run(shutdown_rx));
        coordinator.request_refresh();

        tokio::time::timeout(Duration::from_secs(1), receiver.changed())
            .await
            .expect("refresh should publish in time")
            .expect("sender alive");
        assert!(coordinator.data().contains("A1"));

        shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .expect("loop should not panic");
    }

    #[actix_web::test]
    async fn poll_loop_stops_when_reauthentication_is_required() {
        let api = Arc::new(ScriptedApi::default());
        api.push_fetch(Err(FetchFailure::Authentication));
        let coordinator = Arc::new(coordinator(api, Arc::new(ManualClock::default())));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = actix_web::rt::spawn(Arc::clone(&coordinator).run(shutdown_rx));
        coordinator.request_refresh();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .expect("loop should not panic");
        assert!(matches!(
            coordinator.status(),
            CoordinatorStatus::ReauthRequired(_)
        ));
    }
}

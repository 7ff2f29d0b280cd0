use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::cloud::{CloudCredentials, HttpCloudClient};
use crate::adapters::db::EntryRecord;
use crate::adapters::fiftyfive_api::{ChargerApi, FiftyfiveApiClient};
use crate::app::coordinator::{CoordinatorError, PollingCoordinator};
use crate::app::services::{DeviceRegistry, EntryStore, ServiceError};
use crate::app::setup::{ConfigFlow, SetupError, UserInput};
use crate::domain::charger::ChargerCollection;
use crate::domain::market::{CustomerType, Market};
use crate::domain::poll_schedule::{Clock, PollIntervals};

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("config entry {0} not found")]
    NotFound(String),
    #[error("stored config entry is invalid: {0}")]
    InvalidEntry(String),
    #[error("failed to create charger cloud client: {0}")]
    ClientInit(String),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    Storage(#[from] ServiceError),
}

/// Builds the charger API handle for one set of credentials.
pub trait ApiFactory: Send + Sync + 'static {
    fn build(&self, credentials: CloudCredentials) -> Result<Arc<dyn ChargerApi>, EntryError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpApiFactory {
    base_url: Option<String>,
}

impl HttpApiFactory {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }
}

impl ApiFactory for HttpApiFactory {
    fn build(&self, credentials: CloudCredentials) -> Result<Arc<dyn ChargerApi>, EntryError> {
        let cloud = HttpCloudClient::new(credentials, self.base_url.as_deref())
            .map_err(|error| EntryError::ClientInit(error.to_string()))?;
        let api: Arc<dyn ChargerApi> = Arc::new(FiftyfiveApiClient::new(cloud));
        Ok(api)
    }
}

pub fn credentials_from_record(record: &EntryRecord) -> Result<CloudCredentials, EntryError> {
    let market = record
        .market
        .parse::<Market>()
        .map_err(|error| EntryError::InvalidEntry(error.to_string()))?;
    let customer_type = record
        .customer_type
        .as_deref()
        .map(str::parse::<CustomerType>)
        .transpose()
        .map_err(|error| EntryError::InvalidEntry(error.to_string()))?;

    Ok(CloudCredentials {
        username: record.username.clone(),
        password: record.password.clone(),
        market,
        customer_type,
    })
}

/// A config entry that is set up: its adapter, its coordinator and the
/// background tasks driving them.
pub struct LiveEntry {
    pub record: EntryRecord,
    pub api: Arc<dyn ChargerApi>,
    pub coordinator: Arc<PollingCoordinator>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveEntry {
    pub fn new(
        record: EntryRecord,
        api: Arc<dyn ChargerApi>,
        coordinator: Arc<PollingCoordinator>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            record,
            api,
            coordinator,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.record.entry_id
    }

    fn attach_task(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Entries that are currently set up, in setup order.
#[derive(Default)]
pub struct EntryRegistry {
    entries: RwLock<Vec<Arc<LiveEntry>>>,
}

impl EntryRegistry {
    pub fn entries(&self) -> Vec<Arc<LiveEntry>> {
        match self.entries.read() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, entry_id: &str) -> Option<Arc<LiveEntry>> {
        self.entries()
            .into_iter()
            .find(|entry| entry.entry_id() == entry_id)
    }

    pub fn insert(&self, entry: Arc<LiveEntry>) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|existing| existing.entry_id() != entry.entry_id());
        entries.push(entry);
    }

    pub fn remove(&self, entry_id: &str) -> Option<Arc<LiveEntry>> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let position = entries
            .iter()
            .position(|entry| entry.entry_id() == entry_id)?;
        Some(entries.remove(position))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Config entry lifecycle: setup, unload, reload, reauthentication and
/// removal.
pub struct EntryManager {
    store: Arc<dyn EntryStore>,
    devices: Arc<dyn DeviceRegistry>,
    factory: Arc<dyn ApiFactory>,
    registry: Arc<EntryRegistry>,
    clock: Arc<dyn Clock>,
    intervals: PollIntervals,
}

impl EntryManager {
    pub fn new(
        store: Arc<dyn EntryStore>,
        devices: Arc<dyn DeviceRegistry>,
        factory: Arc<dyn ApiFactory>,
        registry: Arc<EntryRegistry>,
        clock: Arc<dyn Clock>,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            store,
            devices,
            factory,
            registry,
            clock,
            intervals,
        }
    }

    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// Sets up every stored entry; failures are logged and skipped.
    pub async fn setup_all(&self) -> Result<usize, EntryError> {
        let records = self.store.list_entries()?;
        let mut started = 0;

        for record in records {
            let entry_id = record.entry_id.clone();
            match self.setup_entry(record).await {
                Ok(_) => started += 1,
                Err(error) => {
                    tracing::error!(entry_id = %entry_id, error = %error, "config entry setup failed");
                }
            }
        }

        Ok(started)
    }

    pub async fn setup_entry(&self, record: EntryRecord) -> Result<Arc<LiveEntry>, EntryError> {
        let api = self.factory.build(credentials_from_record(&record)?)?;
        let coordinator = Arc::new(PollingCoordinator::new(
            record.entry_id.clone(),
            Arc::clone(&api),
            Arc::clone(&self.clock),
            self.intervals,
        ));

        coordinator.first_refresh().await?;

        let entry = Arc::new(LiveEntry::new(record, api, Arc::clone(&coordinator)));

        let poll_task = actix_web::rt::spawn(
            Arc::clone(&coordinator).run(entry.shutdown.subscribe()),
        );
        entry.attach_task(poll_task);

        let device_task = actix_web::rt::spawn(register_devices_on_publish(
            entry.entry_id().to_string(),
            coordinator.subscribe(),
            Arc::clone(&self.devices),
        ));
        entry.attach_task(device_task);

        self.registry.insert(Arc::clone(&entry));
        tracing::info!(
            entry_id = %entry.entry_id(),
            title = %entry.record.title,
            chargers = coordinator.data().len(),
            "config entry set up"
        );

        Ok(entry)
    }

    pub fn unload_entry(&self, entry_id: &str) -> bool {
        match self.registry.remove(entry_id) {
            Some(entry) => {
                entry.stop();
                tracing::info!(entry_id, "config entry unloaded");
                true
            }
            None => false,
        }
    }

    pub fn unload_all(&self) {
        for entry in self.registry.entries() {
            self.unload_entry(entry.entry_id());
        }
    }

    pub async fn reload_entry(&self, entry_id: &str) -> Result<Arc<LiveEntry>, EntryError> {
        self.unload_entry(entry_id);
        let record = self
            .store
            .get_entry(entry_id)?
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        self.setup_entry(record).await
    }

    pub async fn reauthenticate(
        &self,
        entry_id: &str,
        password: &str,
    ) -> Result<Arc<LiveEntry>, EntryError> {
        if !self.store.update_entry_password(entry_id, password)? {
            return Err(EntryError::NotFound(entry_id.to_string()));
        }
        tracing::info!(entry_id, "stored new credentials; reloading entry");
        self.reload_entry(entry_id).await
    }

    /// Runs the config flow and sets up the created entry. A stored entry
    /// whose setup fails stays stored and can be reloaded later.
    pub async fn add_entry(&self, input: UserInput) -> Result<EntryRecord, SetupError> {
        let record = ConfigFlow::new(Arc::clone(&self.store), Arc::clone(&self.factory))
            .submit(input)
            .await?;

        if let Err(error) = self.setup_entry(record.clone()).await {
            tracing::error!(
                entry_id = %record.entry_id,
                error = %error,
                "config entry stored but setup failed"
            );
        }

        Ok(record)
    }

    pub fn remove_entry(&self, entry_id: &str) -> Result<bool, EntryError> {
        self.unload_entry(entry_id);
        let removed_devices = self.devices.remove_entry_devices(entry_id)?;
        let removed = self.store.delete_entry(entry_id)?;
        if removed {
            tracing::info!(entry_id, removed_devices, "config entry removed");
        }
        Ok(removed)
    }
}

fn register_devices(devices: &dyn DeviceRegistry, entry_id: &str, chargers: &ChargerCollection) {
    for charger in chargers.iter() {
        if let Err(error) = devices.register_charger(entry_id, charger) {
            tracing::warn!(
                entry_id,
                charger = %charger.idx(),
                error = %error,
                "failed to register charger device"
            );
        }
    }
}

async fn register_devices_on_publish(
    entry_id: String,
    mut snapshots: watch::Receiver<Arc<ChargerCollection>>,
    devices: Arc<dyn DeviceRegistry>,
) {
    loop {
        let chargers = Arc::clone(&snapshots.borrow_and_update());
        register_devices(devices.as_ref(), &entry_id, &chargers);

        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::DOMAIN;
use crate::adapters::db;
use crate::adapters::db::{DbError, DeviceRecord, DeviceUpsert, EntryRecord};
use crate::domain::charger::ChargerSnapshot;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

pub trait EntryStore: Send + Sync + 'static {
    fn list_entries(&self) -> Result<Vec<EntryRecord>, ServiceError>;
    fn get_entry(&self, entry_id: &str) -> Result<Option<EntryRecord>, ServiceError>;
    fn find_entry_by_unique_id(&self, unique_id: &str)
    -> Result<Option<EntryRecord>, ServiceError>;
    fn insert_entry(&self, entry: &EntryRecord) -> Result<(), ServiceError>;
    fn update_entry_password(&self, entry_id: &str, password: &str)
    -> Result<bool, ServiceError>;
    fn delete_entry(&self, entry_id: &str) -> Result<bool, ServiceError>;
}

pub trait DeviceRegistry: Send + Sync + 'static {
    fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, ServiceError>;
    fn list_devices(&self, entry_id: &str) -> Result<Vec<DeviceRecord>, ServiceError>;
    fn register_charger(
        &self,
        entry_id: &str,
        charger: &ChargerSnapshot,
    ) -> Result<String, ServiceError>;
    fn remove_entry_devices(&self, entry_id: &str) -> Result<usize, ServiceError>;
}

#[derive(Clone)]
pub struct SqliteRegistry {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }
}

impl EntryStore for SqliteRegistry {
    fn list_entries(&self) -> Result<Vec<EntryRecord>, ServiceError> {
        self.with_connection(db::list_entries)
    }

    fn get_entry(&self, entry_id: &str) -> Result<Option<EntryRecord>, ServiceError> {
        self.with_connection(|connection| db::get_entry(connection, entry_id))
    }

    fn find_entry_by_unique_id(
        &self,
        unique_id: &str,
    ) -> Result<Option<EntryRecord>, ServiceError> {
        self.with_connection(|connection| db::find_entry_by_unique_id(connection, unique_id))
    }

    fn insert_entry(&self, entry: &EntryRecord) -> Result<(), ServiceError> {
        self.with_connection(|connection| db::insert_entry(connection, entry))
    }

    fn update_entry_password(
        &self,
        entry_id: &str,
        password: &str,
    ) -> Result<bool, ServiceError> {
        self.with_connection(|connection| db::update_entry_password(connection, entry_id, password))
    }

    fn delete_entry(&self, entry_id: &str) -> Result<bool, ServiceError> {
        self.with_connection(|connection| db::delete_entry(connection, entry_id))
    }
}

impl DeviceRegistry for SqliteRegistry {
    fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, ServiceError> {
        self.with_connection(|connection| db::get_device(connection, device_id))
    }

    fn list_devices(&self, entry_id: &str) -> Result<Vec<DeviceRecord>, ServiceError> {
        self.with_connection(|connection| db::list_devices_for_entry(connection, entry_id))
    }

    fn register_charger(
        &self,
        entry_id: &str,
        charger: &ChargerSnapshot,
    ) -> Result<String, ServiceError> {
        let device = DeviceUpsert {
            domain: DOMAIN.to_string(),
            identifier: charger.idx().to_string(),
            entry_id: entry_id.to_string(),
            name: charger.name().to_string(),
            sw_version: charger.software_version().map(ToString::to_string),
            model_id: charger.connector().map(ToString::to_string),
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let new_device_id = uuid::Uuid::new_v4().to_string();

        self.with_connection(|connection| db::upsert_device(connection, &new_device_id, &device))
    }

    fn remove_entry_devices(&self, entry_id: &str) -> Result<usize, ServiceError> {
        self.with_connection(|connection| db::delete_devices_for_entry(connection, entry_id))
    }
}

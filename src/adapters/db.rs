use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS config_entries (
    entry_id TEXT PRIMARY KEY,
    unique_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    market TEXT NOT NULL,
    customer_type TEXT,
    created_at TEXT NOT NULL
);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS devices (
    device_id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    identifier TEXT NOT NULL,
    entry_id TEXT NOT NULL,
    name TEXT NOT NULL,
    sw_version TEXT,
    model_id TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE (domain, identifier)
);

CREATE INDEX IF NOT EXISTS idx_devices_entry_id
ON devices (entry_id);
"#,
    ),
];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Stored account credentials, one per configured login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub entry_id: String,
    pub unique_id: String,
    pub title: String,
    pub username: String,
    pub password: String,
    pub market: String,
    pub customer_type: Option<String>,
    pub created_at: String,
}

const ENTRY_COLUMNS: &str =
    "entry_id, unique_id, title, username, password, market, customer_type, created_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<EntryRecord> {
    Ok(EntryRecord {
        entry_id: row.get(0)?,
        unique_id: row.get(1)?,
        title: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        market: row.get(5)?,
        customer_type: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn insert_entry(connection: &Connection, entry: &EntryRecord) -> Result<(), DbError> {
    connection.execute(
        &format!("INSERT INTO config_entries ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            entry.entry_id,
            entry.unique_id,
            entry.title,
            entry.username,
            entry.password,
            entry.market,
            entry.customer_type,
            entry.created_at,
        ],
    )?;

    Ok(())
}

pub fn get_entry(connection: &Connection, entry_id: &str) -> Result<Option<EntryRecord>, DbError> {
    connection
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM config_entries WHERE entry_id = ?1"),
            params![entry_id],
            entry_from_row,
        )
        .optional()
        .map_err(DbError::from)
}

pub fn find_entry_by_unique_id(
    connection: &Connection,
    unique_id: &str,
) -> Result<Option<EntryRecord>, DbError> {
    connection
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM config_entries WHERE unique_id = ?1"),
            params![unique_id],
            entry_from_row,
        )
        .optional()
        .map_err(DbError::from)
}

pub fn list_entries(connection: &Connection) -> Result<Vec<EntryRecord>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM config_entries ORDER BY created_at ASC, entry_id ASC"
    ))?;

    let rows = statement.query_map([], entry_from_row)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }

    Ok(entries)
}

pub fn update_entry_password(
    connection: &Connection,
    entry_id: &str,
    password: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE config_entries SET password = ?1 WHERE entry_id = ?2",
        params![password, entry_id],
    )?;
    Ok(changed > 0)
}

pub fn delete_entry(connection: &Connection, entry_id: &str) -> Result<bool, DbError> {
    let changed = connection.execute(
        "DELETE FROM config_entries WHERE entry_id = ?1",
        params![entry_id],
    )?;
    Ok(changed > 0)
}

/// A charger registered as a device; `(domain, identifier)` is its identity
/// and `identifier` carries the charger index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub domain: String,
    pub identifier: String,
    pub entry_id: String,
    pub name: String,
    pub sw_version: Option<String>,
    pub model_id: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUpsert {
    pub domain: String,
    pub identifier: String,
    pub entry_id: String,
    pub name: String,
    pub sw_version: Option<String>,
    pub model_id: Option<String>,
    pub updated_at: String,
}

const DEVICE_COLUMNS: &str =
    "device_id, domain, identifier, entry_id, name, sw_version, model_id, updated_at";

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        device_id: row.get(0)?,
        domain: row.get(1)?,
        identifier: row.get(2)?,
        entry_id: row.get(3)?,
        name: row.get(4)?,
        sw_version: row.get(5)?,
        model_id: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Inserts the device or refreshes its metadata, keeping an existing
/// device id stable. Returns the device id.
pub fn upsert_device(
    connection: &Connection,
    new_device_id: &str,
    device: &DeviceUpsert,
) -> Result<String, DbError> {
    connection.execute(
        "INSERT INTO devices (device_id, domain, identifier, entry_id, name, sw_version, model_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (domain, identifier) DO UPDATE SET
             entry_id = excluded.entry_id,
             name = excluded.name,
             sw_version = excluded.sw_version,
             model_id = excluded.model_id,
             updated_at = excluded.updated_at",
        params![
            new_device_id,
            device.domain,
            device.identifier,
            device.entry_id,
            device.name,
            device.sw_version,
            device.model_id,
            device.updated_at,
        ],
    )?;

    let device_id = connection.query_row(
        "SELECT device_id FROM devices WHERE domain = ?1 AND identifier = ?2",
        params![device.domain, device.identifier],
        |row| row.get(0),
    )?;

    Ok(device_id)
}

pub fn get_device(
    connection: &Connection,
    device_id: &str,
) -> Result<Option<DeviceRecord>, DbError> {
    connection
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1"),
            params![device_id],
            device_from_row,
        )
        .optional()
        .map_err(DbError::from)
}

pub fn list_devices_for_entry(
    connection: &Connection,
    entry_id: &str,
) -> Result<Vec<DeviceRecord>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices WHERE entry_id = ?1 ORDER BY identifier ASC"
    ))?;

    let rows = statement.query_map(params![entry_id], device_from_row)?;

    let mut devices = Vec::new();
    for row in rows {
        devices.push(row?);
    }

    Ok(devices)
}

pub fn delete_devices_for_entry(connection: &Connection, entry_id: &str) -> Result<usize, DbError> {
    let removed = connection.execute("DELETE FROM devices WHERE entry_id = ?1", params![entry_id])?;
    Ok(removed)
}

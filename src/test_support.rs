use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tempfile::TempDir;

use crate::adapters::db::{open_connection, run_migrations};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Migrated SQLite file in its own temp dir. The dir is removed when this
/// value drops, so keep it alive for as long as the connection is used.
pub struct TestDb {
    connection: Arc<Mutex<Connection>>,
    _dir: TempDir,
}

impl TestDb {
    pub fn open(test_name: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.path().join(format!("{test_name}-{counter}.sqlite"));
        let mut connection =
            open_connection(path.to_string_lossy().as_ref()).expect("test db should open");
        run_migrations(&mut connection).expect("test db migrations should succeed");

        Self {
            connection: Arc::new(Mutex::new(connection)),
            _dir: dir,
        }
    }

    pub fn shared(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }
}

use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::app::config::{AppConfig, SetupConfig};
use crate::app::coordinator::MonotonicClock;
use crate::app::dispatcher::{ChargerResolver, ServiceDispatcher};
use crate::app::entries::{EntryManager, EntryRegistry, HttpApiFactory};
use crate::app::error::AppError;
use crate::app::services::SqliteRegistry;
use crate::app::setup::ConfigFlow;
use crate::domain::poll_schedule::PollIntervals;

fn open_database(db_path: &str) -> Result<Arc<Mutex<Connection>>, AppError> {
    let mut connection = open_connection(db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;
    Ok(Arc::new(Mutex::new(connection)))
}

fn build_manager(
    sqlite: Arc<SqliteRegistry>,
    base_url: Option<String>,
    intervals: PollIntervals,
) -> (Arc<EntryManager>, Arc<EntryRegistry>) {
    let registry = Arc::new(EntryRegistry::default());
    let manager = EntryManager::new(
        sqlite.clone(),
        sqlite,
        Arc::new(HttpApiFactory::new(base_url)),
        Arc::clone(&registry),
        Arc::new(MonotonicClock::new()),
        intervals,
    );
    (Arc::new(manager), registry)
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let sqlite = Arc::new(SqliteRegistry::new(open_database(&config.db_path)?));
    let (manager, registry) = build_manager(sqlite.clone(), config.base_url.clone(), config.intervals);
    let dispatcher = Arc::new(ServiceDispatcher::new(ChargerResolver::new(sqlite, registry)));

    let api_state = ApiState {
        entries: Arc::clone(&manager),
        dispatcher,
    };

    let server_result = actix_web::rt::System::new().block_on(async move {
        match manager.setup_all().await {
            Ok(started) => tracing::info!(entries = started, "config entries set up"),
            Err(error) => tracing::error!(error = %error, "failed to load config entries"),
        }

        tracing::info!(bind = %config.http_bind, "http server starting");

        let result = match HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)
        {
            Ok(server) => server.run().await,
            Err(error) => Err(error),
        };

        manager.unload_all();
        result
    });

    server_result.map_err(AppError::runtime)
}

/// Runs the config flow once for the credentials in the environment. The
/// stored entry is picked up by the next `run`.
pub fn run_setup(config: SetupConfig) -> Result<(), AppError> {
    let sqlite = Arc::new(SqliteRegistry::new(open_database(&config.db_path)?));
    let factory = Arc::new(HttpApiFactory::new(config.base_url.clone()));
    let flow = ConfigFlow::new(sqlite, factory);

    let record = actix_web::rt::System::new()
        .block_on(flow.submit(config.input))
        .map_err(|error| AppError::setup(format!("{} ({error})", error.form_error())))?;

    tracing::info!(
        entry_id = %record.entry_id,
        title = %record.title,
        market = %record.market,
        "config entry stored"
    );

    Ok(())
}

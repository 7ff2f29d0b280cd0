pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod entries;
mod error;
mod logging;
mod runtime;
pub mod services;
pub mod setup;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        base_url = config.base_url.as_deref().unwrap_or("per market"),
        idle_interval_secs = config.intervals.idle.as_secs(),
        charging_interval_secs = config.intervals.charging.as_secs(),
        fast_window_secs = config.intervals.fast_window.as_secs(),
        "application bootstrap initialized"
    );

    runtime::run(config)
}

pub fn run_setup() -> Result<(), AppError> {
    logging::init()?;

    let config = config::SetupConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        username = %config.input.username,
        market = %config.input.market,
        "running config flow"
    );

    runtime::run_setup(config)
}

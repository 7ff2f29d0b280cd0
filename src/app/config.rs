use std::time::Duration;

use crate::app::AppError;
use crate::app::setup::UserInput;
use crate::domain::market::{CustomerType, Market};
use crate::domain::poll_schedule::PollIntervals;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub base_url: Option<String>,
    pub intervals: PollIntervals,
}

/// Credentials for the one-shot command line config flow.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub db_path: String,
    pub base_url: Option<String>,
    pub input: UserInput,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let intervals = PollIntervals {
            idle: Duration::from_secs(parse_or_default(&lookup, "IDLE_POLL_INTERVAL_SECS", 300_u64)?),
            charging: Duration::from_secs(parse_or_default(
                &lookup,
                "CHARGING_POLL_INTERVAL_SECS",
                5_u64,
            )?),
            fast_window: Duration::from_secs(parse_or_default(
                &lookup,
                "FAST_POLL_WINDOW_SECS",
                30_u64,
            )?),
            fast_decrement: Duration::from_secs(parse_or_default(
                &lookup,
                "FAST_POLL_DECREMENT_SECS",
                1_u64,
            )?),
        };

        if intervals.idle.is_zero() || intervals.charging.is_zero() {
            return Err(AppError::config("poll intervals must be greater than zero"));
        }

        Ok(Self {
            db_path: db_path(&lookup),
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            base_url: non_empty(&lookup, "FIFTYFIVE_BASE_URL"),
            intervals,
        })
    }
}

impl SetupConfig {
    pub fn from_env() -> Result<Self, AppError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = required(&lookup, "FIFTYFIVE_USERNAME")?;
        let password = lookup("FIFTYFIVE_PASSWORD")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::config("FIFTYFIVE_PASSWORD is required"))?;
        let market = required(&lookup, "FIFTYFIVE_MARKET")?;
        market.parse::<Market>().map_err(AppError::config)?;

        let customer_type = non_empty(&lookup, "FIFTYFIVE_CUSTOMER_TYPE");
        if let Some(value) = &customer_type {
            value.parse::<CustomerType>().map_err(AppError::config)?;
        }

        Ok(Self {
            db_path: db_path(&lookup),
            base_url: non_empty(&lookup, "FIFTYFIVE_BASE_URL"),
            input: UserInput {
                username,
                password,
                market,
                customer_type,
            },
        })
    }
}

fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }
}

fn db_path<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, "DB_PATH").unwrap_or_else(|| "/var/lib/fiftyfive/fiftyfive.db".to_string())
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key).ok_or_else(|| AppError::config(format!("{key} is required")))
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

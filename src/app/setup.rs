use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::adapters::cloud::CloudCredentials;
use crate::adapters::db::EntryRecord;
use crate::adapters::fiftyfive_api::{ApiClientError, ChargerApi};
use crate::app::entries::{ApiFactory, EntryError};
use crate::app::services::{EntryStore, ServiceError};
use crate::domain::market::{CustomerType, Market};

/// Credentials entered by the user when adding an account.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInput {
    pub username: String,
    pub password: String,
    pub market: String,
    #[serde(default)]
    pub customer_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid credentials: {0}")]
    InvalidAuth(String),
    #[error("account {0} is already configured")]
    AlreadyConfigured(String),
    #[error("cannot connect to charger cloud: {0}")]
    Communication(String),
    #[error("failed to create charger cloud client: {0}")]
    ClientInit(String),
    #[error(transparent)]
    Storage(#[from] ServiceError),
}

impl SetupError {
    /// Short error key shown next to the setup form.
    pub fn form_error(&self) -> &'static str {
        match self {
            SetupError::InvalidInput(_) | SetupError::InvalidAuth(_) => "auth",
            SetupError::AlreadyConfigured(_) => "already_configured",
            SetupError::Communication(_) => "cannot_connect",
            SetupError::ClientInit(_) | SetupError::Storage(_) => "unknown",
        }
    }
}

pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

pub struct ConfigFlow {
    store: Arc<dyn EntryStore>,
    factory: Arc<dyn ApiFactory>,
}

impl ConfigFlow {
    pub fn new(store: Arc<dyn EntryStore>, factory: Arc<dyn ApiFactory>) -> Self {
        Self { store, factory }
    }

    /// Validates the credentials with one fetch and stores a new entry.
    pub async fn submit(&self, input: UserInput) -> Result<EntryRecord, SetupError> {
        let credentials = validate_input(&input)?;
        let unique_id = slugify(&credentials.username);
        if unique_id.is_empty() {
            return Err(SetupError::InvalidInput("username is empty".to_string()));
        }

        let api = self.factory.build(credentials.clone()).map_err(|error| match error {
            EntryError::ClientInit(message) => SetupError::ClientInit(message),
            other => SetupError::ClientInit(other.to_string()),
        })?;

        let chargers = api.fetch_all().await.map_err(|error| match error {
            ApiClientError::Authentication(message) => SetupError::InvalidAuth(message),
            other => SetupError::Communication(other.to_string()),
        })?;
        if chargers.is_empty() {
            return Err(SetupError::InvalidAuth("no chargers on account".to_string()));
        }

        if self.store.find_entry_by_unique_id(&unique_id)?.is_some() {
            return Err(SetupError::AlreadyConfigured(credentials.username));
        }

        let record = EntryRecord {
            entry_id: uuid::Uuid::new_v4().to_string(),
            unique_id,
            title: credentials.username.clone(),
            username: credentials.username,
            password: credentials.password,
            market: credentials.market.code().to_string(),
            customer_type: credentials
                .customer_type
                .map(|customer_type| customer_type.as_str().to_string()),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.store.insert_entry(&record)?;

        tracing::info!(
            entry_id = %record.entry_id,
            title = %record.title,
            chargers = chargers.len(),
            "config entry created"
        );

        Ok(record)
    }
}

fn validate_input(input: &UserInput) -> Result<CloudCredentials, SetupError> {
    let username = input.username.trim();
    if username.is_empty() || input.password.is_empty() {
        return Err(SetupError::InvalidInput(
            "username and password are required".to_string(),
        ));
    }

    let market = input
        .market
        .parse::<Market>()
        .map_err(|error| SetupError::InvalidInput(error.to_string()))?;
    let customer_type = input
        .customer_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse::<CustomerType>)
        .transpose()
        .map_err(|error| SetupError::InvalidInput(error.to_string()))?;

    Ok(CloudCredentials {
        username: username.to_string(),
        password: input.password.clone(),
        market,
        customer_type,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{ConfigFlow, SetupError, UserInput, slugify};
    use crate::app::coordinator::testing::ScriptedApi;
    use crate::app::entries::testing::FakeApiFactory;
    use crate::app::services::{EntryStore, SqliteRegistry};
    use crate::domain::charger::{ChargerCollection, snapshot_from};
    use crate::test_support::TestDb;

    fn input(username: &str) -> UserInput {
        UserInput {
            username: username.to_string(),
            password: "secret".to_string(),
            market: "nl".to_string(),
            customer_type: Some("private".to_string()),
        }
    }

    fn flow(name: &str, factory: FakeApiFactory) -> (ConfigFlow, Arc<SqliteRegistry>, TestDb) {
        let db = TestDb::open(name);
        let store = Arc::new(SqliteRegistry::new(db.shared()));
        (ConfigFlow::new(store.clone(), Arc::new(factory)), store, db)
    }

    fn account_with_charger() -> Arc<ScriptedApi> {
        Arc::new(ScriptedApi::returning(ChargerCollection::new(vec![
            snapshot_from(json!({"IDX": "A1", "STATUS": "0"})),
        ])))
    }

    #[test]
    fn slugifies_usernames() {
        assert_eq!(slugify("Driver@Example.com"), "driver-example-com");
        assert_eq!(slugify("  --a__b--  "), "a-b");
        assert_eq!(slugify("@@"), "");
    }

    #[test]
    fn maps_errors_to_form_keys() {
        assert_eq!(SetupError::InvalidAuth("x".into()).form_error(), "auth");
        assert_eq!(
            SetupError::AlreadyConfigured("x".into()).form_error(),
            "already_configured"
        );
        assert_eq!(
            SetupError::Communication("x".into()).form_error(),
            "cannot_connect"
        );
    }

    #[actix_web::test]
    async fn stores_entry_titled_with_username() {
        let (flow, store, _db) = flow(
            "flow-ok",
            FakeApiFactory::default().with_api("driver@example.com", account_with_charger()),
        );

        let record = flow
            .submit(input("driver@example.com"))
            .await
            .expect("submit should succeed");

        assert_eq!(record.title, "driver@example.com");
        assert_eq!(record.unique_id, "driver-example-com");
        assert_eq!(record.market, "NL");
        assert_eq!(record.customer_type.as_deref(), Some("private"));
        assert_eq!(store.list_entries().expect("list"), vec![record]);
    }

    #[actix_web::test]
    async fn rejects_account_without_chargers() {
        let (flow, store, _db) = flow("flow-auth", FakeApiFactory::default());

        let result = flow.submit(input("driver@example.com")).await;

        assert!(matches!(result, Err(SetupError::InvalidAuth(_))));
        assert!(store.list_entries().expect("list").is_empty());
    }

    #[actix_web::test]
    async fn rejects_duplicate_account() {
        let api = account_with_charger();
        let (flow, _, _db) = flow(
            "flow-duplicate",
            FakeApiFactory::default()
                .with_api("driver@example.com", api.clone())
                .with_api("Driver@Example.com", api),
        );
        flow.submit(input("driver@example.com"))
            .await
            .expect("first submit");

        let result = flow.submit(input("Driver@Example.com")).await;

        assert!(matches!(result, Err(SetupError::AlreadyConfigured(_))));
    }

    #[actix_web::test]
    async fn rejects_unknown_market_before_contacting_cloud() {
        let factory = Arc::new(FakeApiFactory::default());
        let db = TestDb::open("flow-market");
        let store = Arc::new(SqliteRegistry::new(db.shared()));
        let flow = ConfigFlow::new(store, factory.clone());
        let mut bad = input("driver@example.com");
        bad.market = "XX".to_string();

        let result = flow.submit(bad).await;

        assert!(matches!(result, Err(SetupError::InvalidInput(_))));
        assert!(factory.built().is_empty());
    }
}

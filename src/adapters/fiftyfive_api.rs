use serde_json::Value;
use thiserror::Error;

use crate::adapters::cloud::{Channel, CloudClient, CloudError};
use crate::domain::charger::{ChargerCollection, ChargerSnapshot};

const CUSTOMER_ID_KEY: &str = "id";
const CARD_TEXT_KEY: &str = "text";

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("communication with charger cloud failed: {0}")]
    Communication(String),
    #[error("card {card_id} is not authorized on charger {charger}")]
    InvalidCard { charger: String, card_id: String },
}

/// Fetch-path mapping. Only a rejected login while fetching counts as an
/// authentication failure.
impl From<CloudError> for ApiClientError {
    fn from(error: CloudError) -> Self {
        match error {
            CloudError::Unauthorized => ApiClientError::Authentication(error.to_string()),
            other => ApiClientError::Communication(other.to_string()),
        }
    }
}

/// Commands never report authentication failures, whatever the cloud said.
fn command_error(error: CloudError) -> ApiClientError {
    ApiClientError::Communication(error.to_string())
}

/// Operations the coordinator and the service dispatcher need from one
/// charger cloud account.
#[async_trait::async_trait]
pub trait ChargerApi: Send + Sync + 'static {
    async fn fetch_all(&self) -> Result<ChargerCollection, ApiClientError>;
    async fn start_session(&self, charger: &str, card_id: &str) -> Result<(), ApiClientError>;
    async fn stop_session(&self, charger: &str) -> Result<(), ApiClientError>;
    async fn soft_reset(&self, charger: &str) -> Result<(), ApiClientError>;
    async fn hard_reset(&self, charger: &str) -> Result<(), ApiClientError>;
    async fn unlock_connector(&self, charger: &str) -> Result<(), ApiClientError>;
    async fn block(&self, charger: &str) -> Result<(), ApiClientError>;
    async fn unblock(&self, charger: &str) -> Result<(), ApiClientError>;
}

pub struct FiftyfiveApiClient<C> {
    cloud: C,
}

impl<C> FiftyfiveApiClient<C>
where
    C: CloudClient,
{
    pub fn new(cloud: C) -> Self {
        Self { cloud }
    }

    /// Returns the first customer of the charger whose card list holds
    /// `card_id`.
    async fn find_customer_for_card(
        &self,
        charger: &str,
        card_id: &str,
    ) -> Result<Option<String>, ApiClientError> {
        let customers = self
            .cloud
            .client_search(charger)
            .await
            .map_err(command_error)?;

        for customer in customers {
            let Some(customer_id) = customer.get(CUSTOMER_ID_KEY).and_then(value_as_id) else {
                tracing::debug!(charger, "skipping customer without id");
                continue;
            };

            let cards = self
                .cloud
                .card_search(charger, &customer_id)
                .await
                .map_err(command_error)?;
            let authorized = cards
                .iter()
                .any(|card| card.get(CARD_TEXT_KEY).and_then(Value::as_str) == Some(card_id));
            if authorized {
                return Ok(Some(customer_id));
            }
        }

        Ok(None)
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl<C> ChargerApi for FiftyfiveApiClient<C>
where
    C: CloudClient,
{
    async fn fetch_all(&self) -> Result<ChargerCollection, ApiClientError> {
        let networks = self.cloud.network_overview().await?;
        if networks.is_empty() {
            return Err(ApiClientError::Authentication(
                "Invalid credentials".to_string(),
            ));
        }

        let mut chargers = Vec::with_capacity(networks.len());
        for overview in networks {
            let idx = overview
                .get(crate::domain::charger::IDX_KEY)
                .and_then(value_as_id)
                .ok_or_else(|| {
                    ApiClientError::Communication("charger overview without IDX".to_string())
                })?;

            let detail = self
                .cloud
                .charger_overview(&idx)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    ApiClientError::Communication(format!("no detail returned for charger {idx}"))
                })?;

            chargers.push(ChargerSnapshot::merge(overview, detail));
        }

        Ok(ChargerCollection::new(chargers))
    }

    async fn start_session(&self, charger: &str, card_id: &str) -> Result<(), ApiClientError> {
        let customer_id = self
            .find_customer_for_card(charger, card_id)
            .await?
            .ok_or_else(|| ApiClientError::InvalidCard {
                charger: charger.to_string(),
                card_id: card_id.to_string(),
            })?;

        self.cloud
            .start(&Channel::for_charger(charger), &customer_id, card_id)
            .await
            .map_err(command_error)
    }

    async fn stop_session(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud
            .stop(&Channel::for_charger(charger))
            .await
            .map_err(command_error)
    }

    async fn soft_reset(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud
            .soft_reset(charger)
            .await
            .map_err(command_error)
    }

    async fn hard_reset(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud
            .hard_reset(charger)
            .await
            .map_err(command_error)
    }

    async fn unlock_connector(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud
            .unlock_connector(charger)
            .await
            .map_err(command_error)
    }

    async fn block(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud.block(charger).await.map_err(command_error)
    }

    async fn unblock(&self, charger: &str) -> Result<(), ApiClientError> {
        self.cloud
            .unblock(charger)
            .await
            .map_err(command_error)
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::fake::FakeCloud;
    use super::{ApiClientError, ChargerApi, FiftyfiveApiClient};

    fn two_charger_cloud() -> FakeCloud {
        FakeCloud::default()
            .with_charger(
                json!({"IDX": "A1", "NAME": "Driveway", "STATUS": "0"}),
                json!({"IDX": "A1", "STATUS": "1", "MOM_POWER_KW": 7.2}),
            )
            .with_charger(
                json!({"IDX": "B2", "NAME": "Garage", "STATUS": ""}),
                json!({"IDX": "B2", "SOFTWARE_VERSION": "4.1"}),
            )
    }

    #[actix_web::test]
    async fn fetch_all_merges_overview_and_detail_in_order() {
        let client = FiftyfiveApiClient::new(two_charger_cloud());

        let chargers = client.fetch_all().await.expect("fetch should succeed");
        let items: Vec<_> = chargers.iter().collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].idx(), "A1");
        assert_eq!(items[0].name(), "Driveway");
        assert_eq!(items[0].status_code(), 1);
        assert_eq!(items[1].software_version(), Some("4.1"));
        assert!(chargers.is_charging());
    }

    #[actix_web::test]
    async fn empty_overview_is_an_authentication_error() {
        let client = FiftyfiveApiClient::new(FakeCloud::default());

        let result = client.fetch_all().await;

        assert!(matches!(result, Err(ApiClientError::Authentication(_))));
    }

    #[actix_web::test]
    async fn transport_failure_is_a_communication_error() {
        let client = FiftyfiveApiClient::new(FakeCloud {
            fail_transport: true,
            ..two_charger_cloud()
        });

        let result = client.fetch_all().await;

        assert!(matches!(result, Err(ApiClientError::Communication(_))));
    }

    #[actix_web::test]
    async fn start_uses_first_customer_holding_the_card() {
        let cloud = two_charger_cloud()
            .with_customer("A1", "c-1", &["OTHER-CARD"])
            .with_customer("A1", "c-2", &["NL-CARD-1"])
            .with_customer("A1", "c-3", &["NL-CARD-1"]);
        let client = FiftyfiveApiClient::new(cloud);

        client
            .start_session("A1", "NL-CARD-1")
            .await
            .expect("start should succeed");

        assert_eq!(client.cloud.commands(), vec!["start A1/1 c-2 NL-CARD-1"]);
    }

    #[actix_web::test]
    async fn start_with_unknown_card_issues_no_command() {
        let cloud = two_charger_cloud().with_customer("A1", "c-1", &["OTHER-CARD"]);
        let client = FiftyfiveApiClient::new(cloud);

        let result = client.start_session("A1", "NL-CARD-1").await;

        assert!(matches!(result, Err(ApiClientError::InvalidCard { .. })));
        assert!(client.cloud.commands().is_empty());
    }

    #[actix_web::test]
    async fn commands_address_the_requested_charger() {
        let client = FiftyfiveApiClient::new(two_charger_cloud());

        client.stop_session("B2").await.expect("stop");
        client.soft_reset("B2").await.expect("soft reset");
        client.hard_reset("B2").await.expect("hard reset");
        client.unlock_connector("B2").await.expect("unlock");
        client.block("B2").await.expect("block");
        client.unblock("B2").await.expect("unblock");

        assert_eq!(
            client.cloud.commands(),
            vec![
                "stop B2/1",
                "soft_reset B2",
                "hard_reset B2",
                "unlock_connector B2",
                "block B2",
                "unblock B2",
            ]
        );
    }

    #[actix_web::test]
    async fn failed_command_is_a_communication_error() {
        let client = FiftyfiveApiClient::new(FakeCloud {
            fail_transport: true,
            ..FakeCloud::default()
        });

        let result = client.block("A1").await;

        assert!(matches!(result, Err(ApiClientError::Communication(_))));
    }

    #[actix_web::test]
    async fn rejected_command_login_is_a_communication_error() {
        let client = FiftyfiveApiClient::new(FakeCloud {
            reject_commands: true,
            ..two_charger_cloud().with_customer("A1", "c-1", &["NL-CARD-1"])
        });

        let reset = client.soft_reset("A1").await;
        let start = client.start_session("A1", "NL-CARD-1").await;

        assert!(matches!(reset, Err(ApiClientError::Communication(_))));
        assert!(matches!(start, Err(ApiClientError::Communication(_))));
        assert!(client.cloud.commands().is_empty());
        assert!(client.fetch_all().await.is_ok());
    }
}

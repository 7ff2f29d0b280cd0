use std::sync::Arc;

use serde_json::Value;

use crate::DOMAIN;
use crate::adapters::fiftyfive_api::{ApiClientError, ChargerApi};
use crate::app::entries::{EntryRegistry, LiveEntry};
use crate::app::services::DeviceRegistry;
use crate::domain::poll_schedule::TimestampMs;
use crate::domain::service_call::{ServiceCall, ServiceCallError};

/// Maps a device id to its charger index, and a charger index to the live
/// entry currently reporting it.
pub struct ChargerResolver {
    devices: Arc<dyn DeviceRegistry>,
    entries: Arc<EntryRegistry>,
}

impl ChargerResolver {
    pub fn new(devices: Arc<dyn DeviceRegistry>, entries: Arc<EntryRegistry>) -> Self {
        Self { devices, entries }
    }

    pub fn resolve(&self, device_id: &str) -> Option<String> {
        let device = match self.devices.get_device(device_id) {
            Ok(Some(device)) => device,
            Ok(None) => {
                tracing::warn!(device_id, "device not found");
                return None;
            }
            Err(error) => {
                tracing::warn!(device_id, error = %error, "device lookup failed");
                return None;
            }
        };

        if device.domain != DOMAIN {
            tracing::warn!(
                device_id,
                domain = %device.domain,
                "device does not belong to this integration"
            );
            return None;
        }

        Some(device.identifier)
    }

    /// First live entry whose last published snapshot holds the charger.
    pub fn find_owning_entry(&self, charger: &str) -> Option<Arc<LiveEntry>> {
        let owner = self
            .entries
            .entries()
            .into_iter()
            .find(|entry| entry.coordinator.data().contains(charger));

        if owner.is_none() {
            tracing::warn!(charger, "no config entry reports charger");
        }
        owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    FastPollingStarted(TimestampMs),
    DeviceNotFound,
    ChargerNotFound,
    CommandFailed(String),
}

pub struct ServiceDispatcher {
    resolver: ChargerResolver,
}

impl ServiceDispatcher {
    pub fn new(resolver: ChargerResolver) -> Self {
        Self { resolver }
    }

    /// Validates a raw call. Invalid calls are logged and never reach a
    /// charger.
    pub async fn handle(
        &self,
        service: &str,
        payload: &Value,
    ) -> Result<Vec<DispatchOutcome>, ServiceCallError> {
        let call = ServiceCall::parse(service, payload).map_err(|error| {
            tracing::error!(service, error = %error, "rejected service call");
            error
        })?;
        Ok(self.dispatch(&call).await)
    }

    /// Runs the call against every listed device in order, one outcome per
    /// device. A failing device does not stop the others.
    pub async fn dispatch(&self, call: &ServiceCall) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(call.devices().len());
        for device_id in call.devices() {
            outcomes.push(self.dispatch_to(call, device_id).await);
        }
        outcomes
    }

    async fn dispatch_to(&self, call: &ServiceCall, device_id: &str) -> DispatchOutcome {
        let service = call.service_name();

        let Some(charger) = self.resolver.resolve(device_id) else {
            return DispatchOutcome::DeviceNotFound;
        };
        let Some(entry) = self.resolver.find_owning_entry(&charger) else {
            return DispatchOutcome::ChargerNotFound;
        };

        tracing::info!(
            service,
            device_id,
            charger = %charger,
            entry_id = %entry.entry_id(),
            "dispatching charger command"
        );

        let result = invoke(entry.api.as_ref(), call, &charger).await;
        match result {
            Ok(()) => match call {
                ServiceCall::StartChargeSession { .. } => {
                    DispatchOutcome::FastPollingStarted(entry.coordinator.start_fast_polling())
                }
                _ => DispatchOutcome::Completed,
            },
            Err(error @ ApiClientError::InvalidCard { .. }) => {
                tracing::error!(service, device_id, charger = %charger, error = %error, "charger command rejected");
                DispatchOutcome::CommandFailed(error.to_string())
            }
            Err(error) => {
                tracing::warn!(service, device_id, charger = %charger, error = %error, "charger command failed");
                DispatchOutcome::CommandFailed(error.to_string())
            }
        }
    }
}

async fn invoke(api: &dyn ChargerApi, call: &ServiceCall, charger: &str) -> Result<(), ApiClientError> {
    match call {
        ServiceCall::StartChargeSession { card, .. } => api.start_session(charger, card).await,
        ServiceCall::StopChargeSession { .. } => api.stop_session(charger).await,
        ServiceCall::SoftResetCharger { .. } => api.soft_reset(charger).await,
        ServiceCall::HardResetCharger { .. } => api.hard_reset(charger).await,
        ServiceCall::UnlockConnector { .. } => api.unlock_connector(charger).await,
        ServiceCall::BlockCharger { .. } => api.block(charger).await,
        ServiceCall::UnblockCharger { .. } => api.unblock(charger).await,
    }
}

use serde_json::Value;
use thiserror::Error;

pub const START_CHARGE_SESSION: &str = "start_charge_session";
pub const STOP_CHARGE_SESSION: &str = "stop_charge_session";
pub const SOFT_RESET_CHARGER: &str = "soft_reset_charger";
pub const HARD_RESET_CHARGER: &str = "hard_reset_charger";
pub const UNLOCK_CONNECTOR: &str = "unlock_connector";
pub const BLOCK_CHARGER: &str = "block_charger";
pub const UNBLOCK_CHARGER: &str = "unblock_charger";

pub const SERVICE_NAMES: &[&str] = &[
    START_CHARGE_SESSION,
    STOP_CHARGE_SESSION,
    SOFT_RESET_CHARGER,
    HARD_RESET_CHARGER,
    UNLOCK_CONNECTOR,
    BLOCK_CHARGER,
    UNBLOCK_CHARGER,
];

const DEVICE_KEYS: &[&str] = &["device", "device_id"];
const CARD_KEY: &str = "card";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceCallError {
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("service payload must be a JSON object")]
    InvalidPayloadType,
    #[error("No device selected for {0}")]
    MissingDevice(&'static str),
    #[error("No card selected for {0}")]
    MissingCard(&'static str),
}

/// A validated remote procedure call addressed to one or more charger
/// devices. `devices` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    StartChargeSession { devices: Vec<String>, card: String },
    StopChargeSession { devices: Vec<String> },
    SoftResetCharger { devices: Vec<String> },
    HardResetCharger { devices: Vec<String> },
    UnlockConnector { devices: Vec<String> },
    BlockCharger { devices: Vec<String> },
    UnblockCharger { devices: Vec<String> },
}

impl ServiceCall {
    pub fn parse(service: &str, payload: &Value) -> Result<Self, ServiceCallError> {
        let name = SERVICE_NAMES
            .iter()
            .copied()
            .find(|name| *name == service)
            .ok_or_else(|| ServiceCallError::UnknownService(service.to_string()))?;

        let empty = serde_json::Map::new();
        let object = match payload {
            Value::Object(object) => object,
            Value::Null => &empty,
            _ => return Err(ServiceCallError::InvalidPayloadType),
        };

        let devices = DEVICE_KEYS
            .iter()
            .map(|key| device_ids(object.get(*key)))
            .find(|devices| !devices.is_empty())
            .ok_or(ServiceCallError::MissingDevice(name))?;

        let call = match name {
            START_CHARGE_SESSION => {
                let card = non_blank(object.get(CARD_KEY))
                    .ok_or(ServiceCallError::MissingCard(name))?;
                ServiceCall::StartChargeSession { devices, card }
            }
            STOP_CHARGE_SESSION => ServiceCall::StopChargeSession { devices },
            SOFT_RESET_CHARGER => ServiceCall::SoftResetCharger { devices },
            HARD_RESET_CHARGER => ServiceCall::HardResetCharger { devices },
            UNLOCK_CONNECTOR => ServiceCall::UnlockConnector { devices },
            BLOCK_CHARGER => ServiceCall::BlockCharger { devices },
            _ => ServiceCall::UnblockCharger { devices },
        };

        Ok(call)
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            ServiceCall::StartChargeSession { .. } => START_CHARGE_SESSION,
            ServiceCall::StopChargeSession { .. } => STOP_CHARGE_SESSION,
            ServiceCall::SoftResetCharger { .. } => SOFT_RESET_CHARGER,
            ServiceCall::HardResetCharger { .. } => HARD_RESET_CHARGER,
            ServiceCall::UnlockConnector { .. } => UNLOCK_CONNECTOR,
            ServiceCall::BlockCharger { .. } => BLOCK_CHARGER,
            ServiceCall::UnblockCharger { .. } => UNBLOCK_CHARGER,
        }
    }

    pub fn devices(&self) -> &[String] {
        match self {
            ServiceCall::StartChargeSession { devices, .. }
            | ServiceCall::StopChargeSession { devices }
            | ServiceCall::SoftResetCharger { devices }
            | ServiceCall::HardResetCharger { devices }
            | ServiceCall::UnlockConnector { devices }
            | ServiceCall::BlockCharger { devices }
            | ServiceCall::UnblockCharger { devices } => devices,
        }
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// A single id or a device picker list. Blank list items are skipped,
/// duplicates keep their first position.
fn device_ids(value: Option<&Value>) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    for device in items.into_iter().filter_map(|item| non_blank(Some(item))) {
        if !devices.contains(&device) {
            devices.push(device);
        }
    }
    devices
}

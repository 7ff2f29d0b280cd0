use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const IDX_KEY: &str = "IDX";
const NAME_KEY: &str = "NAME";
const STATUS_KEY: &str = "STATUS";
const SOFTWARE_VERSION_KEY: &str = "SOFTWARE_VERSION";
const CONNECTOR_KEY: &str = "CONNECTOR";
const POWER_KEY: &str = "MOM_POWER_KW";
const ENERGY_KEY: &str = "TRANS_ENERGY_DELIVERED_KWH";
const TRANSACTION_TIME_KEY: &str = "TRANSACTION_TIME_H_M";
const CARD_KEY: &str = "CARDID";
const NOTIFICATION_KEY: &str = "NOTIFICATION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration must look like hh:mm, got {0:?}")]
    Malformed(String),
}

/// Converts an `hh:mm` duration into minutes. An empty value means no
/// transaction is running and counts as zero.
pub fn hm_to_m(value: &str) -> Result<u32, DurationParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let malformed = || DurationParseError::Malformed(value.to_string());
    let (hours, minutes) = trimmed.split_once(':').ok_or_else(malformed)?;
    let hours: u32 = hours.trim().parse().map_err(|_| malformed())?;
    let minutes: u32 = minutes.trim().parse().map_err(|_| malformed())?;

    hours
        .checked_mul(60)
        .and_then(|total| total.checked_add(minutes))
        .ok_or_else(malformed)
}

/// One charger as reported by a single poll: the account overview row merged
/// with the per-charger detail row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChargerSnapshot {
    fields: Map<String, Value>,
}

impl ChargerSnapshot {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Detail fields override or extend the overview fields.
    pub fn merge(overview: Map<String, Value>, detail: Map<String, Value>) -> Self {
        let mut fields = overview;
        fields.extend(detail);
        Self { fields }
    }

    pub fn idx(&self) -> &str {
        self.text(IDX_KEY).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.text(NAME_KEY)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.idx())
    }

    /// Status as an integer; absent or empty counts as 0. Unparseable text is
    /// also treated as idle so one odd charger cannot break the whole poll.
    pub fn status_code(&self) -> i64 {
        match self.fields.get(STATUS_KEY) {
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64))
                .unwrap_or(0),
            Some(Value::String(text)) if !text.trim().is_empty() => {
                text.trim().parse().unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.status_code() > 0
    }

    pub fn software_version(&self) -> Option<&str> {
        self.text(SOFTWARE_VERSION_KEY)
    }

    pub fn connector(&self) -> Option<&str> {
        self.text(CONNECTOR_KEY)
    }

    pub fn power_kw(&self) -> f64 {
        self.number(POWER_KEY).unwrap_or(0.0)
    }

    pub fn energy_delivered_kwh(&self) -> f64 {
        self.number(ENERGY_KEY).unwrap_or(0.0)
    }

    pub fn transaction_time(&self) -> &str {
        self.text(TRANSACTION_TIME_KEY).unwrap_or_default()
    }

    pub fn card_id(&self) -> Option<&str> {
        self.text(CARD_KEY).filter(|card| !card.is_empty())
    }

    pub fn notification(&self) -> Option<&str> {
        self.text(NOTIFICATION_KEY)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => parse_decimal(text),
            _ => None,
        }
    }
}

fn parse_decimal(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Some markets report decimals with a comma.
    if trimmed.contains(',') && !trimmed.contains('.') {
        return trimmed.replace(',', ".").parse().ok();
    }

    trimmed.replace(',', "").parse().ok()
}

/// Every charger of one account, exactly as returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChargerCollection {
    chargers: Vec<ChargerSnapshot>,
}

impl ChargerCollection {
    pub fn new(chargers: Vec<ChargerSnapshot>) -> Self {
        Self { chargers }
    }

    pub fn is_empty(&self) -> bool {
        self.chargers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chargers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChargerSnapshot> {
        self.chargers.iter()
    }

    pub fn is_charging(&self) -> bool {
        self.chargers.iter().any(ChargerSnapshot::is_charging)
    }

    pub fn contains(&self, idx: &str) -> bool {
        self.get(idx).is_some()
    }

    pub fn get(&self, idx: &str) -> Option<&ChargerSnapshot> {
        self.chargers.iter().find(|charger| charger.idx() == idx)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerView {
    pub idx: String,
    pub name: String,
    pub status_code: i64,
    pub software_version: Option<String>,
    pub connector: Option<String>,
    pub power_draw_kw: f64,
    pub energy_delivered_kwh: f64,
    pub transaction_minutes: Option<u32>,
    pub card_id: Option<String>,
    pub notification: Option<String>,
}

impl From<&ChargerSnapshot> for ChargerView {
    fn from(snapshot: &ChargerSnapshot) -> Self {
        Self {
            idx: snapshot.idx().to_string(),
            name: snapshot.name().to_string(),
            status_code: snapshot.status_code(),
            software_version: snapshot.software_version().map(ToString::to_string),
            connector: snapshot.connector().map(ToString::to_string),
            power_draw_kw: snapshot.power_kw(),
            energy_delivered_kwh: snapshot.energy_delivered_kwh(),
            transaction_minutes: hm_to_m(snapshot.transaction_time()).ok(),
            card_id: snapshot.card_id().map(ToString::to_string),
            notification: snapshot.notification().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
pub(crate) fn snapshot_from(value: Value) -> ChargerSnapshot {
    match value {
        Value::Object(fields) => ChargerSnapshot::new(fields),
        other => panic!("charger fixture must be an object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ChargerCollection, ChargerSnapshot, ChargerView, DurationParseError, hm_to_m,
        snapshot_from,
    };

    #[test]
    fn converts_hours_and_minutes() {
        assert_eq!(hm_to_m(""), Ok(0));
        assert_eq!(hm_to_m("01:30"), Ok(90));
        assert_eq!(hm_to_m("00:07"), Ok(7));
        assert_eq!(hm_to_m("12:00"), Ok(720));
    }

    #[test]
    fn rejects_malformed_duration() {
        assert_eq!(
            hm_to_m("90"),
            Err(DurationParseError::Malformed("90".to_string()))
        );
        assert!(hm_to_m("aa:bb").is_err());
    }

    #[test]
    fn detail_fields_override_overview_fields() {
        let overview = json!({"IDX": "A1", "NAME": "Driveway", "STATUS": "0"});
        let detail = json!({"STATUS": "2", "MOM_POWER_KW": 7.4});

        let merged = ChargerSnapshot::merge(
            overview.as_object().cloned().unwrap_or_default(),
            detail.as_object().cloned().unwrap_or_default(),
        );

        assert_eq!(merged.idx(), "A1");
        assert_eq!(merged.name(), "Driveway");
        assert_eq!(merged.status_code(), 2);
        assert_eq!(merged.power_kw(), 7.4);
    }

    #[test]
    fn empty_status_parses_as_idle() {
        let charger = snapshot_from(json!({"IDX": "A1", "STATUS": ""}));
        assert_eq!(charger.status_code(), 0);
        assert!(!charger.is_charging());

        let missing = snapshot_from(json!({"IDX": "A1"}));
        assert_eq!(missing.status_code(), 0);

        let numeric = snapshot_from(json!({"IDX": "A1", "STATUS": 3}));
        assert!(numeric.is_charging());
    }

    #[test]
    fn collection_is_charging_when_any_charger_reports_positive_status() {
        let collection = ChargerCollection::new(vec![
            snapshot_from(json!({"IDX": "A1", "STATUS": "0"})),
            snapshot_from(json!({"IDX": "B2", "STATUS": "1"})),
        ]);

        assert!(collection.is_charging());
        assert!(collection.contains("B2"));
        assert!(!collection.contains("C3"));
    }

    #[test]
    fn view_applies_sensor_defaults() {
        let charger = snapshot_from(json!({
            "IDX": "A1",
            "NAME": "",
            "STATUS": "1",
            "MOM_POWER_KW": "",
            "TRANS_ENERGY_DELIVERED_KWH": "12,5",
            "TRANSACTION_TIME_H_M": "02:15",
            "CARDID": "NL-XYZ-1",
            "NOTIFICATION": "Charging",
            "SOFTWARE_VERSION": "1.2.3",
            "CONNECTOR": "Type2"
        }));

        let view = ChargerView::from(&charger);

        assert_eq!(view.name, "A1");
        assert_eq!(view.power_draw_kw, 0.0);
        assert_eq!(view.energy_delivered_kwh, 12.5);
        assert_eq!(view.transaction_minutes, Some(135));
        assert_eq!(view.card_id.as_deref(), Some("NL-XYZ-1"));
        assert_eq!(view.connector.as_deref(), Some("Type2"));
    }
}

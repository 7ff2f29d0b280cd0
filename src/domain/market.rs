use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketParseError {
    #[error("unknown market {0:?}")]
    UnknownMarket(String),
    #[error("unknown customer type {0:?}")]
    UnknownCustomerType(String),
}

/// Country portal of the charger cloud. Every market has its own host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    Netherlands,
    Belgium,
    Germany,
    UnitedKingdom,
    France,
    Spain,
    Portugal,
    Italy,
    Luxembourg,
}

impl Market {
    pub const ALL: [Market; 9] = [
        Market::Netherlands,
        Market::Belgium,
        Market::Germany,
        Market::UnitedKingdom,
        Market::France,
        Market::Spain,
        Market::Portugal,
        Market::Italy,
        Market::Luxembourg,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Market::Netherlands => "NL",
            Market::Belgium => "BE",
            Market::Germany => "DE",
            Market::UnitedKingdom => "GB",
            Market::France => "FR",
            Market::Spain => "ES",
            Market::Portugal => "PT",
            Market::Italy => "IT",
            Market::Luxembourg => "LU",
        }
    }

    pub fn default_base_url(self) -> String {
        format!(
            "https://my.50five.{}",
            match self {
                Market::UnitedKingdom => "co.uk".to_string(),
                other => other.code().to_ascii_lowercase(),
            }
        )
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = MarketParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let normalized = if normalized == "UK" {
            "GB".to_string()
        } else {
            normalized
        };

        Market::ALL
            .into_iter()
            .find(|market| market.code() == normalized)
            .ok_or_else(|| MarketParseError::UnknownMarket(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerType {
    Private,
    Business,
}

impl CustomerType {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerType::Private => "private",
            CustomerType::Business => "business",
        }
    }
}

impl FromStr for CustomerType {
    type Err = MarketParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" | "residential" => Ok(CustomerType::Private),
            "business" => Ok(CustomerType::Business),
            _ => Err(MarketParseError::UnknownCustomerType(value.to_string())),
        }
    }
}

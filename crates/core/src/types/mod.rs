//! Shared type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// Which equity market a session trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Us,
    Kr,
}

impl Market {
    /// Currency decimal places: cents for USD, whole won for KRW
    pub fn money_decimals(&self) -> u32 {
        match self {
            Market::Us => 2,
            Market::Kr => 0,
        }
    }

    /// Round a monetary value to the market's currency precision
    pub fn round_money(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.money_decimals() as i32);
        (value * factor).round() / factor
    }

    /// Timezone of the market's trading calendar
    pub fn timezone(&self) -> chrono_tz::Tz {
        match self {
            Market::Us => chrono_tz::America::Los_Angeles,
            Market::Kr => chrono_tz::Asia::Seoul,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Us => write!(f, "us"),
            Market::Kr => write!(f, "kr"),
        }
    }
}

impl FromStr for Market {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Market::Us),
            "kr" => Ok(Market::Kr),
            other => Err(Error::InvalidData(format!("unknown market: {}", other))),
        }
    }
}

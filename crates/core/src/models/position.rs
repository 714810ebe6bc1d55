//! Session position models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detailed broker position for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionDetail {
    pub quantity: f64,
    pub average_price: f64,
    pub last_price: f64,
}

/// symbol -> plain held quantity
pub type Positions = HashMap<String, f64>;

/// symbol -> detailed position
pub type DetailedPositions = HashMap<String, PositionDetail>;

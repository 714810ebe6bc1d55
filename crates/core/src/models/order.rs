//! Broker order result

use serde::{Deserialize, Serialize};

/// Result of an order placement.
///
/// Brokers differ in what they return; the common surface is a
/// success flag and an opaque order identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub is_success: bool,
    pub order_id: Option<String>,
}

impl Order {
    pub fn success(order_id: impl Into<String>) -> Self {
        Self {
            is_success: true,
            order_id: Some(order_id.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            is_success: false,
            order_id: None,
        }
    }

    /// Order identifier, or an empty string when the broker did not
    /// return one (some venues confirm without an id)
    pub fn id(&self) -> &str {
        self.order_id.as_deref().unwrap_or("")
    }
}

//! Account model

use serde::{Deserialize, Serialize};

/// A brokerage account owned by a user.
///
/// `id` is the stable user-scoped identifier (e.g. `"alice_0"`);
/// `account_number` is the broker-assigned number; `hash_value` is the
/// opaque identifier the broker API requires on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub account_number: String,
    pub description: Option<String>,
    pub hash_value: Option<String>,
    /// Lifetime deposits into the account
    pub contribution: Option<f64>,
    pub account_type: Option<String>,
    pub cash_balance: f64,
    pub total_value: f64,
}

//! Safety guard
//!
//! Pure validators that gate every order and the once-per-session
//! state integrity check that must pass before any order is placed.

mod integrity;
mod order;

pub use integrity::{check_integrity, classify_position, IntegrityCase};
pub use order::{validate_buy, validate_sell};

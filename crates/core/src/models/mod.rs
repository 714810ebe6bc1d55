//! Data models for autotrader entities

mod account;
mod order;
mod position;
mod rule;

pub use account::*;
pub use order::*;
pub use position::*;
pub use rule::*;

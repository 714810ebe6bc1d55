//! Autotrader Persistence - rule store trait and MySQL implementation

pub mod mysql;
pub mod store;

pub use mysql::Database;
pub use store::RuleStore;

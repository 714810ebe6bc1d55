//! Database connection and schema bootstrap

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::info;

use autotrader_core::{Error, Result};

/// Statement/acquire budget for store calls
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Database wrapper for MySQL operations
pub struct Database {
    pool: MySqlPool,
}

impl Database {
    /// Connect to the database at the given URL and bootstrap the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(url)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create tables that don't exist yet
    async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id VARCHAR(64) PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL,
                account_number VARCHAR(32) NOT NULL,
                description VARCHAR(255),
                hash_value VARCHAR(128),
                contribution DOUBLE,
                account_type VARCHAR(32),
                cash_balance DOUBLE NOT NULL DEFAULT 0,
                total_value DOUBLE NOT NULL DEFAULT 0,
                UNIQUE KEY uq_accounts_user_number (user_id, account_number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trading_rules (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                account_id VARCHAR(64) NOT NULL,
                symbol VARCHAR(32) NOT NULL,
                stock_name VARCHAR(128),
                trade_action VARCHAR(8) NOT NULL,
                limit_type VARCHAR(16) NOT NULL,
                limit_value DOUBLE NOT NULL,
                target_amount BIGINT NOT NULL DEFAULT 0,
                daily_money DOUBLE NOT NULL DEFAULT 0,
                cash_only TINYINT(1) NOT NULL DEFAULT 1,
                status VARCHAR(16) NOT NULL DEFAULT 'ACTIVE',
                current_holding DOUBLE NOT NULL DEFAULT 0,
                average_price DOUBLE NOT NULL DEFAULT 0,
                last_price DOUBLE NOT NULL DEFAULT 0,
                high_price DOUBLE NOT NULL DEFAULT 0,
                last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                account_id VARCHAR(64) NOT NULL,
                trading_rule_id BIGINT NOT NULL,
                order_id VARCHAR(64),
                symbol VARCHAR(32) NOT NULL,
                quantity BIGINT NOT NULL,
                price DOUBLE NOT NULL,
                trade_type VARCHAR(8) NOT NULL,
                used_money DOUBLE NOT NULL,
                trade_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS daily_records (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                record_date DATE NOT NULL,
                account_id VARCHAR(64) NOT NULL,
                symbol VARCHAR(32) NOT NULL,
                amount DOUBLE NOT NULL,
                quantity DOUBLE,
                UNIQUE KEY uq_daily_records (record_date, account_id, symbol)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::DatabaseError(e.to_string()))?;
        }

        info!("Database schema ready");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

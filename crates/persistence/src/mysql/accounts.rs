//! Account persistence operations

use sqlx::MySqlPool;

use autotrader_core::{Account, Error, Result};

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    user_id: String,
    account_number: String,
    description: Option<String>,
    hash_value: Option<String>,
    contribution: Option<f64>,
    account_type: Option<String>,
    cash_balance: f64,
    total_value: f64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            user_id: row.user_id,
            account_number: row.account_number,
            description: row.description,
            hash_value: row.hash_value,
            contribution: row.contribution,
            account_type: row.account_type,
            cash_balance: row.cash_balance,
            total_value: row.total_value,
        }
    }
}

/// Distinct user ids across all accounts
pub async fn get_users(pool: &MySqlPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT(user_id) FROM accounts")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn get_user_accounts(pool: &MySqlPool, user_id: &str) -> Result<Vec<Account>> {
    let rows: Vec<AccountRow> = sqlx::query_as(
        r#"
        SELECT id, user_id, account_number, description, hash_value,
               contribution, account_type, cash_balance, total_value
        FROM accounts
        WHERE user_id = ?
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows.into_iter().map(Account::from).collect())
}

/// All registered account hashes for a user
pub async fn get_hash_value(pool: &MySqlPool, user_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT hash_value FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows.into_iter().filter_map(|r| r.0).collect())
}

pub async fn update_account_hash(
    pool: &MySqlPool,
    account_number: &str,
    hash_value: &str,
    user_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET hash_value = ?
        WHERE account_number = ? AND user_id = ?
        "#,
    )
    .bind(hash_value)
    .bind(account_number)
    .bind(user_id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

pub async fn update_account_cash_balance(
    pool: &MySqlPool,
    account_id: &str,
    cash_balance: f64,
) -> Result<()> {
    sqlx::query("UPDATE accounts SET cash_balance = ? WHERE id = ?")
        .bind(cash_balance)
        .bind(account_id)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

pub async fn update_account_total_value(
    pool: &MySqlPool,
    account_id: &str,
    total_value: f64,
) -> Result<()> {
    sqlx::query("UPDATE accounts SET total_value = ? WHERE id = ?")
        .bind(total_value)
        .bind(account_id)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

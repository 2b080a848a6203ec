//! Wallet and API key operations.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{DatabaseError, Result};
use crate::models::{ApiKey, KeyScope, Wallet, WalletKeys};
use crate::user::unique_or;

pub(crate) async fn insert_wallet_with_keys(
    tx: &mut Transaction<'_, Sqlite>,
    wallet: &Wallet,
    keys: &WalletKeys,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (id, user_id, name, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&wallet.id)
    .bind(&wallet.user_id)
    .bind(&wallet.name)
    .bind(wallet.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| unique_or(e, "Wallet", &wallet.id))?;

    insert_keys(tx, wallet, keys).await
}

async fn insert_keys(
    tx: &mut Transaction<'_, Sqlite>,
    wallet: &Wallet,
    keys: &WalletKeys,
) -> Result<()> {
    for (key, scope) in [
        (&keys.admin_key, KeyScope::Admin),
        (&keys.invoice_key, KeyScope::Invoice),
    ] {
        sqlx::query(
            r#"
            INSERT INTO api_keys (key, user_id, wallet_id, scope, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(&wallet.user_id)
        .bind(&wallet.id)
        .bind(scope)
        .bind(wallet.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| unique_or(e, "ApiKey", scope.as_str()))?;
    }

    Ok(())
}

/// Create an additional wallet for an existing user.
pub async fn create_wallet(pool: &SqlitePool, wallet: &Wallet, keys: &WalletKeys) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_wallet_with_keys(&mut tx, wallet, keys).await?;
    tx.commit().await?;
    Ok(())
}

/// Get a wallet by ID.
pub async fn get_wallet(pool: &SqlitePool, id: &str) -> Result<Wallet> {
    sqlx::query_as::<_, Wallet>(
        r#"
        SELECT id, user_id, name, created_at
        FROM wallets
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Wallet",
        id: id.to_string(),
    })
}

/// List a user's wallets, oldest first.
pub async fn list_wallets(pool: &SqlitePool, user_id: &str) -> Result<Vec<Wallet>> {
    let wallets = sqlx::query_as::<_, Wallet>(
        r#"
        SELECT id, user_id, name, created_at
        FROM wallets
        WHERE user_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(wallets)
}

/// Rename a wallet.
pub async fn rename_wallet(pool: &SqlitePool, id: &str, name: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE wallets
        SET name = ?
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Wallet",
            id: id.to_string(),
        });
    }

    Ok(())
}

/// Look up the binding of an API key by exact match.
pub async fn find_key(pool: &SqlitePool, key: &str) -> Result<Option<ApiKey>> {
    let found = sqlx::query_as::<_, ApiKey>(
        r#"
        SELECT key, user_id, wallet_id, scope, created_at
        FROM api_keys
        WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(found)
}

/// Get the key of the given scope for a wallet.
pub async fn wallet_key(pool: &SqlitePool, wallet_id: &str, scope: KeyScope) -> Result<String> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT key
        FROM api_keys
        WHERE wallet_id = ? AND scope = ?
        "#,
    )
    .bind(wallet_id)
    .bind(scope)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "ApiKey",
        id: format!("{wallet_id}/{}", scope.as_str()),
    })
}

/// Replace both keys of a wallet. The old keys stop resolving immediately.
pub async fn rotate_keys(pool: &SqlitePool, wallet: &Wallet, keys: &WalletKeys) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        DELETE FROM api_keys
        WHERE wallet_id = ?
        "#,
    )
    .bind(&wallet.id)
    .execute(&mut *tx)
    .await?;

    insert_keys(&mut tx, wallet, keys).await?;

    tx.commit().await?;
    Ok(())
}

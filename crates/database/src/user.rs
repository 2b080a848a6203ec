//! User and app registration.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::{User, UserApp, Wallet, WalletKeys};
use crate::wallet::insert_wallet_with_keys;

/// Create a user together with their first wallet and its key pair.
pub async fn register_user(
    pool: &SqlitePool,
    user: &User,
    wallet: &Wallet,
    keys: &WalletKeys,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO users (id, created_at)
        VALUES (?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(user.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| unique_or(e, "User", &user.id))?;

    insert_wallet_with_keys(&mut tx, wallet, keys).await?;

    tx.commit().await?;
    Ok(())
}

/// Get a user by ID.
pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "User",
        id: id.to_string(),
    })
}

/// Register an app URL for a user. Registering the same URL twice is a no-op.
pub async fn add_app(pool: &SqlitePool, user_id: &str, app_url: &str, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_apps (user_id, app_url, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (user_id, app_url) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(app_url)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// List the apps a user registered, oldest first.
pub async fn list_apps(pool: &SqlitePool, user_id: &str) -> Result<Vec<UserApp>> {
    let apps = sqlx::query_as::<_, UserApp>(
        r#"
        SELECT user_id, app_url, created_at
        FROM user_apps
        WHERE user_id = ?
        ORDER BY created_at, app_url
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(apps)
}

/// Count total users.
pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM users
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub(crate) fn unique_or(e: sqlx::Error, entity: &'static str, id: &str) -> DatabaseError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return DatabaseError::AlreadyExists {
                entity,
                id: id.to_string(),
            };
        }
    }
    DatabaseError::Sqlx(e)
}

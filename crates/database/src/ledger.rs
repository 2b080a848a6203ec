//! Append-only ledger entries.
//!
//! Balances are always `SUM(amount_msat)` over a wallet's entries. Rows are
//! never updated or deleted (enforced by triggers), and each payment hash has
//! at most one entry of each [`EntryKind`].

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{EntryKind, LedgerEntry};

/// Current balance of a wallet in millisatoshis.
pub async fn balance(pool: &SqlitePool, wallet_id: &str) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    balance_on(&mut conn, wallet_id).await
}

pub(crate) async fn balance_on(conn: &mut SqliteConnection, wallet_id: &str) -> Result<i64> {
    let balance = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(SUM(amount_msat), 0)
        FROM ledger_entries
        WHERE wallet_id = ?
        "#,
    )
    .bind(wallet_id)
    .fetch_one(conn)
    .await?;

    Ok(balance)
}

/// List a wallet's entries, oldest first.
pub async fn list_entries(pool: &SqlitePool, wallet_id: &str) -> Result<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, wallet_id, payment_hash, kind, amount_msat, created_at
        FROM ledger_entries
        WHERE wallet_id = ?
        ORDER BY id
        "#,
    )
    .bind(wallet_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// List every entry recorded for a payment hash, oldest first.
pub async fn entries_for_hash(pool: &SqlitePool, payment_hash: &str) -> Result<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, wallet_id, payment_hash, kind, amount_msat, created_at
        FROM ledger_entries
        WHERE payment_hash = ?
        ORDER BY id
        "#,
    )
    .bind(payment_hash)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

pub(crate) async fn get_entry(
    conn: &mut SqliteConnection,
    payment_hash: &str,
    kind: EntryKind,
) -> Result<Option<LedgerEntry>> {
    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, wallet_id, payment_hash, kind, amount_msat, created_at
        FROM ledger_entries
        WHERE payment_hash = ? AND kind = ?
        "#,
    )
    .bind(payment_hash)
    .bind(kind)
    .fetch_optional(conn)
    .await?;

    Ok(entry)
}

/// Append an entry unless one of the same kind already exists for the hash.
///
/// Returns the stored entry and whether this call created it.
pub(crate) async fn insert_once(
    conn: &mut SqliteConnection,
    wallet_id: &str,
    payment_hash: &str,
    kind: EntryKind,
    amount_msat: i64,
    now: i64,
) -> Result<(LedgerEntry, bool)> {
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_entries (wallet_id, payment_hash, kind, amount_msat, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (payment_hash, kind) DO NOTHING
        "#,
    )
    .bind(wallet_id)
    .bind(payment_hash)
    .bind(kind)
    .bind(amount_msat)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let created = result.rows_affected() == 1;
    let entry = get_entry(conn, payment_hash, kind)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "LedgerEntry",
            id: format!("{payment_hash}/{}", kind.as_str()),
        })?;

    Ok((entry, created))
}

/// Append a debit of `amount_msat` only if the wallet's balance covers it.
///
/// The balance check and the insert are one statement, so the database never
/// commits an entry that would take the balance below zero. Returns `None`
/// when the balance is insufficient. A second debit for the same hash is
/// rejected with [`DatabaseError::AlreadyExists`].
pub(crate) async fn insert_debit_if_covered(
    conn: &mut SqliteConnection,
    wallet_id: &str,
    payment_hash: &str,
    amount_msat: i64,
    now: i64,
) -> Result<Option<LedgerEntry>> {
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_entries (wallet_id, payment_hash, kind, amount_msat, created_at)
        SELECT ?, ?, 'debit', ?, ?
        WHERE (
            SELECT COALESCE(SUM(amount_msat), 0)
            FROM ledger_entries
            WHERE wallet_id = ?
        ) >= ?
        "#,
    )
    .bind(wallet_id)
    .bind(payment_hash)
    .bind(-amount_msat)
    .bind(now)
    .bind(wallet_id)
    .bind(amount_msat)
    .execute(&mut *conn)
    .await
    .map_err(|e| crate::user::unique_or(e, "Debit", payment_hash))?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    get_entry(conn, payment_hash, EntryKind::Debit).await
}

/// Append a credit for a confirmed settlement. Idempotent per payment hash.
pub async fn credit(
    pool: &SqlitePool,
    wallet_id: &str,
    payment_hash: &str,
    amount_msat: i64,
    now: i64,
) -> Result<(LedgerEntry, bool)> {
    let mut conn = pool.acquire().await?;
    insert_once(&mut conn, wallet_id, payment_hash, EntryKind::Credit, amount_msat, now).await
}

/// Append a balance-checked debit. `None` means the balance was insufficient.
pub async fn debit(
    pool: &SqlitePool,
    wallet_id: &str,
    payment_hash: &str,
    amount_msat: i64,
    now: i64,
) -> Result<Option<LedgerEntry>> {
    let mut conn = pool.acquire().await?;
    insert_debit_if_covered(&mut conn, wallet_id, payment_hash, amount_msat, now).await
}

/// Append the compensating credit for the debit recorded under `payment_hash`.
///
/// Returns `None` if no debit exists for the hash.
pub async fn reverse(
    pool: &SqlitePool,
    payment_hash: &str,
    now: i64,
) -> Result<Option<(LedgerEntry, bool)>> {
    let mut conn = pool.acquire().await?;
    reverse_on(&mut conn, payment_hash, now).await
}

pub(crate) async fn reverse_on(
    conn: &mut SqliteConnection,
    payment_hash: &str,
    now: i64,
) -> Result<Option<(LedgerEntry, bool)>> {
    let Some(debit) = get_entry(conn, payment_hash, EntryKind::Debit).await? else {
        return Ok(None);
    };

    let reversal = insert_once(
        conn,
        &debit.wallet_id,
        payment_hash,
        EntryKind::Reversal,
        -debit.amount_msat,
        now,
    )
    .await?;

    Ok(Some(reversal))
}

/// Append a refund of unused fee reserve. Idempotent per payment hash.
pub async fn refund_fee(
    pool: &SqlitePool,
    wallet_id: &str,
    payment_hash: &str,
    amount_msat: i64,
    now: i64,
) -> Result<(LedgerEntry, bool)> {
    let mut conn = pool.acquire().await?;
    insert_once(&mut conn, wallet_id, payment_hash, EntryKind::FeeRefund, amount_msat, now).await
}

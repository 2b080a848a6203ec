//! Invoices and outgoing payments, and the transactions that tie them to the
//! ledger.
//!
//! Every function that changes both a payment row and the ledger does so in a
//! single transaction. Callers serialize per-wallet mutations themselves.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::ledger::{insert_debit_if_covered, insert_once, reverse_on};
use crate::models::{EntryKind, LedgerEntry, NewInvoice, NewOutgoing, Payment, PaymentState};

const PAYMENT_COLUMNS: &str = r#"
    payment_hash, outgoing, wallet_id, amount_msat, fee_reserve_msat, fee_msat,
    payment_request, memo, preimage, failure_reason, expires_at, state,
    created_at, updated_at
"#;

/// Record a new incoming invoice in state `created`.
///
/// An incoming payment hash can only ever be recorded once.
pub async fn insert_invoice(pool: &SqlitePool, invoice: &NewInvoice, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            payment_hash, outgoing, wallet_id, amount_msat, payment_request,
            memo, expires_at, state, created_at, updated_at
        )
        VALUES (?, 0, ?, ?, ?, ?, ?, 'created', ?, ?)
        "#,
    )
    .bind(&invoice.payment_hash)
    .bind(&invoice.wallet_id)
    .bind(invoice.amount_msat)
    .bind(&invoice.payment_request)
    .bind(&invoice.memo)
    .bind(invoice.expires_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| crate::user::unique_or(e, "Invoice", &invoice.payment_hash))?;

    Ok(())
}

/// Get the incoming (`outgoing = false`) or outgoing record for a hash.
pub async fn get_payment(
    pool: &SqlitePool,
    payment_hash: &str,
    outgoing: bool,
) -> Result<Option<Payment>> {
    let mut conn = pool.acquire().await?;
    get_payment_on(&mut conn, payment_hash, outgoing).await
}

async fn get_payment_on(
    conn: &mut SqliteConnection,
    payment_hash: &str,
    outgoing: bool,
) -> Result<Option<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_hash = ? AND outgoing = ?"
    );
    let payment = sqlx::query_as::<_, Payment>(&sql)
        .bind(payment_hash)
        .bind(outgoing)
        .fetch_optional(conn)
        .await?;

    Ok(payment)
}

/// Get a payment of a wallet by hash.
pub async fn get_wallet_payment(
    pool: &SqlitePool,
    wallet_id: &str,
    payment_hash: &str,
) -> Result<Payment> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE wallet_id = ? AND payment_hash = ? \
         ORDER BY outgoing DESC LIMIT 1"
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(wallet_id)
        .bind(payment_hash)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Payment",
            id: payment_hash.to_string(),
        })
}

/// List a wallet's payments, newest first.
pub async fn list_wallet_payments(
    pool: &SqlitePool,
    wallet_id: &str,
    limit: i64,
) -> Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE wallet_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql)
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(payments)
}

/// Outgoing payments whose outcome is not yet known.
pub async fn list_unresolved_outgoing(pool: &SqlitePool) -> Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE outgoing = 1 AND state IN ('sent', 'indeterminate') \
         ORDER BY created_at"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql).fetch_all(pool).await?;

    Ok(payments)
}

/// Incoming invoices still waiting for a settlement, expired ones included.
pub async fn list_open_invoices(pool: &SqlitePool) -> Result<Vec<Payment>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments \
         WHERE outgoing = 0 AND state = 'created' \
         ORDER BY created_at"
    );
    let payments = sqlx::query_as::<_, Payment>(&sql).fetch_all(pool).await?;

    Ok(payments)
}

/// Move an outgoing payment from `sent` to `indeterminate`.
pub async fn mark_indeterminate(pool: &SqlitePool, payment_hash: &str, now: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET state = 'indeterminate', updated_at = ?
        WHERE payment_hash = ? AND outgoing = 1 AND state = 'sent'
        "#,
    )
    .bind(now)
    .bind(payment_hash)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Outcome of applying a settlement to an incoming invoice.
#[derive(Debug, Clone)]
pub struct SettledInvoice {
    pub payment: Payment,
    pub credit: LedgerEntry,
    /// False when the settlement had already been applied.
    pub newly_settled: bool,
}

/// Credit the invoice's wallet and mark the invoice settled, in one
/// transaction.
///
/// `settled_amount_msat` is used only for zero-amount invoices. Applying the
/// same settlement twice credits once. Returns `None` for unknown hashes.
pub async fn settle_invoice(
    pool: &SqlitePool,
    payment_hash: &str,
    settled_amount_msat: i64,
    now: i64,
) -> Result<Option<SettledInvoice>> {
    let mut tx = pool.begin().await?;

    let Some(invoice) = get_payment_on(&mut tx, payment_hash, false).await? else {
        return Ok(None);
    };

    let amount = if invoice.amount_msat > 0 {
        invoice.amount_msat
    } else {
        settled_amount_msat
    };

    let (credit, created) = insert_once(
        &mut tx,
        &invoice.wallet_id,
        payment_hash,
        EntryKind::Credit,
        amount,
        now,
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE payments
        SET state = 'settled', amount_msat = ?, updated_at = ?
        WHERE payment_hash = ? AND outgoing = 0 AND state = 'created'
        "#,
    )
    .bind(credit.amount_msat)
    .bind(now)
    .bind(payment_hash)
    .execute(&mut *tx)
    .await?;

    let payment = get_payment_on(&mut tx, payment_hash, false)
        .await?
        .unwrap_or(invoice);

    tx.commit().await?;

    Ok(Some(SettledInvoice {
        payment,
        credit,
        newly_settled: created,
    }))
}

/// Debit `amount + fee reserve` and record the payment as `sent`, in one
/// transaction. Returns `None` (and writes nothing) if the balance is
/// insufficient.
pub async fn open_outgoing(
    pool: &SqlitePool,
    payment: &NewOutgoing,
    now: i64,
) -> Result<Option<LedgerEntry>> {
    let mut tx = pool.begin().await?;

    let total = payment.amount_msat + payment.fee_reserve_msat;
    let Some(debit) =
        insert_debit_if_covered(&mut tx, &payment.wallet_id, &payment.payment_hash, total, now)
            .await?
    else {
        return Ok(None);
    };

    insert_outgoing_row(&mut tx, payment, PaymentState::Sent, now).await?;

    tx.commit().await?;
    Ok(Some(debit))
}

async fn insert_outgoing_row(
    conn: &mut SqliteConnection,
    payment: &NewOutgoing,
    state: PaymentState,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            payment_hash, outgoing, wallet_id, amount_msat, fee_reserve_msat,
            payment_request, memo, state, created_at, updated_at
        )
        VALUES (?, 1, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&payment.payment_hash)
    .bind(&payment.wallet_id)
    .bind(payment.amount_msat)
    .bind(payment.fee_reserve_msat)
    .bind(&payment.payment_request)
    .bind(&payment.memo)
    .bind(state)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| crate::user::unique_or(e, "Payment", &payment.payment_hash))?;

    Ok(())
}

/// Final outcome of an outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The backend confirmed the payment.
    Confirmed {
        /// Fee charged to the wallet (never above the reserve).
        fee_msat: i64,
        preimage: Option<String>,
    },
    /// The backend confirmed the payment did not happen.
    Failed { reason: String },
}

/// Apply the final outcome of an outgoing payment, in one transaction.
///
/// Only a `sent` or `indeterminate` payment can be resolved; otherwise
/// nothing is written and `None` is returned. A confirmation refunds the
/// unused fee reserve; a failure appends the reversal of the debit.
pub async fn resolve_outgoing(
    pool: &SqlitePool,
    payment_hash: &str,
    resolution: &Resolution,
    now: i64,
) -> Result<Option<Payment>> {
    let mut tx = pool.begin().await?;

    let Some(payment) = get_payment_on(&mut tx, payment_hash, true).await? else {
        return Err(DatabaseError::NotFound {
            entity: "Payment",
            id: payment_hash.to_string(),
        });
    };

    let updated = match resolution {
        Resolution::Confirmed { fee_msat, preimage } => {
            let fee = (*fee_msat).clamp(0, payment.fee_reserve_msat);
            let result = sqlx::query(
                r#"
                UPDATE payments
                SET state = 'confirmed', fee_msat = ?, preimage = ?, updated_at = ?
                WHERE payment_hash = ? AND outgoing = 1 AND state IN ('sent', 'indeterminate')
                "#,
            )
            .bind(fee)
            .bind(preimage)
            .bind(now)
            .bind(payment_hash)
            .execute(&mut *tx)
            .await?;

            let refund = payment.fee_reserve_msat - fee;
            if result.rows_affected() == 1 && refund > 0 {
                insert_once(
                    &mut tx,
                    &payment.wallet_id,
                    payment_hash,
                    EntryKind::FeeRefund,
                    refund,
                    now,
                )
                .await?;
            }
            result.rows_affected() == 1
        }
        Resolution::Failed { reason } => {
            let result = sqlx::query(
                r#"
                UPDATE payments
                SET state = 'failed', failure_reason = ?, updated_at = ?
                WHERE payment_hash = ? AND outgoing = 1 AND state IN ('sent', 'indeterminate')
                "#,
            )
            .bind(reason)
            .bind(now)
            .bind(payment_hash)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                reverse_on(&mut tx, payment_hash, now).await?;
            }
            result.rows_affected() == 1
        }
    };

    if !updated {
        return Ok(None);
    }

    let payment = get_payment_on(&mut tx, payment_hash, true).await?;
    tx.commit().await?;
    Ok(payment)
}

/// Result of paying a local invoice from another local wallet.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed {
        payer_debit: LedgerEntry,
        payee_credit: LedgerEntry,
        invoice: Payment,
    },
    InsufficientBalance,
    /// The invoice was already settled (or does not exist).
    InvoiceNotOpen,
}

/// Settle a local invoice from another local wallet, in one transaction:
/// payer debit, payee credit, both payment rows.
pub async fn transfer_internal(
    pool: &SqlitePool,
    payment: &NewOutgoing,
    now: i64,
) -> Result<TransferOutcome> {
    let mut tx = pool.begin().await?;

    let Some(invoice) = get_payment_on(&mut tx, &payment.payment_hash, false).await? else {
        return Ok(TransferOutcome::InvoiceNotOpen);
    };

    let opened = sqlx::query(
        r#"
        UPDATE payments
        SET state = 'settled', updated_at = ?
        WHERE payment_hash = ? AND outgoing = 0 AND state = 'created'
        "#,
    )
    .bind(now)
    .bind(&payment.payment_hash)
    .execute(&mut *tx)
    .await?;

    if opened.rows_affected() == 0 {
        return Ok(TransferOutcome::InvoiceNotOpen);
    }

    let Some(payer_debit) = insert_debit_if_covered(
        &mut tx,
        &payment.wallet_id,
        &payment.payment_hash,
        payment.amount_msat,
        now,
    )
    .await?
    else {
        return Ok(TransferOutcome::InsufficientBalance);
    };

    let (payee_credit, _) = insert_once(
        &mut tx,
        &invoice.wallet_id,
        &payment.payment_hash,
        EntryKind::Credit,
        payment.amount_msat,
        now,
    )
    .await?;

    insert_outgoing_row(&mut tx, payment, PaymentState::Confirmed, now).await?;

    let invoice = get_payment_on(&mut tx, &payment.payment_hash, false)
        .await?
        .unwrap_or(invoice);

    tx.commit().await?;

    Ok(TransferOutcome::Completed {
        payer_debit,
        payee_credit,
        invoice,
    })
}

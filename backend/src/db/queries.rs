//! # Database Queries
//!
//! This module contains all the SQL queries for interacting with the database.
//! Each function performs a specific database operation.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `program_*` - Program table operations
//! - `registration_*` - Registration table operations
//! - `payment_*` - Installment table operations
//! - `session_*` / attendance - Proration inputs
//! - `waitlist_*` - Waitlist operations (position changes run in a transaction)
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. Common errors:
//! - `NotFound` - Record doesn't exist
//! - `QueryError` - SQL execution failed (unique violations keep their constraint name)
//! - `InvalidData` - A column held a value the models don't know

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;

const PROGRAM_COLUMNS: &str = r#"
    id, title, status, start_date, registration_deadline,
    price_cents, currency, max_participants, current_participants,
    allow_installments, installment_count,
    waitlist_enabled, waitlist_limit, cancellation_policy,
    created_at, updated_at
"#;

const REGISTRATION_COLUMNS: &str = r#"
    id, program_id, player_id, registered_by, status, payment_plan,
    total_amount_cents, paid_amount_cents, currency, cancellation_reason,
    created_at, updated_at, confirmed_at, cancelled_at, refunded_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, registration_id, amount_cents, installment_number, total_installments,
    due_date, status, payment_intent_id, refund_id, refunded_amount_cents,
    paid_at, refunded_at, created_at, updated_at
"#;

const WAITLIST_COLUMNS: &str = r#"
    id, program_id, player_id, position,
    promoted_at, promotion_expires_at, notification_sent_at,
    registration_id, created_at, updated_at
"#;

// ============================================
// HELPER FUNCTIONS
// ============================================

async fn client(pool: &Pool) -> Result<deadpool_postgres::Client, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

fn parse_column<T: std::str::FromStr<Err = UnknownVariant>>(row: &Row, column: &str) -> Result<T, DatabaseError> {
    let raw: String = row.get(column);
    raw.parse::<T>()
        .map_err(|e| DatabaseError::InvalidData(e.to_string()))
}

/// Helper to convert a database row to ProgramRecord
fn row_to_program(row: &Row) -> Result<ProgramRecord, DatabaseError> {
    let policy: Option<serde_json::Value> = row.get("cancellation_policy");
    let cancellation_policy = match policy {
        Some(value) => Some(
            serde_json::from_value::<CancellationPolicyOverrides>(value)
                .map_err(|e| DatabaseError::InvalidData(format!("cancellation_policy: {}", e)))?,
        ),
        None => None,
    };

    Ok(ProgramRecord {
        id: row.get("id"),
        title: row.get("title"),
        status: parse_column(row, "status")?,
        start_date: row.get("start_date"),
        registration_deadline: row.get("registration_deadline"),
        price_cents: row.get("price_cents"),
        currency: row.get("currency"),
        max_participants: row.get("max_participants"),
        current_participants: row.get("current_participants"),
        allow_installments: row.get("allow_installments"),
        installment_count: row.get("installment_count"),
        waitlist_enabled: row.get("waitlist_enabled"),
        waitlist_limit: row.get("waitlist_limit"),
        cancellation_policy,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Helper to convert a database row to RegistrationRecord
fn row_to_registration(row: &Row) -> Result<RegistrationRecord, DatabaseError> {
    Ok(RegistrationRecord {
        id: row.get("id"),
        program_id: row.get("program_id"),
        player_id: row.get("player_id"),
        registered_by: row.get("registered_by"),
        status: parse_column(row, "status")?,
        payment_plan: parse_column(row, "payment_plan")?,
        total_amount_cents: row.get("total_amount_cents"),
        paid_amount_cents: row.get("paid_amount_cents"),
        currency: row.get("currency"),
        cancellation_reason: row.get("cancellation_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        confirmed_at: row.get("confirmed_at"),
        cancelled_at: row.get("cancelled_at"),
        refunded_at: row.get("refunded_at"),
    })
}

/// Helper to convert a database row to RegistrationPaymentRecord
fn row_to_payment(row: &Row) -> Result<RegistrationPaymentRecord, DatabaseError> {
    Ok(RegistrationPaymentRecord {
        id: row.get("id"),
        registration_id: row.get("registration_id"),
        amount_cents: row.get("amount_cents"),
        installment_number: row.get("installment_number"),
        total_installments: row.get("total_installments"),
        due_date: row.get("due_date"),
        status: parse_column(row, "status")?,
        payment_intent_id: row.get("payment_intent_id"),
        refund_id: row.get("refund_id"),
        refunded_amount_cents: row.get("refunded_amount_cents"),
        paid_at: row.get("paid_at"),
        refunded_at: row.get("refunded_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Helper to convert a database row to WaitlistEntryRecord
fn row_to_waitlist_entry(row: &Row) -> WaitlistEntryRecord {
    WaitlistEntryRecord {
        id: row.get("id"),
        program_id: row.get("program_id"),
        player_id: row.get("player_id"),
        position: row.get("position"),
        promoted_at: row.get("promoted_at"),
        promotion_expires_at: row.get("promotion_expires_at"),
        notification_sent_at: row.get("notification_sent_at"),
        registration_id: row.get("registration_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn policy_to_json(program: &ProgramRecord) -> Result<Option<serde_json::Value>, DatabaseError> {
    program
        .cancellation_policy
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| DatabaseError::InvalidData(format!("cancellation_policy: {}", e)))
}

// ============================================
// PROGRAM QUERIES
// ============================================

/// Get a program by ID.
pub async fn get_program(pool: &Pool, program_id: Uuid) -> Result<Option<ProgramRecord>, DatabaseError> {
    debug!("Fetching program: {}", program_id);

    let client = client(pool).await?;
    let sql = format!("SELECT {} FROM programs WHERE id = $1", PROGRAM_COLUMNS);
    let row = client.query_opt(&sql, &[&program_id]).await?;

    row.as_ref().map(row_to_program).transpose()
}

/// Insert a program.
pub async fn insert_program(pool: &Pool, program: &ProgramRecord) -> Result<(), DatabaseError> {
    debug!("Inserting program: {}", program.id);

    let client = client(pool).await?;
    let policy = policy_to_json(program)?;

    client.execute(
        r#"
        INSERT INTO programs (
            id, title, status, start_date, registration_deadline,
            price_cents, currency, max_participants, current_participants,
            allow_installments, installment_count,
            waitlist_enabled, waitlist_limit, cancellation_policy,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
        &[
            &program.id,
            &program.title,
            &program.status.as_str(),
            &program.start_date,
            &program.registration_deadline,
            &program.price_cents,
            &program.currency,
            &program.max_participants,
            &program.current_participants,
            &program.allow_installments,
            &program.installment_count,
            &program.waitlist_enabled,
            &program.waitlist_limit,
            &policy,
            &program.created_at,
            &program.updated_at,
        ],
    ).await?;

    info!("Program inserted: {}", program.id);
    Ok(())
}

/// Update the mutable fields of a program.
///
/// `current_participants` is not written here; it only moves through
/// [`adjust_participant_count`].
pub async fn update_program(pool: &Pool, program: &ProgramRecord) -> Result<(), DatabaseError> {
    debug!("Updating program: {}", program.id);

    let client = client(pool).await?;
    let policy = policy_to_json(program)?;

    let rows_affected = client.execute(
        r#"
        UPDATE programs SET
            title = $2,
            status = $3,
            start_date = $4,
            registration_deadline = $5,
            price_cents = $6,
            currency = $7,
            max_participants = $8,
            allow_installments = $9,
            installment_count = $10,
            waitlist_enabled = $11,
            waitlist_limit = $12,
            cancellation_policy = $13,
            updated_at = $14
        WHERE id = $1
        "#,
        &[
            &program.id,
            &program.title,
            &program.status.as_str(),
            &program.start_date,
            &program.registration_deadline,
            &program.price_cents,
            &program.currency,
            &program.max_participants,
            &program.allow_installments,
            &program.installment_count,
            &program.waitlist_enabled,
            &program.waitlist_limit,
            &policy,
            &program.updated_at,
        ],
    ).await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!("program {}", program.id)));
    }
    Ok(())
}

/// Add `delta` to the participant count, clamped at zero.
pub async fn adjust_participant_count(
    pool: &Pool,
    program_id: Uuid,
    delta: i32,
    now: DateTime<Utc>,
) -> Result<i32, DatabaseError> {
    debug!("Adjusting participants of {} by {}", program_id, delta);

    let client = client(pool).await?;
    let row = client.query_opt(
        r#"
        UPDATE programs
        SET current_participants = GREATEST(current_participants + $2, 0),
            updated_at = $3
        WHERE id = $1
        RETURNING current_participants
        "#,
        &[&program_id, &delta, &now],
    ).await?;

    row.map(|r| r.get::<_, i32>("current_participants"))
        .ok_or_else(|| DatabaseError::NotFound(format!("program {}", program_id)))
}

/// Whether a confirmed or refunded registration exists for the program.
pub async fn has_settled_registrations(pool: &Pool, program_id: Uuid) -> Result<bool, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM program_registrations
            WHERE program_id = $1 AND status IN ('confirmed', 'refunded')
        ) AS settled
        "#,
        &[&program_id],
    ).await?;

    Ok(row.get("settled"))
}

// ============================================
// REGISTRATION QUERIES
// ============================================

/// Get a registration by ID.
pub async fn get_registration(pool: &Pool, registration_id: Uuid) -> Result<Option<RegistrationRecord>, DatabaseError> {
    debug!("Fetching registration: {}", registration_id);

    let client = client(pool).await?;
    let sql = format!("SELECT {} FROM program_registrations WHERE id = $1", REGISTRATION_COLUMNS);
    let row = client.query_opt(&sql, &[&registration_id]).await?;

    row.as_ref().map(row_to_registration).transpose()
}

/// Get the pending or confirmed registration of a player in a program.
pub async fn find_active_registration(
    pool: &Pool,
    program_id: Uuid,
    player_id: Uuid,
) -> Result<Option<RegistrationRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        r#"
        SELECT {} FROM program_registrations
        WHERE program_id = $1 AND player_id = $2 AND status IN ('pending', 'confirmed')
        LIMIT 1
        "#,
        REGISTRATION_COLUMNS
    );
    let row = client.query_opt(&sql, &[&program_id, &player_id]).await?;

    row.as_ref().map(row_to_registration).transpose()
}

/// Insert a registration.
pub async fn insert_registration(pool: &Pool, registration: &RegistrationRecord) -> Result<(), DatabaseError> {
    debug!(
        "Inserting registration {} (program {}, player {})",
        registration.id, registration.program_id, registration.player_id
    );

    let client = client(pool).await?;
    client.execute(
        r#"
        INSERT INTO program_registrations (
            id, program_id, player_id, registered_by, status, payment_plan,
            total_amount_cents, paid_amount_cents, currency, cancellation_reason,
            created_at, updated_at, confirmed_at, cancelled_at, refunded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
        &[
            &registration.id,
            &registration.program_id,
            &registration.player_id,
            &registration.registered_by,
            &registration.status.as_str(),
            &registration.payment_plan.as_str(),
            &registration.total_amount_cents,
            &registration.paid_amount_cents,
            &registration.currency,
            &registration.cancellation_reason,
            &registration.created_at,
            &registration.updated_at,
            &registration.confirmed_at,
            &registration.cancelled_at,
            &registration.refunded_at,
        ],
    ).await?;

    info!("Registration inserted: {}", registration.id);
    Ok(())
}

/// Update the state fields of a registration.
pub async fn update_registration(pool: &Pool, registration: &RegistrationRecord) -> Result<(), DatabaseError> {
    debug!("Updating registration {} -> {}", registration.id, registration.status);

    let client = client(pool).await?;
    let rows_affected = client.execute(
        r#"
        UPDATE program_registrations SET
            status = $2,
            payment_plan = $3,
            total_amount_cents = $4,
            paid_amount_cents = $5,
            cancellation_reason = $6,
            updated_at = $7,
            confirmed_at = $8,
            cancelled_at = $9,
            refunded_at = $10
        WHERE id = $1
        "#,
        &[
            &registration.id,
            &registration.status.as_str(),
            &registration.payment_plan.as_str(),
            &registration.total_amount_cents,
            &registration.paid_amount_cents,
            &registration.cancellation_reason,
            &registration.updated_at,
            &registration.confirmed_at,
            &registration.cancelled_at,
            &registration.refunded_at,
        ],
    ).await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!("registration {}", registration.id)));
    }
    Ok(())
}

/// Move an active registration to `cancelled` if, and only if, it is still active.
///
/// The row is locked before its status is read, so of two concurrent
/// cancellations only one sees `pending`/`confirmed`. Returns the previous
/// status with the updated row, or `None` when nothing was active.
pub async fn begin_cancellation(
    pool: &Pool,
    registration_id: Uuid,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<(RegistrationStatus, RegistrationRecord)>, DatabaseError> {
    debug!("Claiming cancellation of registration {}", registration_id);

    let client = client(pool).await?;
    let sql = format!(
        r#"
        WITH prev AS (
            SELECT id AS prev_id, status AS previous_status
            FROM program_registrations
            WHERE id = $1
            FOR UPDATE
        )
        UPDATE program_registrations SET
            status = 'cancelled',
            cancellation_reason = $2,
            cancelled_at = $3,
            updated_at = $3
        FROM prev
        WHERE id = prev.prev_id
          AND prev.previous_status IN ('pending', 'confirmed')
        RETURNING prev.previous_status, {}
        "#,
        REGISTRATION_COLUMNS
    );
    let row = client.query_opt(&sql, &[&registration_id, &reason, &now]).await?;

    match row {
        Some(row) => {
            let previous = parse_column(&row, "previous_status")?;
            Ok(Some((previous, row_to_registration(&row)?)))
        }
        None => Ok(None),
    }
}

/// Get all registrations of a player, newest first.
pub async fn list_registrations_for_player(
    pool: &Pool,
    player_id: Uuid,
) -> Result<Vec<RegistrationRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        "SELECT {} FROM program_registrations WHERE player_id = $1 ORDER BY created_at DESC",
        REGISTRATION_COLUMNS
    );
    let rows = client.query(&sql, &[&player_id]).await?;

    rows.iter().map(row_to_registration).collect()
}

// ============================================
// PAYMENT QUERIES
// ============================================

/// Insert the installments of a payment plan in one transaction.
pub async fn insert_payments(pool: &Pool, payments: &[RegistrationPaymentRecord]) -> Result<(), DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    for payment in payments {
        tx.execute(
            r#"
            INSERT INTO registration_payments (
                id, registration_id, amount_cents, installment_number, total_installments,
                due_date, status, payment_intent_id, refund_id, refunded_amount_cents,
                paid_at, refunded_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
            &[
                &payment.id,
                &payment.registration_id,
                &payment.amount_cents,
                &payment.installment_number,
                &payment.total_installments,
                &payment.due_date,
                &payment.status.as_str(),
                &payment.payment_intent_id,
                &payment.refund_id,
                &payment.refunded_amount_cents,
                &payment.paid_at,
                &payment.refunded_at,
                &payment.created_at,
                &payment.updated_at,
            ],
        ).await?;
    }

    tx.commit().await?;
    debug!("Inserted {} payments", payments.len());
    Ok(())
}

/// Get an installment by ID.
pub async fn get_payment(pool: &Pool, payment_id: Uuid) -> Result<Option<RegistrationPaymentRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!("SELECT {} FROM registration_payments WHERE id = $1", PAYMENT_COLUMNS);
    let row = client.query_opt(&sql, &[&payment_id]).await?;

    row.as_ref().map(row_to_payment).transpose()
}

/// Get the installments of a registration in installment order.
pub async fn list_payments(pool: &Pool, registration_id: Uuid) -> Result<Vec<RegistrationPaymentRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        "SELECT {} FROM registration_payments WHERE registration_id = $1 ORDER BY installment_number ASC",
        PAYMENT_COLUMNS
    );
    let rows = client.query(&sql, &[&registration_id]).await?;

    rows.iter().map(row_to_payment).collect()
}

/// Update the state fields of an installment.
pub async fn update_payment(pool: &Pool, payment: &RegistrationPaymentRecord) -> Result<(), DatabaseError> {
    debug!("Updating payment {} -> {}", payment.id, payment.status);

    let client = client(pool).await?;
    let rows_affected = client.execute(
        r#"
        UPDATE registration_payments SET
            status = $2,
            payment_intent_id = $3,
            refund_id = $4,
            refunded_amount_cents = $5,
            paid_at = $6,
            refunded_at = $7,
            updated_at = $8
        WHERE id = $1
        "#,
        &[
            &payment.id,
            &payment.status.as_str(),
            &payment.payment_intent_id,
            &payment.refund_id,
            &payment.refunded_amount_cents,
            &payment.paid_at,
            &payment.refunded_at,
            &payment.updated_at,
        ],
    ).await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!("payment {}", payment.id)));
    }
    Ok(())
}

/// Sum of succeeded installments of a registration.
pub async fn sum_succeeded_payments(pool: &Pool, registration_id: Uuid) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        r#"
        SELECT COALESCE(SUM(amount_cents), 0)::BIGINT AS paid
        FROM registration_payments
        WHERE registration_id = $1 AND status = 'succeeded'
        "#,
        &[&registration_id],
    ).await?;

    Ok(row.get("paid"))
}

// ============================================
// SESSION & ATTENDANCE QUERIES
// ============================================

/// Count the non-cancelled sessions of a program.
pub async fn count_active_sessions(pool: &Pool, program_id: Uuid) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        "SELECT COUNT(*) AS total FROM program_sessions WHERE program_id = $1 AND NOT cancelled",
        &[&program_id],
    ).await?;

    Ok(row.get("total"))
}

/// Count the sessions a registration attended.
pub async fn count_attended_sessions(pool: &Pool, registration_id: Uuid) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        "SELECT COUNT(*) AS attended FROM session_attendance WHERE registration_id = $1 AND attended",
        &[&registration_id],
    ).await?;

    Ok(row.get("attended"))
}

// ============================================
// WAITLIST QUERIES
// ============================================

/// Get a waitlist entry by ID.
pub async fn get_waitlist_entry(pool: &Pool, entry_id: Uuid) -> Result<Option<WaitlistEntryRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!("SELECT {} FROM program_waitlist WHERE id = $1", WAITLIST_COLUMNS);
    let row = client.query_opt(&sql, &[&entry_id]).await?;

    Ok(row.as_ref().map(row_to_waitlist_entry))
}

/// Get a player's entry on a program's waitlist.
pub async fn find_waitlist_entry(
    pool: &Pool,
    program_id: Uuid,
    player_id: Uuid,
) -> Result<Option<WaitlistEntryRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        "SELECT {} FROM program_waitlist WHERE program_id = $1 AND player_id = $2",
        WAITLIST_COLUMNS
    );
    let row = client.query_opt(&sql, &[&program_id, &player_id]).await?;

    Ok(row.as_ref().map(row_to_waitlist_entry))
}

/// Get a program's waitlist ordered by position.
pub async fn list_waitlist(pool: &Pool, program_id: Uuid) -> Result<Vec<WaitlistEntryRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        "SELECT {} FROM program_waitlist WHERE program_id = $1 ORDER BY position ASC, created_at ASC",
        WAITLIST_COLUMNS
    );
    let rows = client.query(&sql, &[&program_id]).await?;

    Ok(rows.iter().map(row_to_waitlist_entry).collect())
}

/// Count the entries of a program's waitlist that have not claimed a seat.
pub async fn count_waitlist(pool: &Pool, program_id: Uuid) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        "SELECT COUNT(*) AS total FROM program_waitlist WHERE program_id = $1 AND registration_id IS NULL",
        &[&program_id],
    ).await?;

    Ok(row.get("total"))
}

/// Highest position in a program's waitlist, 0 when empty.
pub async fn max_waitlist_position(pool: &Pool, program_id: Uuid) -> Result<i32, DatabaseError> {
    let client = client(pool).await?;
    let row = client.query_one(
        "SELECT COALESCE(MAX(position), 0) AS max_position FROM program_waitlist WHERE program_id = $1",
        &[&program_id],
    ).await?;

    Ok(row.get("max_position"))
}

/// Insert a waitlist entry at the position it carries.
pub async fn insert_waitlist_entry(pool: &Pool, entry: &WaitlistEntryRecord) -> Result<(), DatabaseError> {
    debug!(
        "Inserting waitlist entry {} for player {} at position {}",
        entry.id, entry.player_id, entry.position
    );

    let client = client(pool).await?;
    client.execute(
        r#"
        INSERT INTO program_waitlist (
            id, program_id, player_id, position,
            promoted_at, promotion_expires_at, notification_sent_at,
            registration_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
        &[
            &entry.id,
            &entry.program_id,
            &entry.player_id,
            &entry.position,
            &entry.promoted_at,
            &entry.promotion_expires_at,
            &entry.notification_sent_at,
            &entry.registration_id,
            &entry.created_at,
            &entry.updated_at,
        ],
    ).await?;

    Ok(())
}

/// Update the promotion and claim fields of a waitlist entry.
pub async fn update_waitlist_entry(pool: &Pool, entry: &WaitlistEntryRecord) -> Result<(), DatabaseError> {
    let client = client(pool).await?;
    let rows_affected = client.execute(
        r#"
        UPDATE program_waitlist SET
            promoted_at = $2,
            promotion_expires_at = $3,
            notification_sent_at = $4,
            registration_id = $5,
            updated_at = $6
        WHERE id = $1
        "#,
        &[
            &entry.id,
            &entry.promoted_at,
            &entry.promotion_expires_at,
            &entry.notification_sent_at,
            &entry.registration_id,
            &entry.updated_at,
        ],
    ).await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!("waitlist entry {}", entry.id)));
    }
    Ok(())
}

/// Lock every waitlist row of the entry's program, then read the entry.
///
/// The position is read only after the lock is held, so a removal that
/// committed while we waited is already reflected in it.
async fn lock_program_waitlist(
    tx: &deadpool_postgres::Transaction<'_>,
    entry_id: Uuid,
) -> Result<WaitlistEntryRecord, DatabaseError> {
    let not_found = || DatabaseError::NotFound(format!("waitlist entry {}", entry_id));

    // An entry never changes program, so this lookup needs no lock
    let program_id: Uuid = tx
        .query_opt("SELECT program_id FROM program_waitlist WHERE id = $1", &[&entry_id])
        .await?
        .ok_or_else(not_found)?
        .get("program_id");

    tx.query(
        "SELECT id FROM program_waitlist WHERE program_id = $1 ORDER BY position FOR UPDATE",
        &[&program_id],
    ).await?;

    let sql = format!("SELECT {} FROM program_waitlist WHERE id = $1", WAITLIST_COLUMNS);
    let row = tx.query_opt(&sql, &[&entry_id]).await?.ok_or_else(not_found)?;
    Ok(row_to_waitlist_entry(&row))
}

/// Delete a waitlist entry and shift later positions down by one.
///
/// Both statements run in one transaction with the program's rows locked,
/// so concurrent removals cannot interleave their compaction.
pub async fn delete_waitlist_entry_and_compact(
    pool: &Pool,
    entry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<WaitlistEntryRecord, DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    let entry = lock_program_waitlist(&tx, entry_id).await?;

    tx.execute("DELETE FROM program_waitlist WHERE id = $1", &[&entry_id]).await?;
    let shifted = tx.execute(
        r#"
        UPDATE program_waitlist
        SET position = position - 1, updated_at = $3
        WHERE program_id = $1 AND position > $2
        "#,
        &[&entry.program_id, &entry.position, &now],
    ).await?;

    tx.commit().await?;
    info!(
        "Removed waitlist entry {} (position {}), shifted {} entries",
        entry_id, entry.position, shifted
    );
    Ok(entry)
}

/// Clear an entry's promotion and move it to the end of its waitlist.
pub async fn move_waitlist_entry_to_tail(
    pool: &Pool,
    entry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<WaitlistEntryRecord, DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    let entry = lock_program_waitlist(&tx, entry_id).await?;

    tx.execute(
        r#"
        UPDATE program_waitlist
        SET position = position - 1, updated_at = $3
        WHERE program_id = $1 AND position > $2
        "#,
        &[&entry.program_id, &entry.position, &now],
    ).await?;

    let sql = format!(
        r#"
        UPDATE program_waitlist SET
            position = (
                SELECT COALESCE(MAX(position), 0) + 1 FROM program_waitlist
                WHERE program_id = $2 AND id <> $1
            ),
            promoted_at = NULL,
            promotion_expires_at = NULL,
            notification_sent_at = NULL,
            updated_at = $3
        WHERE id = $1
        RETURNING {}
        "#,
        WAITLIST_COLUMNS
    );
    let row = tx.query_one(&sql, &[&entry_id, &entry.program_id, &now]).await?;

    tx.commit().await?;
    Ok(row_to_waitlist_entry(&row))
}

/// Re-derive positions `1..N` for a program from the current order.
pub async fn renumber_waitlist(pool: &Pool, program_id: Uuid, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    tx.query(
        "SELECT id FROM program_waitlist WHERE program_id = $1 ORDER BY position FOR UPDATE",
        &[&program_id],
    ).await?;

    let changed = tx.execute(
        r#"
        WITH ordered AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY position ASC, created_at ASC)::INT AS new_position
            FROM program_waitlist
            WHERE program_id = $1
        )
        UPDATE program_waitlist w
        SET position = ordered.new_position, updated_at = $2
        FROM ordered
        WHERE w.id = ordered.id AND w.position <> ordered.new_position
        "#,
        &[&program_id, &now],
    ).await?;

    tx.commit().await?;
    Ok(changed as usize)
}

/// Promoted, unclaimed entries whose claim window closed before `now`.
pub async fn list_expired_promotions(
    pool: &Pool,
    now: DateTime<Utc>,
) -> Result<Vec<WaitlistEntryRecord>, DatabaseError> {
    let client = client(pool).await?;
    let sql = format!(
        r#"
        SELECT {} FROM program_waitlist
        WHERE promoted_at IS NOT NULL
          AND registration_id IS NULL
          AND promotion_expires_at < $1
        ORDER BY promotion_expires_at ASC
        "#,
        WAITLIST_COLUMNS
    );
    let rows = client.query(&sql, &[&now]).await?;

    Ok(rows.iter().map(row_to_waitlist_entry).collect())
}

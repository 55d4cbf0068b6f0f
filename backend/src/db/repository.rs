//! # Repository Traits
//!
//! The services never talk to a concrete database client. They receive an
//! `Arc<dyn Store>` and use the capability traits below, so the same
//! business rules run against PostgreSQL in production and against
//! [`MemoryStore`](super::memory::MemoryStore) in tests.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │   Services (registration, waitlist, orchestrator)  │
//! └──────────────────────────┬─────────────────────────┘
//!                            │ Arc<dyn Store>
//!            ┌───────────────┴───────────────┐
//!            ▼                               ▼
//!     ┌──────────────┐                ┌──────────────┐
//!     │PostgresStore │                │ MemoryStore  │
//!     │ (deadpool)   │                │ (tests/dev)  │
//!     └──────────────┘                └──────────────┘
//! ```
//!
//! # Thread Safety
//! Implementations must be `Send + Sync` to be shared across handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;

/// Constraint guarding one active registration per (program, player).
pub const ACTIVE_REGISTRATION_CONSTRAINT: &str = "program_registrations_active_unique";

/// Constraint guarding one waitlist entry per (program, player).
pub const WAITLIST_PLAYER_CONSTRAINT: &str = "program_waitlist_player_unique";

/// Constraint guarding unique positions within a program's waitlist.
pub const WAITLIST_POSITION_CONSTRAINT: &str = "program_waitlist_position_unique";

/// Errors surfaced by repository implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A query failed; the original message is preserved.
    #[error("Query failed: {0}")]
    Query(String),

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The row addressed by an update or delete does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    /// Whether this is a violation of the named constraint.
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }
}

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Program reads and the few writes the lifecycle needs.
#[async_trait]
pub trait ProgramRepository: Send + Sync {
    async fn get_program(&self, program_id: Uuid) -> StoreResult<Option<ProgramRecord>>;

    async fn insert_program(&self, program: &ProgramRecord) -> StoreResult<()>;

    async fn update_program(&self, program: &ProgramRecord) -> StoreResult<()>;

    /// Add `delta` to `current_participants` (never below zero) and return the new count.
    async fn adjust_participant_count(&self, program_id: Uuid, delta: i32, now: DateTime<Utc>) -> StoreResult<i32>;

    /// Whether a confirmed or refunded registration exists for the program.
    async fn has_settled_registrations(&self, program_id: Uuid) -> StoreResult<bool>;
}

/// Registration rows.
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<RegistrationRecord>>;

    /// The pending or confirmed registration of a player in a program, if any.
    async fn find_active_registration(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<RegistrationRecord>>;

    /// Insert a registration.
    ///
    /// Fails with `UniqueViolation(ACTIVE_REGISTRATION_CONSTRAINT)` when the
    /// player already holds an active registration for the program.
    async fn insert_registration(&self, registration: &RegistrationRecord) -> StoreResult<()>;

    async fn update_registration(&self, registration: &RegistrationRecord) -> StoreResult<()>;

    /// Move a pending or confirmed registration to `cancelled` in one
    /// conditional write.
    ///
    /// Returns the status it held before and the updated row, or `None` when
    /// it no longer exists or is no longer active. Exactly one of several
    /// concurrent callers gets `Some`.
    async fn begin_cancellation(
        &self,
        registration_id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(RegistrationStatus, RegistrationRecord)>>;

    async fn list_registrations_for_player(&self, player_id: Uuid) -> StoreResult<Vec<RegistrationRecord>>;
}

/// Installment rows.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payments(&self, payments: &[RegistrationPaymentRecord]) -> StoreResult<()>;

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<RegistrationPaymentRecord>>;

    /// Payments of a registration ordered by installment number.
    async fn list_payments(&self, registration_id: Uuid) -> StoreResult<Vec<RegistrationPaymentRecord>>;

    async fn update_payment(&self, payment: &RegistrationPaymentRecord) -> StoreResult<()>;

    /// Sum of `succeeded` payment amounts for a registration.
    async fn sum_succeeded_payments(&self, registration_id: Uuid) -> StoreResult<i64>;
}

/// Session and attendance counts used for refund proration.
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    /// Sessions of the program that are not cancelled.
    async fn count_active_sessions(&self, program_id: Uuid) -> StoreResult<i64>;

    /// Attendance marks with `attended = true` for the registration.
    async fn count_attended_sessions(&self, registration_id: Uuid) -> StoreResult<i64>;
}

/// Waitlist rows and the position-preserving mutations.
#[async_trait]
pub trait WaitlistRepository: Send + Sync {
    async fn get_waitlist_entry(&self, entry_id: Uuid) -> StoreResult<Option<WaitlistEntryRecord>>;

    async fn find_waitlist_entry(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntryRecord>>;

    /// Entries of a program ordered by ascending position.
    async fn list_waitlist(&self, program_id: Uuid) -> StoreResult<Vec<WaitlistEntryRecord>>;

    /// Entries still waiting for a seat. Claimed entries are not counted.
    async fn count_waitlist(&self, program_id: Uuid) -> StoreResult<i64>;

    /// Highest position in use, 0 for an empty waitlist.
    async fn max_waitlist_position(&self, program_id: Uuid) -> StoreResult<i32>;

    /// Insert an entry with the position it carries.
    ///
    /// Fails with `UniqueViolation` on `WAITLIST_PLAYER_CONSTRAINT` or
    /// `WAITLIST_POSITION_CONSTRAINT`.
    async fn insert_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()>;

    /// Update promotion/claim fields. Position is not written here.
    async fn update_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()>;

    /// Delete an entry and shift every later position of the same program
    /// down by one, atomically. Returns the deleted entry.
    async fn delete_waitlist_entry_and_compact(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntryRecord>;

    /// Clear the promotion fields of an entry and move it to the end of the
    /// queue, closing the gap it leaves, atomically. Returns the updated entry.
    async fn move_waitlist_entry_to_tail(&self, entry_id: Uuid, now: DateTime<Utc>) -> StoreResult<WaitlistEntryRecord>;

    /// Re-derive positions `1..N` from the current order. Returns how many
    /// entries changed position.
    async fn renumber_waitlist(&self, program_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Promoted, unclaimed entries whose claim window closed before `now`.
    async fn list_expired_promotions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntryRecord>>;
}

/// Everything the services need from persistence.
pub trait Store:
    ProgramRepository + RegistrationRepository + PaymentRepository + AttendanceRepository + WaitlistRepository
{
}

impl<T> Store for T where
    T: ProgramRepository + RegistrationRepository + PaymentRepository + AttendanceRepository + WaitlistRepository
{
}

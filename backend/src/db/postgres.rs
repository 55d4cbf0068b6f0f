//! # PostgreSQL Store
//!
//! Implements the repository traits on top of [`queries`](super::queries).
//! The only work done here is mapping [`DatabaseError`] onto the
//! backend-neutral [`StoreError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::queries;
use super::repository::*;
use super::{Database, DatabaseError};

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if let Some(constraint) = err.unique_violation() {
            return StoreError::UniqueViolation {
                constraint: constraint.to_string(),
            };
        }
        match err {
            DatabaseError::ConnectionError(msg) => StoreError::Unavailable(msg),
            DatabaseError::NotFound(what) => StoreError::NotFound {
                entity: "record",
                id: what,
            },
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Repository implementation backed by the deadpool connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    db: Database,
}

impl PostgresStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgramRepository for PostgresStore {
    async fn get_program(&self, program_id: Uuid) -> StoreResult<Option<ProgramRecord>> {
        Ok(queries::get_program(self.db.pool(), program_id).await?)
    }

    async fn insert_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        Ok(queries::insert_program(self.db.pool(), program).await?)
    }

    async fn update_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        Ok(queries::update_program(self.db.pool(), program).await?)
    }

    async fn adjust_participant_count(&self, program_id: Uuid, delta: i32, now: DateTime<Utc>) -> StoreResult<i32> {
        Ok(queries::adjust_participant_count(self.db.pool(), program_id, delta, now).await?)
    }

    async fn has_settled_registrations(&self, program_id: Uuid) -> StoreResult<bool> {
        Ok(queries::has_settled_registrations(self.db.pool(), program_id).await?)
    }
}

#[async_trait]
impl RegistrationRepository for PostgresStore {
    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<RegistrationRecord>> {
        Ok(queries::get_registration(self.db.pool(), registration_id).await?)
    }

    async fn find_active_registration(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<RegistrationRecord>> {
        Ok(queries::find_active_registration(self.db.pool(), program_id, player_id).await?)
    }

    async fn insert_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        Ok(queries::insert_registration(self.db.pool(), registration).await?)
    }

    async fn update_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        Ok(queries::update_registration(self.db.pool(), registration).await?)
    }

    async fn begin_cancellation(
        &self,
        registration_id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(RegistrationStatus, RegistrationRecord)>> {
        Ok(queries::begin_cancellation(self.db.pool(), registration_id, reason, now).await?)
    }

    async fn list_registrations_for_player(&self, player_id: Uuid) -> StoreResult<Vec<RegistrationRecord>> {
        Ok(queries::list_registrations_for_player(self.db.pool(), player_id).await?)
    }
}

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert_payments(&self, payments: &[RegistrationPaymentRecord]) -> StoreResult<()> {
        Ok(queries::insert_payments(self.db.pool(), payments).await?)
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<RegistrationPaymentRecord>> {
        Ok(queries::get_payment(self.db.pool(), payment_id).await?)
    }

    async fn list_payments(&self, registration_id: Uuid) -> StoreResult<Vec<RegistrationPaymentRecord>> {
        Ok(queries::list_payments(self.db.pool(), registration_id).await?)
    }

    async fn update_payment(&self, payment: &RegistrationPaymentRecord) -> StoreResult<()> {
        Ok(queries::update_payment(self.db.pool(), payment).await?)
    }

    async fn sum_succeeded_payments(&self, registration_id: Uuid) -> StoreResult<i64> {
        Ok(queries::sum_succeeded_payments(self.db.pool(), registration_id).await?)
    }
}

#[async_trait]
impl AttendanceRepository for PostgresStore {
    async fn count_active_sessions(&self, program_id: Uuid) -> StoreResult<i64> {
        Ok(queries::count_active_sessions(self.db.pool(), program_id).await?)
    }

    async fn count_attended_sessions(&self, registration_id: Uuid) -> StoreResult<i64> {
        Ok(queries::count_attended_sessions(self.db.pool(), registration_id).await?)
    }
}

#[async_trait]
impl WaitlistRepository for PostgresStore {
    async fn get_waitlist_entry(&self, entry_id: Uuid) -> StoreResult<Option<WaitlistEntryRecord>> {
        Ok(queries::get_waitlist_entry(self.db.pool(), entry_id).await?)
    }

    async fn find_waitlist_entry(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntryRecord>> {
        Ok(queries::find_waitlist_entry(self.db.pool(), program_id, player_id).await?)
    }

    async fn list_waitlist(&self, program_id: Uuid) -> StoreResult<Vec<WaitlistEntryRecord>> {
        Ok(queries::list_waitlist(self.db.pool(), program_id).await?)
    }

    async fn count_waitlist(&self, program_id: Uuid) -> StoreResult<i64> {
        Ok(queries::count_waitlist(self.db.pool(), program_id).await?)
    }

    async fn max_waitlist_position(&self, program_id: Uuid) -> StoreResult<i32> {
        Ok(queries::max_waitlist_position(self.db.pool(), program_id).await?)
    }

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        Ok(queries::insert_waitlist_entry(self.db.pool(), entry).await?)
    }

    async fn update_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        Ok(queries::update_waitlist_entry(self.db.pool(), entry).await?)
    }

    async fn delete_waitlist_entry_and_compact(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntryRecord> {
        Ok(queries::delete_waitlist_entry_and_compact(self.db.pool(), entry_id, now).await?)
    }

    async fn move_waitlist_entry_to_tail(&self, entry_id: Uuid, now: DateTime<Utc>) -> StoreResult<WaitlistEntryRecord> {
        Ok(queries::move_waitlist_entry_to_tail(self.db.pool(), entry_id, now).await?)
    }

    async fn renumber_waitlist(&self, program_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(queries::renumber_waitlist(self.db.pool(), program_id, now).await?)
    }

    async fn list_expired_promotions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntryRecord>> {
        Ok(queries::list_expired_promotions(self.db.pool(), now).await?)
    }
}

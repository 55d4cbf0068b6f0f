//! # In-Memory Store
//!
//! A [`Store`](super::repository::Store) kept in process memory. It enforces
//! the same uniqueness constraints as the SQL schema and performs the
//! waitlist mutations under one lock, so it behaves like the Postgres
//! implementation for everything the services observe. Timestamps come from
//! the caller, never from the wall clock.
//!
//! Used by the test-suite and for local development without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::repository::*;

#[derive(Default)]
struct Tables {
    programs: HashMap<Uuid, ProgramRecord>,
    registrations: HashMap<Uuid, RegistrationRecord>,
    payments: HashMap<Uuid, RegistrationPaymentRecord>,
    sessions: HashMap<Uuid, ProgramSessionRecord>,
    attendance: Vec<AttendanceRecord>,
    waitlist: HashMap<Uuid, WaitlistEntryRecord>,
}

impl Tables {
    fn waitlist_of(&self, program_id: Uuid) -> Vec<&WaitlistEntryRecord> {
        let mut entries: Vec<&WaitlistEntryRecord> = self
            .waitlist
            .values()
            .filter(|e| e.program_id == program_id)
            .collect();
        entries.sort_by_key(|e| (e.position, e.created_at));
        entries
    }

    fn max_position(&self, program_id: Uuid) -> i32 {
        self.waitlist
            .values()
            .filter(|e| e.program_id == program_id)
            .map(|e| e.position)
            .max()
            .unwrap_or(0)
    }

    fn shift_down_after(&mut self, program_id: Uuid, position: i32, now: DateTime<Utc>) {
        for entry in self.waitlist.values_mut() {
            if entry.program_id == program_id && entry.position > position {
                entry.position -= 1;
                entry.updated_at = now;
            }
        }
    }
}

/// In-memory repository implementation.
///
/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to a program.
    pub async fn insert_session(&self, session: ProgramSessionRecord) {
        let mut tables = self.tables.lock().await;
        tables.sessions.insert(session.id, session);
    }

    /// Record attendance of a registration at a session.
    pub async fn record_attendance(&self, record: AttendanceRecord) {
        let mut tables = self.tables.lock().await;
        tables
            .attendance
            .retain(|a| !(a.session_id == record.session_id && a.registration_id == record.registration_id));
        tables.attendance.push(record);
    }
}

#[async_trait]
impl ProgramRepository for MemoryStore {
    async fn get_program(&self, program_id: Uuid) -> StoreResult<Option<ProgramRecord>> {
        Ok(self.tables.lock().await.programs.get(&program_id).cloned())
    }

    async fn insert_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.programs.insert(program.id, program.clone());
        Ok(())
    }

    async fn update_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.programs.get_mut(&program.id) {
            Some(existing) => {
                *existing = program.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "program",
                id: program.id.to_string(),
            }),
        }
    }

    async fn adjust_participant_count(&self, program_id: Uuid, delta: i32, now: DateTime<Utc>) -> StoreResult<i32> {
        let mut tables = self.tables.lock().await;
        let program = tables.programs.get_mut(&program_id).ok_or(StoreError::NotFound {
            entity: "program",
            id: program_id.to_string(),
        })?;
        program.current_participants = (program.current_participants + delta).max(0);
        program.updated_at = now;
        Ok(program.current_participants)
    }

    async fn has_settled_registrations(&self, program_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.registrations.values().any(|r| {
            r.program_id == program_id
                && matches!(r.status, RegistrationStatus::Confirmed | RegistrationStatus::Refunded)
        }))
    }
}

#[async_trait]
impl RegistrationRepository for MemoryStore {
    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<RegistrationRecord>> {
        Ok(self.tables.lock().await.registrations.get(&registration_id).cloned())
    }

    async fn find_active_registration(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<RegistrationRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .find(|r| r.program_id == program_id && r.player_id == player_id && r.status.is_active())
            .cloned())
    }

    async fn insert_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let duplicate = registration.status.is_active()
            && tables.registrations.values().any(|r| {
                r.program_id == registration.program_id
                    && r.player_id == registration.player_id
                    && r.status.is_active()
            });
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: ACTIVE_REGISTRATION_CONSTRAINT.to_string(),
            });
        }
        tables.registrations.insert(registration.id, registration.clone());
        Ok(())
    }

    async fn update_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.registrations.get_mut(&registration.id) {
            Some(existing) => {
                *existing = registration.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "registration",
                id: registration.id.to_string(),
            }),
        }
    }

    async fn begin_cancellation(
        &self,
        registration_id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(RegistrationStatus, RegistrationRecord)>> {
        let mut tables = self.tables.lock().await;
        let registration = match tables.registrations.get_mut(&registration_id) {
            Some(r) if r.status.is_active() => r,
            _ => return Ok(None),
        };

        let previous = registration.status;
        registration.status = RegistrationStatus::Cancelled;
        registration.cancellation_reason = reason.map(str::to_string);
        registration.cancelled_at = Some(now);
        registration.updated_at = now;
        Ok(Some((previous, registration.clone())))
    }

    async fn list_registrations_for_player(&self, player_id: Uuid) -> StoreResult<Vec<RegistrationRecord>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<RegistrationRecord> = tables
            .registrations
            .values()
            .filter(|r| r.player_id == player_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payments(&self, payments: &[RegistrationPaymentRecord]) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        for payment in payments {
            tables.payments.insert(payment.id, payment.clone());
        }
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<RegistrationPaymentRecord>> {
        Ok(self.tables.lock().await.payments.get(&payment_id).cloned())
    }

    async fn list_payments(&self, registration_id: Uuid) -> StoreResult<Vec<RegistrationPaymentRecord>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<RegistrationPaymentRecord> = tables
            .payments
            .values()
            .filter(|p| p.registration_id == registration_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.installment_number);
        Ok(found)
    }

    async fn update_payment(&self, payment: &RegistrationPaymentRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.payments.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "payment",
                id: payment.id.to_string(),
            }),
        }
    }

    async fn sum_succeeded_payments(&self, registration_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.registration_id == registration_id && p.status == PaymentStatus::Succeeded)
            .map(|p| p.amount_cents)
            .sum())
    }
}

#[async_trait]
impl AttendanceRepository for MemoryStore {
    async fn count_active_sessions(&self, program_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.program_id == program_id && !s.cancelled)
            .count() as i64)
    }

    async fn count_attended_sessions(&self, registration_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attendance
            .iter()
            .filter(|a| a.registration_id == registration_id && a.attended)
            .count() as i64)
    }
}

#[async_trait]
impl WaitlistRepository for MemoryStore {
    async fn get_waitlist_entry(&self, entry_id: Uuid) -> StoreResult<Option<WaitlistEntryRecord>> {
        Ok(self.tables.lock().await.waitlist.get(&entry_id).cloned())
    }

    async fn find_waitlist_entry(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .waitlist
            .values()
            .find(|e| e.program_id == program_id && e.player_id == player_id)
            .cloned())
    }

    async fn list_waitlist(&self, program_id: Uuid) -> StoreResult<Vec<WaitlistEntryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.waitlist_of(program_id).into_iter().cloned().collect())
    }

    async fn count_waitlist(&self, program_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .waitlist
            .values()
            .filter(|e| e.program_id == program_id && e.registration_id.is_none())
            .count() as i64)
    }

    async fn max_waitlist_position(&self, program_id: Uuid) -> StoreResult<i32> {
        Ok(self.tables.lock().await.max_position(program_id))
    }

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let same_program = tables.waitlist.values().filter(|e| e.program_id == entry.program_id);
        for existing in same_program {
            if existing.player_id == entry.player_id {
                return Err(StoreError::UniqueViolation {
                    constraint: WAITLIST_PLAYER_CONSTRAINT.to_string(),
                });
            }
            if existing.position == entry.position {
                return Err(StoreError::UniqueViolation {
                    constraint: WAITLIST_POSITION_CONSTRAINT.to_string(),
                });
            }
        }
        tables.waitlist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.waitlist.get_mut(&entry.id) {
            Some(existing) => {
                existing.promoted_at = entry.promoted_at;
                existing.promotion_expires_at = entry.promotion_expires_at;
                existing.notification_sent_at = entry.notification_sent_at;
                existing.registration_id = entry.registration_id;
                existing.updated_at = entry.updated_at;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "waitlist entry",
                id: entry.id.to_string(),
            }),
        }
    }

    async fn delete_waitlist_entry_and_compact(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntryRecord> {
        let mut tables = self.tables.lock().await;
        let removed = tables.waitlist.remove(&entry_id).ok_or(StoreError::NotFound {
            entity: "waitlist entry",
            id: entry_id.to_string(),
        })?;
        tables.shift_down_after(removed.program_id, removed.position, now);
        debug!(
            "Removed waitlist entry {} at position {} and compacted program {}",
            entry_id, removed.position, removed.program_id
        );
        Ok(removed)
    }

    async fn move_waitlist_entry_to_tail(&self, entry_id: Uuid, now: DateTime<Utc>) -> StoreResult<WaitlistEntryRecord> {
        let mut tables = self.tables.lock().await;
        let current = tables.waitlist.get(&entry_id).cloned().ok_or(StoreError::NotFound {
            entity: "waitlist entry",
            id: entry_id.to_string(),
        })?;

        // Take the entry out of the sequence first so the gap closes.
        if let Some(entry) = tables.waitlist.get_mut(&entry_id) {
            entry.position = 0;
        }
        tables.shift_down_after(current.program_id, current.position, now);
        let tail = tables.max_position(current.program_id) + 1;

        let entry = tables.waitlist.get_mut(&entry_id).ok_or(StoreError::NotFound {
            entity: "waitlist entry",
            id: entry_id.to_string(),
        })?;
        entry.position = tail;
        entry.promoted_at = None;
        entry.promotion_expires_at = None;
        entry.notification_sent_at = None;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn renumber_waitlist(&self, program_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let order: Vec<(Uuid, i32)> = tables
            .waitlist_of(program_id)
            .into_iter()
            .map(|e| (e.id, e.position))
            .collect();

        let mut changed = 0;
        for (index, (id, position)) in order.into_iter().enumerate() {
            let expected = index as i32 + 1;
            if position != expected {
                if let Some(entry) = tables.waitlist.get_mut(&id) {
                    entry.position = expected;
                    entry.updated_at = now;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn list_expired_promotions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntryRecord>> {
        let tables = self.tables.lock().await;
        let mut expired: Vec<WaitlistEntryRecord> = tables
            .waitlist
            .values()
            .filter(|e| {
                e.promoted_at.is_some()
                    && e.registration_id.is_none()
                    && e.promotion_expires_at.map(|t| t < now).unwrap_or(false)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|e| e.promotion_expires_at);
        Ok(expired)
    }
}

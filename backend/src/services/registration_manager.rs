//! # Registration Manager Service
//!
//! Creates registrations, lays out their installment schedules and keeps
//! the paid balance reconciled with the installment rows.
//!
//! ## Flow Example: Register and Pay
//!
//! ```text
//! 1. create_registration()       → status pending, paid 0
//!                ↓
//! 2. create_payment_schedule()   → pending installments 1..N
//!                ↓
//! 3. record_payment_success()    → installment succeeded
//!                ↓
//! 4. update_paid_amount()        → paid = Σ succeeded
//!                ↓
//! 5. first payment confirms      → status confirmed, seat taken
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    PaymentPlan, PaymentStatus, ProgramRecord, ProgramStatus, RegistrationPaymentRecord,
    RegistrationRecord, RegistrationStatus, Store, ACTIVE_REGISTRATION_CONSTRAINT,
};
use crate::utils::days_until;

use super::clock::Clock;
use super::errors::{PolicyViolation, ServiceError, ServiceResult};

/// Later installments are spread over at most this many days before start.
const MAX_SCHEDULE_SPREAD_DAYS: i64 = 30;

/// One computed installment, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentScheduleItem {
    /// 1-based.
    pub installment_number: i32,
    pub amount_cents: i64,
    pub due_date: DateTime<Utc>,
}

/// Attendance counts used for refund proration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsAttended {
    pub attended: i64,
    pub total: i64,
}

/// Result of recording a successful payment.
#[derive(Debug, Clone)]
pub struct PaymentRecorded {
    pub registration: RegistrationRecord,
    pub payment: RegistrationPaymentRecord,
    /// Whether this payment moved the registration from pending to confirmed.
    pub newly_confirmed: bool,
}

/// Split `total_amount_cents` into `installment_count` payments.
///
/// The remainder of the integer division goes to the first installment,
/// which is due at `now`. Installment `i` (0-based, `i >= 1`) is due
/// `floor((count - 1 - i) / (count - 1) × min(30, days until start))` days
/// before the start, so the last installment lands on the start date.
///
/// ## Returns
///
/// * `Ok(items)` - `installment_count` items whose amounts sum to the total
/// * `Err(InvalidInstallmentCount)` - `installment_count < 1`
pub fn calculate_installment_schedule(
    total_amount_cents: i64,
    installment_count: i32,
    program_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<InstallmentScheduleItem>, PolicyViolation> {
    if installment_count < 1 {
        return Err(PolicyViolation::InvalidInstallmentCount {
            count: installment_count,
        });
    }

    let count = i64::from(installment_count);
    let base = total_amount_cents / count;
    let remainder = total_amount_cents - base * count;
    let spread = days_until(now, program_start).clamp(0, MAX_SCHEDULE_SPREAD_DAYS);

    let schedule = (0..count)
        .map(|i| {
            let (amount_cents, due_date) = if i == 0 {
                (base + remainder, now)
            } else {
                let days_before_start = (count - 1 - i) * spread / (count - 1);
                (base, program_start - Duration::days(days_before_start))
            };
            InstallmentScheduleItem {
                installment_number: (i + 1) as i32,
                amount_cents,
                due_date,
            }
        })
        .collect();

    Ok(schedule)
}

/// Service owning registrations and their payments.
///
/// ## Usage
///
/// ```rust,ignore
/// let manager = RegistrationManager::new(store, clock);
///
/// let registration = manager
///     .create_registration(program_id, player_id, parent_id, None)
///     .await?;
/// let payments = manager.create_payment_schedule(&registration).await?;
/// ```
#[derive(Clone)]
pub struct RegistrationManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RegistrationManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // ==========================================
    // QUERIES
    // ==========================================

    pub async fn get_program(&self, program_id: Uuid) -> ServiceResult<ProgramRecord> {
        self.store
            .get_program(program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Program", program_id))
    }

    pub async fn get_registration(&self, registration_id: Uuid) -> ServiceResult<RegistrationRecord> {
        self.store
            .get_registration(registration_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Registration", registration_id))
    }

    /// Installments of a registration in installment order.
    pub async fn list_payments(&self, registration_id: Uuid) -> ServiceResult<Vec<RegistrationPaymentRecord>> {
        Ok(self.store.list_payments(registration_id).await?)
    }

    pub async fn list_registrations_for_player(&self, player_id: Uuid) -> ServiceResult<Vec<RegistrationRecord>> {
        Ok(self.store.list_registrations_for_player(player_id).await?)
    }

    /// Attendance counts for a registration.
    ///
    /// Always read fresh: refund decisions must see the latest marks.
    pub async fn get_sessions_attended(&self, registration_id: Uuid) -> ServiceResult<SessionsAttended> {
        let registration = self.get_registration(registration_id).await?;

        let total = self.store.count_active_sessions(registration.program_id).await?;
        let attended = self.store.count_attended_sessions(registration_id).await?;

        debug!(
            "Registration {} attended {} of {} sessions",
            registration_id, attended, total
        );
        Ok(SessionsAttended { attended, total })
    }

    // ==========================================
    // REGISTRATION
    // ==========================================

    /// Register a player for a program.
    ///
    /// ## Arguments
    ///
    /// * `program_id` - Program to join
    /// * `player_id` - Player taking the seat
    /// * `registered_by` - User performing the registration
    /// * `payment_plan` - Defaults to installments when the program offers them
    ///
    /// ## Returns
    ///
    /// * `Ok(RegistrationRecord)` - New `pending` registration with nothing paid
    /// * `Err(ServiceError::Policy)` - Not published, deadline passed, full or duplicate
    pub async fn create_registration(
        &self,
        program_id: Uuid,
        player_id: Uuid,
        registered_by: Uuid,
        payment_plan: Option<PaymentPlan>,
    ) -> ServiceResult<RegistrationRecord> {
        info!("Registering player {} for program {}", player_id, program_id);

        let now = self.clock.now();
        let program = self.get_program(program_id).await?;

        if program.status != ProgramStatus::Published {
            return Err(PolicyViolation::ProgramNotPublished { status: program.status }.into());
        }
        if let Some(deadline) = program.registration_deadline {
            if now > deadline {
                return Err(PolicyViolation::RegistrationDeadlinePassed.into());
            }
        }
        if program.is_full() {
            return Err(PolicyViolation::ProgramFull.into());
        }
        if self.store.find_active_registration(program_id, player_id).await?.is_some() {
            return Err(PolicyViolation::DuplicateRegistration.into());
        }

        let payment_plan = match payment_plan {
            Some(PaymentPlan::Installment) if !program.allow_installments => {
                return Err(PolicyViolation::InstallmentsNotOffered.into());
            }
            Some(plan) => plan,
            None if program.allow_installments => PaymentPlan::Installment,
            None => PaymentPlan::Full,
        };

        let registration = RegistrationRecord {
            id: Uuid::new_v4(),
            program_id,
            player_id,
            registered_by,
            status: RegistrationStatus::Pending,
            payment_plan,
            total_amount_cents: program.price_cents,
            paid_amount_cents: 0,
            currency: program.currency.clone(),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            refunded_at: None,
        };

        // A concurrent registration can slip past the lookup above
        match self.store.insert_registration(&registration).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation_of(ACTIVE_REGISTRATION_CONSTRAINT) => {
                warn!(
                    "Concurrent duplicate registration for player {} in program {}",
                    player_id, program_id
                );
                return Err(PolicyViolation::DuplicateRegistration.into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "✅ Registration {} created ({} plan, {} cents)",
            registration.id, registration.payment_plan, registration.total_amount_cents
        );
        Ok(registration)
    }

    // ==========================================
    // PAYMENTS
    // ==========================================

    /// Persist the pending installments of a new registration.
    ///
    /// Installment plans use the program's `installment_count`; a full plan
    /// is a single payment due now.
    pub async fn create_payment_schedule(
        &self,
        registration: &RegistrationRecord,
    ) -> ServiceResult<Vec<RegistrationPaymentRecord>> {
        let now = self.clock.now();
        let program = self.get_program(registration.program_id).await?;

        let count = match registration.payment_plan {
            PaymentPlan::Installment => program.installment_count,
            PaymentPlan::Full => 1,
        };
        let schedule = calculate_installment_schedule(
            registration.total_amount_cents,
            count,
            program.start_date,
            now,
        )?;

        let payments: Vec<RegistrationPaymentRecord> = schedule
            .iter()
            .map(|item| RegistrationPaymentRecord {
                id: Uuid::new_v4(),
                registration_id: registration.id,
                amount_cents: item.amount_cents,
                installment_number: item.installment_number,
                total_installments: count,
                due_date: item.due_date,
                status: PaymentStatus::Pending,
                payment_intent_id: None,
                refund_id: None,
                refunded_amount_cents: 0,
                paid_at: None,
                refunded_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.store.insert_payments(&payments).await?;

        debug!(
            "Created {} installments for registration {}",
            payments.len(),
            registration.id
        );
        Ok(payments)
    }

    /// Recompute `paid_amount_cents` as the sum of succeeded installments.
    ///
    /// Idempotent: calling it again without new payments changes nothing.
    pub async fn update_paid_amount(&self, registration_id: Uuid) -> ServiceResult<RegistrationRecord> {
        let mut registration = self.get_registration(registration_id).await?;
        let paid = self.store.sum_succeeded_payments(registration_id).await?;

        if registration.paid_amount_cents != paid {
            debug!(
                "Registration {} paid amount {} -> {}",
                registration_id, registration.paid_amount_cents, paid
            );
            registration.paid_amount_cents = paid;
            registration.updated_at = self.clock.now();
            self.store.update_registration(&registration).await?;
        }

        Ok(registration)
    }

    /// Mark an installment as paid and confirm the registration on its
    /// first successful payment.
    ///
    /// Recording an installment that already succeeded only re-runs the
    /// reconciliation.
    pub async fn record_payment_success(
        &self,
        registration_id: Uuid,
        payment_id: Uuid,
        payment_intent_id: Option<String>,
    ) -> ServiceResult<PaymentRecorded> {
        let now = self.clock.now();
        let registration = self.get_registration(registration_id).await?;

        if !registration.status.is_active() {
            return Err(PolicyViolation::RegistrationNotActive { status: registration.status }.into());
        }

        let mut payment = self
            .store
            .get_payment(payment_id)
            .await?
            .filter(|p| p.registration_id == registration_id)
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;

        match payment.status {
            PaymentStatus::Pending => {
                payment.status = PaymentStatus::Succeeded;
                payment.paid_at = Some(now);
                if payment_intent_id.is_some() {
                    payment.payment_intent_id = payment_intent_id;
                }
                payment.updated_at = now;
                self.store.update_payment(&payment).await?;
                info!(
                    "💰 Installment {}/{} of registration {} paid ({} cents)",
                    payment.installment_number, payment.total_installments, registration_id, payment.amount_cents
                );
            }
            PaymentStatus::Succeeded => {
                debug!("Payment {} already succeeded", payment_id);
            }
            status => return Err(PolicyViolation::PaymentNotPayable { status }.into()),
        }

        let mut registration = self.update_paid_amount(registration_id).await?;
        let mut newly_confirmed = false;

        if registration.status == RegistrationStatus::Pending {
            registration.status = RegistrationStatus::Confirmed;
            registration.confirmed_at = Some(now);
            registration.updated_at = now;
            self.store.update_registration(&registration).await?;

            let participants = self
                .store
                .adjust_participant_count(registration.program_id, 1, now)
                .await?;
            newly_confirmed = true;
            info!(
                "✅ Registration {} confirmed ({} participants)",
                registration_id, participants
            );
        }

        Ok(PaymentRecorded {
            registration,
            payment,
            newly_confirmed,
        })
    }
}

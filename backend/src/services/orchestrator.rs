//! # Registration Orchestrator
//!
//! Coordinates the managers for the flows that span more than one of them.
//! The registration and waitlist managers never call each other; every
//! cross-cutting step goes through here.
//!
//! ## Flow: Cancellation
//!
//! ```text
//! 1. cancel_registration()
//!                ↓
//! 2. Count sessions, evaluate refund policy
//!                ↓
//! 3. Registration → cancelled (conditional write), seat released
//!                ↓
//! 4. Refund succeeded installments, newest first
//!    (intent → latest charge → refund)
//!                ↓
//! 5. Cancel pending installments
//!                ↓
//! 6. Registration → refunded, if any refund went through
//!                ↓
//! 7. Promote next waitlisted player
//!                ↓
//! 8. Notify (best-effort)
//! ```
//!
//! Step 3 is the only gate: of two concurrent cancellations exactly one
//! reaches the processor. A refund that fails after earlier ones succeeded
//! is not retried or compensated. The outcome reports the failure.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{
    PaymentPlan, PaymentStatus, ProgramStatus, RegistrationPaymentRecord, RegistrationRecord,
    RegistrationStatus, Store, WaitlistEntryRecord, WaitlistState,
};
use crate::payments::{PaymentError, PaymentGateway};

use super::clock::Clock;
use super::errors::{PolicyViolation, ServiceResult};
use super::notifier::{NotificationEvent, Notifier};
use super::refund_calculator::{calculate_refund, RefundCalculation};
use super::registration_manager::{PaymentRecorded, RegistrationManager};
use super::waitlist_manager::{WaitlistManager, WaitlistPromotion};

/// Reason sent to the card processor with every refund.
const REFUND_REASON: &str = "requested_by_customer";

/// Stored on a registration withdrawn because its claim could not complete.
const ABANDONED_CLAIM_REASON: &str = "waitlist claim not completed";

/// Everything that happened during a cancellation.
#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub registration: RegistrationRecord,
    pub refund: RefundCalculation,
    pub refunds_issued: u32,
    pub refunds_failed: u32,
    /// Refunds the processor accepted whose payment row could not be updated.
    pub refunds_unrecorded: u32,
    pub refunded_amount_cents: i64,
    /// A refund call failed, so less than the decided amount went back.
    pub partial_failure: bool,
    pub promotion: WaitlistPromotion,
}

/// A new registration with its installment rows.
#[derive(Debug, Clone)]
pub struct RegistrationWithPayments {
    pub registration: RegistrationRecord,
    pub payments: Vec<RegistrationPaymentRecord>,
}

/// Result of claiming a promoted waitlist spot.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub registration: RegistrationRecord,
    pub payments: Vec<RegistrationPaymentRecord>,
    pub entry: WaitlistEntryRecord,
}

/// Result of one expired-promotion sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub promoted: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct RefundTally {
    issued: u32,
    failed: u32,
    unrecorded: u32,
    refunded_cents: i64,
}

/// Cross-manager flows.
#[derive(Clone)]
pub struct RegistrationOrchestrator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    registrations: RegistrationManager,
    waitlist: WaitlistManager,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl RegistrationOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        registrations: RegistrationManager,
        waitlist: WaitlistManager,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            clock,
            registrations,
            waitlist,
            payments,
            notifier,
        }
    }

    pub fn registrations(&self) -> &RegistrationManager {
        &self.registrations
    }

    pub fn waitlist(&self) -> &WaitlistManager {
        &self.waitlist
    }

    async fn notify_best_effort(&self, player_id: Uuid, event: NotificationEvent) {
        let kind = event.kind();
        if let Err(e) = self.notifier.notify(player_id, event).await {
            warn!("Failed to deliver {} notification to player {}: {}", kind, player_id, e);
        }
    }

    // ==========================================
    // REGISTRATION & PAYMENT
    // ==========================================

    /// Create a registration and its installment rows.
    pub async fn register_player(
        &self,
        program_id: Uuid,
        player_id: Uuid,
        registered_by: Uuid,
        payment_plan: Option<PaymentPlan>,
    ) -> ServiceResult<RegistrationWithPayments> {
        let registration = self
            .registrations
            .create_registration(program_id, player_id, registered_by, payment_plan)
            .await?;
        let payments = self.registrations.create_payment_schedule(&registration).await?;

        Ok(RegistrationWithPayments { registration, payments })
    }

    /// Record a successful installment and tell the player when it confirmed the seat.
    pub async fn confirm_payment(
        &self,
        registration_id: Uuid,
        payment_id: Uuid,
        payment_intent_id: Option<String>,
    ) -> ServiceResult<PaymentRecorded> {
        let recorded = self
            .registrations
            .record_payment_success(registration_id, payment_id, payment_intent_id)
            .await?;

        if recorded.newly_confirmed {
            self.notify_best_effort(
                recorded.registration.player_id,
                NotificationEvent::RegistrationConfirmed {
                    registration_id,
                    program_id: recorded.registration.program_id,
                },
            )
            .await;
        }
        Ok(recorded)
    }

    // ==========================================
    // CANCELLATION
    // ==========================================

    /// What cancelling now would refund. Nothing is written.
    pub async fn preview_refund(&self, registration_id: Uuid) -> ServiceResult<RefundCalculation> {
        let registration = self.registrations.get_registration(registration_id).await?;
        let program = self.registrations.get_program(registration.program_id).await?;
        let sessions = self.registrations.get_sessions_attended(registration_id).await?;

        Ok(calculate_refund(
            &registration,
            &program,
            sessions.attended,
            sessions.total,
            self.clock.now(),
        ))
    }

    /// Cancel a registration, reverse its payments and offer the seat to the waitlist.
    ///
    /// ## Returns
    ///
    /// * `Ok(CancellationOutcome)` - Registration transitioned; check `partial_failure`
    /// * `Err(ServiceError::Policy)` - Registration is not active, or another
    ///   cancellation of it got there first
    /// * `Err(ServiceError::NotFound)` - Unknown registration
    pub async fn cancel_registration(
        &self,
        registration_id: Uuid,
        reason: Option<String>,
    ) -> ServiceResult<CancellationOutcome> {
        info!("Cancelling registration {}", registration_id);

        let current = self.registrations.get_registration(registration_id).await?;
        if !current.status.is_active() {
            return Err(PolicyViolation::RegistrationNotActive { status: current.status }.into());
        }

        let refund = self.preview_refund(registration_id).await?;
        debug!("Refund decision for {}: {}", registration_id, refund.reason);

        let claimed = self
            .store
            .begin_cancellation(registration_id, reason.as_deref(), self.clock.now())
            .await?;
        let (previous, mut registration) = match claimed {
            Some(claimed) => claimed,
            None => {
                let latest = self.registrations.get_registration(registration_id).await?;
                warn!(
                    "Registration {} left {} concurrently, not cancelling twice",
                    registration_id, latest.status
                );
                return Err(PolicyViolation::RegistrationNotActive { status: latest.status }.into());
            }
        };

        if previous == RegistrationStatus::Confirmed {
            let participants = self
                .store
                .adjust_participant_count(registration.program_id, -1, self.clock.now())
                .await?;
            debug!("Program {} now has {} participants", registration.program_id, participants);
        }

        let payments = self.store.list_payments(registration_id).await?;
        let tally = self
            .refund_payments(&registration, &payments, refund.refund_amount_cents)
            .await;
        self.cancel_pending_payments(&payments).await?;

        if tally.issued > 0 {
            let now = self.clock.now();
            let mut refunded = registration.clone();
            refunded.status = RegistrationStatus::Refunded;
            refunded.refunded_at = Some(now);
            refunded.updated_at = now;
            match self.store.update_registration(&refunded).await {
                Ok(()) => registration = refunded,
                Err(e) => error!(
                    "Registration {} refunded {} cents but stays cancelled, status write failed: {}",
                    registration_id, tally.refunded_cents, e
                ),
            }
        }

        let partial_failure = tally.failed > 0;
        if partial_failure {
            error!(
                "Registration {} cancelled with partial refund: {} issued ({} cents), {} failed, {} cents decided",
                registration_id, tally.issued, tally.refunded_cents, tally.failed, refund.refund_amount_cents
            );
        } else {
            info!(
                "✅ Registration {} {} ({} cents refunded)",
                registration_id, registration.status, tally.refunded_cents
            );
        }

        let promotion = self.promote_after_cancellation(registration.program_id).await;

        self.notify_best_effort(
            registration.player_id,
            NotificationEvent::RegistrationCancelled {
                registration_id,
                program_id: registration.program_id,
                refund_amount_cents: tally.refunded_cents,
                currency: registration.currency.clone(),
            },
        )
        .await;

        Ok(CancellationOutcome {
            registration,
            refund,
            refunds_issued: tally.issued,
            refunds_failed: tally.failed,
            refunds_unrecorded: tally.unrecorded,
            refunded_amount_cents: tally.refunded_cents,
            partial_failure,
            promotion,
        })
    }

    /// Refund succeeded installments newest-first until `amount_cents` is covered.
    ///
    /// Stops at the first processor failure. Money the processor already
    /// returned is counted even when its payment row cannot be written.
    async fn refund_payments(
        &self,
        registration: &RegistrationRecord,
        payments: &[RegistrationPaymentRecord],
        amount_cents: i64,
    ) -> RefundTally {
        let mut tally = RefundTally::default();
        let mut remaining = amount_cents;

        let mut succeeded: Vec<&RegistrationPaymentRecord> = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .collect();
        succeeded.sort_by(|a, b| b.installment_number.cmp(&a.installment_number));

        for payment in succeeded {
            if remaining <= 0 {
                break;
            }
            let amount = remaining.min(payment.amount_cents - payment.refunded_amount_cents);
            if amount <= 0 {
                continue;
            }

            match self.refund_installment(registration, payment, amount).await {
                Ok(refund_id) => {
                    let now = self.clock.now();
                    let mut refunded = payment.clone();
                    refunded.status = PaymentStatus::Refunded;
                    refunded.refund_id = Some(refund_id);
                    refunded.refunded_amount_cents += amount;
                    refunded.refunded_at = Some(now);
                    refunded.updated_at = now;
                    if let Err(e) = self.store.update_payment(&refunded).await {
                        error!(
                            "Refund {} of installment {} ({} cents) went through but was not recorded: {}",
                            refunded.refund_id.as_deref().unwrap_or_default(),
                            payment.id,
                            amount,
                            e
                        );
                        tally.unrecorded += 1;
                    }

                    remaining -= amount;
                    tally.issued += 1;
                    tally.refunded_cents += amount;
                }
                Err(e) => {
                    error!(
                        "Refund of installment {} ({} cents) for registration {} failed: {}",
                        payment.installment_number, amount, registration.id, e
                    );
                    tally.failed += 1;
                    break;
                }
            }
        }

        tally
    }

    async fn refund_installment(
        &self,
        registration: &RegistrationRecord,
        payment: &RegistrationPaymentRecord,
        amount_cents: i64,
    ) -> Result<String, PaymentError> {
        let intent_id = payment
            .payment_intent_id
            .as_deref()
            .ok_or_else(|| PaymentError::MissingCharge(format!("installment {}", payment.id)))?;

        let intent = self.payments.get_payment_intent(intent_id).await?;
        let charge = intent
            .latest_charge
            .ok_or_else(|| PaymentError::MissingCharge(intent_id.to_string()))?;

        let metadata = HashMap::from([
            ("registration_id".to_string(), registration.id.to_string()),
            ("program_id".to_string(), registration.program_id.to_string()),
            ("payment_id".to_string(), payment.id.to_string()),
            ("installment_number".to_string(), payment.installment_number.to_string()),
        ]);

        let receipt = self
            .payments
            .create_refund(&charge, amount_cents, REFUND_REASON, &metadata)
            .await?;
        Ok(receipt.id)
    }

    /// Cancel every pending installment; the processor-side cancel is best-effort.
    async fn cancel_pending_payments(&self, payments: &[RegistrationPaymentRecord]) -> ServiceResult<()> {
        for payment in payments.iter().filter(|p| p.status == PaymentStatus::Pending) {
            if let Some(intent_id) = payment.payment_intent_id.as_deref() {
                if let Err(e) = self.payments.cancel_payment_intent(intent_id).await {
                    warn!("Could not cancel payment intent {}: {}", intent_id, e);
                }
            }

            let mut cancelled = payment.clone();
            cancelled.status = PaymentStatus::Cancelled;
            cancelled.updated_at = self.clock.now();
            self.store.update_payment(&cancelled).await?;
        }
        Ok(())
    }

    /// Offer the freed seat to the waitlist. Never fails the cancellation.
    async fn promote_after_cancellation(&self, program_id: Uuid) -> WaitlistPromotion {
        match self.try_promote(program_id).await {
            Ok(promotion) => promotion,
            Err(e) => {
                error!("Waitlist promotion for program {} failed: {}", program_id, e);
                WaitlistPromotion::default()
            }
        }
    }

    /// Promote the next queued player if the program has an open seat and
    /// no promotion is already waiting to be claimed.
    async fn try_promote(&self, program_id: Uuid) -> ServiceResult<WaitlistPromotion> {
        let program = self.registrations.get_program(program_id).await?;
        if program.status != ProgramStatus::Published || !program.waitlist_enabled || program.is_full() {
            return Ok(WaitlistPromotion::default());
        }

        let now = self.clock.now();
        let queue = self.waitlist.get_waitlist(program_id).await?;
        if queue.iter().any(|e| e.state(now) == WaitlistState::Promoted) {
            debug!("Program {} already has an open promotion", program_id);
            return Ok(WaitlistPromotion::default());
        }

        let promotion = self.waitlist.process_waitlist_after_cancellation(program_id).await?;
        if let (true, Some(player_id), Some(entry_id), Some(expires_at)) =
            (promotion.promoted, promotion.player_id, promotion.entry_id, promotion.expires_at)
        {
            self.notify_best_effort(
                player_id,
                NotificationEvent::WaitlistPromoted {
                    program_id,
                    entry_id,
                    expires_at,
                },
            )
            .await;
        }
        Ok(promotion)
    }

    // ==========================================
    // WAITLIST FLOWS
    // ==========================================

    /// Turn a promoted waitlist entry into a registration.
    pub async fn claim_waitlist_spot(
        &self,
        entry_id: Uuid,
        player_id: Uuid,
        registered_by: Uuid,
        payment_plan: Option<PaymentPlan>,
    ) -> ServiceResult<ClaimOutcome> {
        let entry = self.waitlist.get_entry(entry_id).await?;
        self.waitlist.check_claimable(&entry, player_id)?;

        let created = self
            .register_player(entry.program_id, player_id, registered_by, payment_plan)
            .await?;
        let entry = match self.waitlist.claim_promoted_spot(entry_id, created.registration.id).await {
            Ok(entry) => entry,
            Err(e) => {
                self.abandon_claim(&created).await;
                return Err(e);
            }
        };

        Ok(ClaimOutcome {
            registration: created.registration,
            payments: created.payments,
            entry,
        })
    }

    /// Withdraw a registration created for a claim that could not be linked
    /// to its waitlist entry, so the player can claim again.
    async fn abandon_claim(&self, created: &RegistrationWithPayments) {
        let registration_id = created.registration.id;
        let withdrawn = self
            .store
            .begin_cancellation(registration_id, Some(ABANDONED_CLAIM_REASON), self.clock.now())
            .await;
        if let Err(e) = withdrawn {
            error!("Could not withdraw registration {} of a failed claim: {}", registration_id, e);
            return;
        }
        if let Err(e) = self.cancel_pending_payments(&created.payments).await {
            error!("Could not cancel installments of withdrawn registration {}: {}", registration_id, e);
            return;
        }
        warn!("Withdrew registration {} after its waitlist claim failed", registration_id);
    }

    /// Recycle every expired promotion and offer the seats to the next in line.
    ///
    /// The head of the queue is offered the seat even when it was recycled
    /// in this sweep, so a lone waiting player keeps getting offers.
    pub async fn sweep_expired_promotions(&self) -> ServiceResult<SweepReport> {
        let expired = self.waitlist.get_expired_promotions().await?;
        let mut report = SweepReport::default();
        if expired.is_empty() {
            return Ok(report);
        }

        let mut programs = Vec::new();

        for entry in expired {
            match self.waitlist.reset_expired_promotion(entry.id).await {
                Ok(updated) => {
                    report.expired += 1;
                    if !programs.contains(&updated.program_id) {
                        programs.push(updated.program_id);
                    }
                    self.notify_best_effort(
                        updated.player_id,
                        NotificationEvent::PromotionExpired {
                            program_id: updated.program_id,
                            entry_id: updated.id,
                            new_position: updated.position,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Could not recycle expired promotion {}: {}", entry.id, e);
                }
            }
        }

        for program_id in programs {
            match self.try_promote(program_id).await {
                Ok(promotion) if promotion.promoted => report.promoted += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    error!("Promotion after expiry for program {} failed: {}", program_id, e);
                }
            }
        }

        info!(
            "⏰ Promotion sweep: {} expired, {} promoted, {} failed",
            report.expired, report.promoted, report.failed
        );
        Ok(report)
    }
}

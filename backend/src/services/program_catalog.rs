//! # Program Catalog Service
//!
//! Program creation, the status lifecycle and the terms lock.
//!
//! ```text
//! draft ──► published ──► completed
//!   │           │
//!   └───────────┴──────► cancelled
//! ```
//!
//! Price and capacity freeze once any registration against the program
//! is confirmed or refunded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::db::{CancellationPolicyOverrides, ProgramRecord, ProgramStatus, Store};

use super::clock::Clock;
use super::errors::{PolicyViolation, ServiceError, ServiceResult};
use super::registration_manager::{calculate_installment_schedule, InstallmentScheduleItem};

/// Fields supplied when creating a program.
#[derive(Debug, Clone)]
pub struct NewProgram {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub price_cents: i64,
    pub currency: String,
    pub max_participants: Option<i32>,
    pub allow_installments: bool,
    pub installment_count: i32,
    pub waitlist_enabled: bool,
    pub waitlist_limit: Option<i32>,
    pub cancellation_policy: Option<CancellationPolicyOverrides>,
}

/// Price/capacity change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProgramTerms {
    pub price_cents: Option<i64>,
    pub max_participants: Option<i32>,
}

/// Reject terms no program could be sold under.
fn check_terms(
    price_cents: Option<i64>,
    max_participants: Option<i32>,
    waitlist_limit: Option<i32>,
) -> Result<(), PolicyViolation> {
    let invalid = |reason: String| Err(PolicyViolation::InvalidProgramTerms { reason });

    if let Some(price) = price_cents.filter(|p| *p < 0) {
        return invalid(format!("price cannot be negative ({} cents)", price));
    }
    if let Some(max) = max_participants.filter(|m| *m < 1) {
        return invalid(format!("capacity must be at least 1, got {}", max));
    }
    if let Some(limit) = waitlist_limit.filter(|l| *l < 0) {
        return invalid(format!("waitlist limit cannot be negative, got {}", limit));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProgramCatalog {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ProgramCatalog {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get_program(&self, program_id: Uuid) -> ServiceResult<ProgramRecord> {
        self.store
            .get_program(program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Program", program_id))
    }

    /// Create a program in `draft`.
    pub async fn create_program(&self, new: NewProgram) -> ServiceResult<ProgramRecord> {
        if new.installment_count < 1 {
            return Err(PolicyViolation::InvalidInstallmentCount {
                count: new.installment_count,
            }
            .into());
        }
        check_terms(Some(new.price_cents), new.max_participants, new.waitlist_limit)?;

        let now = self.clock.now();
        let program = ProgramRecord {
            id: Uuid::new_v4(),
            title: new.title,
            status: ProgramStatus::Draft,
            start_date: new.start_date,
            registration_deadline: new.registration_deadline,
            price_cents: new.price_cents,
            currency: new.currency.to_lowercase(),
            max_participants: new.max_participants,
            current_participants: 0,
            allow_installments: new.allow_installments,
            installment_count: new.installment_count,
            waitlist_enabled: new.waitlist_enabled,
            waitlist_limit: new.waitlist_limit,
            cancellation_policy: new.cancellation_policy,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_program(&program).await?;

        info!("Program {} created: {}", program.id, program.title);
        Ok(program)
    }

    /// Move a program along its lifecycle.
    pub async fn transition_status(&self, program_id: Uuid, next: ProgramStatus) -> ServiceResult<ProgramRecord> {
        let mut program = self.get_program(program_id).await?;

        if !program.status.can_transition_to(next) {
            return Err(PolicyViolation::InvalidStatusTransition {
                from: program.status,
                to: next,
            }
            .into());
        }

        let previous = program.status;
        program.status = next;
        program.updated_at = self.clock.now();
        self.store.update_program(&program).await?;

        info!("Program {} moved {} → {}", program_id, previous, next);
        Ok(program)
    }

    /// The installment plan a registration made now would receive.
    ///
    /// ## Returns
    ///
    /// * `Ok(items)` - `installment_count` items due between now and the start
    /// * `Err(InstallmentsNotOffered)` - The program only takes full payments
    pub async fn installment_schedule(&self, program_id: Uuid) -> ServiceResult<Vec<InstallmentScheduleItem>> {
        let program = self.get_program(program_id).await?;
        if !program.allow_installments {
            return Err(PolicyViolation::InstallmentsNotOffered.into());
        }

        let schedule = calculate_installment_schedule(
            program.price_cents,
            program.installment_count,
            program.start_date,
            self.clock.now(),
        )?;
        Ok(schedule)
    }

    /// Change price and/or capacity while no registration is settled.
    pub async fn update_terms(&self, program_id: Uuid, terms: ProgramTerms) -> ServiceResult<ProgramRecord> {
        let mut program = self.get_program(program_id).await?;

        check_terms(terms.price_cents, terms.max_participants, None)?;
        if self.store.has_settled_registrations(program_id).await? {
            return Err(PolicyViolation::TermsLocked.into());
        }
        if let Some(max) = terms.max_participants {
            if max < program.current_participants {
                return Err(PolicyViolation::CapacityBelowParticipants {
                    current: program.current_participants,
                }
                .into());
            }
            program.max_participants = Some(max);
        }
        if let Some(price) = terms.price_cents {
            program.price_cents = price;
        }

        program.updated_at = self.clock.now();
        self.store.update_program(&program).await?;

        info!(
            "Program {} terms updated: price {} cents, capacity {:?}",
            program_id, program.price_cents, program.max_participants
        );
        Ok(program)
    }
}

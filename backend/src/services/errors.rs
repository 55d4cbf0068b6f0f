//! # Service Errors
//!
//! Every manager returns [`ServiceError`]. Business rule rejections are
//! grouped under [`PolicyViolation`] so the API layer can surface them as
//! user-facing messages with a stable code.

use thiserror::Error;

use crate::db::{PaymentStatus, ProgramStatus, RegistrationStatus, StoreError};
use crate::payments::PaymentError;

/// A business rule rejected the operation before anything was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Program is not open for registration (status: {status})")]
    ProgramNotPublished { status: ProgramStatus },

    #[error("The registration deadline for this program has passed")]
    RegistrationDeadlinePassed,

    #[error("This program is full")]
    ProgramFull,

    #[error("This player is already registered for this program")]
    DuplicateRegistration,

    #[error("This program does not have a waitlist")]
    WaitlistDisabled,

    #[error("The waitlist is full ({limit} players)")]
    WaitlistFull { limit: i32 },

    #[error("This player is already on the waitlist")]
    AlreadyOnWaitlist,

    #[error("This player already holds a registration for this program")]
    AlreadyRegistered,

    #[error("Program cannot move from {from} to {to}")]
    InvalidStatusTransition { from: ProgramStatus, to: ProgramStatus },

    #[error("Price and capacity cannot change once registrations are settled")]
    TermsLocked,

    #[error("Capacity cannot be lower than the {current} seats already taken")]
    CapacityBelowParticipants { current: i32 },

    #[error("Registration is not active (status: {status})")]
    RegistrationNotActive { status: RegistrationStatus },

    #[error("Payment cannot be recorded (status: {status})")]
    PaymentNotPayable { status: PaymentStatus },

    #[error("Installment count must be at least 1, got {count}")]
    InvalidInstallmentCount { count: i32 },

    #[error("Invalid program terms: {reason}")]
    InvalidProgramTerms { reason: String },

    #[error("This program does not offer installment payments")]
    InstallmentsNotOffered,

    #[error("This waitlist spot has not been offered yet")]
    PromotionNotOffered,

    #[error("The claim window for this spot has closed")]
    PromotionExpired,

    #[error("This waitlist spot has already been claimed")]
    PromotionAlreadyClaimed,

    #[error("This waitlist entry belongs to another player")]
    NotEntryOwner,
}

impl PolicyViolation {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PolicyViolation::ProgramNotPublished { .. } => "PROGRAM_NOT_PUBLISHED",
            PolicyViolation::RegistrationDeadlinePassed => "REGISTRATION_DEADLINE_PASSED",
            PolicyViolation::ProgramFull => "PROGRAM_FULL",
            PolicyViolation::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            PolicyViolation::WaitlistDisabled => "WAITLIST_DISABLED",
            PolicyViolation::WaitlistFull { .. } => "WAITLIST_FULL",
            PolicyViolation::AlreadyOnWaitlist => "ALREADY_ON_WAITLIST",
            PolicyViolation::AlreadyRegistered => "ALREADY_REGISTERED",
            PolicyViolation::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            PolicyViolation::TermsLocked => "TERMS_LOCKED",
            PolicyViolation::CapacityBelowParticipants { .. } => "CAPACITY_BELOW_PARTICIPANTS",
            PolicyViolation::RegistrationNotActive { .. } => "REGISTRATION_NOT_ACTIVE",
            PolicyViolation::PaymentNotPayable { .. } => "PAYMENT_NOT_PAYABLE",
            PolicyViolation::InvalidInstallmentCount { .. } => "INVALID_INSTALLMENT_COUNT",
            PolicyViolation::InvalidProgramTerms { .. } => "INVALID_PROGRAM_TERMS",
            PolicyViolation::InstallmentsNotOffered => "INSTALLMENTS_NOT_OFFERED",
            PolicyViolation::PromotionNotOffered => "PROMOTION_NOT_OFFERED",
            PolicyViolation::PromotionExpired => "PROMOTION_EXPIRED",
            PolicyViolation::PromotionAlreadyClaimed => "PROMOTION_ALREADY_CLAIMED",
            PolicyViolation::NotEntryOwner => "NOT_ENTRY_OWNER",
        }
    }

    /// Whether the rejection is a conflict with current state (409) rather
    /// than a malformed request (400).
    pub fn is_conflict(&self) -> bool {
        !matches!(
            self,
            PolicyViolation::InvalidInstallmentCount { .. }
                | PolicyViolation::InvalidProgramTerms { .. }
                | PolicyViolation::InstallmentsNotOffered
                | PolicyViolation::CapacityBelowParticipants { .. }
                | PolicyViolation::NotEntryOwner
        )
    }
}

/// Errors returned by the registration services.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A business rule rejected the request.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// The addressed record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Persistence failed; the store's message is preserved.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The card processor rejected or failed a call.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The policy violation behind this error, if any.
    pub fn as_policy(&self) -> Option<&PolicyViolation> {
        match self {
            ServiceError::Policy(p) => Some(p),
            _ => None,
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

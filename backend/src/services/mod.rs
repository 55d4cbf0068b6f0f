//! # Services Module
//!
//! This module contains the business logic of the registration backend.
//! Each service handles a specific part of the lifecycle.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `refund_calculator` | Pure cancellation policy evaluation |
//! | `RegistrationManager` | Registrations, installment schedules, paid balance |
//! | `WaitlistManager` | Queue positions, promotion, claim, expiry |
//! | `RegistrationOrchestrator` | Cancellation, refunds, claims, sweeps |
//! | `ProgramCatalog` | Program lifecycle and terms |
//! | `PromotionSweeper` | Periodic expired-promotion sweep |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │               RegistrationOrchestrator                    │   │
//! │  │  • cancel_registration()  • claim_waitlist_spot()         │   │
//! │  │  • preview_refund()       • sweep_expired_promotions()    │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │         │                    │                    │             │
//! │         ▼                    ▼                    ▼             │
//! │  ┌────────────┐      ┌────────────┐       ┌────────────┐       │
//! │  │Registration│      │  Waitlist  │       │   Refund   │       │
//! │  │  Manager   │      │  Manager   │       │ Calculator │       │
//! │  └────────────┘      └────────────┘       └────────────┘       │
//! │         │                    │                                  │
//! │         └──── Arc<dyn Store> ┘   PaymentGateway   Notifier      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod errors;
pub mod notifier;
pub mod orchestrator;
pub mod program_catalog;
pub mod promotion_sweeper;
pub mod refund_calculator;
pub mod registration_manager;
pub mod waitlist_manager;

pub use clock::{Clock, FixedClock, SystemClock};
pub use errors::{PolicyViolation, ServiceError, ServiceResult};
pub use notifier::{NotificationEvent, Notifier, NotifyError};
pub use orchestrator::{
    CancellationOutcome, ClaimOutcome, RegistrationOrchestrator, RegistrationWithPayments, SweepReport,
};
pub use program_catalog::{NewProgram, ProgramCatalog, ProgramTerms};
pub use promotion_sweeper::PromotionSweeper;
pub use refund_calculator::{calculate_refund, RefundCalculation};
pub use registration_manager::{
    calculate_installment_schedule, InstallmentScheduleItem, PaymentRecorded, RegistrationManager,
    SessionsAttended,
};
pub use waitlist_manager::{WaitlistManager, WaitlistPromotion};

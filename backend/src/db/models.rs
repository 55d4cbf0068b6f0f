//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `programs` | Paid offerings (lesson series, clinics) |
//! | `program_sessions` | Scheduled sessions of a program |
//! | `session_attendance` | Attendance marks per registration and session |
//! | `program_registrations` | One player's enrollment in one program |
//! | `registration_payments` | Installments of a registration's payment plan |
//! | `program_waitlist` | Ordered queue of players waiting for a full program |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐       ┌──────────────────────┐       ┌───────────────────────┐
//! │  programs   │──────<│ program_registrations│──────<│ registration_payments │
//! │             │       │                      │       │                       │
//! │ id (PK)     │       │ program_id (FK)      │       │ registration_id (FK)  │
//! │ price_cents │       │ player_id            │       │ installment_number    │
//! │ ...         │       │ status               │       │ status                │
//! └─────────────┘       └──────────────────────┘       └───────────────────────┘
//!        │
//!        ├──────<┌──────────────────┐
//!        │       │ program_waitlist │
//!        │       │ position         │
//!        │       └──────────────────┘
//!        │
//!        └──────<┌──────────────────┐       ┌────────────────────┐
//!                │ program_sessions │──────<│ session_attendance │
//!                └──────────────────┘       └────────────────────┘
//! ```
//!
//! All amounts are integer cents (`i64`), matching the `BIGINT` columns.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a status column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` for a text-backed status enum.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The value stored in the database column.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================
// PROGRAMS
// ============================================

/// Lifecycle of a program: draft → published → (cancelled | completed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

text_enum!(ProgramStatus, "program status", {
    Draft => "draft",
    Published => "published",
    Cancelled => "cancelled",
    Completed => "completed",
});

impl ProgramStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProgramStatus) -> bool {
        matches!(
            (self, next),
            (ProgramStatus::Draft, ProgramStatus::Published)
                | (ProgramStatus::Draft, ProgramStatus::Cancelled)
                | (ProgramStatus::Published, ProgramStatus::Cancelled)
                | (ProgramStatus::Published, ProgramStatus::Completed)
        )
    }
}

/// Program-level overrides of the cancellation policy.
///
/// Stored as JSONB. Every field is optional; missing fields fall back to
/// [`CancellationPolicy::default`] one by one. Both camelCase and
/// snake_case keys are accepted when reading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancellationPolicyOverrides {
    #[serde(default, alias = "full_refund_days_before_start", skip_serializing_if = "Option::is_none")]
    pub full_refund_days_before_start: Option<i64>,

    #[serde(default, alias = "partial_refund_days_before_start", skip_serializing_if = "Option::is_none")]
    pub partial_refund_days_before_start: Option<i64>,

    #[serde(default, alias = "partial_refund_percent", skip_serializing_if = "Option::is_none")]
    pub partial_refund_percent: Option<i64>,

    #[serde(default, alias = "no_refund_after_start", skip_serializing_if = "Option::is_none")]
    pub no_refund_after_start: Option<bool>,

    #[serde(default, alias = "prorate_by_sessions_attended", skip_serializing_if = "Option::is_none")]
    pub prorate_by_sessions_attended: Option<bool>,
}

/// Fully resolved cancellation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancellationPolicy {
    /// Cancelling at least this many days before start refunds everything.
    pub full_refund_days_before_start: i64,

    /// Cancelling at least this many days before start refunds `partial_refund_percent`.
    pub partial_refund_days_before_start: i64,

    /// Percentage refunded inside the partial window.
    pub partial_refund_percent: i64,

    /// Whether nothing is refunded once the program started (unless prorating).
    pub no_refund_after_start: bool,

    /// Whether refunds after start are prorated by sessions not yet attended.
    pub prorate_by_sessions_attended: bool,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            full_refund_days_before_start: 7,
            partial_refund_days_before_start: 3,
            partial_refund_percent: 50,
            no_refund_after_start: true,
            prorate_by_sessions_attended: true,
        }
    }
}

impl CancellationPolicy {
    /// Merge program overrides over the defaults, field by field.
    pub fn resolve(overrides: Option<&CancellationPolicyOverrides>) -> Self {
        let defaults = Self::default();
        let Some(o) = overrides else {
            return defaults;
        };

        Self {
            full_refund_days_before_start: o
                .full_refund_days_before_start
                .unwrap_or(defaults.full_refund_days_before_start),
            partial_refund_days_before_start: o
                .partial_refund_days_before_start
                .unwrap_or(defaults.partial_refund_days_before_start),
            partial_refund_percent: o
                .partial_refund_percent
                .unwrap_or(defaults.partial_refund_percent),
            no_refund_after_start: o
                .no_refund_after_start
                .unwrap_or(defaults.no_refund_after_start),
            prorate_by_sessions_attended: o
                .prorate_by_sessions_attended
                .unwrap_or(defaults.prorate_by_sessions_attended),
        }
    }
}

/// Represents a program record in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramRecord {
    /// Unique program ID.
    pub id: Uuid,

    /// Display title.
    pub title: String,

    /// Lifecycle status.
    pub status: ProgramStatus,

    /// When the first session starts.
    pub start_date: DateTime<Utc>,

    /// Registrations close at this instant, if set.
    pub registration_deadline: Option<DateTime<Utc>>,

    /// Full price in cents.
    pub price_cents: i64,

    /// ISO currency code.
    pub currency: String,

    /// Capacity. `None` means unlimited.
    pub max_participants: Option<i32>,

    /// Number of confirmed registrations holding a seat.
    pub current_participants: i32,

    /// Whether installment payment plans are offered.
    pub allow_installments: bool,

    /// Number of installments when paying by installments.
    pub installment_count: i32,

    /// Whether players may queue when the program is full.
    pub waitlist_enabled: bool,

    /// Maximum queue length. `None` means unlimited.
    pub waitlist_limit: Option<i32>,

    /// Program-specific cancellation policy overrides.
    pub cancellation_policy: Option<CancellationPolicyOverrides>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgramRecord {
    /// The effective cancellation policy for this program.
    pub fn resolved_policy(&self) -> CancellationPolicy {
        CancellationPolicy::resolve(self.cancellation_policy.as_ref())
    }

    /// Whether every seat is taken.
    pub fn is_full(&self) -> bool {
        match self.max_participants {
            Some(max) => self.current_participants >= max,
            None => false,
        }
    }
}

// ============================================
// REGISTRATIONS
// ============================================

/// Registration status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Created, waiting for the first payment
    Pending,
    /// Paid (fully or first installment), seat held
    Confirmed,
    /// Cancelled without a refund being issued
    Cancelled,
    /// Cancelled with at least one refund issued
    Refunded,
}

text_enum!(RegistrationStatus, "registration status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl RegistrationStatus {
    /// Pending and confirmed registrations are active.
    pub fn is_active(&self) -> bool {
        matches!(self, RegistrationStatus::Pending | RegistrationStatus::Confirmed)
    }
}

/// How a registration is paid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPlan {
    Full,
    Installment,
}

text_enum!(PaymentPlan, "payment plan", {
    Full => "full",
    Installment => "installment",
});

/// Represents a registration record in the database.
///
/// Registrations are never deleted: cancellation moves them to
/// `cancelled` or `refunded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub id: Uuid,
    pub program_id: Uuid,
    pub player_id: Uuid,

    /// Who performed the registration (the player or a guardian/coach).
    pub registered_by: Uuid,

    pub status: RegistrationStatus,
    pub payment_plan: PaymentPlan,

    /// Price owed for the program, in cents.
    pub total_amount_cents: i64,

    /// Sum of succeeded payments, in cents.
    pub paid_amount_cents: i64,

    pub currency: String,

    /// Free-form reason given at cancellation.
    pub cancellation_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl RegistrationRecord {
    /// Amount still owed, never negative.
    pub fn balance_due_cents(&self) -> i64 {
        (self.total_amount_cents - self.paid_amount_cents).max(0)
    }
}

// ============================================
// PAYMENTS
// ============================================

/// Installment payment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Refunded,
    Cancelled,
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Succeeded => "succeeded",
    Refunded => "refunded",
    Cancelled => "cancelled",
});

/// One installment within a registration's payment plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPaymentRecord {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub amount_cents: i64,

    /// 1-based installment number.
    pub installment_number: i32,

    /// Total installments in the plan.
    pub total_installments: i32,

    pub due_date: DateTime<Utc>,
    pub status: PaymentStatus,

    /// Card processor payment intent, once the player started paying.
    pub payment_intent_id: Option<String>,

    /// Card processor refund reference, once refunded.
    pub refund_id: Option<String>,

    /// Amount refunded for this installment, in cents.
    pub refunded_amount_cents: i64,

    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// SESSIONS & ATTENDANCE
// ============================================

/// A scheduled session of a program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSessionRecord {
    pub id: Uuid,
    pub program_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub cancelled: bool,
}

/// Attendance mark for one registration at one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: Uuid,
    pub registration_id: Uuid,
    pub attended: bool,
}

// ============================================
// WAITLIST
// ============================================

/// Where a waitlist entry is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistState {
    /// Waiting for a spot
    Queued,
    /// Offered a spot, claim window open
    Promoted,
    /// Offered a spot, claim window closed, not yet recycled
    Expired,
    /// Spot claimed with a registration (terminal)
    Claimed,
}

/// A player's position in the queue for a full program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntryRecord {
    pub id: Uuid,
    pub program_id: Uuid,
    pub player_id: Uuid,

    /// 1-based, contiguous within a program.
    pub position: i32,

    pub promoted_at: Option<DateTime<Utc>>,
    pub promotion_expires_at: Option<DateTime<Utc>>,
    pub notification_sent_at: Option<DateTime<Utc>>,

    /// Registration created when the promoted spot was claimed.
    pub registration_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntryRecord {
    /// Lifecycle state at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> WaitlistState {
        if self.registration_id.is_some() {
            return WaitlistState::Claimed;
        }
        match (self.promoted_at, self.promotion_expires_at) {
            (None, _) => WaitlistState::Queued,
            (Some(_), Some(expires)) if expires < now => WaitlistState::Expired,
            (Some(_), _) => WaitlistState::Promoted,
        }
    }
}

//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    CancellationPolicy, PaymentPlan, PaymentStatus, ProgramRecord, ProgramStatus,
    RegistrationPaymentRecord, RegistrationRecord, RegistrationStatus, WaitlistEntryRecord, WaitlistState,
};
use crate::services::{
    CancellationOutcome, ClaimOutcome, PaymentRecorded, RefundCalculation, RegistrationWithPayments,
    SweepReport, WaitlistPromotion,
};
use crate::utils::format_cents;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "PROGRAM_FULL",
///         "message": "Program is full"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "PROGRAM_FULL").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

// ============================================
// PROGRAMS
// ============================================

/// Program details.
///
/// Returned by `GET /programs/:id`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramResponse {
    pub id: Uuid,
    pub title: String,
    pub status: ProgramStatus,
    pub start_date: DateTime<Utc>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub price_cents: i64,
    pub currency: String,

    /// Price for display, e.g. "100.00 USD".
    pub price_display: String,

    pub max_participants: Option<i32>,
    pub current_participants: i32,
    pub is_full: bool,
    pub allow_installments: bool,
    pub installment_count: i32,
    pub waitlist_enabled: bool,
    pub waitlist_limit: Option<i32>,

    /// The effective policy after merging program overrides.
    pub cancellation_policy: CancellationPolicy,
}

impl From<ProgramRecord> for ProgramResponse {
    fn from(p: ProgramRecord) -> Self {
        Self {
            cancellation_policy: p.resolved_policy(),
            is_full: p.is_full(),
            price_display: format_cents(p.price_cents, &p.currency),
            id: p.id,
            title: p.title,
            status: p.status,
            start_date: p.start_date,
            registration_deadline: p.registration_deadline,
            price_cents: p.price_cents,
            currency: p.currency,
            max_participants: p.max_participants,
            current_participants: p.current_participants,
            allow_installments: p.allow_installments,
            installment_count: p.installment_count,
            waitlist_enabled: p.waitlist_enabled,
            waitlist_limit: p.waitlist_limit,
        }
    }
}

// ============================================
// REGISTRATIONS & PAYMENTS
// ============================================

/// Registration summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: Uuid,
    pub program_id: Uuid,
    pub player_id: Uuid,
    pub registered_by: Uuid,
    pub status: RegistrationStatus,
    pub payment_plan: PaymentPlan,
    pub total_amount_cents: i64,
    pub paid_amount_cents: i64,
    pub balance_due_cents: i64,
    pub currency: String,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<RegistrationRecord> for RegistrationResponse {
    fn from(r: RegistrationRecord) -> Self {
        Self {
            balance_due_cents: r.balance_due_cents(),
            id: r.id,
            program_id: r.program_id,
            player_id: r.player_id,
            registered_by: r.registered_by,
            status: r.status,
            payment_plan: r.payment_plan,
            total_amount_cents: r.total_amount_cents,
            paid_amount_cents: r.paid_amount_cents,
            currency: r.currency,
            cancellation_reason: r.cancellation_reason,
            created_at: r.created_at,
            confirmed_at: r.confirmed_at,
            cancelled_at: r.cancelled_at,
            refunded_at: r.refunded_at,
        }
    }
}

/// One installment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub id: Uuid,
    pub installment_number: i32,
    pub total_installments: i32,
    pub amount_cents: i64,
    pub due_date: DateTime<Utc>,
    pub status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub refund_id: Option<String>,
    pub refunded_amount_cents: i64,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<RegistrationPaymentRecord> for PaymentResponse {
    fn from(p: RegistrationPaymentRecord) -> Self {
        Self {
            id: p.id,
            installment_number: p.installment_number,
            total_installments: p.total_installments,
            amount_cents: p.amount_cents,
            due_date: p.due_date,
            status: p.status,
            payment_intent_id: p.payment_intent_id,
            refund_id: p.refund_id,
            refunded_amount_cents: p.refunded_amount_cents,
            paid_at: p.paid_at,
            refunded_at: p.refunded_at,
        }
    }
}

fn payment_responses(payments: Vec<RegistrationPaymentRecord>) -> Vec<PaymentResponse> {
    payments.into_iter().map(PaymentResponse::from).collect()
}

/// Registration with its installment rows.
///
/// Returned by `POST /registrations` and `GET /registrations/:id`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetailResponse {
    pub registration: RegistrationResponse,
    pub payments: Vec<PaymentResponse>,
}

impl RegistrationDetailResponse {
    pub fn new(registration: RegistrationRecord, payments: Vec<RegistrationPaymentRecord>) -> Self {
        Self {
            registration: registration.into(),
            payments: payment_responses(payments),
        }
    }
}

impl From<RegistrationWithPayments> for RegistrationDetailResponse {
    fn from(created: RegistrationWithPayments) -> Self {
        Self::new(created.registration, created.payments)
    }
}

/// Returned by `POST /registrations/:id/payments/:payment_id/succeeded`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecordedResponse {
    pub registration: RegistrationResponse,
    pub payment: PaymentResponse,
    pub newly_confirmed: bool,
}

impl From<PaymentRecorded> for PaymentRecordedResponse {
    fn from(r: PaymentRecorded) -> Self {
        Self {
            registration: r.registration.into(),
            payment: r.payment.into(),
            newly_confirmed: r.newly_confirmed,
        }
    }
}

/// Cancellation result.
///
/// Returned by `POST /registrations/:id/cancel`
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "registration": { "status": "refunded", ... },
///         "refund": {
///             "eligibleForRefund": true,
///             "refundAmountCents": 5000,
///             "refundPercent": 50,
///             "reason": "Partial refund (50%): cancelled 5 days before start"
///         },
///         "refundsIssued": 1,
///         "refundsFailed": 0,
///         "refundsUnrecorded": 0,
///         "refundedAmountCents": 5000,
///         "partialFailure": false,
///         "promotion": { "promoted": true, ... }
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResponse {
    pub registration: RegistrationResponse,
    pub refund: RefundCalculation,
    pub refunds_issued: u32,
    pub refunds_failed: u32,
    pub refunds_unrecorded: u32,
    pub refunded_amount_cents: i64,
    pub partial_failure: bool,
    pub promotion: WaitlistPromotion,
}

impl From<CancellationOutcome> for CancellationResponse {
    fn from(o: CancellationOutcome) -> Self {
        Self {
            registration: o.registration.into(),
            refund: o.refund,
            refunds_issued: o.refunds_issued,
            refunds_failed: o.refunds_failed,
            refunds_unrecorded: o.refunds_unrecorded,
            refunded_amount_cents: o.refunded_amount_cents,
            partial_failure: o.partial_failure,
            promotion: o.promotion,
        }
    }
}

// ============================================
// WAITLIST
// ============================================

/// One waitlist entry with its derived state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntryResponse {
    pub id: Uuid,
    pub program_id: Uuid,
    pub player_id: Uuid,
    pub position: i32,
    pub state: WaitlistState,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promotion_expires_at: Option<DateTime<Utc>>,
    pub registration_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntryResponse {
    /// Build the response with the entry's state at `now`.
    pub fn at(entry: WaitlistEntryRecord, now: DateTime<Utc>) -> Self {
        Self {
            state: entry.state(now),
            id: entry.id,
            program_id: entry.program_id,
            player_id: entry.player_id,
            position: entry.position,
            promoted_at: entry.promoted_at,
            promotion_expires_at: entry.promotion_expires_at,
            registration_id: entry.registration_id,
            created_at: entry.created_at,
        }
    }
}

/// Returned by `GET /programs/:id/waitlist`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistResponse {
    pub program_id: Uuid,
    pub entries: Vec<WaitlistEntryResponse>,
    pub count: usize,
}

/// Returned by `GET /programs/:id/waitlist/:player_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistPositionResponse {
    pub program_id: Uuid,
    pub player_id: Uuid,
    pub position: i32,
}

/// Returned by `POST /waitlist/:entry_id/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub registration: RegistrationResponse,
    pub payments: Vec<PaymentResponse>,
    pub entry: WaitlistEntryResponse,
}

impl ClaimResponse {
    pub fn at(outcome: ClaimOutcome, now: DateTime<Utc>) -> Self {
        Self {
            registration: outcome.registration.into(),
            payments: payment_responses(outcome.payments),
            entry: WaitlistEntryResponse::at(outcome.entry, now),
        }
    }
}

/// Returned by `POST /waitlist/sweep`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub expired: usize,
    pub promoted: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(r: SweepReport) -> Self {
        Self {
            expired: r.expired,
            promoted: r.promoted,
            failed: r.failed,
        }
    }
}

// ============================================
// HEALTH
// ============================================

/// Health check response.
///
/// Returned by `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Database connection status.
    pub database: bool,

    /// Open WebSocket connections.
    pub websocket_connections: usize,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}

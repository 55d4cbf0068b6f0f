//! # API Request Models
//!
//! Structures for incoming API request bodies.
//! Each struct represents the expected JSON body for an endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CancellationPolicyOverrides, PaymentPlan, ProgramStatus};
use crate::services::{NewProgram, ProgramTerms};

/// Request to create a program.
///
/// ## Example JSON
///
/// ```json
/// {
///     "title": "Summer Striker Camp",
///     "startDate": "2024-07-01T09:00:00Z",
///     "priceCents": 10000,
///     "currency": "usd",
///     "maxParticipants": 20,
///     "allowInstallments": true,
///     "installmentCount": 3,
///     "waitlistEnabled": true,
///     "cancellationPolicy": { "partialRefundPercent": 25 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProgramRequest {
    pub title: String,

    pub start_date: DateTime<Utc>,

    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,

    /// Full price in cents.
    pub price_cents: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Omit for unlimited capacity.
    #[serde(default)]
    pub max_participants: Option<i32>,

    #[serde(default)]
    pub allow_installments: bool,

    #[serde(default = "default_installment_count")]
    pub installment_count: i32,

    #[serde(default)]
    pub waitlist_enabled: bool,

    #[serde(default)]
    pub waitlist_limit: Option<i32>,

    /// Per-field overrides of the default cancellation policy.
    #[serde(default)]
    pub cancellation_policy: Option<CancellationPolicyOverrides>,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_installment_count() -> i32 {
    1
}

impl From<CreateProgramRequest> for NewProgram {
    fn from(req: CreateProgramRequest) -> Self {
        NewProgram {
            title: req.title,
            start_date: req.start_date,
            registration_deadline: req.registration_deadline,
            price_cents: req.price_cents,
            currency: req.currency,
            max_participants: req.max_participants,
            allow_installments: req.allow_installments,
            installment_count: req.installment_count,
            waitlist_enabled: req.waitlist_enabled,
            waitlist_limit: req.waitlist_limit,
            cancellation_policy: req.cancellation_policy,
        }
    }
}

/// Request to move a program along its lifecycle.
///
/// ## Example JSON
///
/// ```json
/// { "status": "published" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransitionRequest {
    pub status: ProgramStatus,
}

/// Request to change price and/or capacity.
///
/// ## Example JSON
///
/// ```json
/// { "priceCents": 12000, "maxParticipants": 24 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTermsRequest {
    #[serde(default)]
    pub price_cents: Option<i64>,

    #[serde(default)]
    pub max_participants: Option<i32>,
}

impl From<UpdateTermsRequest> for ProgramTerms {
    fn from(req: UpdateTermsRequest) -> Self {
        ProgramTerms {
            price_cents: req.price_cents,
            max_participants: req.max_participants,
        }
    }
}

/// Request to register a player for a program.
///
/// ## Example JSON
///
/// ```json
/// {
///     "programId": "0b6f2c1e-...",
///     "playerId": "93aa51d0-...",
///     "registeredBy": "c4e1f8a2-...",
///     "paymentPlan": "installment"
/// }
/// ```
///
/// ## Notes
///
/// - `registeredBy` defaults to the player (self-registration)
/// - `paymentPlan` defaults to `full`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    pub program_id: Uuid,

    pub player_id: Uuid,

    /// Guardian or coach acting for the player.
    #[serde(default)]
    pub registered_by: Option<Uuid>,

    #[serde(default)]
    pub payment_plan: Option<PaymentPlan>,
}

/// Request to record a successful installment payment.
///
/// ## Example JSON
///
/// ```json
/// { "paymentIntentId": "pi_3Nq..." }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    /// Card processor payment intent that settled the installment.
    #[serde(default)]
    pub payment_intent_id: Option<String>,
}

/// Request to cancel a registration.
///
/// ## Example JSON
///
/// ```json
/// { "reason": "Family moved away" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRegistrationRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request to join a program's waitlist.
///
/// ## Example JSON
///
/// ```json
/// { "playerId": "93aa51d0-..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToWaitlistRequest {
    pub player_id: Uuid,
}

/// Request to claim a promoted waitlist spot.
///
/// ## Example JSON
///
/// ```json
/// {
///     "playerId": "93aa51d0-...",
///     "paymentPlan": "full"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpotRequest {
    /// Must own the waitlist entry.
    pub player_id: Uuid,

    #[serde(default)]
    pub registered_by: Option<Uuid>,

    #[serde(default)]
    pub payment_plan: Option<PaymentPlan>,
}

//! # Payments Module
//!
//! The lifecycle services reverse card payments through the
//! [`PaymentGateway`] trait. Production uses [`StripeGateway`]; tests
//! plug in a scripted fake.
//!
//! ## Refund Path
//!
//! ```text
//! installment.payment_intent_id
//!          │  get_payment_intent()
//!          ▼
//!   intent.latest_charge
//!          │  create_refund(charge, amount, reason, metadata)
//!          ▼
//!     RefundReceipt
//! ```
//!
//! Every call may fail on its own; callers decide what a failure means.

pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stripe::StripeGateway;

/// Errors returned by payment gateways.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The processor could not be reached or the response was unreadable.
    #[error("Payment request failed: {0}")]
    Request(String),

    /// The processor answered with an error.
    #[error("Payment processor error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The payment intent has no charge to refund.
    #[error("Payment intent {0} has no charge")]
    MissingCharge(String),
}

/// Receipt for an issued refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub amount_cents: i64,
    pub status: String,
}

/// The parts of a payment intent the refund path needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub latest_charge: Option<String>,
}

/// External card processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Refund `amount_cents` of a charge.
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<RefundReceipt, PaymentError>;

    async fn get_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent, PaymentError>;

    /// Cancel an intent that has not been paid yet.
    async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<(), PaymentError>;
}

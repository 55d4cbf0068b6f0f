//! # Stripe Gateway
//!
//! [`PaymentGateway`] over the Stripe REST API using `reqwest`.
//! Requests are form-encoded and authenticated with the secret key as a
//! bearer token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{PaymentError, PaymentGateway, PaymentIntent, RefundReceipt};
use crate::utils::truncate_string;

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    amount: i64,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

/// Stripe client.
///
/// ## Usage
///
/// ```rust,ignore
/// let gateway = StripeGateway::new("https://api.stripe.com", "sk_live_...", 15)?;
/// let intent = gateway.get_payment_intent("pi_123").await?;
/// ```
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StripeGateway {
    /// Create a gateway.
    ///
    /// ## Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.stripe.com`
    /// * `api_key` - Secret key
    /// * `timeout_secs` - Per-request timeout
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into `PaymentError::Api`.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = api_error_message(&body);
        warn!("Stripe returned {}: {}", status, message);

        Err(PaymentError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Build the form body of a refund request.
fn refund_form(
    charge_id: &str,
    amount_cents: i64,
    reason: &str,
    metadata: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut form = vec![
        ("charge".to_string(), charge_id.to_string()),
        ("amount".to_string(), amount_cents.to_string()),
        ("reason".to_string(), reason.to_string()),
    ];

    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();
    for key in keys {
        form.push((format!("metadata[{}]", key), metadata[key].clone()));
    }
    form
}

/// Best readable message from an error body.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => match (parsed.error.message, parsed.error.code) {
            (Some(message), _) => message,
            (None, Some(code)) => code,
            (None, None) => "unknown error".to_string(),
        },
        Err(_) => truncate_string(body, 200),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<RefundReceipt, PaymentError> {
        debug!("Refunding {} cents of charge {}", amount_cents, charge_id);

        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.api_key)
            .form(&refund_form(charge_id, amount_cents, reason, metadata))
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        let refund: StripeRefund = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        info!("Refund {} issued for charge {} ({} cents)", refund.id, charge_id, refund.amount);
        Ok(RefundReceipt {
            id: refund.id,
            amount_cents: refund.amount,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    async fn get_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/payment_intents/{}", payment_intent_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        let intent: StripePaymentIntent = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Ok(PaymentIntent {
            id: intent.id,
            status: intent.status,
            latest_charge: intent.latest_charge,
        })
    }

    async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/payment_intents/{}/cancel", payment_intent_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Self::check(response).await?;
        info!("Payment intent {} cancelled", payment_intent_id);
        Ok(())
    }
}

//! # Notifier
//!
//! The lifecycle services decide *that* a player must hear about
//! something; delivering it is someone else's job. Implementations push
//! the event wherever players listen (see `websocket::WsNotifier`).
//!
//! Delivery is best-effort: callers log a failed notification and carry on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Something a player should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// The first payment went through and the seat is held.
    RegistrationConfirmed {
        #[serde(rename = "registrationId")]
        registration_id: Uuid,
        #[serde(rename = "programId")]
        program_id: Uuid,
    },

    /// The registration was cancelled, possibly with a refund.
    RegistrationCancelled {
        #[serde(rename = "registrationId")]
        registration_id: Uuid,
        #[serde(rename = "programId")]
        program_id: Uuid,
        #[serde(rename = "refundAmountCents")]
        refund_amount_cents: i64,
        currency: String,
    },

    /// A spot opened up; it must be claimed before `expires_at`.
    WaitlistPromoted {
        #[serde(rename = "programId")]
        program_id: Uuid,
        #[serde(rename = "entryId")]
        entry_id: Uuid,
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
    },

    /// The claim window closed; the player was moved to the back of the queue.
    PromotionExpired {
        #[serde(rename = "programId")]
        program_id: Uuid,
        #[serde(rename = "entryId")]
        entry_id: Uuid,
        #[serde(rename = "newPosition")]
        new_position: i32,
    },
}

impl NotificationEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::RegistrationConfirmed { .. } => "registration_confirmed",
            NotificationEvent::RegistrationCancelled { .. } => "registration_cancelled",
            NotificationEvent::WaitlistPromoted { .. } => "waitlist_promoted",
            NotificationEvent::PromotionExpired { .. } => "promotion_expired",
        }
    }
}

/// Notification delivery failures.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers notifications to players.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, player_id: Uuid, event: NotificationEvent) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_by_type() {
        let event = NotificationEvent::PromotionExpired {
            program_id: Uuid::nil(),
            entry_id: Uuid::nil(),
            new_position: 4,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "promotion_expired");
        assert_eq!(json["newPosition"], 4);
        assert_eq!(event.kind(), "promotion_expired");
    }
}

//! # WebSocket Module
//!
//! This module pushes lifecycle notifications to connected players.
//!
//! ## Connection Flow
//!
//! ```text
//! 1. Client connects to /ws/:player_id
//!              ↓
//! 2. Server registers the connection under the player
//!              ↓
//! 3. Events are pushed as they occur:
//!    - registration_confirmed
//!    - registration_cancelled
//!    - waitlist_promoted
//!    - promotion_expired
//! ```
//!
//! ## Message Format
//!
//! All messages are JSON:
//!
//! ```json
//! {
//!     "event": "waitlist_promoted",
//!     "data": {
//!         "type": "waitlist_promoted",
//!         "programId": "0b6f...",
//!         "entryId": "93aa...",
//!         "expiresAt": "2024-01-17T12:00:00Z"
//!     },
//!     "timestamp": "2024-01-15T12:00:00Z"
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::{NotificationEvent, Notifier, NotifyError};
use crate::AppState;

/// WebSocket event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    /// First payment confirmed the seat.
    RegistrationConfirmed,
    /// Registration cancelled (possibly refunded).
    RegistrationCancelled,
    /// A waitlist spot is offered.
    WaitlistPromoted,
    /// A waitlist offer lapsed.
    PromotionExpired,
    /// Connection established.
    Connected,
    /// Ping/pong for keepalive.
    Ping,
    /// Error message.
    Error,
}

impl From<&NotificationEvent> for WsEventType {
    fn from(event: &NotificationEvent) -> Self {
        match event {
            NotificationEvent::RegistrationConfirmed { .. } => WsEventType::RegistrationConfirmed,
            NotificationEvent::RegistrationCancelled { .. } => WsEventType::RegistrationCancelled,
            NotificationEvent::WaitlistPromoted { .. } => WsEventType::WaitlistPromoted,
            NotificationEvent::PromotionExpired { .. } => WsEventType::PromotionExpired,
        }
    }
}

/// WebSocket message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage<T> {
    /// Event type.
    pub event: WsEventType,
    /// Event data.
    pub data: T,
    /// Timestamp.
    pub timestamp: chrono::DateTime<Utc>,
}

impl<T: Serialize> WsMessage<T> {
    /// Create a new WebSocket message.
    pub fn new(event: WsEventType, data: T) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One live connection of a player.
struct Connection {
    id: Uuid,
    tx: broadcast::Sender<String>,
}

/// WebSocket connection registry.
///
/// Tracks active WebSocket sessions per player. A player can hold several
/// connections (multiple devices), each under its own connection id.
#[derive(Clone)]
pub struct WsRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, Vec<Connection>>>>,
}

impl WsRegistry {
    /// Create a new WebSocket registry.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new connection for a player.
    ///
    /// Returns the connection id to unregister with and a receiver for the
    /// player's messages.
    pub async fn register(&self, player_id: Uuid) -> (Uuid, broadcast::Receiver<String>) {
        let mut sessions = self.sessions.lock().await;
        let (tx, rx) = broadcast::channel(100);
        let id = Uuid::new_v4();

        let connections = sessions.entry(player_id).or_default();
        connections.push(Connection { id, tx });

        info!(
            "Registered WebSocket {} for player: {} (total connections: {})",
            id,
            player_id,
            connections.len()
        );
        (id, rx)
    }

    /// Remove one connection. Dropping its sender ends the receiver's stream.
    pub async fn unregister(&self, player_id: Uuid, connection_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(connections) = sessions.get_mut(&player_id) {
            connections.retain(|c| c.id != connection_id);

            if connections.is_empty() {
                sessions.remove(&player_id);
                info!("Unregistered all WebSocket connections for player: {}", player_id);
            } else {
                debug!(
                    "Unregistered WebSocket {} for player: {} (remaining: {})",
                    connection_id,
                    player_id,
                    connections.len()
                );
            }
        }
    }

    /// Send a message to every connection of a player.
    ///
    /// A player without connections is not an error.
    ///
    /// ## Returns
    ///
    /// * `Ok(n)` - Number of connections the message reached
    /// * `Err(NotifyError)` - Failed to serialize message
    pub async fn send_to_player<T: Serialize>(
        &self,
        player_id: Uuid,
        event: WsEventType,
        data: T,
    ) -> Result<usize, NotifyError> {
        let json = WsMessage::new(event, data).to_json()?;

        let mut sessions = self.sessions.lock().await;
        let Some(connections) = sessions.get_mut(&player_id) else {
            debug!("No active WebSocket connections for player: {}", player_id);
            return Ok(0);
        };

        // Sending fails only when every receiver is gone
        connections.retain(|c| c.tx.receiver_count() > 0);
        let sent = connections
            .iter()
            .filter(|c| c.tx.send(json.clone()).is_ok())
            .count();

        if connections.is_empty() {
            sessions.remove(&player_id);
        }
        if sent > 0 {
            debug!("Sent {:?} to player {} ({} connections)", event, player_id, sent);
        }
        Ok(sent)
    }

    /// Get the number of active connections for a player.
    pub async fn connection_count(&self, player_id: Uuid) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(&player_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active connections across all players.
    pub async fn total_connections(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().map(|v| v.len()).sum()
    }
}

impl Default for WsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Notifier`] that pushes events over the WebSocket registry.
#[derive(Clone)]
pub struct WsNotifier {
    registry: WsRegistry,
}

impl WsNotifier {
    pub fn new(registry: WsRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Notifier for WsNotifier {
    async fn notify(&self, player_id: Uuid, event: NotificationEvent) -> Result<(), NotifyError> {
        let event_type = WsEventType::from(&event);
        let reached = self.registry.send_to_player(player_id, event_type, &event).await?;
        if reached == 0 {
            debug!("Player {} offline, {} not pushed", player_id, event.kind());
        }
        Ok(())
    }
}

/// Configure WebSocket routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/{player_id}", web::get().to(websocket_handler));
}

/// WebSocket connection handler.
///
/// ## Endpoint
///
/// `GET /ws/:player_id`
///
/// ## Example (JavaScript)
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws/1f0c...');
///
/// ws.onmessage = (event) => {
///     const message = JSON.parse(event.data);
///     console.log('Event:', message.event, message.data);
/// };
/// ```
pub async fn websocket_handler(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    let player_id = path.into_inner();
    info!("WebSocket connection request for player: {}", player_id);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let registry = state.ws_registry.clone();
    let (connection_id, mut rx) = registry.register(player_id).await;

    actix_rt::spawn(async move {
        let welcome = WsMessage::new(
            WsEventType::Connected,
            serde_json::json!({
                "status": "connected",
                "playerId": player_id,
                "message": "You will receive registration and waitlist updates"
            }),
        );
        if let Ok(json) = welcome.to_json() {
            if let Err(e) = session.text(json).await {
                error!("Failed to send welcome message: {}", e);
            }
        }

        // Forward registry messages to this connection
        let mut forward_session = session.clone();
        let forward_registry = registry.clone();
        actix_rt::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if let Err(e) = forward_session.text(msg).await {
                    debug!("WebSocket session closed for {}: {}", player_id, e);
                    forward_registry.unregister(player_id, connection_id).await;
                    break;
                }
            }
        });

        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                Message::Ping(bytes) => {
                    let _ = session.pong(&bytes).await;
                }
                Message::Pong(_) => {}
                Message::Text(text) => {
                    debug!("Received text from {}: {}", player_id, text);
                    let reply = WsMessage::new(
                        WsEventType::Ping,
                        serde_json::json!({ "received": text.to_string() }),
                    );
                    if let Ok(json) = reply.to_json() {
                        let _ = session.text(json).await;
                    }
                }
                Message::Binary(_) => {
                    warn!("Received unexpected binary message from {}", player_id);
                }
                Message::Close(reason) => {
                    info!("WebSocket closed for {}: {:?}", player_id, reason);
                    break;
                }
                _ => {}
            }
        }

        registry.unregister(player_id, connection_id).await;
        info!("WebSocket disconnected for player: {}", player_id);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_pushes_to_registered_player() {
        let registry = WsRegistry::new();
        let player = Uuid::new_v4();
        let (_, mut rx) = registry.register(player).await;

        let notifier = WsNotifier::new(registry.clone());
        notifier
            .notify(
                player,
                NotificationEvent::RegistrationConfirmed {
                    registration_id: Uuid::nil(),
                    program_id: Uuid::nil(),
                },
            )
            .await
            .unwrap();

        let raw = rx.recv().await.unwrap();
        let message: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(message["event"], "registration_confirmed");
        assert_eq!(message["data"]["type"], "registration_confirmed");
    }

    #[tokio::test]
    async fn test_offline_player_is_not_an_error() {
        let registry = WsRegistry::new();
        let sent = registry
            .send_to_player(Uuid::new_v4(), WsEventType::Ping, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let registry = WsRegistry::new();
        let player = Uuid::new_v4();

        let (_, rx) = registry.register(player).await;
        let _kept = registry.register(player).await;
        assert_eq!(registry.connection_count(player).await, 2);

        drop(rx);
        let sent = registry
            .send_to_player(player, WsEventType::Ping, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_removes_only_that_connection() {
        let registry = WsRegistry::new();
        let player = Uuid::new_v4();

        let (closed_id, mut closed_rx) = registry.register(player).await;
        let (open_id, mut open_rx) = registry.register(player).await;

        // The receiver is still alive when the session ends
        registry.unregister(player, closed_id).await;
        assert_eq!(registry.connection_count(player).await, 1);
        assert!(matches!(
            closed_rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        let sent = registry
            .send_to_player(player, WsEventType::Ping, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert!(open_rx.recv().await.is_ok());

        registry.unregister(player, open_id).await;
        assert_eq!(registry.connection_count(player).await, 0);
        assert_eq!(registry.total_connections().await, 0);
    }
}

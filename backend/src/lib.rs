//! # Program Registration Backend
//!
//! Registration and waitlist lifecycle for paid youth-sports programs
//! (lesson series, clinics, camps):
//!
//! - Registrations with full or installment payment plans
//! - Cancellation with policy-driven refunds through the card processor
//! - FIFO waitlists with time-boxed promotions
//! - WebSocket push of lifecycle events
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  REST API   │  │  WebSocket  │  │   Background Services   │  │
//! │  │  (Actix)    │  │  /ws        │  │  • Promotion Sweeper    │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │         │                ▲                     │                 │
//! │         └────────────────┼─────────────────────┘                 │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                    SERVICE LAYER                           │  │
//! │  │  ProgramCatalog   RegistrationOrchestrator                 │  │
//! │  │                   ├── RegistrationManager                  │  │
//! │  │                   ├── WaitlistManager                      │  │
//! │  │                   └── refund_calculator                    │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │         │                                 │                      │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐              │
//! │  │  PostgreSQL │                   │    Card     │              │
//! │  │  (Store)    │                   │  processor  │              │
//! │  └─────────────┘                   └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod payments;
pub mod services;
pub mod utils;
pub mod websocket;

use config::AppConfig;
use db::Database;
use services::{Clock, ProgramCatalog, RegistrationOrchestrator};
use websocket::WsRegistry;

/// Shared application state passed to all handlers.
///
/// Wrapped in `Arc` so every worker thread shares one instance.
pub struct AppState {
    /// Connection pool, used by the health check. `None` when running
    /// against the in-memory store.
    pub db: Option<Database>,

    /// Program creation and lifecycle
    pub catalog: ProgramCatalog,

    /// Registration, cancellation and waitlist flows
    pub orchestrator: RegistrationOrchestrator,

    /// Time source shared with the services
    pub clock: Arc<dyn Clock>,

    /// Application configuration
    pub config: AppConfig,

    /// WebSocket connection registry for real-time updates
    pub ws_registry: WsRegistry,
}

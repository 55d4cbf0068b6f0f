//! # REST API Module
//!
//! This module defines all HTTP endpoints for the registration API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/programs` | Create program |
//! | GET | `/programs/:id` | Program details |
//! | GET | `/programs/:id/installments` | Installment plan preview |
//! | PATCH | `/programs/:id/status` | Lifecycle transition |
//! | PATCH | `/programs/:id/terms` | Price / capacity update |
//! | POST | `/registrations` | Register a player |
//! | GET | `/registrations/:id` | Registration with payments |
//! | POST | `/registrations/:id/payments/:payment_id/succeeded` | Record a paid installment |
//! | POST | `/registrations/:id/reconcile` | Recompute paid amount |
//! | GET | `/registrations/:id/refund-preview` | Refund preview |
//! | POST | `/registrations/:id/cancel` | Cancel and refund |
//! | GET | `/players/:player_id/registrations` | Player's registrations |
//! | GET, POST | `/programs/:id/waitlist` | List / join waitlist |
//! | GET, DELETE | `/programs/:id/waitlist/:player_id` | Position / leave |
//! | DELETE | `/waitlist/:entry_id` | Remove entry |
//! | POST | `/waitlist/:entry_id/claim` | Claim promoted spot |
//! | POST | `/waitlist/sweep` | Recycle expired promotions |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod routes;
pub mod handlers;

pub use routes::configure_routes;

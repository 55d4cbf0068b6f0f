//! # API Models
//!
//! This module defines the request and response structures for the REST API.
//! These are separate from database models so the wire format can carry
//! derived fields (balance due, waitlist state, display prices).
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;

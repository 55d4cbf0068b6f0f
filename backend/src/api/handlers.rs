//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the appropriate service
//! 3. Returns a formatted response
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "WAITLIST_FULL",
//!         "message": "The waitlist is full (10 players)"
//!     }
//! }
//! ```
//!
//! | Error | HTTP status |
//! |-------|-------------|
//! | Business rule conflict (`PROGRAM_FULL`, `ALREADY_REGISTERED`, ...) | 409 |
//! | Invalid input (`INVALID_INSTALLMENT_COUNT`, `NOT_ENTRY_OWNER`, ...) | 400 |
//! | Unknown record | 404 |
//! | Persistence failure | 500 |
//! | Card processor failure | 502 |

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{
    AddToWaitlistRequest, ApiResponse, CancelRegistrationRequest, CancellationResponse, ClaimResponse,
    ClaimSpotRequest, CreateProgramRequest, CreateRegistrationRequest, HealthResponse, PaymentRecordedResponse,
    ProgramResponse, RecordPaymentRequest, RegistrationDetailResponse, RegistrationResponse,
    StatusTransitionRequest, SweepResponse, UpdateTermsRequest, WaitlistEntryResponse,
    WaitlistPositionResponse, WaitlistResponse,
};
use crate::services::ServiceError;
use crate::AppState;

/// Map a service error to its HTTP status and error code.
pub fn error_status(e: &ServiceError) -> (StatusCode, String) {
    match e {
        ServiceError::Policy(p) => {
            let status = if p.is_conflict() {
                StatusCode::CONFLICT
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, p.code().to_string())
        }
        ServiceError::NotFound { entity, .. } => (
            StatusCode::NOT_FOUND,
            format!("{}_NOT_FOUND", entity.to_uppercase().replace(' ', "_")),
        ),
        ServiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR".to_string()),
        ServiceError::Payment(_) => (StatusCode::BAD_GATEWAY, "PAYMENT_PROVIDER_ERROR".to_string()),
    }
}

/// Build the error envelope for a failed service call.
fn error_response(operation: &str, e: ServiceError) -> HttpResponse {
    let (status, code) = error_status(&e);
    if status.is_server_error() {
        error!("{} failed: {}", operation, e);
    } else {
        warn!("{} rejected: {}", operation, e);
    }

    HttpResponse::build(status).json(ApiResponse::<()>::error(&code, &e.to_string()))
}

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Program Registration API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Registrations, installment payments, cancellations and waitlists for paid programs",
        "endpoints": {
            "health": { "method": "GET", "path": "/health" },
            "programs": {
                "create": { "method": "POST", "path": "/programs" },
                "get": { "method": "GET", "path": "/programs/{id}" },
                "installments": { "method": "GET", "path": "/programs/{id}/installments" },
                "status": { "method": "PATCH", "path": "/programs/{id}/status" },
                "terms": { "method": "PATCH", "path": "/programs/{id}/terms" },
                "waitlist": { "method": "GET | POST", "path": "/programs/{id}/waitlist" }
            },
            "registrations": {
                "create": { "method": "POST", "path": "/registrations" },
                "get": { "method": "GET", "path": "/registrations/{id}" },
                "paymentSucceeded": { "method": "POST", "path": "/registrations/{id}/payments/{payment_id}/succeeded" },
                "refundPreview": { "method": "GET", "path": "/registrations/{id}/refund-preview" },
                "cancel": { "method": "POST", "path": "/registrations/{id}/cancel" }
            },
            "waitlist": {
                "remove": { "method": "DELETE", "path": "/waitlist/{entry_id}" },
                "claim": { "method": "POST", "path": "/waitlist/{entry_id}/claim" }
            },
            "websocket": { "method": "GET", "path": "/ws/{player_id}" }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "database": true,
///         "websocketConnections": 3,
///         "version": "0.1.0",
///         "timestamp": "2024-01-15T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    // In-memory deployments have no pool to check
    let db_healthy = match &state.db {
        Some(db) => db.pool().get().await.is_ok(),
        None => true,
    };

    let response = HealthResponse {
        status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: db_healthy,
        websocket_connections: state.ws_registry.total_connections().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ============================================
// PROGRAMS
// ============================================

/// Create a program in `draft`.
///
/// ## Endpoint
///
/// `POST /programs`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/programs \
///   -H "Content-Type: application/json" \
///   -d '{"title":"Summer Camp","startDate":"2024-07-01T09:00:00Z","priceCents":10000,"maxParticipants":20,"waitlistEnabled":true}'
/// ```
pub async fn create_program(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateProgramRequest>,
) -> HttpResponse {
    let request = body.into_inner();
    info!("Create program request: {}", request.title);

    match state.catalog.create_program(request.into()).await {
        Ok(program) => HttpResponse::Created().json(ApiResponse::success(ProgramResponse::from(program))),
        Err(e) => error_response("Create program", e),
    }
}

/// Program details with the effective cancellation policy.
///
/// ## Endpoint
///
/// `GET /programs/{id}`
pub async fn get_program(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.catalog.get_program(path.into_inner()).await {
        Ok(program) => HttpResponse::Ok().json(ApiResponse::success(ProgramResponse::from(program))),
        Err(e) => error_response("Get program", e),
    }
}

/// Preview the installment plan a registration made now would get.
///
/// ## Endpoint
///
/// `GET /programs/{id}/installments`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": [
///         { "installmentNumber": 1, "amountCents": 3334, "dueDate": "2024-01-15T12:00:00Z" },
///         { "installmentNumber": 2, "amountCents": 3333, "dueDate": "2024-01-25T09:00:00Z" },
///         { "installmentNumber": 3, "amountCents": 3333, "dueDate": "2024-02-09T09:00:00Z" }
///     ]
/// }
/// ```
pub async fn get_installment_schedule(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.catalog.installment_schedule(path.into_inner()).await {
        Ok(schedule) => HttpResponse::Ok().json(ApiResponse::success(schedule)),
        Err(e) => error_response("Installment schedule", e),
    }
}

/// Move a program along its lifecycle.
///
/// ## Endpoint
///
/// `PATCH /programs/{id}/status`
pub async fn transition_program_status(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<StatusTransitionRequest>,
) -> HttpResponse {
    let program_id = path.into_inner();
    info!("Status transition request for program {} → {}", program_id, body.status);

    match state.catalog.transition_status(program_id, body.status).await {
        Ok(program) => HttpResponse::Ok().json(ApiResponse::success(ProgramResponse::from(program))),
        Err(e) => error_response("Status transition", e),
    }
}

/// Change price and/or capacity.
///
/// ## Endpoint
///
/// `PATCH /programs/{id}/terms`
///
/// Rejected with `TERMS_LOCKED` once any registration was confirmed or refunded.
pub async fn update_program_terms(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateTermsRequest>,
) -> HttpResponse {
    match state.catalog.update_terms(path.into_inner(), body.into_inner().into()).await {
        Ok(program) => HttpResponse::Ok().json(ApiResponse::success(ProgramResponse::from(program))),
        Err(e) => error_response("Update terms", e),
    }
}

// ============================================
// REGISTRATIONS
// ============================================

/// Register a player and create the installment rows.
///
/// ## Endpoint
///
/// `POST /registrations`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/registrations \
///   -H "Content-Type: application/json" \
///   -d '{"programId":"0b6f...","playerId":"93aa...","paymentPlan":"installment"}'
/// ```
pub async fn create_registration(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateRegistrationRequest>,
) -> HttpResponse {
    let request = body.into_inner();
    info!(
        "Registration request: player {} for program {}",
        request.player_id, request.program_id
    );

    let registered_by = request.registered_by.unwrap_or(request.player_id);
    match state
        .orchestrator
        .register_player(request.program_id, request.player_id, registered_by, request.payment_plan)
        .await
    {
        Ok(created) => HttpResponse::Created().json(ApiResponse::success(RegistrationDetailResponse::from(created))),
        Err(e) => error_response("Registration", e),
    }
}

/// Registration with its installment rows.
///
/// ## Endpoint
///
/// `GET /registrations/{id}`
pub async fn get_registration(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let registration_id = path.into_inner();
    let registrations = state.orchestrator.registrations();

    let registration = match registrations.get_registration(registration_id).await {
        Ok(registration) => registration,
        Err(e) => return error_response("Get registration", e),
    };
    match registrations.list_payments(registration_id).await {
        Ok(payments) => {
            HttpResponse::Ok().json(ApiResponse::success(RegistrationDetailResponse::new(registration, payments)))
        }
        Err(e) => error_response("List payments", e),
    }
}

/// Every registration of a player, newest first.
///
/// ## Endpoint
///
/// `GET /players/{player_id}/registrations`
pub async fn list_player_registrations(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state
        .orchestrator
        .registrations()
        .list_registrations_for_player(path.into_inner())
        .await
    {
        Ok(registrations) => {
            let data: Vec<RegistrationResponse> = registrations.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => error_response("List registrations", e),
    }
}

/// Record that an installment was paid.
///
/// ## Endpoint
///
/// `POST /registrations/{id}/payments/{payment_id}/succeeded`
///
/// The first successful payment confirms a pending registration.
pub async fn record_payment_success(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(Uuid, Uuid)>,
    body: Option<web::Json<RecordPaymentRequest>>,
) -> HttpResponse {
    let (registration_id, payment_id) = path.into_inner();
    let intent = body.and_then(|b| b.into_inner().payment_intent_id);
    info!("Payment {} succeeded for registration {}", payment_id, registration_id);

    match state.orchestrator.confirm_payment(registration_id, payment_id, intent).await {
        Ok(recorded) => HttpResponse::Ok().json(ApiResponse::success(PaymentRecordedResponse::from(recorded))),
        Err(e) => error_response("Record payment", e),
    }
}

/// Recompute `paidAmountCents` from the succeeded installments.
///
/// ## Endpoint
///
/// `POST /registrations/{id}/reconcile`
pub async fn reconcile_paid_amount(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.orchestrator.registrations().update_paid_amount(path.into_inner()).await {
        Ok(registration) => HttpResponse::Ok().json(ApiResponse::success(RegistrationResponse::from(registration))),
        Err(e) => error_response("Reconcile", e),
    }
}

/// What cancelling now would refund. Nothing changes.
///
/// ## Endpoint
///
/// `GET /registrations/{id}/refund-preview`
pub async fn preview_refund(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.orchestrator.preview_refund(path.into_inner()).await {
        Ok(refund) => HttpResponse::Ok().json(ApiResponse::success(refund)),
        Err(e) => error_response("Refund preview", e),
    }
}

/// Cancel a registration, refund per policy and promote the waitlist.
///
/// ## Endpoint
///
/// `POST /registrations/{id}/cancel`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/registrations/REGISTRATION_ID/cancel \
///   -H "Content-Type: application/json" \
///   -d '{"reason":"Injury"}'
/// ```
///
/// A refund failing part-way still returns 200; check `partialFailure`.
pub async fn cancel_registration(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: Option<web::Json<CancelRegistrationRequest>>,
) -> HttpResponse {
    let registration_id = path.into_inner();
    let reason = body.and_then(|b| b.into_inner().reason);
    info!("Cancellation request for registration {}", registration_id);

    match state.orchestrator.cancel_registration(registration_id, reason).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResponse::success(CancellationResponse::from(outcome))),
        Err(e) => error_response("Cancellation", e),
    }
}

// ============================================
// WAITLIST
// ============================================

/// A program's waitlist in queue order.
///
/// ## Endpoint
///
/// `GET /programs/{id}/waitlist`
pub async fn get_waitlist(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let program_id = path.into_inner();
    let now = state.clock.now();

    match state.orchestrator.waitlist().get_waitlist(program_id).await {
        Ok(entries) => {
            let entries: Vec<WaitlistEntryResponse> = entries
                .into_iter()
                .map(|e| WaitlistEntryResponse::at(e, now))
                .collect();
            HttpResponse::Ok().json(ApiResponse::success(WaitlistResponse {
                program_id,
                count: entries.len(),
                entries,
            }))
        }
        Err(e) => error_response("Get waitlist", e),
    }
}

/// Join a full program's waitlist.
///
/// ## Endpoint
///
/// `POST /programs/{id}/waitlist`
pub async fn add_to_waitlist(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<AddToWaitlistRequest>,
) -> HttpResponse {
    let program_id = path.into_inner();
    info!("Waitlist request: player {} for program {}", body.player_id, program_id);

    match state.orchestrator.waitlist().add_to_waitlist(program_id, body.player_id).await {
        Ok(entry) => {
            HttpResponse::Created().json(ApiResponse::success(WaitlistEntryResponse::at(entry, state.clock.now())))
        }
        Err(e) => error_response("Add to waitlist", e),
    }
}

/// A player's current 1-based position.
///
/// ## Endpoint
///
/// `GET /programs/{id}/waitlist/{player_id}`
pub async fn get_waitlist_position(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(Uuid, Uuid)>,
) -> HttpResponse {
    let (program_id, player_id) = path.into_inner();

    match state.orchestrator.waitlist().get_player_position(program_id, player_id).await {
        Ok(position) => HttpResponse::Ok().json(ApiResponse::success(WaitlistPositionResponse {
            program_id,
            player_id,
            position,
        })),
        Err(e) => error_response("Waitlist position", e),
    }
}

/// Remove a player from a program's waitlist.
///
/// ## Endpoint
///
/// `DELETE /programs/{id}/waitlist/{player_id}`
pub async fn remove_player_from_waitlist(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(Uuid, Uuid)>,
) -> HttpResponse {
    let (program_id, player_id) = path.into_inner();

    match state
        .orchestrator
        .waitlist()
        .remove_player_from_waitlist(program_id, player_id)
        .await
    {
        Ok(entry) => {
            HttpResponse::Ok().json(ApiResponse::success(WaitlistEntryResponse::at(entry, state.clock.now())))
        }
        Err(e) => error_response("Remove from waitlist", e),
    }
}

/// Remove a waitlist entry by id.
///
/// ## Endpoint
///
/// `DELETE /waitlist/{entry_id}`
pub async fn remove_waitlist_entry(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.orchestrator.waitlist().remove_from_waitlist(path.into_inner()).await {
        Ok(entry) => {
            HttpResponse::Ok().json(ApiResponse::success(WaitlistEntryResponse::at(entry, state.clock.now())))
        }
        Err(e) => error_response("Remove waitlist entry", e),
    }
}

/// Claim a promoted spot; creates the registration.
///
/// ## Endpoint
///
/// `POST /waitlist/{entry_id}/claim`
pub async fn claim_waitlist_spot(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<ClaimSpotRequest>,
) -> HttpResponse {
    let entry_id = path.into_inner();
    let request = body.into_inner();
    info!("Claim request for waitlist entry {} by player {}", entry_id, request.player_id);

    let registered_by = request.registered_by.unwrap_or(request.player_id);
    match state
        .orchestrator
        .claim_waitlist_spot(entry_id, request.player_id, registered_by, request.payment_plan)
        .await
    {
        Ok(outcome) => {
            HttpResponse::Created().json(ApiResponse::success(ClaimResponse::at(outcome, state.clock.now())))
        }
        Err(e) => error_response("Claim", e),
    }
}

/// Run the expired-promotion sweep now instead of waiting for the timer.
///
/// ## Endpoint
///
/// `POST /waitlist/sweep`
pub async fn sweep_expired_promotions(state: web::Data<Arc<AppState>>) -> HttpResponse {
    match state.orchestrator.sweep_expired_promotions().await {
        Ok(report) => HttpResponse::Ok().json(ApiResponse::success(SweepResponse::from(report))),
        Err(e) => error_response("Promotion sweep", e),
    }
}

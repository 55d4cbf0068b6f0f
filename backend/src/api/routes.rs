//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                                   GET - Health check
/// ├── /programs                                 POST - Create program
/// │   └── /:id                                  GET - Program details
/// │       ├── /installments                     GET - Installment preview
/// │       ├── /status                           PATCH - Lifecycle transition
/// │       ├── /terms                            PATCH - Price / capacity
/// │       └── /waitlist                         GET, POST - Queue
/// │           └── /:player_id                   GET, DELETE - Player's entry
/// ├── /registrations                            POST - Register
/// │   └── /:id                                  GET - Registration + payments
/// │       ├── /payments/:payment_id/succeeded   POST - Payment succeeded
/// │       ├── /reconcile                        POST - Recompute paid amount
/// │       ├── /refund-preview                   GET - Refund preview
/// │       └── /cancel                           POST - Cancel
/// ├── /players/:player_id/registrations         GET - Player's registrations
/// └── /waitlist
///     ├── /sweep                                POST - Recycle expired promotions
///     └── /:entry_id                            DELETE - Remove entry
///         └── /claim                            POST - Claim promoted spot
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Program endpoints
        .service(
            web::scope("/programs")
                .route("", web::post().to(handlers::create_program))
                .route("/{id}", web::get().to(handlers::get_program))
                .route("/{id}/installments", web::get().to(handlers::get_installment_schedule))
                .route("/{id}/status", web::patch().to(handlers::transition_program_status))
                .route("/{id}/terms", web::patch().to(handlers::update_program_terms))

                // Waitlist of a program
                .route("/{id}/waitlist", web::get().to(handlers::get_waitlist))
                .route("/{id}/waitlist", web::post().to(handlers::add_to_waitlist))
                .route("/{id}/waitlist/{player_id}", web::get().to(handlers::get_waitlist_position))
                .route("/{id}/waitlist/{player_id}", web::delete().to(handlers::remove_player_from_waitlist)),
        )

        // Registration endpoints
        .service(
            web::scope("/registrations")
                .route("", web::post().to(handlers::create_registration))
                .route("/{id}", web::get().to(handlers::get_registration))
                .route(
                    "/{id}/payments/{payment_id}/succeeded",
                    web::post().to(handlers::record_payment_success),
                )
                .route("/{id}/reconcile", web::post().to(handlers::reconcile_paid_amount))
                .route("/{id}/refund-preview", web::get().to(handlers::preview_refund))
                .route("/{id}/cancel", web::post().to(handlers::cancel_registration)),
        )

        .route(
            "/players/{player_id}/registrations",
            web::get().to(handlers::list_player_registrations),
        )

        // Waitlist entry endpoints
        .service(
            web::scope("/waitlist")
                // Registered before /{entry_id} so "sweep" is not parsed as an id
                .route("/sweep", web::post().to(handlers::sweep_expired_promotions))
                .route("/{entry_id}", web::delete().to(handlers::remove_waitlist_entry))
                .route("/{entry_id}/claim", web::post().to(handlers::claim_waitlist_spot)),
        );
}

//! # Program Registration Backend Service
//!
//! Entry point of the HTTP service. It provides:
//!
//! - REST API for programs, registrations, cancellations and waitlists
//! - WebSocket connections for lifecycle notifications
//! - A background sweep that recycles expired waitlist promotions
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `cargo run --bin registration-server`
//!
//! The schema in `migrations/` is applied on start-up.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use registration_backend::config::AppConfig;
use registration_backend::db::{Database, PostgresStore, Store};
use registration_backend::payments::StripeGateway;
use registration_backend::services::{
    Clock, ProgramCatalog, PromotionSweeper, RegistrationManager, RegistrationOrchestrator, SystemClock,
    WaitlistManager,
};
use registration_backend::websocket::{WsNotifier, WsRegistry};
use registration_backend::{api, websocket, AppState};

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Initializes the database connection and schema
/// 3. Wires the services
/// 4. Starts the promotion sweeper
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env()
        .expect("Failed to load configuration");

    // =========================================
    // STEP 2: Initialize Logging
    // =========================================
    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("🚀 Starting Program Registration Backend Service");
    info!("📋 Configuration loaded");
    info!("   Payment API: {}", config.payment_api_url);
    info!("   Claim window: {}h", config.promotion_claim_hours);

    // =========================================
    // STEP 3: Initialize Database
    // =========================================
    let db = Database::connect(&config.database_url, config.db_pool_size)
        .await
        .expect("Failed to connect to database");

    info!("🗄️  Database connected");

    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    info!("📦 Database migrations complete");

    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(db.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gateway = StripeGateway::new(
        &config.payment_api_url,
        &config.payment_api_key,
        config.payment_timeout_secs,
    )
    .expect("Failed to create payment client");

    let ws_registry = WsRegistry::new();
    let notifier = Arc::new(WsNotifier::new(ws_registry.clone()));

    let catalog = ProgramCatalog::new(store.clone(), clock.clone());
    let registrations = RegistrationManager::new(store.clone(), clock.clone());
    let waitlist = WaitlistManager::new(store.clone(), clock.clone(), config.promotion_claim_hours);
    let orchestrator = RegistrationOrchestrator::new(
        store,
        clock.clone(),
        registrations,
        waitlist,
        Arc::new(gateway),
        notifier,
    );

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        db: Some(db),
        catalog,
        orchestrator: orchestrator.clone(),
        clock,
        config: config.clone(),
        ws_registry,
    });

    // =========================================
    // STEP 6: Start Background Services
    // =========================================
    let sweeper = PromotionSweeper::new(orchestrator, config.promotion_sweep_interval);
    tokio::spawn(async move {
        sweeper.start_sweep_loop().await;
    });

    info!("⏰ Promotion sweeper started");

    // =========================================
    // STEP 7: Start HTTP Server
    // =========================================
    let bind_address = config.bind_address();
    info!("🌐 Starting HTTP server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())

            .configure(api::configure_routes)
            .configure(websocket::configure_routes)
    })
    .bind(bind_address)?
    .run()
    .await
}

//! # Database Module
//!
//! This module handles all persistence for the registration backend.
//! We use PostgreSQL for storing:
//!
//! - Programs (terms, capacity, cancellation policy overrides)
//! - Registrations and their installment schedules
//! - Sessions and attendance marks (refund proration inputs)
//! - Waitlist entries (positions, promotions, claims)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DATABASE LAYER                              │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │          repository traits (Arc<dyn Store>)               │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                 │                              │                 │
//! │                 ▼                              ▼                 │
//! │        ┌────────────────┐            ┌────────────────┐         │
//! │        │ PostgresStore  │            │  MemoryStore   │         │
//! │        │  (queries.rs)  │            │  (tests/dev)   │         │
//! │        └────────────────┘            └────────────────┘         │
//! │                 │                                                │
//! │        ┌────────────────┐                                       │
//! │        │Connection Pool │                                       │
//! │        │(deadpool-pg)   │                                       │
//! │        └────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod models;
pub mod postgres;
pub mod queries;
pub mod repository;

use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config as TokioConfig, NoTls};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A stored value could not be mapped onto the models
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl DatabaseError {
    /// Name of the violated unique constraint or index, if this is one.
    pub fn unique_violation(&self) -> Option<&str> {
        match self {
            DatabaseError::QueryError(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                e.as_db_error().and_then(|db| db.constraint())
            }
            _ => None,
        }
    }
}

/// Database connection wrapper.
///
/// This struct wraps the connection pool and provides
/// methods for common database operations.
///
/// ## Usage
///
/// ```rust,ignore
/// let db = Database::connect("postgres://...", 10).await?;
/// let program = queries::get_program(db.pool(), program_id).await?;
/// ```
#[derive(Clone)]
pub struct Database {
    /// The connection pool
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// ## Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    /// * `pool_size` - Maximum number of pooled connections
    ///
    /// ## Returns
    ///
    /// * `Ok(Database)` - Connected successfully
    /// * `Err(DatabaseError)` - Connection failed
    pub async fn connect(database_url: &str, pool_size: usize) -> Result<Self, DatabaseError> {
        info!("Connecting to database...");

        let tokio_config = database_url.parse::<TokioConfig>()
            .map_err(|e| DatabaseError::ConfigError(format!("Invalid database URL: {}", e)))?;

        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(tokio_postgres::config::Host::Tcp(host)) = tokio_config.get_hosts().first() {
            config.host = Some(host.clone());
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size: pool_size,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Verify the pool can hand out a working connection
        let client = pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;
        client.query("SELECT 1", &[]).await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connection established (pool size {})", pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// The schema script uses `IF NOT EXISTS` throughout, so running it
    /// against an initialized database is a no-op.
    ///
    /// ## Migration Files
    ///
    /// ```text
    /// migrations/
    /// └── 001_initial_schema.sql
    /// ```
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        let client = self.pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        let migration_paths = [
            "migrations/001_initial_schema.sql",
            "backend/migrations/001_initial_schema.sql",
            "../migrations/001_initial_schema.sql",
        ];

        let mut migration_sql = None;
        for path in &migration_paths {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!("Found migration file at: {}", path);
                    migration_sql = Some(content);
                    break;
                }
                Err(e) => debug!("Tried path '{}': {}", path, e),
            }
        }

        let migration_sql = migration_sql.ok_or_else(|| {
            error!("Could not find migration file. Tried paths: {:?}", migration_paths);
            DatabaseError::MigrationError(format!(
                "Could not find migration file. Tried paths: {:?}",
                migration_paths
            ))
        })?;

        match client.batch_execute(&migration_sql).await {
            Ok(_) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                // 42P07 = duplicate_table, 42710 = duplicate_object
                let code = e.code().map(|c| c.code().to_string());
                let is_duplicate = matches!(code.as_deref(), Some("42P07") | Some("42710"));

                if is_duplicate {
                    warn!("Some database objects already exist ({:?}), continuing", code);
                    Ok(())
                } else {
                    let detail = e.as_db_error()
                        .and_then(|db| db.detail())
                        .unwrap_or("No detail available");
                    error!("Migration execution error: {} ({:?}) {}", e, code, detail);
                    Err(DatabaseError::MigrationError(format!(
                        "{} (code {:?}, detail: {})",
                        e, code, detail
                    )))
                }
            }
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// Re-export commonly used items
pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PostgresStore;
pub use repository::*;

//! # Promotion Sweeper Service
//!
//! Background loop that recycles waitlist promotions whose claim window
//! closed and offers the seats to the next players in line.
//!
//! ## Sweep Flow
//!
//! ```text
//! Every N seconds:
//! 1. Find promoted, unclaimed entries past their expiry
//!               ↓
//! 2. Move each to the back of its queue, notify the player
//!               ↓
//! 3. For each affected program with an open seat,
//!    promote the next queued player
//! ```

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use super::orchestrator::{RegistrationOrchestrator, SweepReport};
use super::errors::ServiceResult;

/// Runs [`RegistrationOrchestrator::sweep_expired_promotions`] on a timer.
///
/// ## Usage
///
/// ```rust,ignore
/// let sweeper = PromotionSweeper::new(orchestrator, config.promotion_sweep_interval);
/// tokio::spawn(async move {
///     sweeper.start_sweep_loop().await;
/// });
/// ```
#[derive(Clone)]
pub struct PromotionSweeper {
    orchestrator: RegistrationOrchestrator,

    /// Seconds between sweeps.
    interval_secs: u64,
}

impl PromotionSweeper {
    pub fn new(orchestrator: RegistrationOrchestrator, interval_secs: u64) -> Self {
        Self {
            orchestrator,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the background sweep loop. Never returns.
    pub async fn start_sweep_loop(&self) {
        info!(
            "Starting promotion sweep loop (interval: {}s)",
            self.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            ticker.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Promotion sweep failed: {}", e);
            }
        }
    }

    /// Run a single sweep.
    pub async fn sweep_once(&self) -> ServiceResult<SweepReport> {
        debug!("Running scheduled promotion sweep...");
        self.orchestrator.sweep_expired_promotions().await
    }
}

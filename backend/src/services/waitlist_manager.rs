//! # Waitlist Manager Service
//!
//! Keeps the ordered queue of players waiting for a full program.
//!
//! ## Entry Lifecycle
//!
//! ```text
//!   add_to_waitlist()
//!          │
//!          ▼
//!      ┌────────┐  promote_from_waitlist()  ┌──────────┐  claim_promoted_spot()  ┌─────────┐
//!      │ queued │ ────────────────────────► │ promoted │ ──────────────────────► │ claimed │
//!      └────────┘                           └──────────┘                         └─────────┘
//!          ▲                                     │
//!          │   reset_expired_promotion()         │ claim window closes
//!          └──────── (moved to the tail) ◄───────┘
//! ```
//!
//! ## Position Invariant
//!
//! Positions within a program are always `1..N`. Removal and recycling go
//! through single atomic repository operations that close the gap they
//! leave, and new entries are appended at `max + 1`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    ProgramStatus, Store, StoreError, WaitlistEntryRecord, WaitlistState,
    WAITLIST_PLAYER_CONSTRAINT, WAITLIST_POSITION_CONSTRAINT,
};

use super::clock::Clock;
use super::errors::{PolicyViolation, ServiceError, ServiceResult};

/// Attempts at appending an entry when concurrent inserts take the same position.
const MAX_POSITION_ATTEMPTS: usize = 3;

/// Result of trying to promote the next player after a seat opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistPromotion {
    pub promoted: bool,
    pub player_id: Option<Uuid>,
    pub entry_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl WaitlistPromotion {
    fn none() -> Self {
        Self::default()
    }

    fn of(entry: &WaitlistEntryRecord) -> Self {
        Self {
            promoted: true,
            player_id: Some(entry.player_id),
            entry_id: Some(entry.id),
            expires_at: entry.promotion_expires_at,
        }
    }
}

/// Service owning waitlist entries.
#[derive(Clone)]
pub struct WaitlistManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    claim_window: Duration,
}

impl WaitlistManager {
    /// Create a new WaitlistManager.
    ///
    /// ## Arguments
    ///
    /// * `store` - Repository implementation
    /// * `clock` - Time source
    /// * `claim_hours` - How long a promoted player has to claim the spot
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, claim_hours: i64) -> Self {
        Self {
            store,
            clock,
            claim_window: Duration::hours(claim_hours),
        }
    }

    // ==========================================
    // QUERIES
    // ==========================================

    pub async fn get_entry(&self, entry_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        self.store
            .get_waitlist_entry(entry_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Waitlist entry", entry_id))
    }

    /// Entries of a program in queue order.
    pub async fn get_waitlist(&self, program_id: Uuid) -> ServiceResult<Vec<WaitlistEntryRecord>> {
        Ok(self.store.list_waitlist(program_id).await?)
    }

    /// A player's entry on a program's waitlist.
    pub async fn get_player_entry(&self, program_id: Uuid, player_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        self.store
            .find_waitlist_entry(program_id, player_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Waitlist entry", player_id))
    }

    /// A player's 1-based position on a program's waitlist.
    pub async fn get_player_position(&self, program_id: Uuid, player_id: Uuid) -> ServiceResult<i32> {
        Ok(self.get_player_entry(program_id, player_id).await?.position)
    }

    /// The lowest-positioned entry that has not been promoted yet.
    pub async fn get_next_in_waitlist(&self, program_id: Uuid) -> ServiceResult<Option<WaitlistEntryRecord>> {
        let entries = self.store.list_waitlist(program_id).await?;
        Ok(entries.into_iter().find(|e| e.promoted_at.is_none()))
    }

    /// Promoted entries whose claim window has closed without a claim.
    pub async fn get_expired_promotions(&self) -> ServiceResult<Vec<WaitlistEntryRecord>> {
        Ok(self.store.list_expired_promotions(self.clock.now()).await?)
    }

    // ==========================================
    // QUEUE MUTATIONS
    // ==========================================

    /// Append a player to a program's waitlist.
    ///
    /// ## Returns
    ///
    /// * `Ok(entry)` - Queued at `max + 1`
    /// * `Err(ServiceError::Policy)` - Not published, disabled, full, already queued or registered
    pub async fn add_to_waitlist(&self, program_id: Uuid, player_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        info!("Adding player {} to waitlist of program {}", player_id, program_id);

        let program = self
            .store
            .get_program(program_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Program", program_id))?;

        if program.status != ProgramStatus::Published {
            return Err(PolicyViolation::ProgramNotPublished { status: program.status }.into());
        }
        if !program.waitlist_enabled {
            return Err(PolicyViolation::WaitlistDisabled.into());
        }
        if let Some(limit) = program.waitlist_limit {
            if self.store.count_waitlist(program_id).await? >= i64::from(limit) {
                return Err(PolicyViolation::WaitlistFull { limit }.into());
            }
        }
        let existing = self.store.find_waitlist_entry(program_id, player_id).await?;
        if existing.as_ref().is_some_and(|e| e.registration_id.is_none()) {
            return Err(PolicyViolation::AlreadyOnWaitlist.into());
        }
        if self.store.find_active_registration(program_id, player_id).await?.is_some() {
            return Err(PolicyViolation::AlreadyRegistered.into());
        }
        if let Some(claimed) = existing {
            // The seat this entry claimed has been given up, so the row is history
            self.store
                .delete_waitlist_entry_and_compact(claimed.id, self.clock.now())
                .await?;
            debug!(
                "Dropped claimed entry {} of player {} before re-queueing",
                claimed.id, player_id
            );
        }

        let mut last_conflict = None;
        for attempt in 1..=MAX_POSITION_ATTEMPTS {
            let now = self.clock.now();
            let position = self.store.max_waitlist_position(program_id).await? + 1;
            let entry = WaitlistEntryRecord {
                id: Uuid::new_v4(),
                program_id,
                player_id,
                position,
                promoted_at: None,
                promotion_expires_at: None,
                notification_sent_at: None,
                registration_id: None,
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_waitlist_entry(&entry).await {
                Ok(()) => {
                    info!("📋 Player {} queued at position {}", player_id, position);
                    return Ok(entry);
                }
                Err(e) if e.is_unique_violation_of(WAITLIST_PLAYER_CONSTRAINT) => {
                    return Err(PolicyViolation::AlreadyOnWaitlist.into());
                }
                Err(e) if e.is_unique_violation_of(WAITLIST_POSITION_CONSTRAINT) => {
                    warn!(
                        "Position {} of program {} taken concurrently (attempt {}/{})",
                        position, program_id, attempt, MAX_POSITION_ATTEMPTS
                    );
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_conflict
            .unwrap_or_else(|| StoreError::UniqueViolation {
                constraint: WAITLIST_POSITION_CONSTRAINT.to_string(),
            })
            .into())
    }

    /// Delete an entry and shift every later entry up the queue.
    pub async fn remove_from_waitlist(&self, entry_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        // Resolve first so a missing entry reads as NotFound, not a store error
        self.get_entry(entry_id).await?;

        let removed = self.store.delete_waitlist_entry_and_compact(entry_id, self.clock.now()).await?;
        info!(
            "Removed player {} from waitlist of program {} (was position {})",
            removed.player_id, removed.program_id, removed.position
        );
        Ok(removed)
    }

    /// Remove a player from a program's waitlist.
    pub async fn remove_player_from_waitlist(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> ServiceResult<WaitlistEntryRecord> {
        let entry = self.get_player_entry(program_id, player_id).await?;
        self.remove_from_waitlist(entry.id).await
    }

    /// Re-derive positions `1..N` for a program. Returns how many moved.
    pub async fn renumber_waitlist(&self, program_id: Uuid) -> ServiceResult<usize> {
        let changed = self.store.renumber_waitlist(program_id, self.clock.now()).await?;
        if changed > 0 {
            warn!("Renumbered {} waitlist entries of program {}", changed, program_id);
        }
        Ok(changed)
    }

    // ==========================================
    // PROMOTION
    // ==========================================

    /// Offer a spot to a queued player.
    ///
    /// Sets `promoted_at`, `promotion_expires_at` (now + claim window) and
    /// `notification_sent_at`. The entry stays in the queue until claimed.
    pub async fn promote_from_waitlist(&self, entry_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        let now = self.clock.now();
        let mut entry = self.get_entry(entry_id).await?;

        if entry.registration_id.is_some() {
            return Err(PolicyViolation::PromotionAlreadyClaimed.into());
        }

        entry.promoted_at = Some(now);
        entry.promotion_expires_at = Some(now + self.claim_window);
        entry.notification_sent_at = Some(now);
        entry.updated_at = now;
        self.store.update_waitlist_entry(&entry).await?;

        info!(
            "🎉 Promoted player {} (position {}) for program {}, claim by {}",
            entry.player_id, entry.position, entry.program_id, now + self.claim_window
        );
        Ok(entry)
    }

    /// Check that `player_id` may claim the entry right now.
    pub fn check_claimable(&self, entry: &WaitlistEntryRecord, player_id: Uuid) -> Result<(), PolicyViolation> {
        if entry.player_id != player_id {
            return Err(PolicyViolation::NotEntryOwner);
        }
        match entry.state(self.clock.now()) {
            WaitlistState::Promoted => Ok(()),
            WaitlistState::Queued => Err(PolicyViolation::PromotionNotOffered),
            WaitlistState::Expired => Err(PolicyViolation::PromotionExpired),
            WaitlistState::Claimed => Err(PolicyViolation::PromotionAlreadyClaimed),
        }
    }

    /// Link the registration created for a promoted spot to its entry.
    pub async fn claim_promoted_spot(
        &self,
        entry_id: Uuid,
        registration_id: Uuid,
    ) -> ServiceResult<WaitlistEntryRecord> {
        let mut entry = self.get_entry(entry_id).await?;
        self.check_claimable(&entry, entry.player_id)?;

        entry.registration_id = Some(registration_id);
        entry.updated_at = self.clock.now();
        self.store.update_waitlist_entry(&entry).await?;

        info!(
            "✅ Player {} claimed spot in program {} with registration {}",
            entry.player_id, entry.program_id, registration_id
        );
        Ok(entry)
    }

    /// Clear an expired promotion and send the entry to the back of the queue.
    pub async fn reset_expired_promotion(&self, entry_id: Uuid) -> ServiceResult<WaitlistEntryRecord> {
        let entry = self.get_entry(entry_id).await?;
        if entry.registration_id.is_some() {
            return Err(PolicyViolation::PromotionAlreadyClaimed.into());
        }

        let recycled = self.store.move_waitlist_entry_to_tail(entry_id, self.clock.now()).await?;
        info!(
            "⏰ Promotion of player {} expired, moved from position {} to {}",
            recycled.player_id, entry.position, recycled.position
        );
        Ok(recycled)
    }

    /// Promote the next queued player of a program, if there is one.
    ///
    /// Only flips state; notifying the player is left to the caller.
    pub async fn process_waitlist_after_cancellation(&self, program_id: Uuid) -> ServiceResult<WaitlistPromotion> {
        match self.get_next_in_waitlist(program_id).await? {
            Some(next) => {
                let promoted = self.promote_from_waitlist(next.id).await?;
                Ok(WaitlistPromotion::of(&promoted))
            }
            None => {
                debug!("No queued players for program {}", program_id);
                Ok(WaitlistPromotion::none())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        MemoryStore, PaymentPlan, ProgramRecord, ProgramRepository, RegistrationRecord,
        RegistrationRepository, RegistrationStatus,
    };
    use crate::services::clock::FixedClock;

    fn program(now: DateTime<Utc>) -> ProgramRecord {
        ProgramRecord {
            id: Uuid::new_v4(),
            title: "Summer camp".to_string(),
            status: ProgramStatus::Published,
            start_date: now + Duration::days(20),
            registration_deadline: None,
            price_cents: 20_000,
            currency: "usd".to_string(),
            max_participants: Some(1),
            current_participants: 1,
            allow_installments: false,
            installment_count: 1,
            waitlist_enabled: true,
            waitlist_limit: Some(3),
            cancellation_policy: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup(program: &ProgramRecord) -> (Arc<MemoryStore>, Arc<FixedClock>, WaitlistManager) {
        let store = Arc::new(MemoryStore::new());
        store.insert_program(program).await.unwrap();
        let clock = Arc::new(FixedClock::new(program.created_at));
        let manager = WaitlistManager::new(store.clone(), clock.clone(), 48);
        (store, clock, manager)
    }

    fn registration(
        p: &ProgramRecord,
        player: Uuid,
        status: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> RegistrationRecord {
        RegistrationRecord {
            id: Uuid::new_v4(),
            program_id: p.id,
            player_id: player,
            registered_by: player,
            status,
            payment_plan: PaymentPlan::Full,
            total_amount_cents: p.price_cents,
            paid_amount_cents: p.price_cents,
            currency: p.currency.clone(),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: Some(now),
            cancelled_at: None,
            refunded_at: None,
        }
    }

    fn positions(entries: &[WaitlistEntryRecord]) -> Vec<(Uuid, i32)> {
        entries.iter().map(|e| (e.player_id, e.position)).collect()
    }

    #[tokio::test]
    async fn test_add_assigns_consecutive_positions() {
        let p = program(Utc::now());
        let (_, _, manager) = setup(&p).await;

        for expected in 1..=3 {
            let entry = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
            assert_eq!(entry.position, expected);
        }
    }

    #[tokio::test]
    async fn test_add_rejects_policy_violations() {
        let now = Utc::now();
        let p = program(now);
        let (store, _, manager) = setup(&p).await;

        let player = Uuid::new_v4();
        manager.add_to_waitlist(p.id, player).await.unwrap();
        let err = manager.add_to_waitlist(p.id, player).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::AlreadyOnWaitlist));

        manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let err = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::WaitlistFull { limit: 3 }));

        let mut disabled = program(now);
        disabled.waitlist_enabled = false;
        store.insert_program(&disabled).await.unwrap();
        let err = manager.add_to_waitlist(disabled.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::WaitlistDisabled));

        let mut draft = program(now);
        draft.status = ProgramStatus::Draft;
        store.insert_program(&draft).await.unwrap();
        let err = manager.add_to_waitlist(draft.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err.as_policy(), Some(PolicyViolation::ProgramNotPublished { .. })));
    }

    #[tokio::test]
    async fn test_add_rejects_registered_player() {
        let now = Utc::now();
        let p = program(now);
        let (store, _, manager) = setup(&p).await;
        let player = Uuid::new_v4();

        store
            .insert_registration(&registration(&p, player, RegistrationStatus::Confirmed, now))
            .await
            .unwrap();

        let err = manager.add_to_waitlist(p.id, player).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::AlreadyRegistered));
    }

    #[tokio::test]
    async fn test_remove_middle_entry_compacts() {
        let p = program(Utc::now());
        let (_, _, manager) = setup(&p).await;

        let first = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let second = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let third = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();

        let removed = manager.remove_from_waitlist(second.id).await.unwrap();
        assert_eq!(removed.position, 2);

        let remaining = manager.get_waitlist(p.id).await.unwrap();
        assert_eq!(
            positions(&remaining),
            vec![(first.player_id, 1), (third.player_id, 2)]
        );
    }

    #[tokio::test]
    async fn test_remove_player_and_missing_entry() {
        let p = program(Utc::now());
        let (_, _, manager) = setup(&p).await;
        let player = Uuid::new_v4();

        manager.add_to_waitlist(p.id, player).await.unwrap();
        manager.remove_player_from_waitlist(p.id, player).await.unwrap();
        assert!(manager.get_waitlist(p.id).await.unwrap().is_empty());

        let err = manager.remove_player_from_waitlist(p.id, player).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        let err = manager.remove_from_waitlist(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_promotion_skips_already_promoted_entries() {
        let p = program(Utc::now());
        let (_, clock, manager) = setup(&p).await;

        let first = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let second = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();

        let promotion = manager.process_waitlist_after_cancellation(p.id).await.unwrap();
        assert!(promotion.promoted);
        assert_eq!(promotion.player_id, Some(first.player_id));
        assert_eq!(promotion.expires_at, Some(clock.now() + Duration::hours(48)));

        let promoted = manager.get_entry(first.id).await.unwrap();
        assert_eq!(promoted.notification_sent_at, Some(clock.now()));
        assert_eq!(promoted.position, 1);

        let next = manager.get_next_in_waitlist(p.id).await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
    }

    #[tokio::test]
    async fn test_empty_waitlist_promotes_nobody() {
        let p = program(Utc::now());
        let (_, _, manager) = setup(&p).await;

        let promotion = manager.process_waitlist_after_cancellation(p.id).await.unwrap();
        assert_eq!(promotion, WaitlistPromotion::none());
    }

    #[tokio::test]
    async fn test_claim_requires_open_promotion() {
        let p = program(Utc::now());
        let (_, clock, manager) = setup(&p).await;

        let entry = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let err = manager.claim_promoted_spot(entry.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::PromotionNotOffered));

        let promoted = manager.promote_from_waitlist(entry.id).await.unwrap();
        assert_eq!(
            manager.check_claimable(&promoted, Uuid::new_v4()),
            Err(PolicyViolation::NotEntryOwner)
        );

        clock.advance(Duration::hours(49));
        let err = manager.claim_promoted_spot(entry.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::PromotionExpired));
    }

    #[tokio::test]
    async fn test_claim_links_registration() {
        let p = program(Utc::now());
        let (_, _, manager) = setup(&p).await;

        let entry = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.promote_from_waitlist(entry.id).await.unwrap();

        let registration_id = Uuid::new_v4();
        let claimed = manager.claim_promoted_spot(entry.id, registration_id).await.unwrap();
        assert_eq!(claimed.registration_id, Some(registration_id));

        let err = manager.claim_promoted_spot(entry.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::PromotionAlreadyClaimed));
    }

    #[tokio::test]
    async fn test_claimed_entry_does_not_fill_the_waitlist() {
        let mut p = program(Utc::now());
        p.waitlist_limit = Some(1);
        let (_, _, manager) = setup(&p).await;

        let entry = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.promote_from_waitlist(entry.id).await.unwrap();
        manager.claim_promoted_spot(entry.id, Uuid::new_v4()).await.unwrap();

        let next = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(next.position, 2);

        let err = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::WaitlistFull { limit: 1 }));
    }

    #[tokio::test]
    async fn test_claimed_player_can_rejoin_after_giving_up_the_seat() {
        let now = Utc::now();
        let p = program(now);
        let (store, _, manager) = setup(&p).await;
        let player = Uuid::new_v4();

        let entry = manager.add_to_waitlist(p.id, player).await.unwrap();
        let other = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.promote_from_waitlist(entry.id).await.unwrap();

        let mut seat = registration(&p, player, RegistrationStatus::Confirmed, now);
        store.insert_registration(&seat).await.unwrap();
        manager.claim_promoted_spot(entry.id, seat.id).await.unwrap();

        let err = manager.add_to_waitlist(p.id, player).await.unwrap_err();
        assert_eq!(err.as_policy(), Some(&PolicyViolation::AlreadyRegistered));

        seat.status = RegistrationStatus::Cancelled;
        seat.cancelled_at = Some(now);
        store.update_registration(&seat).await.unwrap();

        let rejoined = manager.add_to_waitlist(p.id, player).await.unwrap();
        assert_ne!(rejoined.id, entry.id);
        assert!(rejoined.registration_id.is_none());

        let queue = manager.get_waitlist(p.id).await.unwrap();
        assert_eq!(positions(&queue), vec![(other.player_id, 1), (player, 2)]);
    }

    #[tokio::test]
    async fn test_expired_promotion_recycles_to_tail() {
        let p = program(Utc::now());
        let (_, clock, manager) = setup(&p).await;

        let first = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let second = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        let third = manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.promote_from_waitlist(first.id).await.unwrap();

        assert!(manager.get_expired_promotions().await.unwrap().is_empty());
        clock.advance(Duration::hours(48) + Duration::seconds(1));

        let expired = manager.get_expired_promotions().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, first.id);

        let recycled = manager.reset_expired_promotion(first.id).await.unwrap();
        assert_eq!(recycled.position, 3);
        assert!(recycled.promoted_at.is_none());
        assert!(recycled.promotion_expires_at.is_none());
        assert!(recycled.notification_sent_at.is_none());

        let queue = manager.get_waitlist(p.id).await.unwrap();
        assert_eq!(
            positions(&queue),
            vec![(second.player_id, 1), (third.player_id, 2), (first.player_id, 3)]
        );
        assert_eq!(manager.get_player_position(p.id, first.player_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_positions_stay_contiguous_through_mixed_operations() {
        let mut p = program(Utc::now());
        p.waitlist_limit = None;
        let (_, _, manager) = setup(&p).await;

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap().id);
        }
        manager.remove_from_waitlist(ids[0]).await.unwrap();
        manager.remove_from_waitlist(ids[4]).await.unwrap();
        manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();
        manager.remove_from_waitlist(ids[7]).await.unwrap();
        manager.add_to_waitlist(p.id, Uuid::new_v4()).await.unwrap();

        let queue = manager.get_waitlist(p.id).await.unwrap();
        let got: Vec<i32> = queue.iter().map(|e| e.position).collect();
        let expected: Vec<i32> = (1..=queue.len() as i32).collect();
        assert_eq!(got, expected);
        assert_eq!(manager.renumber_waitlist(p.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_adds_get_distinct_positions() {
        let mut p = program(Utc::now());
        p.waitlist_limit = None;
        let (_, _, manager) = setup(&p).await;

        let adds = (0..10).map(|_| manager.add_to_waitlist(p.id, Uuid::new_v4()));
        let results = futures::future::join_all(adds).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let mut got: Vec<i32> = manager.get_waitlist(p.id).await.unwrap().iter().map(|e| e.position).collect();
        got.sort_unstable();
        assert_eq!(got, (1..=10).collect::<Vec<i32>>());
    }
}

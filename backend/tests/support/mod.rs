//! Shared fixtures for the lifecycle integration tests.
//!
//! Everything runs against `MemoryStore`, a `FixedClock`, a scripted
//! payment gateway and a notifier that records what it was asked to send.
//! The services see the store through [`FaultyStore`], which can be told
//! to reject some writes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use registration_backend::db::{
    AttendanceRepository, MemoryStore, PaymentPlan, PaymentRepository, ProgramRecord, ProgramRepository,
    ProgramStatus, RegistrationPaymentRecord, RegistrationRecord, RegistrationRepository, RegistrationStatus,
    StoreError, StoreResult, WaitlistEntryRecord, WaitlistRepository,
};
use registration_backend::payments::{PaymentError, PaymentGateway, PaymentIntent, RefundReceipt};
use registration_backend::services::{
    FixedClock, NewProgram, NotificationEvent, Notifier, NotifyError, ProgramCatalog, RegistrationManager,
    RegistrationOrchestrator, WaitlistManager,
};

pub const CLAIM_HOURS: i64 = 48;

/// A refund the fake gateway accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRefund {
    pub charge_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Default)]
struct GatewayState {
    refund_calls: usize,
    failing_refund_calls: HashSet<usize>,
    refunds: Vec<IssuedRefund>,
    cancelled_intents: Vec<String>,
}

/// Card processor double. Charges are derived from the intent id
/// (`pi_x` → `ch_pi_x`). Refund calls can be scripted to fail by their
/// 1-based call number.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
    yielding: AtomicBool,
}

impl FakeGateway {
    /// Make every processor call give up the task once before answering,
    /// the way a network round trip would.
    pub fn set_yielding(&self, yielding: bool) {
        self.yielding.store(yielding, Ordering::SeqCst);
    }

    async fn round_trip(&self) {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    pub fn fail_refund_call(&self, call_number: usize) {
        self.state.lock().unwrap().failing_refund_calls.insert(call_number);
    }

    pub fn refunds(&self) -> Vec<IssuedRefund> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn refund_calls(&self) -> usize {
        self.state.lock().unwrap().refund_calls
    }

    pub fn cancelled_intents(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled_intents.clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<RefundReceipt, PaymentError> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.refund_calls += 1;
        let call = state.refund_calls;

        if state.failing_refund_calls.contains(&call) {
            return Err(PaymentError::Api {
                status: 402,
                message: "charge_already_refunded".to_string(),
            });
        }

        state.refunds.push(IssuedRefund {
            charge_id: charge_id.to_string(),
            amount_cents,
            reason: reason.to_string(),
            metadata: metadata.clone(),
        });
        Ok(RefundReceipt {
            id: format!("re_{}", call),
            amount_cents,
            status: "succeeded".to_string(),
        })
    }

    async fn get_payment_intent(&self, payment_intent_id: &str) -> Result<PaymentIntent, PaymentError> {
        self.round_trip().await;
        Ok(PaymentIntent {
            id: payment_intent_id.to_string(),
            status: "succeeded".to_string(),
            latest_charge: Some(format!("ch_{}", payment_intent_id)),
        })
    }

    async fn cancel_payment_intent(&self, payment_intent_id: &str) -> Result<(), PaymentError> {
        self.state
            .lock()
            .unwrap()
            .cancelled_intents
            .push(payment_intent_id.to_string());
        Ok(())
    }
}

/// `MemoryStore` wrapper whose payment and waitlist writes can be switched off.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing_payment_writes: AtomicBool,
    failing_waitlist_writes: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_payment_writes: AtomicBool::new(false),
            failing_waitlist_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_payment_writes(&self, failing: bool) {
        self.failing_payment_writes.store(failing, Ordering::SeqCst);
    }

    pub fn fail_waitlist_writes(&self, failing: bool) {
        self.failing_waitlist_writes.store(failing, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramRepository for FaultyStore {
    async fn get_program(&self, program_id: Uuid) -> StoreResult<Option<ProgramRecord>> {
        self.inner.get_program(program_id).await
    }

    async fn insert_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        self.inner.insert_program(program).await
    }

    async fn update_program(&self, program: &ProgramRecord) -> StoreResult<()> {
        self.inner.update_program(program).await
    }

    async fn adjust_participant_count(&self, program_id: Uuid, delta: i32, now: DateTime<Utc>) -> StoreResult<i32> {
        self.inner.adjust_participant_count(program_id, delta, now).await
    }

    async fn has_settled_registrations(&self, program_id: Uuid) -> StoreResult<bool> {
        self.inner.has_settled_registrations(program_id).await
    }
}

#[async_trait]
impl RegistrationRepository for FaultyStore {
    async fn get_registration(&self, registration_id: Uuid) -> StoreResult<Option<RegistrationRecord>> {
        self.inner.get_registration(registration_id).await
    }

    async fn find_active_registration(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<RegistrationRecord>> {
        self.inner.find_active_registration(program_id, player_id).await
    }

    async fn insert_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        self.inner.insert_registration(registration).await
    }

    async fn update_registration(&self, registration: &RegistrationRecord) -> StoreResult<()> {
        self.inner.update_registration(registration).await
    }

    async fn begin_cancellation(
        &self,
        registration_id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(RegistrationStatus, RegistrationRecord)>> {
        self.inner.begin_cancellation(registration_id, reason, now).await
    }

    async fn list_registrations_for_player(&self, player_id: Uuid) -> StoreResult<Vec<RegistrationRecord>> {
        self.inner.list_registrations_for_player(player_id).await
    }
}

#[async_trait]
impl PaymentRepository for FaultyStore {
    async fn insert_payments(&self, payments: &[RegistrationPaymentRecord]) -> StoreResult<()> {
        self.inner.insert_payments(payments).await
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<RegistrationPaymentRecord>> {
        self.inner.get_payment(payment_id).await
    }

    async fn list_payments(&self, registration_id: Uuid) -> StoreResult<Vec<RegistrationPaymentRecord>> {
        self.inner.list_payments(registration_id).await
    }

    async fn update_payment(&self, payment: &RegistrationPaymentRecord) -> StoreResult<()> {
        Self::check(&self.failing_payment_writes)?;
        self.inner.update_payment(payment).await
    }

    async fn sum_succeeded_payments(&self, registration_id: Uuid) -> StoreResult<i64> {
        self.inner.sum_succeeded_payments(registration_id).await
    }
}

#[async_trait]
impl AttendanceRepository for FaultyStore {
    async fn count_active_sessions(&self, program_id: Uuid) -> StoreResult<i64> {
        self.inner.count_active_sessions(program_id).await
    }

    async fn count_attended_sessions(&self, registration_id: Uuid) -> StoreResult<i64> {
        self.inner.count_attended_sessions(registration_id).await
    }
}

#[async_trait]
impl WaitlistRepository for FaultyStore {
    async fn get_waitlist_entry(&self, entry_id: Uuid) -> StoreResult<Option<WaitlistEntryRecord>> {
        self.inner.get_waitlist_entry(entry_id).await
    }

    async fn find_waitlist_entry(
        &self,
        program_id: Uuid,
        player_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntryRecord>> {
        self.inner.find_waitlist_entry(program_id, player_id).await
    }

    async fn list_waitlist(&self, program_id: Uuid) -> StoreResult<Vec<WaitlistEntryRecord>> {
        self.inner.list_waitlist(program_id).await
    }

    async fn count_waitlist(&self, program_id: Uuid) -> StoreResult<i64> {
        self.inner.count_waitlist(program_id).await
    }

    async fn max_waitlist_position(&self, program_id: Uuid) -> StoreResult<i32> {
        self.inner.max_waitlist_position(program_id).await
    }

    async fn insert_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        Self::check(&self.failing_waitlist_writes)?;
        self.inner.insert_waitlist_entry(entry).await
    }

    async fn update_waitlist_entry(&self, entry: &WaitlistEntryRecord) -> StoreResult<()> {
        Self::check(&self.failing_waitlist_writes)?;
        self.inner.update_waitlist_entry(entry).await
    }

    async fn delete_waitlist_entry_and_compact(
        &self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntryRecord> {
        Self::check(&self.failing_waitlist_writes)?;
        self.inner.delete_waitlist_entry_and_compact(entry_id, now).await
    }

    async fn move_waitlist_entry_to_tail(&self, entry_id: Uuid, now: DateTime<Utc>) -> StoreResult<WaitlistEntryRecord> {
        Self::check(&self.failing_waitlist_writes)?;
        self.inner.move_waitlist_entry_to_tail(entry_id, now).await
    }

    async fn renumber_waitlist(&self, program_id: Uuid, now: DateTime<Utc>) -> StoreResult<usize> {
        Self::check(&self.failing_waitlist_writes)?;
        self.inner.renumber_waitlist(program_id, now).await
    }

    async fn list_expired_promotions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntryRecord>> {
        self.inner.list_expired_promotions(now).await
    }
}

/// Notifier that remembers every event. Can be switched to failing.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(Uuid, NotificationEvent)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Uuid, NotificationEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, player_id: Uuid) -> Vec<NotificationEvent> {
        self.events()
            .into_iter()
            .filter(|(p, _)| *p == player_id)
            .map(|(_, e)| e)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, player_id: Uuid, event: NotificationEvent) -> Result<(), NotifyError> {
        if *self.failing.lock().unwrap() {
            return Err(NotifyError::Delivery("socket closed".to_string()));
        }
        self.events.lock().unwrap().push((player_id, event));
        Ok(())
    }
}

/// Fully wired services over in-memory doubles.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub clock: Arc<FixedClock>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub catalog: ProgramCatalog,
    pub orchestrator: RegistrationOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let clock = Arc::new(FixedClock::new(epoch()));
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let catalog = ProgramCatalog::new(faults.clone(), clock.clone());
        let registrations = RegistrationManager::new(faults.clone(), clock.clone());
        let waitlist = WaitlistManager::new(faults.clone(), clock.clone(), CLAIM_HOURS);
        let orchestrator = RegistrationOrchestrator::new(
            faults.clone(),
            clock.clone(),
            registrations,
            waitlist,
            gateway.clone(),
            notifier.clone(),
        );

        Self {
            store,
            faults,
            clock,
            gateway,
            notifier,
            catalog,
            orchestrator,
        }
    }

    /// Create and publish a program.
    pub async fn published_program(&self, new: NewProgram) -> ProgramRecord {
        let program = self.catalog.create_program(new).await.unwrap();
        self.catalog
            .transition_status(program.id, ProgramStatus::Published)
            .await
            .unwrap()
    }

    /// Register a player and pay every installment. Intents are `pi_<n>_<player>`.
    pub async fn register_paid(&self, program_id: Uuid, player_id: Uuid, plan: PaymentPlan) -> RegistrationRecord {
        let created = self
            .orchestrator
            .register_player(program_id, player_id, player_id, Some(plan))
            .await
            .unwrap();

        let mut registration = created.registration;
        for payment in created.payments {
            let intent = format!("pi_{}_{}", payment.installment_number, player_id);
            registration = self
                .orchestrator
                .confirm_payment(registration.id, payment.id, Some(intent))
                .await
                .unwrap()
                .registration;
        }
        registration
    }

    pub async fn program(&self, program_id: Uuid) -> ProgramRecord {
        self.catalog.get_program(program_id).await.unwrap()
    }
}

/// A fixed, whole-hour instant so day arithmetic in tests is exact.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A capacity-limited program starting `start_in_days` after [`epoch`].
pub fn capped_program(start_in_days: i64, price_cents: i64, capacity: i32) -> NewProgram {
    NewProgram {
        title: "Spring skills clinic".to_string(),
        start_date: epoch() + Duration::days(start_in_days),
        registration_deadline: None,
        price_cents,
        currency: "usd".to_string(),
        max_participants: Some(capacity),
        allow_installments: false,
        installment_count: 1,
        waitlist_enabled: true,
        waitlist_limit: None,
        cancellation_policy: None,
    }
}

/// Same as [`capped_program`] with an installment plan.
pub fn installment_program(start_in_days: i64, price_cents: i64, capacity: i32, count: i32) -> NewProgram {
    NewProgram {
        allow_installments: true,
        installment_count: count,
        ..capped_program(start_in_days, price_cents, capacity)
    }
}

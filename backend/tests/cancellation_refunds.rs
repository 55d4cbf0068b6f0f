//! Cancellation: refund policy applied to real installment rows,
//! processor failures, pending installments and seat release.

mod support;

use chrono::Duration;
use uuid::Uuid;

use registration_backend::db::{
    AttendanceRecord, PaymentPlan, PaymentRepository, PaymentStatus, ProgramSessionRecord, RegistrationStatus,
};
use registration_backend::services::PolicyViolation;

use support::{capped_program, epoch, installment_program, Harness};

async fn payments(h: &Harness, registration_id: Uuid) -> Vec<registration_backend::db::RegistrationPaymentRecord> {
    h.orchestrator
        .registrations()
        .list_payments(registration_id)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_partial_refund_unwinds_newest_installments_first() {
    let h = Harness::new();
    let program = h.published_program(installment_program(5, 10_000, 10, 3)).await;
    let player = Uuid::new_v4();
    let registration = h.register_paid(program.id, player, PaymentPlan::Installment).await;
    assert_eq!(registration.paid_amount_cents, 10_000);

    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert_eq!(outcome.refund.refund_percent, 50);
    assert_eq!(outcome.refund.refund_amount_cents, 5_000);
    assert_eq!(outcome.refunds_issued, 2);
    assert_eq!(outcome.refunded_amount_cents, 5_000);
    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
    // Paid amount records what was collected, refunds are tracked per installment
    assert_eq!(outcome.registration.paid_amount_cents, 10_000);

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 2);
    assert_eq!(refunds[0].charge_id, format!("ch_pi_3_{}", player));
    assert_eq!(refunds[0].amount_cents, 3_333);
    assert_eq!(refunds[1].charge_id, format!("ch_pi_2_{}", player));
    assert_eq!(refunds[1].amount_cents, 1_667);
    assert_eq!(refunds[1].metadata["installment_number"], "2");

    let rows = payments(&h, registration.id).await;
    assert_eq!(rows[0].status, PaymentStatus::Succeeded);
    assert_eq!(rows[0].refunded_amount_cents, 0);
    assert_eq!(rows[1].status, PaymentStatus::Refunded);
    assert_eq!(rows[1].refunded_amount_cents, 1_667);
    assert_eq!(rows[1].refund_id.as_deref(), Some("re_2"));
    assert_eq!(rows[2].status, PaymentStatus::Refunded);
    assert_eq!(rows[2].refunded_amount_cents, 3_333);
    assert_eq!(rows[2].refund_id.as_deref(), Some("re_1"));
}

#[tokio::test]
async fn test_refund_failure_midway_is_reported_not_retried() {
    let h = Harness::new();
    let program = h.published_program(installment_program(5, 10_000, 10, 3)).await;
    let registration = h
        .register_paid(program.id, Uuid::new_v4(), PaymentPlan::Installment)
        .await;
    h.gateway.fail_refund_call(2);

    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert!(outcome.partial_failure);
    assert_eq!(outcome.refunds_issued, 1);
    assert_eq!(outcome.refunds_failed, 1);
    assert_eq!(outcome.refunded_amount_cents, 3_333);
    assert_eq!(outcome.refund.refund_amount_cents, 5_000);
    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
    assert_eq!(h.gateway.refund_calls(), 2);

    let rows = payments(&h, registration.id).await;
    assert_eq!(rows[1].status, PaymentStatus::Succeeded);
    assert_eq!(rows[1].refunded_amount_cents, 0);
    assert_eq!(rows[2].status, PaymentStatus::Refunded);
    assert_eq!(h.program(program.id).await.current_participants, 0);
}

#[tokio::test]
async fn test_first_refund_failing_leaves_registration_cancelled() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 2)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    h.gateway.fail_refund_call(1);

    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert!(outcome.partial_failure);
    assert_eq!(outcome.refunds_issued, 0);
    assert_eq!(outcome.refunded_amount_cents, 0);
    assert_eq!(outcome.registration.status, RegistrationStatus::Cancelled);
    assert!(outcome.registration.refunded_at.is_none());
    assert!(outcome.registration.cancelled_at.is_some());
    assert_eq!(h.program(program.id).await.current_participants, 0);
}

#[tokio::test]
async fn test_unpaid_installments_are_cancelled() {
    let h = Harness::new();
    let program = h.published_program(installment_program(30, 9_000, 10, 3)).await;

    let created = h
        .orchestrator
        .register_player(program.id, Uuid::new_v4(), Uuid::new_v4(), None)
        .await
        .unwrap();
    h.orchestrator
        .confirm_payment(created.registration.id, created.payments[0].id, Some("pi_first".to_string()))
        .await
        .unwrap();

    // The player opened a checkout for the second installment but never paid
    let mut started = created.payments[1].clone();
    started.payment_intent_id = Some("pi_open".to_string());
    h.store.update_payment(&started).await.unwrap();

    let outcome = h
        .orchestrator
        .cancel_registration(created.registration.id, None)
        .await
        .unwrap();

    assert_eq!(outcome.refund.refund_amount_cents, 3_000);
    assert_eq!(outcome.refunded_amount_cents, 3_000);
    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
    assert_eq!(h.gateway.refunds()[0].charge_id, "ch_pi_first");
    assert_eq!(h.gateway.cancelled_intents(), vec!["pi_open".to_string()]);

    let statuses: Vec<PaymentStatus> = payments(&h, created.registration.id)
        .await
        .iter()
        .map(|p| p.status)
        .collect();
    assert_eq!(
        statuses,
        vec![PaymentStatus::Refunded, PaymentStatus::Cancelled, PaymentStatus::Cancelled]
    );
}

#[tokio::test]
async fn test_cancelling_unpaid_registration_keeps_participant_count() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 2)).await;
    h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;

    let created = h
        .orchestrator
        .register_player(program.id, Uuid::new_v4(), Uuid::new_v4(), None)
        .await
        .unwrap();
    let outcome = h
        .orchestrator
        .cancel_registration(created.registration.id, None)
        .await
        .unwrap();

    assert_eq!(outcome.registration.status, RegistrationStatus::Cancelled);
    assert!(!outcome.refund.eligible_for_refund);
    assert_eq!(h.gateway.refund_calls(), 0);
    assert_eq!(h.program(program.id).await.current_participants, 1);

    let err = h
        .orchestrator
        .cancel_registration(created.registration.id, None)
        .await
        .unwrap_err();
    assert_eq!(
        err.as_policy(),
        Some(&PolicyViolation::RegistrationNotActive { status: RegistrationStatus::Cancelled })
    );
}

#[tokio::test]
async fn test_late_cancellation_refunds_nothing_but_frees_the_seat() {
    let h = Harness::new();
    let program = h.published_program(capped_program(2, 6_000, 1)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    let queued = Uuid::new_v4();
    h.orchestrator.waitlist().add_to_waitlist(program.id, queued).await.unwrap();

    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert!(outcome.refund.reason.starts_with("No refund"));
    assert_eq!(outcome.registration.status, RegistrationStatus::Cancelled);
    assert_eq!(h.gateway.refund_calls(), 0);
    assert!(outcome.promotion.promoted);
    assert_eq!(outcome.promotion.player_id, Some(queued));
}

#[tokio::test]
async fn test_after_start_refund_is_prorated_by_attendance() {
    let h = Harness::new();
    let program = h.published_program(capped_program(10, 10_000, 5)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;

    let mut sessions = Vec::new();
    for week in 0..5 {
        let session = ProgramSessionRecord {
            id: Uuid::new_v4(),
            program_id: program.id,
            starts_at: program.start_date + Duration::weeks(week),
            cancelled: week == 4,
        };
        h.store.insert_session(session.clone()).await;
        sessions.push(session);
    }
    h.store
        .record_attendance(AttendanceRecord {
            session_id: sessions[0].id,
            registration_id: registration.id,
            attended: true,
        })
        .await;
    h.store
        .record_attendance(AttendanceRecord {
            session_id: sessions[1].id,
            registration_id: registration.id,
            attended: false,
        })
        .await;

    h.clock.set(epoch() + Duration::days(12));
    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert_eq!(outcome.refund.sessions_attended, 1);
    assert_eq!(outcome.refund.sessions_remaining, 3);
    assert_eq!(outcome.refund.refund_percent, 75);
    assert_eq!(outcome.refunded_amount_cents, 7_500);
    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
}

#[tokio::test]
async fn test_notification_failures_do_not_fail_cancellation() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 1)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    h.orchestrator
        .waitlist()
        .add_to_waitlist(program.id, Uuid::new_v4())
        .await
        .unwrap();
    h.notifier.set_failing(true);

    let outcome = h.orchestrator.cancel_registration(registration.id, None).await.unwrap();

    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
    assert!(outcome.promotion.promoted);
}

#[tokio::test]
async fn test_concurrent_cancellations_refund_once() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 2)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    assert_eq!(h.program(program.id).await.current_participants, 2);
    h.gateway.set_yielding(true);

    let (first, second) = tokio::join!(
        h.orchestrator.cancel_registration(registration.id, None),
        h.orchestrator.cancel_registration(registration.id, None),
    );

    let (won, lost) = match (first, second) {
        (Ok(outcome), Err(e)) | (Err(e), Ok(outcome)) => (outcome, e),
        (first, second) => panic!("expected exactly one cancellation, got {:?} and {:?}", first, second),
    };
    assert!(matches!(
        lost.as_policy(),
        Some(PolicyViolation::RegistrationNotActive { .. })
    ));
    assert_eq!(won.refunds_issued, 1);
    assert_eq!(h.gateway.refunds().len(), 1);
    assert_eq!(h.gateway.refunds()[0].amount_cents, won.refunded_amount_cents);
    assert_eq!(h.program(program.id).await.current_participants, 1);
}

#[tokio::test]
async fn test_cancelling_twice_is_rejected_without_refunding_again() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 2)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;

    h.orchestrator.cancel_registration(registration.id, None).await.unwrap();
    let err = h
        .orchestrator
        .cancel_registration(registration.id, None)
        .await
        .unwrap_err();

    assert_eq!(
        err.as_policy(),
        Some(&PolicyViolation::RegistrationNotActive {
            status: RegistrationStatus::Refunded
        })
    );
    assert_eq!(h.gateway.refund_calls(), 1);
    assert_eq!(h.program(program.id).await.current_participants, 0);
}

#[tokio::test]
async fn test_refund_is_reported_even_when_its_payment_row_cannot_be_written() {
    let h = Harness::new();
    let program = h.published_program(capped_program(30, 4_000, 2)).await;
    let registration = h.register_paid(program.id, Uuid::new_v4(), PaymentPlan::Full).await;
    h.faults.fail_payment_writes(true);

    let outcome = h
        .orchestrator
        .cancel_registration(registration.id, Some("moving away".to_string()))
        .await
        .unwrap();

    assert!(!outcome.partial_failure);
    assert_eq!(outcome.refunds_issued, 1);
    assert_eq!(outcome.refunds_unrecorded, 1);
    assert!(outcome.refunded_amount_cents > 0);
    assert_eq!(outcome.refunded_amount_cents, outcome.refund.refund_amount_cents);
    assert_eq!(outcome.registration.status, RegistrationStatus::Refunded);
    assert_eq!(outcome.registration.cancellation_reason.as_deref(), Some("moving away"));
    assert_eq!(h.gateway.refunds().len(), 1);
    assert_eq!(h.program(program.id).await.current_participants, 0);

    // A retry must not reach the processor again
    h.faults.fail_payment_writes(false);
    let err = h
        .orchestrator
        .cancel_registration(registration.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_policy(),
        Some(PolicyViolation::RegistrationNotActive { .. })
    ));
    assert_eq!(h.gateway.refund_calls(), 1);
}

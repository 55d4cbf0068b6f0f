//! # Refund Calculator
//!
//! Pure policy evaluation: given a registration, its program and the
//! attendance counts, decide how much of the paid amount is returned.
//! No I/O happens here, so the same function backs both refund previews
//! and actual cancellations.
//!
//! ## Decision Tree
//!
//! ```text
//! days until start > 0 ?
//!   ├── yes ─┬─ days >= full window     → 100%
//!   │        ├─ days >= partial window  → partial percent
//!   │        └─ otherwise               → 0% (too close to start)
//!   └── no ──┬─ no refund after start and no proration → 0%
//!            ├─ prorating and sessions remain          → per-session value × remaining
//!            └─ otherwise                              → 0% (all sessions completed)
//! ```
//!
//! Each division rounds half up on its own: the prorated amount is
//! `round(paid / total) × remaining`, not `round(paid × remaining / total)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{CancellationPolicy, ProgramRecord, RegistrationRecord};
use crate::utils::{days_until, round_half_up_div};

/// Outcome of a refund evaluation. Computed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundCalculation {
    pub eligible_for_refund: bool,
    pub refund_amount_cents: i64,
    pub refund_percent: i64,
    pub sessions_attended: i64,
    pub sessions_remaining: i64,
    pub reason: String,
}

/// Evaluate the program's cancellation policy for a registration at `now`.
///
/// ## Arguments
///
/// * `registration` - Supplies `paid_amount_cents`
/// * `program` - Supplies the start date and the policy overrides
/// * `sessions_attended` - Attendance marks for this registration
/// * `total_sessions` - Non-cancelled sessions of the program
/// * `now` - Evaluation instant
pub fn calculate_refund(
    registration: &RegistrationRecord,
    program: &ProgramRecord,
    sessions_attended: i64,
    total_sessions: i64,
    now: DateTime<Utc>,
) -> RefundCalculation {
    let policy = program.resolved_policy();
    evaluate(
        &policy,
        registration.paid_amount_cents,
        days_until(now, program.start_date),
        sessions_attended,
        total_sessions,
    )
}

fn evaluate(
    policy: &CancellationPolicy,
    paid: i64,
    days_until_start: i64,
    sessions_attended: i64,
    total_sessions: i64,
) -> RefundCalculation {
    let sessions_remaining = (total_sessions - sessions_attended).max(0);
    let decision = |amount: i64, percent: i64, reason: String| RefundCalculation {
        eligible_for_refund: amount > 0,
        refund_amount_cents: amount,
        refund_percent: percent,
        sessions_attended,
        sessions_remaining,
        reason,
    };

    if days_until_start > 0 {
        if days_until_start >= policy.full_refund_days_before_start {
            return decision(
                paid,
                100,
                format!("Full refund: cancelled {} days before start", days_until_start),
            );
        }
        if days_until_start >= policy.partial_refund_days_before_start {
            let percent = policy.partial_refund_percent;
            return decision(
                round_half_up_div(paid * percent, 100),
                percent,
                format!(
                    "Partial refund ({}%): cancelled {} days before start",
                    percent, days_until_start
                ),
            );
        }
        return decision(
            0,
            0,
            format!(
                "No refund: cancellation is too close to start ({} days, minimum {})",
                days_until_start, policy.partial_refund_days_before_start
            ),
        );
    }

    if policy.no_refund_after_start && !policy.prorate_by_sessions_attended {
        return decision(0, 0, "No refund: program has already started".to_string());
    }

    if policy.prorate_by_sessions_attended && sessions_remaining > 0 && total_sessions > 0 {
        let per_session = round_half_up_div(paid, total_sessions);
        let percent = round_half_up_div(sessions_remaining * 100, total_sessions);
        return decision(
            per_session * sessions_remaining,
            percent,
            format!(
                "Prorated refund for {} of {} sessions remaining",
                sessions_remaining, total_sessions
            ),
        );
    }

    decision(0, 0, "No refund: all sessions completed".to_string())
}

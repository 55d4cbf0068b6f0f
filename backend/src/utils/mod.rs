//! # Utilities Module
//!
//! Helper functions shared by the services: money formatting and the
//! integer/day arithmetic the refund and installment rules are written in.

use chrono::{DateTime, Utc};

/// Milliseconds in one calendar day.
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Format an amount in cents as a human-readable string.
///
/// ## Arguments
///
/// * `amount_cents` - Amount in the currency's smallest unit
/// * `currency` - ISO currency code, printed upper-cased after the amount
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_cents(123_456, "usd"), "1,234.56 USD");
/// assert_eq!(format_cents(-50, "eur"), "-0.50 EUR");
/// ```
pub fn format_cents(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    let whole = abs / 100;
    let frac = abs % 100;

    // Add thousands separators
    let whole_str = whole.to_string();
    let mut grouped = String::new();
    for (i, c) in whole_str.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let whole_grouped: String = grouped.chars().rev().collect();

    format!("{}{}.{:02} {}", sign, whole_grouped, frac, currency.to_uppercase())
}

/// Divide and round half up.
///
/// Both operands are expected to be non-negative; this is the rounding the
/// refund rules use for every intermediate division.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(round_half_up_div(5, 2), 3);
/// assert_eq!(round_half_up_div(10_000, 3), 3_333);
/// ```
pub fn round_half_up_div(numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }
    (2 * numerator + denominator) / (2 * denominator)
}

/// Whole days from `now` until `target`, rounded up.
///
/// Partial days count as a full day in the future and are dropped in the
/// past, so a program starting in 36 hours is 2 days away and one that
/// started 36 hours ago is -1.
pub fn days_until(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let millis = (target - now).num_milliseconds();
    if millis >= 0 {
        (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    } else {
        -((-millis) / MILLIS_PER_DAY)
    }
}

/// Truncate a string to a maximum length.
///
/// Used to keep processor error bodies readable in logs.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(100, "usd"), "1.00 USD");
        assert_eq!(format_cents(0, "USD"), "0.00 USD");
        assert_eq!(format_cents(123_456_789, "eur"), "1,234,567.89 EUR");
        assert_eq!(format_cents(-50, "usd"), "-0.50 USD");
    }

    #[test]
    fn test_round_half_up_div() {
        assert_eq!(round_half_up_div(10_000, 4), 2_500);
        assert_eq!(round_half_up_div(10_000, 3), 3_333);
        assert_eq!(round_half_up_div(20_000, 3), 6_667);
        assert_eq!(round_half_up_div(5, 2), 3);
        assert_eq!(round_half_up_div(300, 4), 75);
        assert_eq!(round_half_up_div(7, 0), 0);
    }

    #[test]
    fn test_days_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(days_until(now, now + Duration::days(10)), 10);
        assert_eq!(days_until(now, now + Duration::hours(36)), 2);
        assert_eq!(days_until(now, now + Duration::minutes(1)), 1);
        assert_eq!(days_until(now, now), 0);
        assert_eq!(days_until(now, now - Duration::hours(12)), 0);
        assert_eq!(days_until(now, now - Duration::hours(36)), -1);
        assert_eq!(days_until(now, now - Duration::days(3)), -3);
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abcdefg...");
    }
}

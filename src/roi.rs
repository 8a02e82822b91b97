// Return-on-investment arithmetic and payout calendar.
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

use crate::error::{AppError, Result};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Largest single amount accepted for a deposit, withdrawal, investment or
/// preview.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
/// Upper bound on a plan's daily rate, in percent.
pub const MAX_DAILY_RATE: Decimal = Decimal::ONE_HUNDRED;
/// Ten years of business days.
pub const MAX_PERIOD_DAYS: i64 = 2600;

fn out_of_range() -> AppError {
    AppError::invalid("Amount is out of range")
}

/// Round to cents, halves away from zero.
pub fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Overflow-checked sum for balance updates.
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(out_of_range)
}

/// `amount * rate / 100`, unrounded.
pub fn percent_of(amount: Decimal, rate: Decimal) -> Result<Decimal> {
    amount
        .checked_mul(rate)
        .and_then(|v| v.checked_div(HUNDRED))
        .ok_or_else(out_of_range)
}

pub fn check_amount(amount: Decimal) -> Result<Decimal> {
    if amount > MAX_AMOUNT {
        return Err(AppError::invalid(format!(
            "Amount cannot exceed ${:.2}",
            MAX_AMOUNT
        )));
    }
    Ok(amount)
}

/// Rate and period limits shared by plan management, previews and
/// investing.
pub fn check_terms(rate: Decimal, days: i64) -> Result<()> {
    if rate < Decimal::ZERO || rate > MAX_DAILY_RATE {
        return Err(AppError::invalid(format!(
            "Daily rate must be between 0 and {MAX_DAILY_RATE}%"
        )));
    }
    if !(1..=MAX_PERIOD_DAYS).contains(&days) {
        return Err(AppError::invalid(format!(
            "Period must be between 1 and {MAX_PERIOD_DAYS} days"
        )));
    }
    Ok(())
}

/// Interest for one payout period: `amount * rate / 100`.
pub fn earning(amount: Decimal, rate: Decimal) -> Result<Decimal> {
    Ok(cents(percent_of(amount, rate)?))
}

/// Total a subscription returns over its life, principal included:
/// `amount * rate / 100 * days + amount`.
pub fn expected_roi(amount: Decimal, rate: Decimal, days: i64) -> Result<Decimal> {
    let total = percent_of(amount, rate)?
        .checked_mul(Decimal::from(days))
        .and_then(|v| v.checked_add(amount))
        .ok_or_else(out_of_range)?;
    Ok(cents(total))
}

/// Number of payouts needed to reach `expected_roi`, rounded half to even.
/// Zero when the plan pays nothing.
pub fn expected_days(amount: Decimal, rate: Decimal, days: i64) -> Result<i64> {
    let per_payout = percent_of(amount, rate)?;
    if per_payout.is_zero() {
        return Ok(0);
    }
    let payouts = per_payout
        .checked_mul(Decimal::from(days))
        .and_then(|v| v.checked_add(amount))
        .and_then(|total| total.checked_div(per_payout))
        .ok_or_else(out_of_range)?;
    Ok(payouts
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .unwrap_or(i64::MAX))
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Advance `start` by `days` weekdays, one calendar day at a time.
pub fn add_business_days(start: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let mut current = start;
    let mut added = 0;
    while added < days {
        current += Duration::days(1);
        if !is_weekend(current.weekday()) {
            added += 1;
        }
    }
    current
}

/// Next payout slot: weekends roll forward to Monday, weekdays to the
/// following day.
pub fn next_payout(now: DateTime<Utc>) -> DateTime<Utc> {
    match now.weekday() {
        Weekday::Sat => now + Duration::days(2),
        _ => now + Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    #[test]
    fn expected_roi_includes_principal() {
        // 1000 at 2% for 30 days: 20 * 30 + 1000
        assert_eq!(expected_roi(dec("1000"), dec("2"), 30).unwrap(), dec("1600.00"));
        assert_eq!(earning(dec("1000"), dec("2")).unwrap(), dec("20.00"));
    }

    #[test]
    fn fractional_rates_round_to_cents() {
        assert_eq!(earning(dec("333.33"), dec("1.5")).unwrap(), dec("5.00"));
        assert_eq!(earning(dec("100.10"), dec("0.05")).unwrap(), dec("0.05"));
        assert_eq!(expected_roi(dec("250"), dec("0.75"), 7).unwrap(), dec("263.13"));
    }

    #[test]
    fn expected_days_counts_principal_as_payouts() {
        // (20 * 30 + 1000) / 20 = 80
        assert_eq!(expected_days(dec("1000"), dec("2"), 30).unwrap(), 80);
        assert_eq!(expected_days(dec("1000"), Decimal::ZERO, 30).unwrap(), 0);
        // 1.5% for 1 day: (15 + 1000) / 15 = 67.67, a plain rounding case
        assert_eq!(expected_days(dec("1000"), dec("1.5"), 1).unwrap(), 68);
        // exact halves go to the even neighbour: 4.5 -> 4, 3.5 -> 4
        assert_eq!(expected_days(dec("1000"), dec("40"), 2).unwrap(), 4);
        assert_eq!(expected_days(dec("1000"), dec("40"), 1).unwrap(), 4);
    }

    #[test]
    fn oversized_inputs_are_rejected_instead_of_overflowing() {
        assert!(matches!(
            percent_of(Decimal::MAX, dec("2")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            expected_roi(Decimal::MAX, dec("2"), 30),
            Err(AppError::Validation(_))
        ));
        assert!(expected_days(Decimal::MAX, dec("2"), 30).is_err());
        assert!(matches!(add(Decimal::MAX, Decimal::ONE), Err(AppError::Validation(_))));
        assert_eq!(add(dec("1.25"), dec("2")).unwrap(), dec("3.25"));

        assert!(check_amount(MAX_AMOUNT).is_ok());
        assert!(check_amount(MAX_AMOUNT + Decimal::ONE).is_err());
    }

    #[test]
    fn plan_terms_are_bounded() {
        assert!(check_terms(Decimal::ZERO, 1).is_ok());
        assert!(check_terms(MAX_DAILY_RATE, MAX_PERIOD_DAYS).is_ok());
        assert!(check_terms(dec("-0.01"), 30).is_err());
        assert!(check_terms(dec("100.01"), 30).is_err());
        assert!(check_terms(dec("2"), 0).is_err());
        assert!(check_terms(dec("2"), MAX_PERIOD_DAYS + 1).is_err());
        // the longest allowed plan still resolves quickly
        let start = Utc.with_ymd_and_hms(2026, 10, 14, 10, 0, 0).unwrap();
        assert!(add_business_days(start, MAX_PERIOD_DAYS) > start);
    }

    #[test]
    fn business_days_skip_weekends() {
        // 2026-10-16 is a Friday
        let friday = at(2026, 10, 16);
        assert_eq!(add_business_days(friday, 1), at(2026, 10, 19));
        assert_eq!(add_business_days(friday, 5), at(2026, 10, 23));
        assert_eq!(add_business_days(friday, 0), friday);

        let wednesday = at(2026, 10, 14);
        assert_eq!(add_business_days(wednesday, 2), at(2026, 10, 16));
        assert_eq!(add_business_days(wednesday, 10), at(2026, 10, 28));
    }

    #[test]
    fn next_payout_rolls_weekends_to_monday() {
        let saturday = at(2026, 10, 17);
        let sunday = at(2026, 10, 18);
        let monday = at(2026, 10, 19);
        assert_eq!(next_payout(saturday), monday);
        assert_eq!(next_payout(sunday), monday);
        assert_eq!(next_payout(monday), at(2026, 10, 20));
        // Friday lands on Saturday; the job idles on weekends so it is paid Monday
        assert_eq!(next_payout(at(2026, 10, 16)), saturday);
    }
}

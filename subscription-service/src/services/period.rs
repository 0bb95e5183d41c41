//! Billing period arithmetic.

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::error::SubscriptionError;
use crate::models::{Price, SkuUnitType};

/// End of the period that starts at `start` and is billed with `price`.
///
/// Month periods pick the later of two candidates: `start` advanced by the
/// price's unit count, and `anchor` advanced by `month_offset + unit count`.
/// Month arithmetic clamps to the last day of the target month and keeps the
/// time of day, so a lineage anchored on the 31st comes back to the 31st
/// after passing through a shorter month.
pub fn period_end(
    start: DateTime<Utc>,
    price: &Price,
    anchor: DateTime<Utc>,
    month_offset: i32,
) -> Result<DateTime<Utc>, SubscriptionError> {
    let unit = price
        .parsed_unit_type()
        .ok_or_else(|| SubscriptionError::InvalidUnitType(price.unit_type.clone()))?;
    if price.unit_count <= 0 {
        return Err(SubscriptionError::InvalidUnitType(format!(
            "{} x {}",
            price.unit_count, price.unit_type
        )));
    }
    let count = price.unit_count as u32;
    let overflow = || SubscriptionError::PeriodOverflow {
        start,
        unit: price.unit_type.clone(),
        count: price.unit_count,
    };

    let end = match unit {
        SkuUnitType::Day => Duration::try_days(i64::from(count))
            .and_then(|span| start.checked_add_signed(span)),
        SkuUnitType::Week => Duration::try_days(7 * i64::from(count))
            .and_then(|span| start.checked_add_signed(span)),
        SkuUnitType::Year => count
            .checked_mul(12)
            .and_then(|months| start.checked_add_months(Months::new(months))),
        SkuUnitType::Month => {
            let from_start = start.checked_add_months(Months::new(count)).ok_or_else(overflow)?;
            let anchored = i64::from(month_offset) + i64::from(count);
            let from_anchor = u32::try_from(anchored)
                .ok()
                .and_then(|months| anchor.checked_add_months(Months::new(months)));
            Some(match from_anchor {
                Some(candidate) if candidate > from_start => candidate,
                _ => from_start,
            })
        }
    };

    end.ok_or_else(overflow)
}

/// Whole calendar months between `start` and `end`, counted on year and
/// month fields only.
pub fn month_diff(start: DateTime<Utc>, end: DateTime<Utc>) -> i32 {
    (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn price(unit_type: &str, unit_count: i32) -> Price {
        Price {
            price_id: 1,
            sku_type: 1,
            sku_kind: "time_span".into(),
            amount: Decimal::new(1000, 0),
            unit_type: unit_type.into(),
            unit_count,
            resource_id: "r1".into(),
            currency: "CNY".into(),
            discount: Decimal::ZERO,
            created_utc: Utc::now(),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn day_and_week_add_whole_days() {
        let start = at(2024, 2, 27);
        assert_eq!(period_end(start, &price("day", 3), start, 0).unwrap(), at(2024, 3, 1));
        assert_eq!(period_end(start, &price("week", 2), start, 0).unwrap(), at(2024, 3, 12));
    }

    #[test]
    fn year_clamps_leap_day() {
        let start = at(2024, 2, 29);
        assert_eq!(period_end(start, &price("year", 1), start, 0).unwrap(), at(2025, 2, 28));
    }

    #[test]
    fn month_clamps_to_end_of_short_month() {
        let start = at(2023, 1, 31);
        assert_eq!(period_end(start, &price("month", 1), start, 0).unwrap(), at(2023, 2, 28));
    }

    #[test]
    fn month_renewals_return_to_anchor_day() {
        let anchor = at(2024, 1, 31);
        let p = price("month", 1);
        let expected = [
            at(2024, 2, 29),
            at(2024, 3, 31),
            at(2024, 4, 30),
            at(2024, 5, 31),
            at(2024, 6, 30),
            at(2024, 7, 31),
            at(2024, 8, 31),
            at(2024, 9, 30),
            at(2024, 10, 31),
            at(2024, 11, 30),
            at(2024, 12, 31),
            at(2025, 1, 31),
        ];

        let mut start = anchor;
        for want in expected {
            let end = period_end(start, &p, anchor, month_diff(anchor, start)).unwrap();
            assert!(end >= start);
            assert_eq!(end, want);
            start = end;
        }
    }

    #[test]
    fn later_candidate_wins() {
        let anchor = at(2024, 1, 15);
        let start = at(2024, 3, 20);
        // anchor + (2 + 1) months = Apr 15, start + 1 month = Apr 20
        assert_eq!(period_end(start, &price("month", 1), anchor, 2).unwrap(), at(2024, 4, 20));
        // anchor + (4 + 1) months = Jun 15 is later
        assert_eq!(period_end(start, &price("month", 1), anchor, 4).unwrap(), at(2024, 6, 15));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let start = at(2024, 1, 1);
        assert!(matches!(
            period_end(start, &price("fortnight", 1), start, 0),
            Err(SubscriptionError::InvalidUnitType(_))
        ));
        assert!(matches!(
            period_end(start, &price("month", 0), start, 0),
            Err(SubscriptionError::InvalidUnitType(_))
        ));
    }

    #[test]
    fn unreachable_end_is_reported_as_overflow() {
        let start = at(2024, 1, 1);
        for unit in ["year", "month", "week", "day"] {
            let err = period_end(start, &price(unit, i32::MAX), start, 0)
                .expect_err("period should not fit");
            assert!(
                matches!(err, SubscriptionError::PeriodOverflow { count: i32::MAX, .. }),
                "{unit}: {err:?}"
            );
            assert_eq!(err.kind(), "period_overflow");
        }
    }

    #[test]
    fn month_diff_ignores_days() {
        assert_eq!(month_diff(at(2024, 1, 31), at(2024, 2, 1)), 1);
        assert_eq!(month_diff(at(2023, 11, 1), at(2024, 2, 28)), 3);
        assert_eq!(month_diff(at(2024, 5, 1), at(2024, 5, 31)), 0);
    }
}

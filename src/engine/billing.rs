use crate::config::BillingTiers;
use crate::model::{Amount, BillingWarning, CostBreakdown, Hours, Space};

/// `price_hour x hours`, rounded half-up to the currency unit.
fn hourly(price_hour: Amount, hours: Hours) -> Amount {
    (price_hour * hours.centi().max(0) + 50).div_euclid(100)
}

/// Base charge for the booked block. The tier follows the reserved duration,
/// so booked-but-unused time is still billed at the booked tier. A tier
/// without a price falls back to hourly billing.
fn base_cost(space: &Space, tiers: &BillingTiers, reserved: Hours) -> Amount {
    let by_hour = || hourly(space.price_hour, reserved);
    if reserved <= tiers.half_day_threshold {
        by_hour()
    } else if reserved <= tiers.full_day_threshold {
        space.price_half_day.unwrap_or_else(by_hour)
    } else {
        space.price_full_day.unwrap_or_else(by_hour)
    }
}

/// Cost breakdown for a finished session.
///
/// Overtime is always billed at the hourly rate. A zero or negative reserved
/// duration yields a zero breakdown, and a negative actual duration is treated
/// as zero. Both set `DegenerateDuration` instead of failing.
pub fn compute(space: &Space, tiers: &BillingTiers, reserved: Hours, actual: Hours) -> CostBreakdown {
    if !reserved.is_positive() {
        return CostBreakdown {
            base_cost: 0,
            overtime_cost: 0,
            total_cost: 0,
            overtime_hours: Hours::ZERO,
            warning: Some(BillingWarning::DegenerateDuration),
        };
    }

    let (actual, warning) = if actual.centi() < 0 {
        (Hours::ZERO, Some(BillingWarning::DegenerateDuration))
    } else {
        (actual, None)
    };

    let base_cost = base_cost(space, tiers, reserved).max(0);
    let overtime_hours = actual.excess_over(reserved);
    let overtime_cost = hourly(space.price_hour, overtime_hours).max(0);

    CostBreakdown {
        base_cost,
        overtime_cost,
        total_cost: base_cost + overtime_cost,
        overtime_hours,
        warning,
    }
}

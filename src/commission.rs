use bigdecimal::{BigDecimal, Signed};

use crate::error::SettlementError;

/// Outcome of splitting a sale amount between the photographer and the
/// platform. The two legs always sum to the rounded sale amount exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub photographer_amount: BigDecimal,
    pub platform_fee: BigDecimal,
}

/// Rounds a non-negative amount to currency minor units (two decimal places)
/// using half-to-even ("banker's") rounding: 4.485 -> 4.48, 4.475 -> 4.48,
/// 4.4851 -> 4.49.
pub fn round_to_cents(value: &BigDecimal) -> BigDecimal {
    let truncated = value.with_scale(2);
    let remainder = value - &truncated;
    let half = BigDecimal::from(5) / BigDecimal::from(1000);
    let cent = BigDecimal::from(1) / BigDecimal::from(100);

    if remainder > half {
        truncated + cent
    } else if remainder < half {
        truncated
    } else {
        // exactly half a cent: round towards the even cent
        let cents = (&truncated * BigDecimal::from(100)).with_scale(0);
        let halved_twice = (&cents / BigDecimal::from(2)).with_scale(0) * BigDecimal::from(2);
        if halved_twice == cents {
            truncated
        } else {
            truncated + cent
        }
    }
}

/// Computes the platform fee on a sale and the photographer's remainder.
///
/// The fee is rounded first and the photographer receives the rounded total
/// minus the fee, never an independently rounded product, so the legs cannot
/// drift apart by a cent.
pub fn split(amount: &BigDecimal, fee_percent: &BigDecimal) -> Result<Split, SettlementError> {
    if amount.is_negative() {
        return Err(SettlementError::InvalidAmount);
    }
    if fee_percent.is_negative() || *fee_percent > BigDecimal::from(100) {
        return Err(SettlementError::InvalidPercent);
    }

    let total = round_to_cents(amount);
    let platform_fee = round_to_cents(&(amount * fee_percent / BigDecimal::from(100)));
    let photographer_amount = &total - &platform_fee;

    Ok(Split {
        photographer_amount,
        platform_fee,
    })
}

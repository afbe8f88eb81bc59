//! Fixed-Point Conversion Boundary
//!
//! All raw on-chain quantities stay in 256-bit integers (`U256`) until the
//! last step, where they become f64 scalars for ledger fields:
//!
//! ```text
//! quantity = raw_token_amount / 10^18
//! usd      = raw_usdc_amount  / 10^6
//! ```
//!
//! Collateral (USDC) uses 6 decimals, outcome tokens use 18 decimals, and the
//! integer ratio between them is `10^12` tokens-raw per collateral-raw unit.
//! Handlers do raw-integer arithmetic first (e.g. `usdc_amount - fee`) and
//! convert the result, never the operands.

use alloy_primitives::U256;
use anyhow::{anyhow, Result};

/// Collateral decimals: 1 USDC = 10^6 raw units.
pub const USDC_SCALE: u64 = 1_000_000;

/// Outcome-token decimals: 1 token = 10^18 raw units.
pub const TOKEN_SCALE: u128 = 1_000_000_000_000_000_000;

/// Raw outcome-token units minted per raw collateral unit on a split.
pub const TOKENS_PER_COLLATERAL_UNIT: u128 = 1_000_000_000_000;

/// Convert a raw USDC amount (6 decimals) to a USD scalar.
#[inline]
pub fn usdc_scalar(raw: U256) -> f64 {
    u256_to_u128_saturating(raw) as f64 / USDC_SCALE as f64
}

/// Convert a raw outcome-token amount (18 decimals) to a quantity scalar.
#[inline]
pub fn token_scalar(raw: U256) -> f64 {
    u256_to_u128_saturating(raw) as f64 / TOKEN_SCALE as f64
}

/// Raw token amount corresponding to a raw collateral amount (split/merge
/// basket fallback: each outcome token moves `amount * 10^12` raw units).
#[inline]
pub fn collateral_to_token_raw(collateral_raw: U256) -> U256 {
    collateral_raw.saturating_mul(U256::from(TOKENS_PER_COLLATERAL_UNIT))
}

/// Narrow a U256 to u128, saturating on overflow.
///
/// Real chain amounts fit comfortably in 128 bits; a wider value is a
/// malformed row, and saturating keeps the replay alive with best-effort
/// fields rather than aborting the wallet.
#[inline]
pub fn u256_to_u128_saturating(v: U256) -> u128 {
    u128::try_from(v).unwrap_or(u128::MAX)
}

/// Division that degrades to 0.0 on a zero/denormal denominator or a
/// non-finite result, matching the documented numerical-anomaly handling.
#[inline]
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    let r = numerator / denominator;
    if r.is_finite() {
        r
    } else {
        0.0
    }
}

/// Parse a decimal-string amount column into a U256.
pub fn parse_u256_dec(s: &str) -> Result<U256> {
    U256::from_str_radix(s.trim(), 10).map_err(|e| anyhow!("invalid decimal amount {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usdc_conversion_is_six_decimals() {
        assert_eq!(usdc_scalar(U256::from(50_000_000u64)), 50.0);
        assert_eq!(usdc_scalar(U256::from(1u64)), 1e-6);
        assert_eq!(usdc_scalar(U256::ZERO), 0.0);
    }

    #[test]
    fn token_conversion_is_eighteen_decimals() {
        let hundred = U256::from(100u64) * U256::from(TOKEN_SCALE);
        assert_eq!(token_scalar(hundred), 100.0);
        assert_eq!(token_scalar(U256::from(TOKEN_SCALE)), 1.0);
    }

    #[test]
    fn collateral_to_token_preserves_scalar_value() {
        // $10 of collateral mints 10.0 of each basket token.
        let collateral = U256::from(10_000_000u64);
        let tokens = collateral_to_token_raw(collateral);
        assert_eq!(token_scalar(tokens), usdc_scalar(collateral));
    }

    #[test]
    fn ratio_guards_divide_by_zero() {
        assert_eq!(ratio_or_zero(5.0, 0.0), 0.0);
        assert_eq!(ratio_or_zero(5.0, 2.0), 2.5);
        assert_eq!(ratio_or_zero(0.0, 0.0), 0.0);
    }

    #[test]
    fn parse_decimal_amounts() {
        assert_eq!(parse_u256_dec("50000000").unwrap(), U256::from(50_000_000u64));
        assert!(parse_u256_dec("not-a-number").is_err());
        // 2^128, beyond u128: parses, saturates on narrowing.
        let big = parse_u256_dec("340282366920938463463374607431768211456").unwrap();
        assert_eq!(u256_to_u128_saturating(big), u128::MAX);
    }
}

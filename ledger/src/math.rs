//! # Fixed-Point Arithmetic
//!
//! All monetary math in COFFER runs through this module. Amounts are `u128`
//! in smallest-unit denomination; valuations are `u128` scaled by [`WAD`]
//! (10^18). There is no floating point anywhere in a money path, and there
//! is no unchecked arithmetic either — every operation that can overflow
//! returns a [`MathError`] instead of wrapping.
//!
//! The workhorse is [`mul_div`], which widens through a 256-bit intermediate
//! so `amount × WAD` style products cannot overflow before the division
//! brings them back into range. Results are floored, which consistently
//! rounds in the fund's favor: depositors receive slightly fewer shares,
//! withdrawers slightly less asset, and the dust stays in the pool.

use primitive_types::U256;
use thiserror::Error;

use crate::config::{BPS_SCALE, MAX_SUPPORTED_DECIMALS, WAD};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from fixed-point operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MathError {
    /// The result does not fit in a `u128`.
    #[error("arithmetic overflow: result exceeds 128 bits")]
    Overflow,

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A decimal precision outside the supported range was supplied.
    #[error("unsupported decimal precision: {0} (max {MAX_SUPPORTED_DECIMALS})")]
    UnsupportedDecimals(u8),
}

// ---------------------------------------------------------------------------
// Core Operations
// ---------------------------------------------------------------------------

/// Computes `a * b / denom` with a 256-bit intermediate, flooring the result.
///
/// # Errors
///
/// Returns [`MathError::DivisionByZero`] if `denom == 0` and
/// [`MathError::Overflow`] if the quotient exceeds `u128::MAX`.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, MathError> {
    if denom == 0 {
        return Err(MathError::DivisionByZero);
    }
    let wide = U256::from(a) * U256::from(b);
    let quotient = wide / U256::from(denom);
    if quotient > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(quotient.as_u128())
}

/// Multiplies two WAD-scaled values: `a * b / WAD`.
pub fn wad_mul(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, b, WAD)
}

/// Divides two WAD-scaled values: `a * WAD / b`.
pub fn wad_div(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, WAD, b)
}

/// Returns `10^decimals` as a `u128`.
pub fn pow10(decimals: u8) -> Result<u128, MathError> {
    if decimals > MAX_SUPPORTED_DECIMALS {
        return Err(MathError::UnsupportedDecimals(decimals));
    }
    Ok(10u128.pow(decimals as u32))
}

/// Scales a smallest-unit amount with the given decimal precision up (or
/// down, for precisions above 18) to a WAD-scaled value.
///
/// A token with 6 decimals and raw amount `1_000_000` (one whole unit)
/// becomes exactly `WAD`.
pub fn scale_to_wad(amount: u128, decimals: u8) -> Result<u128, MathError> {
    if decimals > MAX_SUPPORTED_DECIMALS {
        return Err(MathError::UnsupportedDecimals(decimals));
    }
    if decimals <= 18 {
        let factor = 10u128.pow((18 - decimals) as u32);
        amount.checked_mul(factor).ok_or(MathError::Overflow)
    } else {
        Ok(amount / 10u128.pow((decimals - 18) as u32))
    }
}

/// Scales a WAD value back down to a smallest-unit amount with the given
/// decimal precision, flooring any sub-unit remainder.
pub fn scale_from_wad(value: u128, decimals: u8) -> Result<u128, MathError> {
    if decimals > MAX_SUPPORTED_DECIMALS {
        return Err(MathError::UnsupportedDecimals(decimals));
    }
    if decimals <= 18 {
        Ok(value / 10u128.pow((18 - decimals) as u32))
    } else {
        value
            .checked_mul(10u128.pow((decimals - 18) as u32))
            .ok_or(MathError::Overflow)
    }
}

/// Takes a basis-point fraction of an amount: `amount * bps / 10_000`, floored.
pub fn bps_of(amount: u128, bps: u32) -> Result<u128, MathError> {
    mul_div(amount, bps as u128, BPS_SCALE as u128)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

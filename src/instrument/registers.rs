//! # Register Decoding
//!
//! Helpers turning raw 16-bit Modbus registers into engineering values.

use crate::error::{LoggerError, Result};

/// 32-bit IEEE float from two registers, high word first
///
/// # Errors
///
/// Returns a communication error unless exactly two words are given.
pub fn f32_from_words(words: &[u16]) -> Result<f32> {
    match words {
        [high, low] => Ok(f32::from_bits((u32::from(*high) << 16) | u32::from(*low))),
        _ => Err(LoggerError::Comm(format!(
            "float needs 2 registers, got {}",
            words.len()
        ))),
    }
}

/// Register reinterpreted as a two's complement value
pub fn signed(word: u16) -> i16 {
    word as i16
}

/// Widen an `f32` without exposing binary noise
///
/// `0.1f32 as f64` is `0.10000000149011612`; this returns `0.1`.
pub fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(f64::from(value))
}

/// Round to a number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// First character of a one-register string (high byte)
pub fn first_char(word: u16) -> char {
    char::from((word >> 8) as u8)
}

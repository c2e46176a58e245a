//! # Frame Encoder
//!
//! Serializes a [`Reading`] into one wire frame.

use super::protocol::FRAME_DELIMITER;
use crate::error::Result;
use crate::reading::Reading;

/// Encode a reading into a complete frame
///
/// # Arguments
///
/// * `reading` - Reading to serialize
///
/// # Returns
///
/// * `Result<Vec<u8>>` - JSON array of measurements followed by `\n`
///
/// # Errors
///
/// Returns a serialization error if a value cannot be represented in JSON
/// (NaN or infinity).
///
/// # Examples
///
/// ```
/// use rs485_logger::reading::{Measurement, Reading};
/// use rs485_logger::wire::encoder::encode_frame;
///
/// let reading = Reading::now(vec![Measurement::new("T", 21.3, "degC")]);
/// let frame = encode_frame(&reading)?;
/// assert_eq!(frame, b"[{\"var\":\"T\",\"val\":21.3,\"unit\":\"degC\"}]\n");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn encode_frame(reading: &Reading) -> Result<Vec<u8>> {
    if let Some(bad) = reading.measurements().iter().find(|m| !m.value.is_finite()) {
        return Err(crate::error::LoggerError::Serialization(format!(
            "{} has non-finite value {}",
            bad.name, bad.value
        )));
    }

    let mut frame = serde_json::to_vec(reading.measurements())?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

//! # Wire Protocol Constants
//!
//! Frame layout: `[{"var": ..., "val": ..., "unit": ...}, ...]\n`
//!
//! JSON escapes control characters inside strings, so the delimiter byte can
//! never appear inside a serialized payload.

/// Byte terminating every frame
pub const FRAME_DELIMITER: u8 = b'\n';

/// Largest payload (without delimiter) a decoder will accept
pub const MAX_FRAME_LEN: usize = 64 * 1024;

//! # Frame Decoder
//!
//! Reassembles newline-delimited frames from a TCP byte stream.
//!
//! The transport may split a frame across several reads or deliver several
//! frames in one read. The decoder keeps whatever trails the last delimiter
//! and completes it on the next [`FrameDecoder::feed`], so the decoded
//! sequence depends only on the bytes received, never on how they were
//! chunked.

use bytes::BytesMut;
use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::protocol::{FRAME_DELIMITER, MAX_FRAME_LEN};
use crate::error::{LoggerError, Result};
use crate::reading::{Measurement, Reading};

/// Streaming decoder for the monitor side of the link
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received but not yet terminated by a delimiter
    buffer: BytesMut,
    /// Bytes of `buffer` already known to contain no delimiter
    scanned: usize,
    /// Set while skipping the rest of an oversized frame
    discarding: bool,
    /// Frames dropped because they were malformed or oversized
    malformed: u64,
    /// Frames successfully decoded
    decoded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every reading completed by them
    ///
    /// # Arguments
    ///
    /// * `data` - Raw bytes exactly as read from the socket
    /// * `received_at` - Timestamp given to the decoded readings
    ///
    /// # Returns
    ///
    /// * `Vec<Reading>` - Readings in stream order; malformed frames are
    ///   skipped with a warning
    pub fn feed(&mut self, data: &[u8], received_at: DateTime<Local>) -> Vec<Reading> {
        self.buffer.extend_from_slice(data);

        let mut readings = Vec::new();

        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let end = self.scanned + offset;
            let line = self.buffer.split_to(end + 1);
            self.scanned = 0;

            if self.discarding {
                // Tail of a frame already counted as oversized
                self.discarding = false;
                continue;
            }

            match decode_payload(&line[..end]) {
                Ok(Some(measurements)) => {
                    self.decoded += 1;
                    readings.push(Reading::new(received_at, measurements));
                }
                Ok(None) => {}
                Err(e) => {
                    self.malformed += 1;
                    warn!("Discarding malformed frame: {}", e);
                }
            }
        }

        self.scanned = self.buffer.len();

        // A full-size payload may still be followed by its '\r'
        if self.buffer.len() > MAX_FRAME_LEN + 1 {
            if !self.discarding {
                self.malformed += 1;
                warn!(
                    "Discarding oversized frame (>{} bytes without delimiter)",
                    MAX_FRAME_LEN
                );
            }
            self.discarding = true;
            self.buffer.clear();
            self.scanned = 0;
        }

        readings
    }

    /// Number of bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of frames dropped so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Number of frames decoded so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Drop any partial frame, e.g. after the connection was lost
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!("Dropping {} bytes of incomplete frame", self.buffer.len());
        }
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }
}

/// Parse one frame payload (delimiter already removed)
///
/// Returns `Ok(None)` for blank lines.
fn decode_payload(payload: &[u8]) -> Result<Option<Vec<Measurement>>> {
    let payload = payload.strip_suffix(b"\r").unwrap_or(payload);

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    if payload.len() > MAX_FRAME_LEN {
        return Err(LoggerError::Serialization(format!(
            "frame of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let measurements: Vec<Measurement> = serde_json::from_slice(payload)?;
    Ok(Some(measurements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encoder::encode_frame;

    fn stream_of(readings: &[Vec<Measurement>]) -> Vec<u8> {
        readings
            .iter()
            .flat_map(|m| encode_frame(&Reading::now(m.clone())).unwrap())
            .collect()
    }

    fn sample_readings() -> Vec<Vec<Measurement>> {
        vec![
            vec![Measurement::new("T", 21.3, "degC")],
            vec![
                Measurement::new("T", 21.4, "degC"),
                Measurement::new("Moist", 33.0, "vol%"),
                Measurement::new("Count", 512.0, "#"),
            ],
            vec![Measurement::new("VOC", 0.25, "ppm")],
        ]
    }

    fn measurements_of(readings: Vec<Reading>) -> Vec<Vec<Measurement>> {
        readings
            .into_iter()
            .map(|r| r.measurements().to_vec())
            .collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.feed(b"[{\"var\":\"T\",\"val\":21.3,\"unit\":\"degC\"}]\n", Local::now());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].measurements(), &[Measurement::new("T", 21.3, "degC")]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_coalesced_frames_in_one_read() {
        let expected = sample_readings();
        let mut decoder = FrameDecoder::new();

        let out = decoder.feed(&stream_of(&expected), Local::now());

        assert_eq!(measurements_of(out), expected);
        assert_eq!(decoder.decoded(), 3);
    }

    #[test]
    fn test_partial_frame_is_kept_for_next_read() {
        let mut decoder = FrameDecoder::new();
        let frame = b"[{\"var\":\"T\",\"val\":21.3,\"unit\":\"degC\"}]\n";

        assert!(decoder.feed(&frame[..10], Local::now()).is_empty());
        assert_eq!(decoder.pending(), 10);

        let out = decoder.feed(&frame[10..], Local::now());
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_every_split_offset_yields_same_sequence() {
        let expected = sample_readings();
        let stream = stream_of(&expected);

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = decoder.feed(&stream[..split], Local::now());
            out.extend(decoder.feed(&stream[split..], Local::now()));

            assert_eq!(measurements_of(out), expected, "split at offset {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let expected = sample_readings();
        let stream = stream_of(&expected);
        let mut decoder = FrameDecoder::new();

        let mut out = Vec::new();
        for byte in &stream {
            out.extend(decoder.feed(std::slice::from_ref(byte), Local::now()));
        }

        assert_eq!(measurements_of(out), expected);
    }

    #[test]
    fn test_corrupted_frame_is_skipped() {
        let valid = sample_readings();
        let mut stream = stream_of(&valid[..1]);
        stream.extend_from_slice(b"[{\"var\":\"T\",\"val\":\n");
        stream.extend(stream_of(&valid[1..]));

        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = decoder.feed(&stream[..split], Local::now());
            out.extend(decoder.feed(&stream[split..], Local::now()));

            assert_eq!(measurements_of(out), valid, "split at offset {}", split);
            assert_eq!(decoder.malformed(), 1);
        }
    }

    #[test]
    fn test_legacy_unterminated_frames_are_not_split_on_brackets() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.feed(
            b"[{\"var\":\"T\",\"val\":1,\"unit\":\"-\"}][{\"var\":\"T\",\"val\":2,\"unit\":\"-\"}]\n",
            Local::now(),
        );

        assert!(out.is_empty());
        assert_eq!(decoder.malformed(), 1);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let out = decoder.feed(
            b"\n\r\n[{\"var\":\"T\",\"val\":1.5,\"unit\":\"degC\"}]\r\n",
            Local::now(),
        );

        assert_eq!(out.len(), 1);
        assert_eq!(decoder.malformed(), 0);
    }

    #[test]
    fn test_oversized_frame_is_dropped_regardless_of_chunking() {
        let mut oversized = vec![b'['; MAX_FRAME_LEN + 10];
        oversized.push(FRAME_DELIMITER);
        let mut stream = oversized.clone();
        stream.extend(stream_of(&sample_readings()[..1]));

        let mut whole = FrameDecoder::new();
        let out = whole.feed(&stream, Local::now());
        assert_eq!(out.len(), 1);
        assert_eq!(whole.malformed(), 1);

        let mut chunked = FrameDecoder::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(1000) {
            out.extend(chunked.feed(chunk, Local::now()));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(chunked.malformed(), 1);
    }

    #[test]
    fn test_full_size_frame_with_crlf_survives_any_split() {
        let prefix = br#"[{"var":"T","val":1,"unit":""#;
        let suffix = br#""}]"#;
        let mut payload = prefix.to_vec();
        payload.resize(MAX_FRAME_LEN - suffix.len(), b'x');
        payload.extend_from_slice(suffix);
        assert_eq!(payload.len(), MAX_FRAME_LEN);

        let mut stream = payload;
        stream.extend_from_slice(b"\r\n");

        for split in [stream.len() - 1, stream.len() - 2, 1000] {
            let mut decoder = FrameDecoder::new();
            let mut out = decoder.feed(&stream[..split], Local::now());
            out.extend(decoder.feed(&stream[split..], Local::now()));

            assert_eq!(out.len(), 1, "split at offset {}", split);
            assert_eq!(decoder.malformed(), 0, "split at offset {}", split);
        }

        let mut chunked = FrameDecoder::new();
        let mut out = Vec::new();
        for chunk in stream.chunks(1000) {
            out.extend(chunked.feed(chunk, Local::now()));
        }
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_one_byte_over_limit_is_dropped_regardless_of_chunking() {
        let mut stream = vec![b'['; MAX_FRAME_LEN + 1];
        stream.push(FRAME_DELIMITER);

        let mut whole = FrameDecoder::new();
        assert!(whole.feed(&stream, Local::now()).is_empty());
        assert_eq!(whole.malformed(), 1);

        let mut split = FrameDecoder::new();
        assert!(split.feed(&stream[..MAX_FRAME_LEN + 1], Local::now()).is_empty());
        assert!(split.feed(&stream[MAX_FRAME_LEN + 1..], Local::now()).is_empty());
        assert_eq!(split.malformed(), 1);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"[{\"var\":", Local::now());
        decoder.reset();

        let out = decoder.feed(b"[{\"var\":\"T\",\"val\":1,\"unit\":\"-\"}]\n", Local::now());
        assert_eq!(out.len(), 1);
        assert_eq!(decoder.malformed(), 0);
    }
}

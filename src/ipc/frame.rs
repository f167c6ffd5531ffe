//! Wire codec for the framed worker protocol.
//!
//! Requests: `u32 json_len · u32 binary_len · json · binary`.
//! Responses: `u32 json_len · json`. All lengths little-endian.
//!
//! The decoder is incremental: feed it whatever arrived on the pipe,
//! pull out complete JSON payloads as they become available.

use crate::defaults;
use crate::error::{DictflowError, Result};

/// Size of the request frame header (two u32 lengths).
pub const REQUEST_HEADER_LEN: usize = 8;

/// Size of the response frame header (one u32 length).
pub const RESPONSE_HEADER_LEN: usize = 4;

/// Encodes a request frame: header, JSON body, optional binary tail.
pub fn encode_request(json: &[u8], binary: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(REQUEST_HEADER_LEN + json.len() + binary.len());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&(binary.len() as u32).to_le_bytes());
    out.extend_from_slice(json);
    out.extend_from_slice(binary);
    out
}

/// Encodes a response frame (used by test peers standing in for a worker).
pub fn encode_response(json: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + json.len());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(json);
    out
}

/// Incremental decoder for response frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the worker's stdout.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete JSON payload, if one is buffered.
    ///
    /// A zero or oversized length prefix is unrecoverable (there is no
    /// way to find the next frame boundary) and poisons the buffer.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < RESPONSE_HEADER_LEN {
            return Ok(None);
        }

        let json_len =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);

        if json_len == 0 || json_len > defaults::MAX_RESPONSE_JSON_BYTES {
            return Err(DictflowError::IpcProtocol {
                message: format!("invalid response frame length: {}", json_len),
            });
        }

        let total = RESPONSE_HEADER_LEN + json_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let json = self.buf[RESPONSE_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(json))
    }

    /// Bytes currently buffered (for diagnostics).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_layout() {
        let frame = encode_request(br#"{"id":"1"}"#, &[0xAA, 0xBB]);

        assert_eq!(&frame[0..4], &10u32.to_le_bytes());
        assert_eq!(&frame[4..8], &2u32.to_le_bytes());
        assert_eq!(&frame[8..18], br#"{"id":"1"}"#);
        assert_eq!(&frame[18..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_encode_request_without_binary() {
        let frame = encode_request(b"{}", &[]);
        assert_eq!(&frame[4..8], &0u32.to_le_bytes());
        assert_eq!(frame.len(), REQUEST_HEADER_LEN + 2);
    }

    #[test]
    fn test_decoder_roundtrip() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_response(br#"{"ok":true}"#));

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame, br#"{"ok":true}"#);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_partial_header() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[5, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_partial_body() {
        let mut decoder = FrameDecoder::new();
        let encoded = encode_response(b"hello");
        decoder.extend(&encoded[..6]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&encoded[6..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_decoder_multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode_response(b"first");
        bytes.extend_from_slice(&encode_response(b"second"));
        decoder.extend(&bytes);

        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"first");
        assert_eq!(decoder.next_frame().unwrap().unwrap(), b"second");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let mut decoder = FrameDecoder::new();
        let encoded = encode_response(br#"{"id":"x"}"#);

        let mut decoded = None;
        for byte in &encoded {
            decoder.extend(std::slice::from_ref(byte));
            if let Some(frame) = decoder.next_frame().unwrap() {
                decoded = Some(frame);
            }
        }
        assert_eq!(decoded.unwrap(), br#"{"id":"x"}"#);
    }

    #[test]
    fn test_decoder_rejects_zero_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&0u32.to_le_bytes());
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_decoder_rejects_oversized_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(defaults::MAX_RESPONSE_JSON_BYTES + 1).to_le_bytes());
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_decoder_accepts_max_length_header() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&defaults::MAX_RESPONSE_JSON_BYTES.to_le_bytes());
        // Header is valid; frame is just incomplete.
        assert!(decoder.next_frame().unwrap().is_none());
    }
}

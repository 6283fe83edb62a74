//! WebSocket frame codec and RFC 6455 handshake key computation.
//!
//! Server-to-client frames are never masked; client-to-server frames must always be masked, and
//! the decoder treats a clear mask bit as a hard protocol violation rather than incomplete input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing (RFC 6455 §1.3).
const RFC6455_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const FIN_FLAG: u8 = 0x80;
const MASK_FLAG: u8 = 0x80;
const CONTROL_FLAG: u8 = 0x08;
const OPCODE_BITS: u8 = 0x0f;
const SHORT_LENGTH_BITS: u8 = 0x7f;
const TWO_BYTE_LENGTH_MARKER: usize = 0x7e;
const EIGHT_BYTE_LENGTH_MARKER: usize = 0x7f;

/// Length of the masking key on every valid inbound frame.
pub const INBOUND_MASK_LENGTH: usize = 4;

/// WebSocket operation codes used by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebsocketOp {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl WebsocketOp {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits & OPCODE_BITS {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xa => Some(Self::Pong),
            _ => None,
        }
    }

    /// Human-readable opcode label for log lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Continuation => "continue",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Builds the 2/4/10-byte server frame header for a payload of `length` bytes.
///
/// Server frames always carry FIN=1, RSV=0 and a clear mask bit. The payload length is encoded
/// directly when below 126, as `0x7e` plus 16 bits big-endian below 65536, and as `0x7f` plus
/// 64 bits big-endian otherwise.
#[must_use]
pub fn to_header(length: usize, code: WebsocketOp) -> Vec<u8> {
    let first = FIN_FLAG | code as u8;
    if length < TWO_BYTE_LENGTH_MARKER {
        vec![first, length as u8]
    } else if length < usize::from(u16::MAX) + 1 {
        let mut header = Vec::with_capacity(4);
        header.push(first);
        header.push(TWO_BYTE_LENGTH_MARKER as u8);
        header.extend_from_slice(&(length as u16).to_be_bytes());
        header
    } else {
        let mut header = Vec::with_capacity(10);
        header.push(first);
        header.push(EIGHT_BYTE_LENGTH_MARKER as u8);
        header.extend_from_slice(&(length as u64).to_be_bytes());
        header
    }
}

/// Parsed header of one masked inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebsocketFrame {
    flags: u8,
    header_length: usize,
    data_length: usize,
}

impl WebsocketFrame {
    /// True when the FIN bit is set.
    #[must_use]
    pub fn final_frame(self) -> bool {
        (self.flags & FIN_FLAG) != 0
    }

    /// True when this frame is part of a fragmented message.
    #[must_use]
    pub fn fragment(self) -> bool {
        !self.final_frame() || matches!(self.op_code(), Some(WebsocketOp::Continuation))
    }

    /// True when bit 3 of the first byte marks a control frame.
    #[must_use]
    pub fn control_frame(self) -> bool {
        (self.flags & CONTROL_FLAG) != 0
    }

    /// Decoded opcode, `None` for reserved values.
    #[must_use]
    pub fn op_code(self) -> Option<WebsocketOp> {
        WebsocketOp::from_bits(self.flags)
    }

    /// Header length in bytes, mask key included.
    #[must_use]
    pub fn header_length(self) -> usize {
        self.header_length
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn data_length(self) -> usize {
        self.data_length
    }

    /// Mask key length; always four on a valid inbound frame.
    #[must_use]
    pub fn mask_length(self) -> usize {
        INBOUND_MASK_LENGTH
    }

    /// Total frame length (header plus payload).
    #[must_use]
    pub fn total_length(self) -> usize {
        self.header_length.saturating_add(self.data_length)
    }

    /// Unmasks the payload of this frame out of `bytes`, which must hold the complete frame.
    #[must_use]
    pub fn unmask(self, bytes: &[u8]) -> Vec<u8> {
        let key_start = self.header_length - INBOUND_MASK_LENGTH;
        let key = &bytes[key_start..self.header_length];
        bytes[self.header_length..self.total_length()]
            .iter()
            .enumerate()
            .map(|(index, byte)| byte ^ key[index % INBOUND_MASK_LENGTH])
            .collect()
    }
}

/// Outcome of decoding the front of an inbound byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecode {
    /// A complete frame header was decoded; the payload may still be in flight.
    Frame(WebsocketFrame),
    /// More bytes are required before the header can be decoded.
    Incomplete,
    /// The bytes violate framing; the mask bit of an inbound frame was clear.
    Invalid,
}

/// Decodes the frame header at the front of `bytes`.
///
/// All client-to-server frames must be masked; an unmasked frame is `Invalid` regardless of how
/// many bytes are available.
#[must_use]
pub fn decode(bytes: &[u8]) -> FrameDecode {
    const PREFIX: usize = 2;
    const PREFIX16: usize = PREFIX + 2;
    const PREFIX64: usize = PREFIX + 8;

    if bytes.len() < PREFIX {
        return FrameDecode::Incomplete;
    }
    if (bytes[1] & MASK_FLAG) == 0 {
        return FrameDecode::Invalid;
    }

    let flags = bytes[0];
    let short_length = usize::from(bytes[1] & SHORT_LENGTH_BITS);

    let (header_length, data_length) = match short_length {
        TWO_BYTE_LENGTH_MARKER => {
            if bytes.len() < PREFIX16 {
                return FrameDecode::Incomplete;
            }
            let length = u16::from_be_bytes([bytes[PREFIX], bytes[PREFIX + 1]]);
            (PREFIX16 + INBOUND_MASK_LENGTH, usize::from(length))
        }
        EIGHT_BYTE_LENGTH_MARKER => {
            if bytes.len() < PREFIX64 {
                return FrameDecode::Incomplete;
            }
            let mut extended = [0_u8; 8];
            extended.copy_from_slice(&bytes[PREFIX..PREFIX64]);
            let length = u64::from_be_bytes(extended);
            let Ok(length) = usize::try_from(length) else {
                return FrameDecode::Invalid;
            };
            (PREFIX64 + INBOUND_MASK_LENGTH, length)
        }
        direct => (PREFIX + INBOUND_MASK_LENGTH, direct),
    };

    if bytes.len() < header_length {
        return FrameDecode::Incomplete;
    }

    FrameDecode::Frame(WebsocketFrame {
        flags,
        header_length,
        data_length,
    })
}

/// Computes the RFC 6455 `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn key_response(websocket_key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(websocket_key.as_bytes());
    digest.update(RFC6455_GUID.as_bytes());
    BASE64.encode(digest.finalize())
}

#[cfg(test)]
mod tests {
    use super::{FrameDecode, WebsocketOp, decode, key_response, to_header};
    use googletest::prelude::*;
    use rstest::rstest;

    /// Builds a complete masked client frame around `payload`.
    fn masked_frame(op: WebsocketOp, payload: &[u8]) -> Vec<u8> {
        let key = [0x11_u8, 0x22, 0x33, 0x44];
        let mut header = to_header(payload.len(), op);
        header[1] |= 0x80;
        header.extend_from_slice(&key);
        header.extend(
            payload
                .iter()
                .enumerate()
                .map(|(index, byte)| byte ^ key[index % 4]),
        );
        header
    }

    #[rstest]
    fn key_response_matches_rfc6455_example() {
        assert_that!(
            key_response("dGhlIHNhbXBsZSBub25jZQ=="),
            eq("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
    }

    #[rstest]
    #[case(0, 2)]
    #[case(125, 2)]
    #[case(126, 4)]
    #[case(65535, 4)]
    #[case(65536, 10)]
    fn header_width_tracks_length_boundaries(#[case] length: usize, #[case] expected: usize) {
        assert_that!(to_header(length, WebsocketOp::Text).len(), eq(expected));
    }

    #[rstest]
    #[case(1)]
    #[case(125)]
    #[case(126)]
    #[case(65535)]
    #[case(65536)]
    fn masked_header_round_trips_length(#[case] length: usize) {
        let key = [9_u8, 8, 7, 6];
        let mut bytes = to_header(length, WebsocketOp::Text);
        bytes[1] |= 0x80;
        bytes.extend_from_slice(&key);

        let FrameDecode::Frame(frame) = decode(&bytes) else {
            panic!("masked header of length {length} should decode");
        };
        assert_that!(frame.data_length(), eq(length));
        assert_that!(frame.mask_length(), eq(4));
        assert_that!(frame.final_frame(), eq(true));
        assert_that!(frame.fragment(), eq(false));
    }

    #[rstest]
    fn unmasked_inbound_frame_is_invalid() {
        let bytes = to_header(5, WebsocketOp::Text);
        assert_that!(decode(&bytes), eq(FrameDecode::Invalid));
    }

    #[rstest]
    fn short_input_is_incomplete() {
        assert_that!(decode(&[]), eq(FrameDecode::Incomplete));
        assert_that!(decode(&[0x81]), eq(FrameDecode::Incomplete));
        // Extended 16-bit length announced but not yet readable.
        assert_that!(decode(&[0x81, 0xfe, 0x01]), eq(FrameDecode::Incomplete));
    }

    #[rstest]
    fn unmask_recovers_original_payload() {
        let frame_bytes = masked_frame(WebsocketOp::Text, b"hello bridge");
        let FrameDecode::Frame(frame) = decode(&frame_bytes) else {
            panic!("frame should decode");
        };
        assert_that!(frame.unmask(&frame_bytes), eq(&b"hello bridge".to_vec()));
    }

    #[rstest]
    fn control_bit_classifies_close_ping_pong() {
        for op in [WebsocketOp::Close, WebsocketOp::Ping, WebsocketOp::Pong] {
            let bytes = masked_frame(op, b"");
            let FrameDecode::Frame(frame) = decode(&bytes) else {
                panic!("control frame should decode");
            };
            assert_that!(frame.control_frame(), eq(true));
            assert_that!(frame.op_code(), eq(Some(op)));
        }

        let data = masked_frame(WebsocketOp::Text, b"x");
        let FrameDecode::Frame(frame) = decode(&data) else {
            panic!("data frame should decode");
        };
        assert_that!(frame.control_frame(), eq(false));
    }

    #[rstest]
    fn continuation_opcode_is_a_fragment() {
        let bytes = masked_frame(WebsocketOp::Continuation, b"tail");
        let FrameDecode::Frame(frame) = decode(&bytes) else {
            panic!("continuation frame should decode");
        };
        assert_that!(frame.fragment(), eq(true));
    }
}

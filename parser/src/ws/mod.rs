//! WebSocket frame codec (RFC 6455 §5), per §4.5.2.

use crate::h1::ParseOutcome;

/// A WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation,
    /// A complete (or first fragment of a) text message.
    Text,
    /// A complete (or first fragment of a) binary message.
    Binary,
    /// Connection close.
    Close,
    /// Keepalive ping.
    Ping,
    /// Keepalive pong.
    Pong,
}

impl OpCode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Control frames (close/ping/pong) may never be fragmented and carry
    /// a payload of at most 125 bytes.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single decoded WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this is the final fragment of a message.
    pub fin: bool,
    /// The frame's opcode.
    pub opcode: OpCode,
    /// The unmasked payload.
    pub payload: Vec<u8>,
}

/// Failures decoding or encoding a frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum WsFrameError {
    /// An opcode outside the set reserved by RFC 6455 for this
    /// specification's supported frame types.
    #[error("unknown websocket opcode")]
    UnknownOpcode,
    /// A control frame (close/ping/pong) was fragmented or exceeded the
    /// 125-byte control payload limit.
    #[error("fragmented or oversized control frame")]
    ControlFrameViolation,
    /// An inbound frame arrived without the masking key RFC 6455 requires
    /// of every client-to-server frame.
    #[error("masked frame missing its masking key")]
    MissingMaskKey,
    /// The declared extended payload length did not fit a `usize` on this
    /// platform.
    #[error("payload length overflow")]
    LengthOverflow,
}

impl Frame {
    /// Builds a text frame.
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self { fin: true, opcode: OpCode::Text, payload: payload.into() }
    }

    /// Builds a binary frame.
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self { fin: true, opcode: OpCode::Binary, payload: payload.into() }
    }

    /// Builds a close frame, optionally carrying a close code and reason.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        Self { fin: true, opcode: OpCode::Close, payload }
    }

    /// Builds a ping frame.
    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self { fin: true, opcode: OpCode::Ping, payload: payload.into() }
    }

    /// Builds a pong frame.
    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self { fin: true, opcode: OpCode::Pong, payload: payload.into() }
    }

    /// Decodes one frame from the front of `buf`, without requiring a
    /// masking key (used for server-originated frames read back in tests,
    /// or for trusted non-WebSocket-RFC framing). Returns the frame and
    /// the number of bytes it consumed, or [`ParseOutcome::Partial`] if
    /// `buf` does not yet hold a complete frame.
    pub fn decode(buf: &[u8]) -> Result<ParseOutcome<(Frame, usize)>, WsFrameError> {
        Self::decode_impl(buf, false)
    }

    /// Decodes one frame, enforcing RFC 6455's requirement that every
    /// client-to-server frame be masked.
    pub fn decode_masked(buf: &[u8]) -> Result<ParseOutcome<(Frame, usize)>, WsFrameError> {
        Self::decode_impl(buf, true)
    }

    fn decode_impl(buf: &[u8], require_mask: bool) -> Result<ParseOutcome<(Frame, usize)>, WsFrameError> {
        if buf.len() < 2 {
            return Ok(ParseOutcome::Partial);
        }
        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_bits(byte0 & 0x0F).ok_or(WsFrameError::UnknownOpcode)?;
        let masked = byte1 & 0x80 != 0;
        let len7 = byte1 & 0x7F;

        let mut pos = 2usize;
        let payload_len: u64 = match len7 {
            126 => {
                if buf.len() < pos + 2 {
                    return Ok(ParseOutcome::Partial);
                }
                let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
                pos += 2;
                len
            }
            127 => {
                if buf.len() < pos + 8 {
                    return Ok(ParseOutcome::Partial);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[pos..pos + 8]);
                pos += 8;
                u64::from_be_bytes(raw)
            }
            n => n as u64,
        };

        if opcode.is_control() && (!fin || payload_len > 125) {
            return Err(WsFrameError::ControlFrameViolation);
        }
        if require_mask && !masked {
            return Err(WsFrameError::MissingMaskKey);
        }

        let mask_key = if masked {
            if buf.len() < pos + 4 {
                return Ok(ParseOutcome::Partial);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[pos..pos + 4]);
            pos += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = usize::try_from(payload_len).map_err(|_| WsFrameError::LengthOverflow)?;
        if buf.len() < pos + payload_len {
            return Ok(ParseOutcome::Partial);
        }
        let mut payload = buf[pos..pos + payload_len].to_vec();
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }
        pos += payload_len;

        Ok(ParseOutcome::Complete((Frame { fin, opcode, payload }, pos)))
    }

    /// Encodes this frame. Server-originated frames are unmasked per
    /// RFC 6455 §5.1 ("a server MUST NOT mask any frames"); pass `mask`
    /// only when encoding a client-role frame for testing.
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 14);
        let byte0 = (self.fin as u8) << 7 | self.opcode.bits();
        out.push(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        let len = self.payload.len();
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        let mut payload = self.payload.clone();
        if let Some(key) = mask {
            out.extend_from_slice(&key);
            apply_mask(&mut payload, key);
        }
        out.extend_from_slice(&payload);
        out
    }
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_an_unmasked_text_frame() {
        let frame = Frame::text("hello");
        let bytes = frame.encode(None);
        let (decoded, consumed) = match Frame::decode(&bytes).unwrap() {
            ParseOutcome::Complete(v) => v,
            ParseOutcome::Partial => panic!("expected a complete frame"),
        };
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_a_masked_frame() {
        let frame = Frame::binary(vec![1, 2, 3, 4, 5]);
        let bytes = frame.encode(Some([0xDE, 0xAD, 0xBE, 0xEF]));
        let (decoded, _) = match Frame::decode(&bytes).unwrap() {
            ParseOutcome::Complete(v) => v,
            ParseOutcome::Partial => panic!("expected a complete frame"),
        };
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn reports_partial_on_truncated_header() {
        assert_eq!(Frame::decode(&[0x81]).unwrap(), ParseOutcome::Partial);
    }

    #[test]
    fn reports_partial_on_truncated_payload() {
        let frame = Frame::text("hello world");
        let mut bytes = frame.encode(None);
        bytes.truncate(bytes.len() - 3);
        assert_eq!(Frame::decode(&bytes).unwrap(), ParseOutcome::Partial);
    }

    #[test]
    fn uses_16_bit_extended_length_at_the_126_boundary() {
        let frame = Frame::binary(vec![0u8; 126]);
        let bytes = frame.encode(None);
        assert_eq!(bytes[1], 126);
        let (decoded, consumed) = match Frame::decode(&bytes).unwrap() {
            ParseOutcome::Complete(v) => v,
            ParseOutcome::Partial => panic!("expected a complete frame"),
        };
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.payload.len(), 126);
    }

    #[test]
    fn uses_64_bit_extended_length_above_16_bit_range() {
        let frame = Frame::binary(vec![0u8; 70_000]);
        let bytes = frame.encode(None);
        assert_eq!(bytes[1], 127);
        let (decoded, _) = match Frame::decode(&bytes).unwrap() {
            ParseOutcome::Complete(v) => v,
            ParseOutcome::Partial => panic!("expected a complete frame"),
        };
        assert_eq!(decoded.payload.len(), 70_000);
    }

    #[test]
    fn rejects_a_fragmented_ping() {
        let frame = Frame { fin: false, opcode: OpCode::Ping, payload: Vec::new() };
        let bytes = frame.encode(None);
        assert_eq!(Frame::decode(&bytes), Err(WsFrameError::ControlFrameViolation));
    }

    #[test]
    fn rejects_an_oversized_control_frame() {
        let frame = Frame { fin: true, opcode: OpCode::Pong, payload: vec![0u8; 126] };
        let bytes = frame.encode(None);
        assert_eq!(Frame::decode(&bytes), Err(WsFrameError::ControlFrameViolation));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let bytes = [0x83u8, 0x00];
        assert_eq!(Frame::decode(&bytes), Err(WsFrameError::UnknownOpcode));
    }

    #[test]
    fn requires_a_mask_key_when_decoding_as_server() {
        let frame = Frame::text("hi");
        let bytes = frame.encode(None);
        assert_eq!(Frame::decode_masked(&bytes), Err(WsFrameError::MissingMaskKey));
    }

    #[test]
    fn decodes_a_masked_client_frame_as_server() {
        let frame = Frame::text("hi");
        let bytes = frame.encode(Some([1, 2, 3, 4]));
        let (decoded, _) = match Frame::decode_masked(&bytes).unwrap() {
            ParseOutcome::Complete(v) => v,
            ParseOutcome::Partial => panic!("expected a complete frame"),
        };
        assert_eq!(decoded.payload, b"hi");
    }
}

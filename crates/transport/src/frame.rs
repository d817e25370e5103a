//! RFC 6455 frame codec
//!
//! Encoding and decoding of single frames plus reassembly of fragmented
//! messages. The decoder is incremental: it consumes a byte buffer filled by
//! the socket reader and yields a frame only once every byte of it has
//! arrived, so partial reads never corrupt the stream.

use bytes::{Buf, BytesMut};

use crate::error::TransportError;

/// Frame opcodes (RFC 6455 section 5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// CLOSE, PING and PONG; payload limited to 125 bytes, never fragmented
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// XOR the payload with the 4-byte key; applying twice restores the input
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode one frame
///
/// Client frames must carry a mask, server frames must not. Length encoding
/// per the RFC: <126 inline, 126 with a 16-bit extension, 127 with 64-bit.
pub fn encode_frame(opcode: OpCode, payload: &[u8], fin: bool, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(14 + len);

    let fin_bit = if fin { 0x80 } else { 0x00 };
    frame.push(fin_bit | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        frame.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }

    frame
}

/// Encode a client frame with a fresh random mask key
///
/// The RFC requires an unpredictable key per frame; the thread RNG is a
/// CSPRNG, which satisfies that.
pub fn encode_client_frame(opcode: OpCode, payload: &[u8], fin: bool) -> Vec<u8> {
    encode_frame(opcode, payload, fin, Some(rand::random()))
}

/// Incremental frame decoder
///
/// Accepts masked and unmasked frames and all three length encodings.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Upper bound on a single frame's payload, in bytes
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Try to decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial frame; the
    /// caller reads more bytes and retries. Consumed bytes are removed from
    /// the buffer.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        if b0 & 0x70 != 0 {
            return Err(TransportError::InvalidFrame(
                "reserved bits set without a negotiated extension".to_string(),
            ));
        }

        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or_else(|| {
            TransportError::InvalidFrame(format!("unknown opcode 0x{:x}", b0 & 0x0F))
        })?;
        let fin = b0 & 0x80 != 0;
        let masked = b1 & 0x80 != 0;

        let (header_len, payload_len) = match (b1 & 0x7F) as usize {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
                (4, len)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[2..10]);
                (10, u64::from_be_bytes(bytes))
            }
            n => (2, n as u64),
        };

        if opcode.is_control() {
            if !fin {
                return Err(TransportError::InvalidFrame(
                    "fragmented control frame".to_string(),
                ));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(TransportError::InvalidFrame(format!(
                    "control frame payload of {} bytes",
                    payload_len
                )));
            }
        }

        // Reject oversize frames before buffering their payload
        if payload_len > self.max_payload as u64 {
            return Err(TransportError::FrameTooLarge {
                size: payload_len as usize,
                limit: self.max_payload,
            });
        }
        let payload_len = payload_len as usize;

        let mask_len = if masked { 4 } else { 0 };
        if buf.len() < header_len + mask_len + payload_len {
            return Ok(None);
        }

        buf.advance(header_len);

        let mask = if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[..4]);
            buf.advance(4);
            Some(key)
        } else {
            None
        };

        let mut payload = buf.split_to(payload_len).to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload,
        }))
    }
}

/// Reassembles fragmented data messages
///
/// The first frame of a chain is TEXT or BINARY, subsequent frames are
/// CONTINUATION, and FIN on the last frame completes the message. Control
/// frames are handled by the caller and never enter the assembler.
#[derive(Debug)]
pub struct MessageAssembler {
    opcode: Option<OpCode>,
    buf: Vec<u8>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            opcode: None,
            buf: Vec::new(),
            max_message_size,
        }
    }

    /// Push one data frame; yields `(opcode, payload)` when the chain completes
    pub fn push(&mut self, frame: Frame) -> Result<Option<(OpCode, Vec<u8>)>, TransportError> {
        match (self.opcode, frame.opcode) {
            (None, OpCode::Text | OpCode::Binary) => {
                self.opcode = Some(frame.opcode);
            }
            (None, _) => {
                return Err(TransportError::InvalidFrame(
                    "continuation without a message in progress".to_string(),
                ));
            }
            (Some(_), OpCode::Continuation) => {}
            (Some(_), _) => {
                return Err(TransportError::InvalidFrame(
                    "new data frame inside a fragmented message".to_string(),
                ));
            }
        }

        if self.buf.len() + frame.payload.len() > self.max_message_size {
            return Err(TransportError::FrameTooLarge {
                size: self.buf.len() + frame.payload.len(),
                limit: self.max_message_size,
            });
        }
        self.buf.extend_from_slice(&frame.payload);

        if frame.fin {
            let opcode = self.opcode.take().unwrap_or(OpCode::Text);
            Ok(Some((opcode, std::mem::take(&mut self.buf))))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 16 * 1024 * 1024;

    fn decode_all(bytes: &[u8]) -> Frame {
        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(bytes);
        decoder.decode(&mut buf).unwrap().expect("complete frame")
    }

    #[test]
    fn test_length_encoding_boundaries() {
        // <126 inline, 126 -> 16-bit, 127 -> 64-bit
        for (len, header_len) in [(125usize, 2usize), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0x61; len];
            let encoded = encode_frame(OpCode::Text, &payload, true, None);
            assert_eq!(encoded.len(), header_len + len, "payload length {}", len);

            let frame = decode_all(&encoded);
            assert_eq!(frame.opcode, OpCode::Text);
            assert!(frame.fin);
            assert_eq!(frame.payload, payload, "payload length {}", len);
        }
    }

    #[test]
    fn test_masked_roundtrip_boundaries() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode_frame(OpCode::Text, &payload, true, Some([0xDE, 0xAD, 0xBE, 0xEF]));

            let frame = decode_all(&encoded);
            assert_eq!(frame.payload, payload, "payload length {}", len);
        }
    }

    #[test]
    fn test_mask_is_involutive() {
        let mut data = b"devtools".to_vec();
        let original = data.clone();
        apply_mask(&mut data, [1, 2, 3, 4]);
        assert_ne!(data, original);
        apply_mask(&mut data, [1, 2, 3, 4]);
        assert_eq!(data, original);
    }

    #[test]
    fn test_partial_input_yields_none() {
        let encoded = encode_frame(OpCode::Text, &[0x41; 300], true, Some([9, 9, 9, 9]));
        let decoder = FrameDecoder::new(LIMIT);

        // Feed one byte at a time; no prefix may produce a frame or an error
        let mut buf = BytesMut::new();
        for (i, byte) in encoded.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let result = decoder.decode(&mut buf).unwrap();
            if i + 1 < encoded.len() {
                assert!(result.is_none(), "frame produced after {} bytes", i + 1);
            } else {
                assert_eq!(result.unwrap().payload.len(), 300);
            }
        }
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut bytes = encode_frame(OpCode::Text, b"first", true, None);
        bytes.extend(encode_frame(OpCode::Text, b"second", true, None));

        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(&bytes[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().payload, b"first");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().payload, b"second");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_rejects_reserved_bits() {
        let mut encoded = encode_frame(OpCode::Text, b"x", true, None);
        encoded[0] |= 0x40;

        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(&encoded[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_opcode() {
        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(&[0x83u8, 0x00][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_long_control_payload() {
        // A PING with a 126-byte payload needs the 16-bit length encoding,
        // which is itself illegal for control frames
        let encoded = encode_frame(OpCode::Ping, &[0u8; 126], true, None);
        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(&encoded[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_fragmented_control_frame() {
        let encoded = encode_frame(OpCode::Ping, b"x", false, None);
        let decoder = FrameDecoder::new(LIMIT);
        let mut buf = BytesMut::from(&encoded[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_oversize_frame_fails_before_payload_arrives() {
        let decoder = FrameDecoder::new(1024);

        // Header announcing a 2048-byte payload; no payload bytes yet
        let header = encode_frame(OpCode::Text, &[0u8; 2048], true, None);
        let mut buf = BytesMut::from(&header[..4]);

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(TransportError::FrameTooLarge { size: 2048, limit: 1024 })
        ));
    }

    #[test]
    fn test_reassembly() {
        let mut assembler = MessageAssembler::new(LIMIT);

        let first = Frame {
            fin: false,
            opcode: OpCode::Text,
            payload: b"hel".to_vec(),
        };
        let middle = Frame {
            fin: false,
            opcode: OpCode::Continuation,
            payload: b"lo ".to_vec(),
        };
        let last = Frame {
            fin: true,
            opcode: OpCode::Continuation,
            payload: b"world".to_vec(),
        };

        assert!(assembler.push(first).unwrap().is_none());
        assert!(assembler.push(middle).unwrap().is_none());
        let (opcode, payload) = assembler.push(last).unwrap().unwrap();
        assert_eq!(opcode, OpCode::Text);
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn test_rejects_orphan_continuation() {
        let mut assembler = MessageAssembler::new(LIMIT);
        let orphan = Frame {
            fin: true,
            opcode: OpCode::Continuation,
            payload: Vec::new(),
        };
        assert!(matches!(
            assembler.push(orphan),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rejects_interleaved_data_frame() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assembler
            .push(Frame {
                fin: false,
                opcode: OpCode::Text,
                payload: b"a".to_vec(),
            })
            .unwrap();

        assert!(matches!(
            assembler.push(Frame {
                fin: true,
                opcode: OpCode::Text,
                payload: b"b".to_vec(),
            }),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_reassembled_message_size_limit() {
        let mut assembler = MessageAssembler::new(8);
        assembler
            .push(Frame {
                fin: false,
                opcode: OpCode::Text,
                payload: vec![0; 6],
            })
            .unwrap();

        assert!(matches!(
            assembler.push(Frame {
                fin: true,
                opcode: OpCode::Continuation,
                payload: vec![0; 6],
            }),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }
}

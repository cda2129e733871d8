//! Binary frame format for the muxcall transport.
//!
//! Frame layout (18-byte header + payload):
//!
//! ```text
//! +--------------+---------+----------+---------+------------------+
//! | sequence     | size    | crc32    | flag    | payload          |
//! | 8 bytes      | 2 bytes | 4 bytes  | 4 bytes | size bytes       |
//! +--------------+---------+----------+---------+------------------+
//! ```
//!
//! All header fields are big-endian. The CRC is the IEEE CRC-32 of the
//! payload, 0 when the payload is empty. The flag field:
//!
//! ```text
//! +---------+------------+----------+---------+---------+---------+-------------+---------------+
//! | open(1) | open_ack(1)| close(1) | data(1) | ping(1) | pong(1) | reserved(2) | stream id(24) |
//! +---------+------------+----------+---------+---------+---------+-------------+---------------+
//! ```
//!
//! The high six bits are control flags, the next two are reserved (zero on
//! send, ignored on receive), the low 24 bits carry the stream ID. Stream IDs
//! are allocated by the accepting side; an open request carries stream ID 0.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (8+2+4+4 = 18).
pub const FRAME_HEADER_SIZE: usize = 18;

/// Frame flag bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// Stream-open request. Stream ID bits must be 0.
    pub const OPEN: u32 = 1 << 31;
    /// Stream-open acknowledgment carrying the newly assigned ID.
    pub const OPEN_ACK: u32 = 1 << 30;
    /// Close the stream identified by the ID bits.
    pub const CLOSE: u32 = 1 << 29;
    /// Stream payload for the stream identified by the ID bits.
    pub const DATA: u32 = 1 << 28;
    /// Liveness probe; empty payload.
    pub const PING: u32 = 1 << 27;
    /// Reply to a probe; empty payload.
    pub const PONG: u32 = 1 << 26;

    /// Mask covering the six control bits.
    const CONTROL_MASK: u32 = 0xFC00_0000;

    /// Mask covering the 24-bit stream ID.
    pub const STREAM_ID_MASK: u32 = 0x00FF_FFFF;

    /// A bare flag word: no control bit, no stream ID. Frames carrying it
    /// with a non-empty payload are call-dispatcher traffic.
    pub fn bare() -> Self {
        Self(0)
    }

    pub fn open() -> Self {
        Self(Self::OPEN)
    }

    pub fn open_ack(stream_id: u32) -> Self {
        Self(Self::OPEN_ACK | (stream_id & Self::STREAM_ID_MASK))
    }

    pub fn close(stream_id: u32) -> Self {
        Self(Self::CLOSE | (stream_id & Self::STREAM_ID_MASK))
    }

    pub fn data(stream_id: u32) -> Self {
        Self(Self::DATA | (stream_id & Self::STREAM_ID_MASK))
    }

    pub fn ping() -> Self {
        Self(Self::PING)
    }

    pub fn pong() -> Self {
        Self(Self::PONG)
    }

    /// Reconstructs flags from a wire value. Reserved bits are accepted and
    /// ignored by the accessors below.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// The 24-bit stream ID carried in the low bits.
    pub fn stream_id(&self) -> u32 {
        self.0 & Self::STREAM_ID_MASK
    }

    pub fn is_open(&self) -> bool {
        self.0 & Self::OPEN != 0
    }

    pub fn is_open_ack(&self) -> bool {
        self.0 & Self::OPEN_ACK != 0
    }

    pub fn is_close(&self) -> bool {
        self.0 & Self::CLOSE != 0
    }

    pub fn is_data(&self) -> bool {
        self.0 & Self::DATA != 0
    }

    pub fn is_ping(&self) -> bool {
        self.0 & Self::PING != 0
    }

    pub fn is_pong(&self) -> bool {
        self.0 & Self::PONG != 0
    }

    /// Whether any control bit is set.
    pub fn is_control(&self) -> bool {
        self.0 & Self::CONTROL_MASK != 0
    }
}

/// A parsed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic transport-local frame counter. Advisory; used for
    /// diagnostics only, never for gap detection.
    pub sequence: u64,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame with the given payload.
    pub fn new(sequence: u64, flags: FrameFlags, payload: Bytes) -> Self {
        Self {
            sequence,
            flags,
            payload,
        }
    }

    /// Creates an empty control frame (ping, pong, open, open-ack, close).
    pub fn control(sequence: u64, flags: FrameFlags) -> Self {
        Self::new(sequence, flags, Bytes::new())
    }

    /// Encodes the frame into a contiguous buffer.
    ///
    /// The whole frame is materialized so the writer can emit it in one
    /// write, keeping concurrent producers from interleaving on the socket.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        // Sequence (8 bytes)
        buf.put_u64(self.sequence);

        // Size (2 bytes)
        buf.put_u16(payload_len as u16);

        // CRC-32 of the payload (4 bytes), 0 when empty
        let crc = if payload_len == 0 {
            0
        } else {
            crc32fast::hash(&self.payload)
        };
        buf.put_u32(crc);

        // Flag (4 bytes)
        buf.put_u32(self.flags.bits());

        // Payload
        buf.put_slice(&self.payload);

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on CRC failure.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming.
        let sequence = u64::from_be_bytes(buf[0..8].try_into().expect("8-byte slice"));
        let size = u16::from_be_bytes([buf[8], buf[9]]) as usize;
        let crc_expected = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);
        let flag_bits = u32::from_be_bytes([buf[14], buf[15], buf[16], buf[17]]);

        if buf.len() < FRAME_HEADER_SIZE + size {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(size).freeze();

        if size > 0 {
            let crc_actual = crc32fast::hash(&payload);
            if crc_actual != crc_expected {
                return Err(ProtocolError::CrcMismatch {
                    expected: crc_expected,
                    actual: crc_actual,
                });
            }
        }

        Ok(Some(Self {
            sequence,
            flags: FrameFlags::from_bits(flag_bits),
            payload,
        }))
    }
}

/// Incremental frame decoder over a growable buffer.
///
/// The connection reader appends socket reads with [`extend`](Self::extend)
/// and drains complete frames with [`decode_frame`](Self::decode_frame).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from_static(b"hello muxcall");
        let frame = Frame::new(7, FrameFlags::bare(), payload.clone());

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.flags, FrameFlags::bare());
        assert_eq!(decoded.payload, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_control_frame_has_zero_crc() {
        let frame = Frame::control(1, FrameFlags::ping());
        let buf = frame.encode().unwrap();

        assert_eq!(buf.len(), FRAME_HEADER_SIZE);
        // size field
        assert_eq!(&buf[8..10], &[0, 0]);
        // crc field
        assert_eq!(&buf[10..14], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_crc_validation() {
        let frame = Frame::new(1, FrameFlags::bare(), Bytes::from_static(b"payload"));
        let mut encoded = frame.encode().unwrap();

        // Corrupt one payload byte.
        let len = encoded.len();
        encoded[len - 1] ^= 0x01;

        let result = Frame::decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn test_crc_detects_any_single_bit_flip() {
        let frame = Frame::new(1, FrameFlags::bare(), Bytes::from_static(b"abc"));
        let encoded = frame.encode().unwrap();

        for byte in FRAME_HEADER_SIZE..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte] ^= 1 << bit;
                let result = Frame::decode(&mut corrupted);
                assert!(
                    matches!(result, Err(ProtocolError::CrcMismatch { .. })),
                    "flip of byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_incomplete_frame() {
        let frame = Frame::new(1, FrameFlags::bare(), Bytes::from_static(b"partial"));
        let encoded = frame.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..10]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..FRAME_HEADER_SIZE + 3]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let huge = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        let frame = Frame::new(1, FrameFlags::bare(), huge);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_max_payload_accepted() {
        let max = Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]);
        let frame = Frame::new(1, FrameFlags::data(3), max.clone());
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, max);
    }

    #[test]
    fn test_flags() {
        let flags = FrameFlags::data(0x123456);
        assert!(flags.is_data());
        assert!(!flags.is_open());
        assert!(!flags.is_ping());
        assert!(flags.is_control());
        assert_eq!(flags.stream_id(), 0x123456);

        assert!(FrameFlags::open().is_open());
        assert_eq!(FrameFlags::open().stream_id(), 0);
        assert!(FrameFlags::open_ack(9).is_open_ack());
        assert_eq!(FrameFlags::open_ack(9).stream_id(), 9);
        assert!(FrameFlags::close(9).is_close());
        assert!(FrameFlags::ping().is_ping());
        assert!(FrameFlags::pong().is_pong());
        assert!(!FrameFlags::bare().is_control());
    }

    #[test]
    fn test_stream_id_is_masked() {
        // IDs above 24 bits never leak into control bits.
        let flags = FrameFlags::data(0xFF00_0001);
        assert_eq!(flags.stream_id(), 1);
        assert!(flags.is_data());
        assert!(!flags.is_open());
    }

    #[test]
    fn test_reserved_bits_ignored_on_receive() {
        let bits = FrameFlags::DATA | (1 << 25) | 42;
        let flags = FrameFlags::from_bits(bits);
        assert!(flags.is_data());
        assert_eq!(flags.stream_id(), 42);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let f1 = Frame::new(1, FrameFlags::bare(), Bytes::from_static(b"one"));
        let f2 = Frame::new(2, FrameFlags::data(5), Bytes::from_static(b"two"));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&f1.encode().unwrap());
        decoder.extend(&f2.encode().unwrap());

        let d1 = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(d1.sequence, 1);
        assert_eq!(d1.payload.as_ref(), b"one");

        let d2 = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(d2.sequence, 2);
        assert_eq!(d2.flags.stream_id(), 5);

        assert!(decoder.decode_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_partial_feed() {
        let frame = Frame::new(9, FrameFlags::bare(), Bytes::from_static(b"chunked"));
        let encoded = frame.encode().unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_frame().unwrap().is_none());

        decoder.extend(&encoded[5..]);
        let decoded = decoder.decode_frame().unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), b"chunked");
    }
}

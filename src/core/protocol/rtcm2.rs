//! RTCM SC-104 version 2
//!
//! RTCM v2 rides on the GPS navigation-message word format. Each input byte
//! whose two top bits are `01` carries six data bits, least significant first
//! ("6-of-8" form). Bits are shifted into a 32-bit register holding the last
//! two parity bits of the previous word followed by the current 30-bit word
//! (24 data bits + 6 Hamming parity bits). When the previous word's last
//! parity bit (D30*) is set the data bits arrive inverted.
//!
//! A frame starts with a word whose first data byte is the preamble `0x66`;
//! the second word carries the number of body words. A parity failure inside
//! a frame drops the frame but keeps the register, so a preamble overlapping
//! the rejected word is still found.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{delegate_core, ParserCore, ProtocolParser};
use crate::core::bits::{BitReader, BitWriter, Msb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Msb0;

/// First data byte of every frame
pub const PREAMBLE: u8 = 0x66;
/// Largest body, in 30-bit words
pub const MAX_BODY_WORDS: usize = 31;

const PARITY_MASKS: [u32; 6] = [
    0xBB1F_3480,
    0x5D8F_9A40,
    0xAEC7_CD00,
    0x5763_E680,
    0x6BB1_F340,
    0x8B7A_89C0,
];

const D30_STAR: u32 = 0x4000_0000;
const DATA_MASK: u32 = 0x3FFF_FFC0;

fn parity(word: u32) -> u32 {
    PARITY_MASKS
        .iter()
        .fold(0, |p, &mask| (p << 1) | ((word & mask).count_ones() & 1))
}

/// Undo D30* inversion and check parity; `Err((received, computed))` on mismatch
fn decode_word(word: u32) -> Result<[u8; 3], (u32, u32)> {
    let w = if word & D30_STAR != 0 { word ^ DATA_MASK } else { word };
    let computed = parity(w);
    let received = w & 0x3F;
    if computed != received {
        return Err((received, computed));
    }
    Ok([(w >> 22) as u8, (w >> 14) as u8, (w >> 6) as u8])
}

fn reverse6(group: u8) -> u8 {
    (0..6).fold(0, |acc, i| acc | (((group >> i) & 1) << (5 - i)))
}

/// Two-word header shared by every RTCM v2 message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rtcm2Header {
    /// Message type (1..63)
    pub message_type: u8,
    /// Reference station id
    pub station_id: u16,
    /// Modified Z-count, 0.6 s units within the hour
    pub z_count: u16,
    /// Sequence number (3 bits)
    pub sequence: u8,
    /// Number of body words
    pub word_count: u8,
    /// Station health (3 bits)
    pub health: u8,
}

impl Rtcm2Header {
    /// Decode from the six data bytes of the first two words
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = BitReader::<Bits>::new(data);
        let preamble = r.u(8)? as u8;
        if preamble != PREAMBLE {
            return Err(CodecError::invalid("preamble", format!("{preamble:#04x}")));
        }
        Ok(Self {
            message_type: r.u(6)? as u8,
            station_id: r.u(10)? as u16,
            z_count: r.u(13)? as u16,
            sequence: r.u(3)? as u8,
            word_count: r.u(5)? as u8,
            health: r.u(3)? as u8,
        })
    }

    fn encode(&self, w: &mut BitWriter<'_, Bits>) {
        w.u(8, u32::from(PREAMBLE));
        w.u(6, u32::from(self.message_type));
        w.u(10, u32::from(self.station_id));
        w.u(13, u32::from(self.z_count));
        w.u(3, u32::from(self.sequence));
        w.u(5, u32::from(self.word_count));
        w.u(3, u32::from(self.health));
    }

    /// Seconds within the hour
    pub fn z_count_seconds(&self) -> f64 {
        f64::from(self.z_count) * 0.6
    }
}

/// Type 3: reference station parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStation {
    /// ECEF X, cm
    pub x: i32,
    /// ECEF Y, cm
    pub y: i32,
    /// ECEF Z, cm
    pub z: i32,
}

/// Type 16: special message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpecialMessage {
    /// ASCII text with trailing fill removed
    pub text: String,
}

/// RTCM v2 payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Rtcm2Payload {
    /// Type 3
    ReferenceStation(ReferenceStation),
    /// Type 16
    Special(SpecialMessage),
}

/// An RTCM v2 message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rtcm2Message {
    /// Frame header
    pub header: Rtcm2Header,
    /// Decoded body
    pub payload: Rtcm2Payload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Rtcm2Message {
    /// Message with an empty header and no tag
    pub fn new(payload: Rtcm2Payload) -> Self {
        Self {
            header: Rtcm2Header::default(),
            payload,
            tag: None,
        }
    }
}

impl ProtocolMessage for Rtcm2Message {
    type Id = u8;
    const PROTOCOL: Protocol = Protocol::Rtcm2;

    fn message_id(&self) -> u8 {
        match self.payload {
            Rtcm2Payload::ReferenceStation(_) => 3,
            Rtcm2Payload::Special(_) => 16,
        }
    }

    fn name(&self) -> &'static str {
        match self.payload {
            Rtcm2Payload::ReferenceStation(_) => "Type3",
            Rtcm2Payload::Special(_) => "Type16",
        }
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        match &self.payload {
            Rtcm2Payload::ReferenceStation(_) => 12,
            Rtcm2Payload::Special(m) => m.text.len().div_ceil(3) * 3,
        }
    }

    fn write_payload(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("RTCM v2 messages are receive-only"))
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let mut r = BitReader::<Bits>::new(*input);
        match &mut self.payload {
            Rtcm2Payload::ReferenceStation(station) => {
                station.x = r.s(32)?;
                station.y = r.s(32)?;
                station.z = r.s(32)?;
            }
            Rtcm2Payload::Special(special) => {
                let raw = r.bytes(input.len())?;
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                special.text = String::from_utf8_lossy(&raw[..end]).into_owned();
            }
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut body = Vec::new();
        self.write_payload(&mut body)?;
        encode_frame(&self.header, &body)
    }
}

/// 6-of-8 encoder carrying the parity history from one frame to the next
#[derive(Debug, Clone, Copy, Default)]
pub struct Rtcm2Encoder {
    prev: u32,
}

impl Rtcm2Encoder {
    /// Encoder starting from a clear parity history
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a header and body as 6-of-8 bytes with parity
    ///
    /// The body is zero-padded to whole words and `word_count` is taken from
    /// its length.
    pub fn encode(&mut self, header: &Rtcm2Header, body: &[u8]) -> Result<Bytes, CodecError> {
        let words = body.len().div_ceil(3);
        if words > MAX_BODY_WORDS {
            return Err(CodecError::invalid(
                "word count",
                format!("{words} words exceeds {MAX_BODY_WORDS}"),
            ));
        }

        let mut data = Vec::with_capacity(6 + words * 3);
        {
            let mut w = BitWriter::<Bits>::new(&mut data);
            Rtcm2Header {
                word_count: words as u8,
                ..*header
            }
            .encode(&mut w);
            w.bytes(body);
        }
        data.resize(6 + words * 3, 0);

        let mut out = BytesMut::with_capacity(data.len() / 3 * 5);
        for chunk in data.chunks(3) {
            let d = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
            let head = (self.prev & 0x3) << 30;
            let p = parity(head | (d << 6));
            let sent = if self.prev & 1 == 1 { d ^ 0x00FF_FFFF } else { d };
            let word = head | (sent << 6) | p;
            for shift in [24, 18, 12, 6, 0] {
                out.put_u8(0x40 | reverse6(((word >> shift) & 0x3F) as u8));
            }
            self.prev = word;
        }
        Ok(out.freeze())
    }
}

/// Encode one frame from a clear parity history
pub fn encode_frame(header: &Rtcm2Header, body: &[u8]) -> Result<Bytes, CodecError> {
    Rtcm2Encoder::new().encode(header, body)
}

/// Registry with every RTCM v2 message this crate decodes
pub fn default_registry() -> MessageRegistry<Rtcm2Message> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| Rtcm2Message::new(Rtcm2Payload::ReferenceStation(ReferenceStation::default())))
        .register(|| Rtcm2Message::new(Rtcm2Payload::Special(SpecialMessage::default())));
    registry
}

/// RTCM v2 frame parser
pub struct Rtcm2Parser {
    core: ParserCore<Rtcm2Message>,
    word: u32,
    bits: usize,
    // decoded data bytes, three per word
    buf: Vec<u8>,
    frame_len: usize,
}

impl Rtcm2Parser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<Rtcm2Message>) -> Self {
        Self {
            core: ParserCore::new(registry),
            word: 0,
            bits: 0,
            buf: Vec::with_capacity(6 + MAX_BODY_WORDS * 3),
            frame_len: 0,
        }
    }

    fn seek(&mut self) {
        let mut preamble = (self.word >> 22) as u8;
        if self.word & D30_STAR != 0 {
            preamble ^= 0xFF;
        }
        if preamble != PREAMBLE {
            return;
        }
        if let Ok(bytes) = decode_word(self.word) {
            self.buf.extend_from_slice(&bytes);
            self.bits = 0;
        }
    }

    fn finish(&mut self) -> bool {
        let published = match Rtcm2Header::decode(&self.buf) {
            Ok(header) => {
                let words = self.buf.len() / 3;
                self.core
                    .dispatch(&header.message_type, &self.buf[6..], words * 5, |m| m.header = header)
            }
            Err(_) => false,
        };
        self.end_frame();
        published
    }

    fn end_frame(&mut self) {
        self.buf.clear();
        self.bits = 0;
        self.frame_len = 0;
        // D29*/D30* of the last word are needed to decode the next one
        self.word &= 0x3;
    }
}

impl Default for Rtcm2Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for Rtcm2Parser {
    fn protocol(&self) -> Protocol {
        Protocol::Rtcm2
    }

    fn feed(&mut self, byte: u8) -> bool {
        if byte & 0xC0 != 0x40 {
            return false;
        }

        let mut data = byte;
        let mut published = false;
        for _ in 0..6 {
            self.word = (self.word << 1) | u32::from(data & 1);
            data >>= 1;

            if self.buf.is_empty() {
                self.seek();
                continue;
            }

            self.bits += 1;
            if self.bits < 30 {
                continue;
            }
            self.bits = 0;

            match decode_word(self.word) {
                Ok(bytes) => self.buf.extend_from_slice(&bytes),
                Err((received, computed)) => {
                    let message_type = (self.buf[1] >> 2).to_string();
                    self.core.crc_error(Some(message_type), received, computed);
                    // the frame's decoded words go, `word` stays for the preamble hunt
                    self.buf.clear();
                    self.frame_len = 0;
                    continue;
                }
            }

            if self.buf.len() == 6 {
                self.frame_len = usize::from(self.buf[5] >> 3) * 3 + 6;
            }
            if self.buf.len() >= 6 && self.buf.len() >= self.frame_len {
                published |= self.finish();
            }
        }
        published
    }

    fn reset(&mut self) {
        self.end_frame();
    }

    fn sync_pattern(&self) -> &'static [u8] {
        &[]
    }

    delegate_core!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ParseError;
    use crate::core::message::GnssMessage;
    use crate::core::protocol::test_util::{drain, feed_all};

    fn header(message_type: u8) -> Rtcm2Header {
        Rtcm2Header {
            message_type,
            station_id: 273,
            z_count: 4321,
            sequence: 5,
            word_count: 0,
            health: 0,
        }
    }

    fn type3_body() -> Vec<u8> {
        let mut body = Vec::new();
        let mut w = BitWriter::<Msb0>::new(&mut body);
        w.s(32, 111_410_460);
        w.s(32, -485_072_974);
        w.s(32, 397_582_170);
        body
    }

    #[test]
    fn test_parity_round_trip() {
        for d in [0x66_0000u32, 0x12_3456, 0xFF_FFFF, 0] {
            for prev in [0u32, 1, 2, 3] {
                let head = prev << 30;
                let p = parity(head | (d << 6));
                let sent = if prev & 1 == 1 { d ^ 0xFF_FFFF } else { d };
                let word = head | (sent << 6) | p;
                let bytes = decode_word(word).unwrap();
                assert_eq!(bytes, [(d >> 16) as u8, (d >> 8) as u8, d as u8]);
                assert!(decode_word(word ^ (1 << 10)).is_err());
            }
        }
    }

    #[test]
    fn test_six_of_eight_form() {
        let frame = encode_frame(&header(3), &type3_body()).unwrap();
        assert_eq!(frame.len(), 6 * 5);
        assert!(frame.iter().all(|b| b & 0xC0 == 0x40));
    }

    #[test]
    fn test_byte_at_a_time_type3() {
        let frame = encode_frame(&header(3), &type3_body()).unwrap();
        let mut parser = Rtcm2Parser::new();
        let mut rx = parser.subscribe_messages();

        assert_eq!(feed_all(&mut parser, &frame), vec![frame.len() - 1]);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let GnssMessage::Rtcm2(msg) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        assert_eq!(msg.header.message_type, 3);
        assert_eq!(msg.header.station_id, 273);
        assert_eq!(msg.header.z_count, 4321);
        assert_eq!(msg.header.sequence, 5);
        assert_eq!(msg.header.word_count, 4);
        assert_eq!(
            msg.payload,
            Rtcm2Payload::ReferenceStation(ReferenceStation {
                x: 111_410_460,
                y: -485_072_974,
                z: 397_582_170,
            })
        );
        assert_eq!(parser.parsed_bytes(), frame.len() as u64);
    }

    #[test]
    fn test_consecutive_frames_and_noise() {
        let mut encoder = Rtcm2Encoder::new();
        let first = encoder.encode(&header(16), b"HELLO RTCM").unwrap();
        let second = encoder.encode(&header(3), &type3_body()).unwrap();
        let mut stream = first.to_vec();
        stream.extend_from_slice(&[0x0D, 0x0A, 0xFF]);
        stream.extend_from_slice(&second);

        let mut parser = Rtcm2Parser::new();
        let mut rx = parser.subscribe_messages();
        let hits = feed_all(&mut parser, &stream);
        assert_eq!(hits, vec![first.len() - 1, stream.len() - 1]);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        let GnssMessage::Rtcm2(text) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        assert_eq!(text.payload, Rtcm2Payload::Special(SpecialMessage { text: "HELLO RTCM".into() }));
        assert_eq!(text.byte_size(), 12);
        assert_eq!(messages[1].name(), "Type3");
    }

    #[test]
    fn test_body_parity_failure_keeps_register() {
        let mut encoder = Rtcm2Encoder::new();
        let mut bad = encoder.encode(&header(3), &type3_body()).unwrap().to_vec();
        // third word, one data bit
        bad[12] ^= 0x01;
        let good = encoder.encode(&header(16), b"OK").unwrap();

        let mut parser = Rtcm2Parser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        assert!(feed_all(&mut parser, &bad).is_empty());
        let errors_after_bad = drain(&mut errors);
        assert_eq!(errors_after_bad.len(), 1);
        assert!(matches!(&errors_after_bad[0], ParseError::Crc { message_id: Some(id), .. } if id == "3"));
        assert_eq!(parser.stats().crc_errors, 1);

        assert_eq!(feed_all(&mut parser, &good).len(), 1);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name(), "Type16");
    }

    #[test]
    fn test_preamble_inside_rejected_word() {
        let first = encode_frame(&header(16), b"HELLO RTCM").unwrap();
        let second = encode_frame(&header(3), &type3_body()).unwrap();
        // header words, one body word and twelve bits of the next
        let mut stream = first[..17].to_vec();
        stream.extend_from_slice(&second);

        let mut parser = Rtcm2Parser::new();
        let mut rx = parser.subscribe_messages();
        assert_eq!(feed_all(&mut parser, &stream), vec![stream.len() - 1]);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name(), "Type3");
        assert_eq!(parser.stats().crc_errors, 1);
    }

    #[test]
    fn test_non_six_of_eight_bytes_ignored() {
        let frame = encode_frame(&header(16), b"ABC").unwrap();
        let mut stream = Vec::new();
        for &b in frame.iter() {
            stream.push(b);
            stream.push(0x80);
        }
        let mut parser = Rtcm2Parser::new();
        assert_eq!(feed_all(&mut parser, &stream).len(), 1);
    }

    #[test]
    fn test_unknown_type() {
        let frame = encode_frame(&header(9), &[0u8; 6]).unwrap();
        let mut parser = Rtcm2Parser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[0], ParseError::UnknownMessage { message_id, .. } if message_id == "9"));
    }

    #[test]
    fn test_header_decode() {
        let mut data = Vec::new();
        header(16).encode(&mut BitWriter::<Msb0>::new(&mut data));
        let decoded = Rtcm2Header::decode(&data).unwrap();
        assert_eq!(decoded, header(16));
        assert!((decoded.z_count_seconds() - 2592.6).abs() < 1e-9);
        assert!(Rtcm2Header::decode(&[0u8; 6]).is_err());
    }
}

//! RTCM SC-104 version 3
//!
//! Frame: `D3 | 6 reserved bits + 10-bit length | payload | CRC-24Q (3 bytes BE)`.
//! The CRC covers header and payload; the message number is the first 12
//! payload bits. Messages are receive-only.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::checksum::crc24q;
use super::{delegate_core, ParserCore, ProtocolParser};
use crate::core::bits::{BitOrder, BitReader, Msb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Msb0;

/// Frame preamble
pub const PREAMBLE: u8 = 0xD3;
/// Largest payload representable by the 10-bit length
pub const MAX_PAYLOAD: usize = 1023;

/// Stationary antenna reference point (1005 and 1006)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStation {
    /// Reference station id
    pub station_id: u16,
    /// ITRF realization year
    pub itrf_year: u8,
    /// GPS, GLONASS, Galileo and reference-station indicators (4 bits)
    pub indicators: u8,
    /// Single receiver oscillator indicator
    pub single_oscillator: bool,
    /// Quarter cycle indicator (2 bits)
    pub quarter_cycle: u8,
    /// ECEF X, 0.1 mm
    pub x: i64,
    /// ECEF Y, 0.1 mm
    pub y: i64,
    /// ECEF Z, 0.1 mm
    pub z: i64,
    /// Antenna height, 0.1 mm (1006 only)
    pub antenna_height: Option<u16>,
}

impl ReferenceStation {
    /// ECEF coordinates in metres
    pub fn ecef_m(&self) -> [f64; 3] {
        [self.x, self.y, self.z].map(|v| v as f64 * 1e-4)
    }
}

/// Unicode text string (1029)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextString {
    /// Reference station id
    pub station_id: u16,
    /// Modified Julian day
    pub mjd: u16,
    /// Seconds of day (UTC)
    pub seconds_of_day: u32,
    /// Number of characters
    pub characters: u8,
    /// Decoded text
    pub text: String,
}

/// RTCM v3 payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Rtcm3Payload {
    /// Stationary RTK reference station ARP
    Msg1005(ReferenceStation),
    /// Stationary RTK reference station ARP with antenna height
    Msg1006(ReferenceStation),
    /// Unicode text string
    Msg1029(TextString),
}

/// An RTCM v3 message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rtcm3Message {
    /// Decoded body
    pub payload: Rtcm3Payload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Rtcm3Message {
    /// Message with no tag
    pub fn new(payload: Rtcm3Payload) -> Self {
        Self { payload, tag: None }
    }
}

fn read_station(r: &mut BitReader<'_, Bits>, station: &mut ReferenceStation) -> Result<(), CodecError> {
    station.station_id = r.u(12)? as u16;
    station.itrf_year = r.u(6)? as u8;
    station.indicators = r.u(4)? as u8;
    station.x = r.s64(38)?;
    station.single_oscillator = r.u(1)? == 1;
    r.skip(1)?;
    station.y = r.s64(38)?;
    station.quarter_cycle = r.u(2)? as u8;
    station.z = r.s64(38)?;
    Ok(())
}

impl ProtocolMessage for Rtcm3Message {
    type Id = u16;
    const PROTOCOL: Protocol = Protocol::Rtcm3;

    fn message_id(&self) -> u16 {
        match self.payload {
            Rtcm3Payload::Msg1005(_) => 1005,
            Rtcm3Payload::Msg1006(_) => 1006,
            Rtcm3Payload::Msg1029(_) => 1029,
        }
    }

    fn name(&self) -> &'static str {
        match self.payload {
            Rtcm3Payload::Msg1005(_) => "1005",
            Rtcm3Payload::Msg1006(_) => "1006",
            Rtcm3Payload::Msg1029(_) => "1029",
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
            Rtcm3Payload::Msg1005(_) => 19,
            Rtcm3Payload::Msg1006(_) => 21,
            Rtcm3Payload::Msg1029(m) => 9 + m.text.len(),
        }
    }

    fn write_payload(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("RTCM v3 messages are receive-only"))
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let mut r = BitReader::<Bits>::new(*input);
        let number = r.u(12)? as u16;
        if number != self.message_id() {
            return Err(CodecError::invalid(
                "message number",
                format!("expected {}, found {number}", self.message_id()),
            ));
        }
        match &mut self.payload {
            Rtcm3Payload::Msg1005(station) => {
                read_station(&mut r, station)?;
                station.antenna_height = None;
            }
            Rtcm3Payload::Msg1006(station) => {
                read_station(&mut r, station)?;
                station.antenna_height = Some(r.u(16)? as u16);
            }
            Rtcm3Payload::Msg1029(text) => {
                text.station_id = r.u(12)? as u16;
                text.mjd = r.u(16)? as u16;
                text.seconds_of_day = r.u(17)?;
                text.characters = r.u(7)? as u8;
                let units = r.u(8)? as usize;
                let raw = r.bytes(units)?;
                text.text = String::from_utf8(raw.to_vec())
                    .map_err(|e| CodecError::invalid("text", e.to_string()))?;
            }
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut payload = Vec::new();
        self.write_payload(&mut payload)?;
        encode_frame(&payload)
    }
}

/// Build a complete RTCM v3 frame around `payload`
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::invalid(
            "length",
            format!("{} bytes exceeds {MAX_PAYLOAD}", payload.len()),
        ));
    }
    let mut frame = BytesMut::with_capacity(payload.len() + 6);
    frame.put_u8(PREAMBLE);
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    let crc = crc24q(&frame);
    frame.put_uint(u64::from(crc), 3);
    Ok(frame.freeze())
}

/// Registry with every RTCM v3 message this crate decodes
pub fn default_registry() -> MessageRegistry<Rtcm3Message> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| Rtcm3Message::new(Rtcm3Payload::Msg1005(ReferenceStation::default())))
        .register(|| Rtcm3Message::new(Rtcm3Payload::Msg1006(ReferenceStation::default())))
        .register(|| Rtcm3Message::new(Rtcm3Payload::Msg1029(TextString::default())));
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Length,
    Body,
}

/// RTCM v3 frame parser
pub struct Rtcm3Parser {
    core: ParserCore<Rtcm3Message>,
    phase: Phase,
    // preamble, length, payload, crc
    buf: Vec<u8>,
    payload_len: usize,
}

impl Rtcm3Parser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<Rtcm3Message>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: Phase::Seeking,
            buf: Vec::with_capacity(MAX_PAYLOAD + 6),
            payload_len: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let n = self.payload_len;
        let body_end = 3 + n;
        let computed = crc24q(&self.buf[..body_end]);
        let received = u32::from_be_bytes([0, self.buf[body_end], self.buf[body_end + 1], self.buf[body_end + 2]]);

        let payload = &self.buf[3..body_end];
        let mut pos = 0;
        let number = if n >= 2 {
            Some(Bits::get_u(payload, &mut pos, 12) as u16)
        } else {
            None
        };

        let published = if computed != received {
            self.core.crc_error(number.map(|n| n.to_string()), received, computed);
            false
        } else if let Some(number) = number {
            self.core.dispatch(&number, payload, n + 6, |_| {})
        } else {
            self.core.malformed(
                "",
                "frame",
                CodecError::invalid("message number", format!("{n}-byte payload")),
            );
            false
        };
        self.reset();
        published
    }
}

impl Default for Rtcm3Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for Rtcm3Parser {
    fn protocol(&self) -> Protocol {
        Protocol::Rtcm3
    }

    fn feed(&mut self, byte: u8) -> bool {
        match self.phase {
            Phase::Seeking => {
                if byte == PREAMBLE {
                    self.buf.push(byte);
                    self.phase = Phase::Length;
                }
            }
            Phase::Length => {
                self.buf.push(byte);
                if self.buf.len() == 3 {
                    if self.buf[1] & 0xFC != 0 {
                        // Reserved bits set: not a frame start
                        self.reset();
                        return false;
                    }
                    self.payload_len = usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]) & 0x03FF);
                    self.phase = Phase::Body;
                }
            }
            Phase::Body => {
                self.buf.push(byte);
                if self.buf.len() == self.payload_len + 6 {
                    return self.finish();
                }
            }
        }
        false
    }

    fn reset(&mut self) {
        self.phase = Phase::Seeking;
        self.buf.clear();
        self.payload_len = 0;
    }

    fn sync_pattern(&self) -> &'static [u8] {
        &[PREAMBLE]
    }

    delegate_core!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bits::BitWriter;
    use crate::core::error::ParseError;
    use crate::core::message::GnssMessage;
    use crate::core::protocol::test_util::{drain, feed_all};

    fn payload_1006() -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = BitWriter::<Msb0>::new(&mut out);
        w.u(12, 1006);
        w.u(12, 2003);
        w.u(6, 0);
        w.u(4, 0b0111);
        w.s64(38, 11_141_045_999);
        w.u(1, 1);
        w.u(1, 0);
        w.s64(38, -48_507_297_405);
        w.u(2, 0);
        w.s64(38, 39_758_217_037);
        w.u(16, 15_000);
        out
    }

    fn payload_1029(text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = BitWriter::<Msb0>::new(&mut out);
        w.u(12, 1029);
        w.u(12, 23);
        w.u(16, 60_000);
        w.u(17, 43_200);
        w.u(7, text.chars().count() as u32);
        w.u(8, text.len() as u32);
        w.bytes(text.as_bytes());
        out
    }

    #[test]
    fn test_frame_layout() {
        let payload = payload_1006();
        assert_eq!(payload.len(), 21);
        let frame = encode_frame(&payload).unwrap();
        assert_eq!(frame[0], 0xD3);
        assert_eq!(frame[1], 0x00);
        assert_eq!(frame[2], 21);
        assert_eq!(frame.len(), 21 + 6);
        assert_eq!(crc24q(&frame), 0);
    }

    #[test]
    fn test_byte_at_a_time_1006() {
        let frame = encode_frame(&payload_1006()).unwrap();
        let mut parser = Rtcm3Parser::new();
        let mut rx = parser.subscribe_messages();

        assert_eq!(feed_all(&mut parser, &frame), vec![frame.len() - 1]);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let GnssMessage::Rtcm3(msg) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        let Rtcm3Payload::Msg1006(station) = &msg.payload else {
            panic!("unexpected {:?}", msg.payload);
        };
        assert_eq!(station.station_id, 2003);
        assert_eq!(station.indicators, 0b0111);
        assert!(station.single_oscillator);
        assert_eq!(station.y, -48_507_297_405);
        assert_eq!(station.antenna_height, Some(15_000));
        assert!((station.ecef_m()[0] - 1_114_104.5999).abs() < 1e-6);
        assert_eq!(msg.byte_size(), 21);
    }

    #[test]
    fn test_text_message() {
        let frame = encode_frame(&payload_1029("Grüße")).unwrap();
        let mut parser = Rtcm3Parser::new();
        let mut rx = parser.subscribe_messages();
        feed_all(&mut parser, &frame);
        let messages = drain(&mut rx);
        let GnssMessage::Rtcm3(msg) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        let Rtcm3Payload::Msg1029(text) = &msg.payload else {
            panic!("unexpected {:?}", msg.payload);
        };
        assert_eq!(text.text, "Grüße");
        assert_eq!(text.characters, 5);
        assert_eq!(msg.byte_size(), 9 + "Grüße".len());
    }

    #[test]
    fn test_corrupted_payload() {
        let mut frame = encode_frame(&payload_1006()).unwrap().to_vec();
        frame[8] ^= 0x40;
        let mut parser = Rtcm3Parser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(drain(&mut rx).is_empty());
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_crc());
    }

    #[test]
    fn test_unknown_message_number() {
        let mut payload = Vec::new();
        let mut w = BitWriter::<Msb0>::new(&mut payload);
        w.u(12, 1077);
        w.pad(20);
        let frame = encode_frame(&payload).unwrap();

        let mut parser = Rtcm3Parser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ParseError::UnknownMessage { message_id, .. } if message_id == "1077"));
    }

    #[test]
    fn test_payload_too_short_for_message_number() {
        let mut stream = encode_frame(&[0x3E]).unwrap().to_vec();
        stream.extend_from_slice(&encode_frame(&[]).unwrap());
        stream.extend_from_slice(&encode_frame(&payload_1006()).unwrap());

        let mut parser = Rtcm3Parser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();
        assert_eq!(feed_all(&mut parser, &stream).len(), 1);
        assert_eq!(drain(&mut rx).len(), 1);

        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ParseError::Deserialize { protocol: Protocol::Rtcm3, .. })));
        assert_eq!(parser.stats().deserialize_errors, 2);
        assert_eq!(parser.stats().frames, 3);
    }

    #[test]
    fn test_write_payload_is_unsupported() {
        let msg = default_registry().create(&1005).unwrap();
        assert!(matches!(msg.write_payload(&mut Vec::new()), Err(CodecError::Unsupported(_))));
    }

    #[test]
    fn test_reserved_bits_resync() {
        let frame = encode_frame(&payload_1006()).unwrap();
        let mut stream = vec![0xD3, 0xFF, 0x00];
        stream.extend_from_slice(&frame);
        let mut parser = Rtcm3Parser::new();
        assert_eq!(feed_all(&mut parser, &stream).len(), 1);
    }
}

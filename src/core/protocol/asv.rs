//! Asv telemetry protocol
//!
//! Frame layout (little-endian header, MSB-first payload fields):
//!
//! ```text
//! AA 44 | len u16 | seq u16 | sender u8 | target u8 | msg id u16 | payload | crc u16
//! ```
//!
//! `len` counts payload bytes only. The CRC is CRC-16/CCITT-FALSE over the
//! ten header bytes and the payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::checksum::crc16_ccitt;
use super::{delegate_core, rescan, ParserCore, ProtocolParser};
use crate::core::bits::{BitReader, BitWriter, Msb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Msb0;

/// Frame start
pub const SYNC: [u8; 2] = [0xAA, 0x44];
/// Header size including sync
pub const HEADER_LEN: usize = 10;
/// Largest payload accepted by the parser
pub const MAX_PAYLOAD: usize = 2048;

/// Heartbeat message id
pub const HEARTBEAT: u16 = 0x0110;
/// Text message id
pub const TEXT: u16 = 0x0120;

/// Routing fields carried in every frame header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AsvHeader {
    /// Rolling sequence number
    pub sequence: u16,
    /// Sender address
    pub sender: u8,
    /// Target address
    pub target: u8,
}

/// Heartbeat: empty payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Heartbeat;

/// Status text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Text {
    /// Severity level
    pub level: u8,
    /// UTF-8 text
    pub text: String,
}

/// Asv payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AsvPayload {
    /// 0x0110
    Heartbeat(Heartbeat),
    /// 0x0120
    Text(Text),
}

/// An Asv message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsvMessage {
    /// Routing fields
    pub header: AsvHeader,
    /// Decoded body
    pub payload: AsvPayload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl AsvMessage {
    /// Message with a zeroed header and no tag
    pub fn new(payload: AsvPayload) -> Self {
        Self {
            header: AsvHeader::default(),
            payload,
            tag: None,
        }
    }

    /// Set the sequence number
    #[must_use]
    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.header.sequence = sequence;
        self
    }

    /// Set sender and target addresses
    #[must_use]
    pub fn with_route(mut self, sender: u8, target: u8) -> Self {
        self.header.sender = sender;
        self.header.target = target;
        self
    }

    /// Rolling sequence number
    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }
}

impl ProtocolMessage for AsvMessage {
    type Id = u16;
    const PROTOCOL: Protocol = Protocol::Asv;

    fn message_id(&self) -> u16 {
        match self.payload {
            AsvPayload::Heartbeat(_) => HEARTBEAT,
            AsvPayload::Text(_) => TEXT,
        }
    }

    fn name(&self) -> &'static str {
        match self.payload {
            AsvPayload::Heartbeat(_) => "HEARTBEAT",
            AsvPayload::Text(_) => "TEXT",
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
            AsvPayload::Heartbeat(_) => 0,
            AsvPayload::Text(t) => 3 + t.text.len(),
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match &self.payload {
            AsvPayload::Heartbeat(_) => {}
            AsvPayload::Text(t) => {
                let len = u16::try_from(t.text.len())
                    .map_err(|_| CodecError::invalid("text", "longer than 65535 bytes"))?;
                let mut w = BitWriter::<Bits>::new(out);
                w.u(8, u32::from(t.level));
                w.u(16, u32::from(len));
                w.bytes(t.text.as_bytes());
            }
        }
        Ok(())
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let mut r = BitReader::<Bits>::new(*input);
        match &mut self.payload {
            AsvPayload::Heartbeat(_) => {}
            AsvPayload::Text(t) => {
                t.level = r.u(8)? as u8;
                let len = r.u(16)? as usize;
                let raw = r.bytes(len)?;
                t.text = std::str::from_utf8(raw)
                    .map_err(|e| CodecError::invalid("text", e.to_string()))?
                    .to_string();
            }
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut payload = Vec::with_capacity(self.byte_size());
        self.write_payload(&mut payload)?;
        encode_frame(&self.header, self.message_id(), &payload)
    }
}

/// Build a complete Asv frame around `payload`
pub fn encode_frame(header: &AsvHeader, message_id: u16, payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::invalid(
            "length",
            format!("{} bytes exceeds {MAX_PAYLOAD}", payload.len()),
        ));
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len() + 2);
    frame.put_slice(&SYNC);
    frame.put_u16_le(payload.len() as u16);
    frame.put_u16_le(header.sequence);
    frame.put_u8(header.sender);
    frame.put_u8(header.target);
    frame.put_u16_le(message_id);
    frame.put_slice(payload);
    let crc = crc16_ccitt(&frame);
    frame.put_u16_le(crc);
    Ok(frame.freeze())
}

/// Registry with every Asv message this crate decodes
pub fn default_registry() -> MessageRegistry<AsvMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| AsvMessage::new(AsvPayload::Heartbeat(Heartbeat)))
        .register(|| AsvMessage::new(AsvPayload::Text(Text::default())));
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Sync2,
    Header,
    Body,
}

/// Asv frame parser
pub struct AsvParser {
    core: ParserCore<AsvMessage>,
    phase: Phase,
    // whole frame including sync and crc
    buf: Vec<u8>,
    payload_len: usize,
}

impl AsvParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<AsvMessage>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: Phase::Seeking,
            buf: Vec::with_capacity(HEADER_LEN + 256),
            payload_len: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let end = HEADER_LEN + self.payload_len;
        let computed = crc16_ccitt(&self.buf[..end]);
        let received = u16::from_le_bytes([self.buf[end], self.buf[end + 1]]);
        let id = u16::from_le_bytes([self.buf[8], self.buf[9]]);

        if computed != received {
            self.core.crc_error(
                Some(format!("{id:#06x}")),
                u32::from(received),
                u32::from(computed),
            );
            return self.abandon();
        }
        let header = AsvHeader {
            sequence: u16::from_le_bytes([self.buf[4], self.buf[5]]),
            sender: self.buf[6],
            target: self.buf[7],
        };
        let published = self
            .core
            .dispatch(&id, &self.buf[HEADER_LEN..end], end + 2, |m| m.header = header);
        self.reset();
        published
    }

    /// Drop the current frame and rescan it past its first sync byte
    fn abandon(&mut self) -> bool {
        let abandoned = std::mem::take(&mut self.buf);
        self.reset();
        rescan(self, &abandoned[1..])
    }
}

impl Default for AsvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for AsvParser {
    fn protocol(&self) -> Protocol {
        Protocol::Asv
    }

    fn feed(&mut self, byte: u8) -> bool {
        match self.phase {
            Phase::Seeking => {
                if byte == SYNC[0] {
                    self.buf.push(byte);
                    self.phase = Phase::Sync2;
                }
            }
            Phase::Sync2 => {
                if byte == SYNC[1] {
                    self.buf.push(byte);
                    self.phase = Phase::Header;
                } else if byte != SYNC[0] {
                    self.reset();
                }
            }
            Phase::Header => {
                self.buf.push(byte);
                if self.buf.len() == 4 {
                    self.payload_len = usize::from(u16::from_le_bytes([self.buf[2], self.buf[3]]));
                    if self.payload_len > MAX_PAYLOAD {
                        return self.abandon();
                    }
                } else if self.buf.len() == HEADER_LEN {
                    self.phase = Phase::Body;
                }
            }
            Phase::Body => {
                self.buf.push(byte);
                if self.buf.len() == HEADER_LEN + self.payload_len + 2 {
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
        &SYNC
    }

    delegate_core!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ParseError;
    use crate::core::message::GnssMessage;
    use crate::core::protocol::test_util::{drain, feed_all};

    fn heartbeat_bytes() -> Vec<u8> {
        let mut frame = vec![0xAA, 0x44, 0x00, 0x00, 0x01, 0x00, 0x01, 0x02, 0x10, 0x01];
        let crc = crc16_ccitt(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn test_heartbeat_example() {
        let frame = heartbeat_bytes();
        let mut parser = AsvParser::new();
        let mut rx = parser.subscribe_messages();

        assert_eq!(feed_all(&mut parser, &frame), vec![frame.len() - 1]);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let GnssMessage::Asv(msg) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        assert_eq!(msg.sequence(), 1);
        assert_eq!(msg.header.sender, 1);
        assert_eq!(msg.header.target, 2);
        assert_eq!(msg.payload, AsvPayload::Heartbeat(Heartbeat));
        assert_eq!(msg.byte_size(), 0);
    }

    #[test]
    fn test_encoder_matches_example() {
        let msg = AsvMessage::new(AsvPayload::Heartbeat(Heartbeat))
            .with_sequence(1)
            .with_route(1, 2);
        assert_eq!(msg.encode_frame().unwrap().to_vec(), heartbeat_bytes());
    }

    #[test]
    fn test_text_round_trip() {
        let original = AsvMessage::new(AsvPayload::Text(Text {
            level: 3,
            text: "battery low: 11.2 V".into(),
        }))
        .with_sequence(42)
        .with_route(7, 1);

        let mut payload = Vec::new();
        original.write_payload(&mut payload).unwrap();
        assert_eq!(payload.len(), original.byte_size());
        assert_eq!(&payload[..3], &[3, 0x00, 19]);

        let frame = original.encode_frame().unwrap();
        let mut parser = AsvParser::new();
        let mut rx = parser.subscribe_messages();
        feed_all(&mut parser, &frame);
        let GnssMessage::Asv(decoded) = drain(&mut rx).remove(0) else {
            panic!("expected Asv");
        };
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_corrupted_payload() {
        let msg = AsvMessage::new(AsvPayload::Text(Text {
            level: 1,
            text: "hello".into(),
        }));
        let mut frame = msg.encode_frame().unwrap().to_vec();
        frame[HEADER_LEN + 4] ^= 0x20;
        let mut parser = AsvParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(drain(&mut rx).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::Crc { .. }]));
    }

    #[test]
    fn test_truncated_then_next_sync() {
        let frame = heartbeat_bytes();
        for cut in 1..frame.len() {
            let mut stream = frame[..cut].to_vec();
            stream.extend_from_slice(&frame);

            let mut parser = AsvParser::new();
            let mut rx = parser.subscribe_messages();
            assert_eq!(feed_all(&mut parser, &stream).len(), 1, "cut at {cut}");

            let messages = drain(&mut rx);
            assert_eq!(messages.len(), 1, "cut at {cut}");
            assert_eq!(messages[0].name(), "HEARTBEAT");
            // a cut inside the length field yields an oversized length, not a CRC failure
            assert_eq!(parser.stats().crc_errors, u64::from(cut >= 4), "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_id() {
        let frame = encode_frame(&AsvHeader::default(), 0x0999, &[]).unwrap();
        let mut parser = AsvParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ParseError::UnknownMessage { message_id, .. } if message_id == "2457"));
    }
}

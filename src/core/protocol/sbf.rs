//! Septentrio Binary Format
//!
//! Block layout: `$@ | crc u16 | id u16 | length u16 | body`. The id packs a
//! 13-bit block number and a 3-bit revision; `length` counts the whole block
//! and is a multiple of 4. The CRC is CRC-16/XMODEM over id..end. Every body
//! starts with TOW (u32, ms) and WNc (u16). Blocks are receive-only and padded,
//! so trailing bytes are not reported.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::checksum::crc16_xmodem;
use super::{delegate_core, rescan, ParserCore, ProtocolParser};
use crate::core::bits::{BitReader, Lsb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Lsb0;

/// Block start
pub const SYNC: [u8; 2] = [0x24, 0x40];
/// Header size including sync
pub const HEADER_LEN: usize = 8;
/// Largest block accepted by the parser
pub const MAX_BLOCK: usize = 8192;

/// ReceiverTime block number
pub const RECEIVER_TIME: u16 = 5914;
/// EndOfPVT block number
pub const END_OF_PVT: u16 = 5921;

const TOW_DNU: u32 = u32::MAX;
const WNC_DNU: u16 = u16::MAX;

/// Split a block id into block number and revision
pub fn split_id(id: u16) -> (u16, u8) {
    (id & 0x1FFF, (id >> 13) as u8)
}

/// ReceiverTime: UTC as kept by the receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverTime {
    /// Years since 2000
    pub utc_year: i8,
    /// Month 1..12
    pub utc_month: i8,
    /// Day 1..31
    pub utc_day: i8,
    /// Hour 0..23
    pub utc_hour: i8,
    /// Minute 0..59
    pub utc_min: i8,
    /// Second 0..60
    pub utc_sec: i8,
    /// Leap seconds (GPS - UTC)
    pub delta_ls: i8,
    /// Time synchronisation level bit field
    pub sync_level: u8,
}

/// SBF payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SbfPayload {
    /// 5914
    ReceiverTime(ReceiverTime),
    /// 5921, body is TOW/WNc only
    EndOfPvt,
}

/// An SBF block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SbfMessage {
    /// Block revision
    pub revision: u8,
    /// Time of week, ms
    pub tow: u32,
    /// Continuous week number
    pub wnc: u16,
    /// Decoded body
    pub payload: SbfPayload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl SbfMessage {
    /// Block with do-not-use time stamps and no tag
    pub fn new(payload: SbfPayload) -> Self {
        Self {
            revision: 0,
            tow: TOW_DNU,
            wnc: WNC_DNU,
            payload,
            tag: None,
        }
    }

    /// Time of week in seconds, `None` when flagged do-not-use
    pub fn tow_seconds(&self) -> Option<f64> {
        (self.tow != TOW_DNU).then(|| f64::from(self.tow) / 1000.0)
    }

    /// Week number, `None` when flagged do-not-use
    pub fn week(&self) -> Option<u16> {
        (self.wnc != WNC_DNU).then_some(self.wnc)
    }
}

impl ProtocolMessage for SbfMessage {
    type Id = u16;
    const PROTOCOL: Protocol = Protocol::Sbf;

    fn message_id(&self) -> u16 {
        match self.payload {
            SbfPayload::ReceiverTime(_) => RECEIVER_TIME,
            SbfPayload::EndOfPvt => END_OF_PVT,
        }
    }

    fn name(&self) -> &'static str {
        match self.payload {
            SbfPayload::ReceiverTime(_) => "ReceiverTime",
            SbfPayload::EndOfPvt => "EndOfPVT",
        }
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        let body = match self.payload {
            SbfPayload::ReceiverTime(_) => 14,
            SbfPayload::EndOfPvt => 6,
        };
        (HEADER_LEN + body).div_ceil(4) * 4 - HEADER_LEN
    }

    fn write_payload(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("SBF blocks are receive-only"))
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let mut r = BitReader::<Bits>::new(*input);
        self.tow = r.u(32)?;
        self.wnc = r.u(16)? as u16;
        match &mut self.payload {
            SbfPayload::ReceiverTime(t) => {
                t.utc_year = r.s(8)? as i8;
                t.utc_month = r.s(8)? as i8;
                t.utc_day = r.s(8)? as i8;
                t.utc_hour = r.s(8)? as i8;
                t.utc_min = r.s(8)? as i8;
                t.utc_sec = r.s(8)? as i8;
                t.delta_ls = r.s(8)? as i8;
                t.sync_level = r.u(8)? as u8;
            }
            SbfPayload::EndOfPvt => {}
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut body = Vec::new();
        self.write_payload(&mut body)?;
        encode_frame(self.message_id() | (u16::from(self.revision) << 13), &body)
    }
}

/// Build a complete block around `body`, padding it to a multiple of 4
pub fn encode_frame(id: u16, body: &[u8]) -> Result<Bytes, CodecError> {
    let length = (HEADER_LEN + body.len()).div_ceil(4) * 4;
    if length > MAX_BLOCK {
        return Err(CodecError::invalid(
            "length",
            format!("{length} bytes exceeds {MAX_BLOCK}"),
        ));
    }
    let mut tail = BytesMut::with_capacity(length - 4);
    tail.put_u16_le(id);
    tail.put_u16_le(length as u16);
    tail.put_slice(body);
    tail.resize(length - 4, 0);

    let mut frame = BytesMut::with_capacity(length);
    frame.put_slice(&SYNC);
    frame.put_u16_le(crc16_xmodem(&tail));
    frame.put_slice(&tail);
    Ok(frame.freeze())
}

/// Registry with every SBF block this crate decodes
pub fn default_registry() -> MessageRegistry<SbfMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| SbfMessage::new(SbfPayload::ReceiverTime(ReceiverTime::default())))
        .register(|| SbfMessage::new(SbfPayload::EndOfPvt));
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Sync2,
    Header,
    Body,
}

/// SBF block parser
pub struct SbfParser {
    core: ParserCore<SbfMessage>,
    phase: Phase,
    buf: Vec<u8>,
    length: usize,
}

impl SbfParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<SbfMessage>) -> Self {
        Self {
            core: ParserCore::new(registry).with_trailing_check(false),
            phase: Phase::Seeking,
            buf: Vec::with_capacity(256),
            length: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let computed = crc16_xmodem(&self.buf[4..self.length]);
        let received = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        let (number, revision) = split_id(u16::from_le_bytes([self.buf[4], self.buf[5]]));

        if computed != received {
            self.core
                .crc_error(Some(number.to_string()), u32::from(received), u32::from(computed));
            return self.abandon();
        }
        let published = self
            .core
            .dispatch(&number, &self.buf[HEADER_LEN..self.length], self.length, |m| {
                m.revision = revision;
            });
        self.reset();
        published
    }

    /// Drop the current block and rescan it past its first sync byte
    fn abandon(&mut self) -> bool {
        let abandoned = std::mem::take(&mut self.buf);
        self.reset();
        rescan(self, &abandoned[1..])
    }
}

impl Default for SbfParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for SbfParser {
    fn protocol(&self) -> Protocol {
        Protocol::Sbf
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
                } else {
                    self.reset();
                    if byte == SYNC[0] {
                        self.buf.push(byte);
                        self.phase = Phase::Sync2;
                    }
                }
            }
            Phase::Header => {
                self.buf.push(byte);
                if self.buf.len() == HEADER_LEN {
                    self.length = usize::from(u16::from_le_bytes([self.buf[6], self.buf[7]]));
                    if self.length < HEADER_LEN || self.length % 4 != 0 || self.length > MAX_BLOCK {
                        return self.abandon();
                    } else if self.length == HEADER_LEN {
                        return self.finish();
                    } else {
                        self.phase = Phase::Body;
                    }
                }
            }
            Phase::Body => {
                self.buf.push(byte);
                if self.buf.len() == self.length {
                    return self.finish();
                }
            }
        }
        false
    }

    fn reset(&mut self) {
        self.phase = Phase::Seeking;
        self.buf.clear();
        self.length = 0;
    }

    fn sync_pattern(&self) -> &'static [u8] {
        &SYNC
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

    fn receiver_time_body() -> Vec<u8> {
        let mut body = Vec::new();
        let mut w = BitWriter::<Lsb0>::new(&mut body);
        w.u(32, 345_618_000);
        w.u(16, 2_345);
        for v in [24, 5, 17, 8, 30, 18] {
            w.s(8, v);
        }
        w.s(8, 18);
        w.u(8, 3);
        body
    }

    #[test]
    fn test_block_layout() {
        let frame = encode_frame(RECEIVER_TIME | (1 << 13), &receiver_time_body()).unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(&frame[..2], b"$@");
        assert_eq!(u16::from_le_bytes([frame[6], frame[7]]), 24);
        assert_eq!(split_id(u16::from_le_bytes([frame[4], frame[5]])), (RECEIVER_TIME, 1));
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = encode_frame(RECEIVER_TIME | (1 << 13), &receiver_time_body()).unwrap();
        let mut parser = SbfParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        assert_eq!(feed_all(&mut parser, &frame), vec![frame.len() - 1]);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let GnssMessage::Sbf(block) = &messages[0] else {
            panic!("unexpected {:?}", messages[0]);
        };
        assert_eq!(block.revision, 1);
        assert_eq!(block.tow_seconds(), Some(345_618.0));
        assert_eq!(block.week(), Some(2_345));
        assert_eq!(
            block.payload,
            SbfPayload::ReceiverTime(ReceiverTime {
                utc_year: 24,
                utc_month: 5,
                utc_day: 17,
                utc_hour: 8,
                utc_min: 30,
                utc_sec: 18,
                delta_ls: 18,
                sync_level: 3,
            })
        );
        assert_eq!(block.byte_size(), 16);
        // padding is not reported
        assert!(drain(&mut errors).is_empty());
    }

    #[test]
    fn test_do_not_use_time() {
        let mut body = Vec::new();
        body.extend_from_slice(&u32::MAX.to_le_bytes());
        body.extend_from_slice(&u16::MAX.to_le_bytes());
        let frame = encode_frame(END_OF_PVT, &body).unwrap();
        let mut parser = SbfParser::new();
        let mut rx = parser.subscribe_messages();
        feed_all(&mut parser, &frame);
        let GnssMessage::Sbf(block) = drain(&mut rx).remove(0) else {
            panic!("expected SBF");
        };
        assert_eq!(block.payload, SbfPayload::EndOfPvt);
        assert_eq!(block.tow_seconds(), None);
        assert_eq!(block.week(), None);
    }

    #[test]
    fn test_corrupted_body() {
        let mut frame = encode_frame(RECEIVER_TIME, &receiver_time_body()).unwrap().to_vec();
        frame[12] ^= 0xFF;
        let mut parser = SbfParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::Crc { message_id: Some(id), .. }] if id == "5914"));
    }

    #[test]
    fn test_bad_length_resyncs() {
        let frame = encode_frame(END_OF_PVT, &[0u8; 6]).unwrap();
        let mut stream = vec![0x24, 0x40, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00];
        stream.extend_from_slice(&frame);
        let mut parser = SbfParser::new();
        assert_eq!(feed_all(&mut parser, &stream), vec![stream.len() - 1]);
    }

    #[test]
    fn test_truncated_block_then_next() {
        let frame = encode_frame(RECEIVER_TIME | (1 << 13), &receiver_time_body()).unwrap();
        for cut in 1..frame.len() {
            let mut stream = frame[..cut].to_vec();
            stream.extend_from_slice(&frame);
            stream.extend_from_slice(&[0u8; MAX_BLOCK]);

            let mut parser = SbfParser::new();
            let mut rx = parser.subscribe_messages();
            assert_eq!(feed_all(&mut parser, &stream).len(), 1, "cut at {cut}");
            let messages = drain(&mut rx);
            assert_eq!(messages.len(), 1, "cut at {cut}");
            assert_eq!(messages[0].name(), "ReceiverTime");
        }
    }

    #[test]
    fn test_unknown_block() {
        let frame = encode_frame(4007, &[0u8; 8]).unwrap();
        let mut parser = SbfParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::UnknownMessage { message_id, .. }] if message_id == "4007"));
    }
}

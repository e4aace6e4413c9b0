//! u-blox UBX protocol
//!
//! Frame: `B5 62 | class | id | length (u16 LE) | payload | ck_a ck_b`, with
//! the 8-bit Fletcher checksum computed over class..payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::checksum::ubx_checksum;
use super::{delegate_core, rescan, ParserCore, ProtocolParser};
use crate::core::bits::{BitReader, BitWriter, Lsb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Lsb0;

/// Frame start
pub const SYNC: [u8; 2] = [0xB5, 0x62];
/// Largest payload accepted by the parser
pub const MAX_PAYLOAD: usize = 8192;

/// Class/id pair identifying a UBX message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UbxId {
    /// Message class
    pub class: u8,
    /// Message id within the class
    pub id: u8,
}

impl UbxId {
    /// ACK-ACK
    pub const ACK_ACK: UbxId = UbxId::new(0x05, 0x01);
    /// ACK-NAK
    pub const ACK_NAK: UbxId = UbxId::new(0x05, 0x00);
    /// CFG-MSG
    pub const CFG_MSG: UbxId = UbxId::new(0x06, 0x01);
    /// CFG-RATE
    pub const CFG_RATE: UbxId = UbxId::new(0x06, 0x08);
    /// MON-VER
    pub const MON_VER: UbxId = UbxId::new(0x0A, 0x04);
    /// NAV-POSLLH
    pub const NAV_POSLLH: UbxId = UbxId::new(0x01, 0x02);

    /// Pair from raw values
    pub const fn new(class: u8, id: u8) -> Self {
        Self { class, id }
    }

    /// Known message name, or `UNKNOWN`
    pub fn name(&self) -> &'static str {
        match *self {
            UbxId::ACK_ACK => "ACK-ACK",
            UbxId::ACK_NAK => "ACK-NAK",
            UbxId::CFG_MSG => "CFG-MSG",
            UbxId::CFG_RATE => "CFG-RATE",
            UbxId::MON_VER => "MON-VER",
            UbxId::NAV_POSLLH => "NAV-POSLLH",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for UbxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}:0x{:02X}", self.class, self.id)
    }
}

impl Default for UbxId {
    fn default() -> Self {
        UbxId::new(0, 0)
    }
}

/// ACK-ACK / ACK-NAK body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Message being acknowledged
    pub target: UbxId,
}

/// CFG-MSG: output rate of one message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CfgMsg {
    /// Message whose rate is configured
    pub target: UbxId,
    /// Rate on the current port; in the per-port form, the UART1 entry
    pub rate: u8,
    /// Per-port rates (I2C, UART1, UART2, USB, SPI, reserved)
    pub port_rates: Option<[u8; 6]>,
}

/// CFG-RATE: navigation/measurement rate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CfgRate {
    /// Measurement period in milliseconds
    pub meas_rate_ms: u16,
    /// Measurement cycles per navigation solution
    pub nav_rate: u16,
    /// Time system alignment (0 = UTC, 1 = GPS)
    pub time_ref: u16,
}

/// MON-VER: receiver and software version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonVer {
    /// Software version string
    pub sw_version: String,
    /// Hardware version string
    pub hw_version: String,
    /// Extension strings (protocol version, firmware, modules)
    pub extensions: Vec<String>,
}

/// NAV-POSLLH: geodetic position solution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NavPosLlh {
    /// GPS time of week in milliseconds
    pub itow: u32,
    /// Longitude, 1e-7 degrees
    pub lon: i32,
    /// Latitude, 1e-7 degrees
    pub lat: i32,
    /// Height above ellipsoid, mm
    pub height: i32,
    /// Height above mean sea level, mm
    pub h_msl: i32,
    /// Horizontal accuracy estimate, mm
    pub h_acc: u32,
    /// Vertical accuracy estimate, mm
    pub v_acc: u32,
}

/// UBX payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UbxPayload {
    /// ACK-ACK
    AckAck(Ack),
    /// ACK-NAK
    AckNak(Ack),
    /// CFG-MSG
    CfgMsg(CfgMsg),
    /// CFG-RATE
    CfgRate(CfgRate),
    /// MON-VER
    MonVer(MonVer),
    /// NAV-POSLLH
    NavPosLlh(NavPosLlh),
    /// Empty-payload poll request for any class/id
    Poll(UbxId),
}

/// A UBX message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UbxMessage {
    /// Decoded body
    pub payload: UbxPayload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

const SW_VERSION_LEN: usize = 30;
const HW_VERSION_LEN: usize = 10;
const EXTENSION_LEN: usize = 30;
const NAV_POSLLH_LEN: usize = 28;

impl UbxMessage {
    /// Message with no tag
    pub fn new(payload: UbxPayload) -> Self {
        Self { payload, tag: None }
    }

    /// Poll request for `id`
    pub fn poll(id: UbxId) -> Self {
        Self::new(UbxPayload::Poll(id))
    }

    /// Acknowledged message, for ACK-ACK and ACK-NAK
    pub fn ack_target(&self) -> Option<UbxId> {
        match &self.payload {
            UbxPayload::AckAck(ack) | UbxPayload::AckNak(ack) => Some(ack.target),
            _ => None,
        }
    }
}

fn read_ubx_id(r: &mut BitReader<'_, Bits>) -> Result<UbxId, CodecError> {
    Ok(UbxId::new(r.u(8)? as u8, r.u(8)? as u8))
}

fn read_fixed_str(r: &mut BitReader<'_, Bits>, len: usize) -> Result<String, CodecError> {
    let raw = r.bytes(len)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

fn write_fixed_str(w: &mut BitWriter<'_, Bits>, value: &str, len: usize) {
    let mut field = vec![0u8; len];
    let n = value.len().min(len);
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
    w.bytes(&field);
}

impl ProtocolMessage for UbxMessage {
    type Id = UbxId;
    const PROTOCOL: Protocol = Protocol::Ubx;

    fn message_id(&self) -> UbxId {
        match &self.payload {
            UbxPayload::AckAck(_) => UbxId::ACK_ACK,
            UbxPayload::AckNak(_) => UbxId::ACK_NAK,
            UbxPayload::CfgMsg(_) => UbxId::CFG_MSG,
            UbxPayload::CfgRate(_) => UbxId::CFG_RATE,
            UbxPayload::MonVer(_) => UbxId::MON_VER,
            UbxPayload::NavPosLlh(_) => UbxId::NAV_POSLLH,
            UbxPayload::Poll(id) => *id,
        }
    }

    fn name(&self) -> &'static str {
        self.message_id().name()
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        match &self.payload {
            UbxPayload::AckAck(_) | UbxPayload::AckNak(_) => 2,
            UbxPayload::CfgMsg(m) => {
                if m.port_rates.is_some() {
                    8
                } else {
                    3
                }
            }
            UbxPayload::CfgRate(_) => 6,
            UbxPayload::MonVer(m) => SW_VERSION_LEN + HW_VERSION_LEN + m.extensions.len() * EXTENSION_LEN,
            UbxPayload::NavPosLlh(_) => NAV_POSLLH_LEN,
            UbxPayload::Poll(_) => 0,
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let mut w = BitWriter::<Bits>::new(out);
        match &self.payload {
            UbxPayload::AckAck(ack) | UbxPayload::AckNak(ack) => {
                w.u(8, u32::from(ack.target.class));
                w.u(8, u32::from(ack.target.id));
            }
            UbxPayload::CfgMsg(m) => {
                w.u(8, u32::from(m.target.class));
                w.u(8, u32::from(m.target.id));
                match &m.port_rates {
                    Some(rates) => w.bytes(rates),
                    None => w.u(8, u32::from(m.rate)),
                }
            }
            UbxPayload::CfgRate(m) => {
                w.u(16, u32::from(m.meas_rate_ms));
                w.u(16, u32::from(m.nav_rate));
                w.u(16, u32::from(m.time_ref));
            }
            UbxPayload::MonVer(m) => {
                write_fixed_str(&mut w, &m.sw_version, SW_VERSION_LEN);
                write_fixed_str(&mut w, &m.hw_version, HW_VERSION_LEN);
                for ext in &m.extensions {
                    write_fixed_str(&mut w, ext, EXTENSION_LEN);
                }
            }
            UbxPayload::NavPosLlh(m) => {
                w.u(32, m.itow);
                w.s(32, m.lon);
                w.s(32, m.lat);
                w.s(32, m.height);
                w.s(32, m.h_msl);
                w.u(32, m.h_acc);
                w.u(32, m.v_acc);
            }
            UbxPayload::Poll(_) => {}
        }
        Ok(())
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let mut r = BitReader::<Bits>::new(*input);
        match &mut self.payload {
            UbxPayload::AckAck(ack) | UbxPayload::AckNak(ack) => {
                ack.target = read_ubx_id(&mut r)?;
            }
            UbxPayload::CfgMsg(m) => {
                m.target = read_ubx_id(&mut r)?;
                if r.remaining_bits() >= 6 * 8 {
                    let mut rates = [0u8; 6];
                    rates.copy_from_slice(r.bytes(6)?);
                    m.rate = rates[1];
                    m.port_rates = Some(rates);
                } else {
                    m.rate = r.u(8)? as u8;
                    m.port_rates = None;
                }
            }
            UbxPayload::CfgRate(m) => {
                m.meas_rate_ms = r.u(16)? as u16;
                m.nav_rate = r.u(16)? as u16;
                m.time_ref = r.u(16)? as u16;
            }
            UbxPayload::MonVer(m) => {
                m.sw_version = read_fixed_str(&mut r, SW_VERSION_LEN)?;
                m.hw_version = read_fixed_str(&mut r, HW_VERSION_LEN)?;
                m.extensions.clear();
                while r.remaining_bits() >= EXTENSION_LEN * 8 {
                    m.extensions.push(read_fixed_str(&mut r, EXTENSION_LEN)?);
                }
            }
            UbxPayload::NavPosLlh(m) => {
                CodecError::require(*input, NAV_POSLLH_LEN)?;
                m.itow = r.u(32)?;
                m.lon = r.s(32)?;
                m.lat = r.s(32)?;
                m.height = r.s(32)?;
                m.h_msl = r.s(32)?;
                m.h_acc = r.u(32)?;
                m.v_acc = r.u(32)?;
            }
            UbxPayload::Poll(_) => {}
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut payload = Vec::with_capacity(self.byte_size());
        self.write_payload(&mut payload)?;
        encode_frame(self.message_id(), &payload)
    }
}

/// Build a complete UBX frame around `payload`
pub fn encode_frame(id: UbxId, payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::invalid(
            "length",
            format!("{} bytes exceeds {MAX_PAYLOAD}", payload.len()),
        ));
    }
    let mut frame = BytesMut::with_capacity(payload.len() + 8);
    frame.put_slice(&SYNC);
    frame.put_u8(id.class);
    frame.put_u8(id.id);
    frame.put_u16_le(payload.len() as u16);
    frame.put_slice(payload);
    let (ck_a, ck_b) = ubx_checksum(&frame[2..]);
    frame.put_u8(ck_a);
    frame.put_u8(ck_b);
    Ok(frame.freeze())
}

/// Registry with every UBX message this crate decodes
pub fn default_registry() -> MessageRegistry<UbxMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| UbxMessage::new(UbxPayload::AckAck(Ack { target: UbxId::default() })))
        .register(|| UbxMessage::new(UbxPayload::AckNak(Ack { target: UbxId::default() })))
        .register(|| UbxMessage::new(UbxPayload::CfgMsg(CfgMsg::default())))
        .register(|| UbxMessage::new(UbxPayload::CfgRate(CfgRate::default())))
        .register(|| UbxMessage::new(UbxPayload::MonVer(MonVer::default())))
        .register(|| UbxMessage::new(UbxPayload::NavPosLlh(NavPosLlh::default())));
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Sync2,
    Header,
    Body,
}

/// UBX frame parser
pub struct UbxParser {
    core: ParserCore<UbxMessage>,
    phase: Phase,
    // class, id, length, payload, checksum
    buf: Vec<u8>,
    payload_len: usize,
}

impl UbxParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<UbxMessage>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: Phase::Seeking,
            buf: Vec::with_capacity(256),
            payload_len: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let n = self.payload_len;
        let id = UbxId::new(self.buf[0], self.buf[1]);
        let (ck_a, ck_b) = ubx_checksum(&self.buf[..4 + n]);
        let (rx_a, rx_b) = (self.buf[4 + n], self.buf[5 + n]);
        if (ck_a, ck_b) != (rx_a, rx_b) {
            self.core.crc_error(
                Some(id.to_string()),
                u32::from(u16::from_le_bytes([rx_a, rx_b])),
                u32::from(u16::from_le_bytes([ck_a, ck_b])),
            );
            return self.abandon();
        }
        // an empty frame of any registered id is a poll request or its echo
        let published = self.core.dispatch(&id, &self.buf[4..4 + n], n + 8, |m| {
            if n == 0 {
                m.payload = UbxPayload::Poll(id);
            }
        });
        self.reset();
        published
    }

    /// Drop the current frame and rescan everything after its sync bytes
    fn abandon(&mut self) -> bool {
        let abandoned = std::mem::take(&mut self.buf);
        self.reset();
        rescan(self, &abandoned)
    }
}

impl Default for UbxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for UbxParser {
    fn protocol(&self) -> Protocol {
        Protocol::Ubx
    }

    fn feed(&mut self, byte: u8) -> bool {
        match self.phase {
            Phase::Seeking => {
                if byte == SYNC[0] {
                    self.phase = Phase::Sync2;
                }
            }
            Phase::Sync2 => {
                self.phase = match byte {
                    b if b == SYNC[1] => Phase::Header,
                    b if b == SYNC[0] => Phase::Sync2,
                    _ => Phase::Seeking,
                };
            }
            Phase::Header => {
                self.buf.push(byte);
                if self.buf.len() == 4 {
                    self.payload_len = usize::from(u16::from_le_bytes([self.buf[2], self.buf[3]]));
                    if self.payload_len > MAX_PAYLOAD {
                        return self.abandon();
                    }
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

    fn mon_ver() -> UbxMessage {
        UbxMessage::new(UbxPayload::MonVer(MonVer {
            sw_version: "ROM CORE 3.01 (107888)".into(),
            hw_version: "00080000".into(),
            extensions: vec!["FWVER=SPG 3.01".into(), "PROTVER=18.00".into()],
        }))
    }

    #[test]
    fn test_poll_frame_bytes() {
        let frame = UbxMessage::poll(UbxId::MON_VER).encode_frame().unwrap();
        assert_eq!(&frame[..], &[0xB5, 0x62, 0x0A, 0x04, 0x00, 0x00, 0x0E, 0x34]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = mon_ver().encode_frame().unwrap();
        let mut parser = UbxParser::new();
        let mut rx = parser.subscribe_messages();

        let hits = feed_all(&mut parser, &frame);
        assert_eq!(hits, vec![frame.len() - 1]);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            GnssMessage::Ubx(m) => assert_eq!(m, &mon_ver()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parser.parsed_bytes(), frame.len() as u64);
    }

    #[test]
    fn test_round_trip_sizes() {
        let messages = [
            mon_ver(),
            UbxMessage::new(UbxPayload::CfgRate(CfgRate {
                meas_rate_ms: 200,
                nav_rate: 1,
                time_ref: 1,
            })),
            UbxMessage::new(UbxPayload::CfgMsg(CfgMsg {
                target: UbxId::NAV_POSLLH,
                rate: 1,
                port_rates: None,
            })),
            UbxMessage::new(UbxPayload::CfgMsg(CfgMsg {
                target: UbxId::NAV_POSLLH,
                rate: 2,
                port_rates: Some([0, 2, 0, 1, 0, 0]),
            })),
            UbxMessage::new(UbxPayload::NavPosLlh(NavPosLlh {
                itow: 345_600_000,
                lon: 374_221_234,
                lat: -1_221_234_567,
                height: 12_345,
                h_msl: -2_000,
                h_acc: 1_500,
                v_acc: 2_500,
            })),
        ];

        let registry = default_registry();
        for original in messages {
            let mut bytes = Vec::new();
            original.write_payload(&mut bytes).unwrap();
            assert_eq!(bytes.len(), original.byte_size());

            let mut decoded = registry.create(&original.message_id()).unwrap();
            let mut input = bytes.as_slice();
            decoded.deserialize(&mut input).unwrap();
            assert!(input.is_empty());
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_corrupted_payload_is_crc_error() {
        let mut frame = mon_ver().encode_frame().unwrap().to_vec();
        frame[10] ^= 0x01;
        let mut parser = UbxParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(drain(&mut rx).is_empty());
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_crc());
        assert_eq!(parser.stats().crc_errors, 1);
    }

    #[test]
    fn test_truncated_frame_then_resync() {
        let ack = UbxMessage::new(UbxPayload::AckAck(Ack { target: UbxId::CFG_RATE }))
            .encode_frame()
            .unwrap();

        let mut parser = UbxParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        let mut stream = ack[..7].to_vec();
        stream.extend_from_slice(&[0u8; 8]);
        stream.extend_from_slice(&ack);
        let hits = feed_all(&mut parser, &stream);
        assert_eq!(hits, vec![stream.len() - 1]);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name(), "ACK-ACK");
        assert_eq!(drain(&mut errors).len(), 1);
    }

    #[test]
    fn test_every_truncation_recovers_next_frame() {
        let ack = UbxMessage::new(UbxPayload::AckAck(Ack { target: UbxId::CFG_RATE }))
            .encode_frame()
            .unwrap();

        for cut in 1..ack.len() {
            let mut stream = ack[..cut].to_vec();
            stream.extend_from_slice(&ack);
            // enough to complete whatever length the mangled header announced
            stream.extend_from_slice(&[0u8; MAX_PAYLOAD + 8]);

            let mut parser = UbxParser::new();
            let mut rx = parser.subscribe_messages();
            assert_eq!(feed_all(&mut parser, &stream).len(), 1, "cut at {cut}");
            let messages = drain(&mut rx);
            assert_eq!(messages.len(), 1, "cut at {cut}");
            assert_eq!(messages[0].name(), "ACK-ACK");
        }
    }

    #[test]
    fn test_echoed_poll_is_published_as_poll() {
        let mut stream = UbxMessage::poll(UbxId::MON_VER).encode_frame().unwrap().to_vec();
        stream.extend_from_slice(&UbxMessage::poll(UbxId::CFG_RATE).encode_frame().unwrap());
        let mut parser = UbxParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        assert_eq!(feed_all(&mut parser, &stream).len(), 2);
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            GnssMessage::Ubx(m) => {
                assert_eq!(m.payload, UbxPayload::Poll(UbxId::MON_VER));
                assert_eq!(m.message_id(), UbxId::MON_VER);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &messages[1] {
            GnssMessage::Ubx(m) => assert_eq!(m.payload, UbxPayload::Poll(UbxId::CFG_RATE)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(drain(&mut errors).is_empty());
        assert_eq!(parser.stats().deserialize_errors, 0);
    }

    #[test]
    fn test_oversized_length_is_ignored() {
        let mut parser = UbxParser::new();
        let mut errors = parser.subscribe_errors();
        let junk = [0xB5, 0x62, 0x01, 0x02, 0xFF, 0xFF, 0x00, 0x00];
        assert!(feed_all(&mut parser, &junk).is_empty());
        assert!(drain(&mut errors).is_empty());
    }

    #[test]
    fn test_unknown_message() {
        let frame = encode_frame(UbxId::new(0x7F, 0x01), &[1, 2, 3]).unwrap();
        let mut parser = UbxParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ParseError::UnknownMessage { message_id, .. } if message_id == "0x7F:0x01"));
    }

    #[test]
    fn test_short_payload_is_deserialize_error() {
        let frame = encode_frame(UbxId::NAV_POSLLH, &[0u8; 10]).unwrap();
        let mut parser = UbxParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(drain(&mut errors)[0], ParseError::Deserialize { name: "NAV-POSLLH", .. }));
    }

    #[test]
    fn test_trailing_data_reported_after_publish() {
        let frame = encode_frame(UbxId::CFG_RATE, &[0xC8, 0, 1, 0, 1, 0, 0xEE]).unwrap();
        let mut parser = UbxParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();
        assert_eq!(feed_all(&mut parser, &frame).len(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(matches!(drain(&mut errors)[0], ParseError::TrailingData { remaining: 1, .. }));
    }
}

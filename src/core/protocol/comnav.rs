//! ComNav (NovAtel OEM-compatible) logs
//!
//! Binary: `AA 44 12 | header length | 28-byte header | body | CRC-32 LE`.
//! ASCII: `#NAME,header...;data...*xxxxxxxx\r\n`, CRC over the text between
//! `#` and `*`. Both use the unfinalised CRC-32 (init 0, no final xor).

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::checksum::crc32_comnav;
use super::{delegate_core, rescan, ParserCore, ProtocolParser};
use crate::core::bits::{BitReader, BitWriter, Lsb0};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

type Bits = Lsb0;

/// Binary frame start
pub const SYNC: [u8; 3] = [0xAA, 0x44, 0x12];
/// Binary header length written by the encoder
pub const HEADER_LEN: usize = 28;
/// Largest binary body accepted
pub const MAX_BODY: usize = 16 * 1024;
/// Longest ASCII log between `#` and `*`
pub const MAX_ASCII: usize = 4096;
/// BESTPOS message id
pub const BESTPOS: u16 = 42;
/// BESTPOS binary body length
pub const BESTPOS_LEN: usize = 72;

const SOLUTION_STATUS: &[(u32, &str)] = &[
    (0, "SOL_COMPUTED"),
    (1, "INSUFFICIENT_OBS"),
    (2, "NO_CONVERGENCE"),
    (3, "SINGULARITY"),
    (4, "COV_TRACE"),
    (5, "TEST_DIST"),
    (6, "COLD_START"),
    (7, "V_H_LIMIT"),
    (8, "VARIANCE"),
    (9, "RESIDUALS"),
    (13, "INTEGRITY_WARNING"),
    (18, "PENDING"),
    (19, "INVALID_FIX"),
];

const POSITION_TYPE: &[(u32, &str)] = &[
    (0, "NONE"),
    (1, "FIXEDPOS"),
    (2, "FIXEDHEIGHT"),
    (8, "DOPPLER_VELOCITY"),
    (16, "SINGLE"),
    (17, "PSRDIFF"),
    (18, "WAAS"),
    (19, "PROPAGATED"),
    (32, "L1_FLOAT"),
    (33, "IONOFREE_FLOAT"),
    (34, "NARROW_FLOAT"),
    (48, "L1_INT"),
    (49, "WIDE_INT"),
    (50, "NARROW_INT"),
];

const DATUM: &[(u32, &str)] = &[(61, "WGS84"), (63, "USER")];

fn enum_name(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

fn enum_code(table: &[(u32, &str)], name: &str, field: &'static str) -> Result<u32, CodecError> {
    table
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(c, _)| *c)
        .ok_or_else(|| CodecError::invalid(field, format!("unknown value '{name}'")))
}

/// Binary log header, minus sync, length and message id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComNavHeader {
    /// Message type byte (format and response bits)
    pub message_type: u8,
    /// Port address
    pub port: u8,
    /// Sequence number
    pub sequence: u16,
    /// Receiver idle time, half-percent units
    pub idle_time: u8,
    /// GPS time quality
    pub time_status: u8,
    /// GPS week
    pub week: u16,
    /// Milliseconds into the week
    pub milliseconds: u32,
    /// Receiver status word
    pub receiver_status: u32,
    /// Receiver software build
    pub receiver_version: u16,
}

/// ASCII log header
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComNavAsciiHeader {
    /// Port name (`COM1`)
    pub port: String,
    /// Sequence number
    pub sequence: u32,
    /// Receiver idle percentage
    pub idle_percent: f64,
    /// GPS time quality (`FINESTEERING`)
    pub time_status: String,
    /// GPS week
    pub week: u16,
    /// Seconds into the week
    pub seconds: f64,
    /// Receiver status word
    pub receiver_status: u32,
    /// Receiver software build
    pub receiver_version: u16,
}

/// Best available position solution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BestPos {
    /// Solution status code
    pub solution_status: u32,
    /// Position type code
    pub position_type: u32,
    /// Latitude, degrees
    pub latitude: f64,
    /// Longitude, degrees
    pub longitude: f64,
    /// Height above mean sea level, metres
    pub height: f64,
    /// Geoid undulation, metres
    pub undulation: f32,
    /// Datum code
    pub datum: u32,
    /// Latitude standard deviation, metres
    pub latitude_sigma: f32,
    /// Longitude standard deviation, metres
    pub longitude_sigma: f32,
    /// Height standard deviation, metres
    pub height_sigma: f32,
    /// Base station id, at most 4 characters
    pub station_id: String,
    /// Differential age, seconds
    pub differential_age: f32,
    /// Solution age, seconds
    pub solution_age: f32,
    /// Satellites tracked
    pub satellites_tracked: u8,
    /// Satellites used in the solution
    pub satellites_used: u8,
    /// Satellites with L1 used
    pub satellites_l1: u8,
    /// Satellites with multiple frequencies used
    pub satellites_multi: u8,
    /// Extended solution status bits
    pub extended_status: u8,
    /// Galileo and BeiDou signals used
    pub galileo_beidou_mask: u8,
    /// GPS and GLONASS signals used
    pub gps_glonass_mask: u8,
}

impl BestPos {
    /// Solution status name (`SOL_COMPUTED`)
    pub fn solution_status_name(&self) -> Option<&'static str> {
        enum_name(SOLUTION_STATUS, self.solution_status)
    }

    /// Position type name (`NARROW_INT`)
    pub fn position_type_name(&self) -> Option<&'static str> {
        enum_name(POSITION_TYPE, self.position_type)
    }

    /// Datum name (`WGS84`)
    pub fn datum_name(&self) -> Option<&'static str> {
        enum_name(DATUM, self.datum)
    }

    /// True for an RTK fixed-ambiguity solution
    pub fn is_rtk_fixed(&self) -> bool {
        matches!(self.position_type, 48 | 50)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        if self.station_id.len() > 4 {
            return Err(CodecError::invalid("station_id", "longer than 4 bytes"));
        }
        let mut station = [0u8; 4];
        station[..self.station_id.len()].copy_from_slice(self.station_id.as_bytes());

        let mut w = BitWriter::<Bits>::new(out);
        w.u(32, self.solution_status);
        w.u(32, self.position_type);
        w.f64(self.latitude);
        w.f64(self.longitude);
        w.f64(self.height);
        w.f32(self.undulation);
        w.u(32, self.datum);
        w.f32(self.latitude_sigma);
        w.f32(self.longitude_sigma);
        w.f32(self.height_sigma);
        w.bytes(&station);
        w.f32(self.differential_age);
        w.f32(self.solution_age);
        w.u(8, u32::from(self.satellites_tracked));
        w.u(8, u32::from(self.satellites_used));
        w.u(8, u32::from(self.satellites_l1));
        w.u(8, u32::from(self.satellites_multi));
        w.pad(8);
        w.u(8, u32::from(self.extended_status));
        w.u(8, u32::from(self.galileo_beidou_mask));
        w.u(8, u32::from(self.gps_glonass_mask));
        Ok(())
    }

    fn read(&mut self, r: &mut BitReader<'_, Bits>) -> Result<(), CodecError> {
        self.solution_status = r.u(32)?;
        self.position_type = r.u(32)?;
        self.latitude = r.f64()?;
        self.longitude = r.f64()?;
        self.height = r.f64()?;
        self.undulation = r.f32()?;
        self.datum = r.u(32)?;
        self.latitude_sigma = r.f32()?;
        self.longitude_sigma = r.f32()?;
        self.height_sigma = r.f32()?;
        let station = r.bytes(4)?;
        let end = station.iter().position(|&b| b == 0).unwrap_or(station.len());
        self.station_id = String::from_utf8_lossy(&station[..end]).into_owned();
        self.differential_age = r.f32()?;
        self.solution_age = r.f32()?;
        self.satellites_tracked = r.u(8)? as u8;
        self.satellites_used = r.u(8)? as u8;
        self.satellites_l1 = r.u(8)? as u8;
        self.satellites_multi = r.u(8)? as u8;
        r.skip(8)?;
        self.extended_status = r.u(8)? as u8;
        self.galileo_beidou_mask = r.u(8)? as u8;
        self.gps_glonass_mask = r.u(8)? as u8;
        Ok(())
    }

    fn read_ascii(&mut self, fields: &[&str]) -> Result<(), CodecError> {
        if fields.len() < 21 {
            return Err(CodecError::invalid(
                "BESTPOSA",
                format!("expected 21 fields, got {}", fields.len()),
            ));
        }
        self.solution_status = enum_code(SOLUTION_STATUS, fields[0], "solution_status")?;
        self.position_type = enum_code(POSITION_TYPE, fields[1], "position_type")?;
        self.latitude = number(fields[2], "latitude")?;
        self.longitude = number(fields[3], "longitude")?;
        self.height = number(fields[4], "height")?;
        self.undulation = number(fields[5], "undulation")?;
        self.datum = enum_code(DATUM, fields[6], "datum")?;
        self.latitude_sigma = number(fields[7], "latitude_sigma")?;
        self.longitude_sigma = number(fields[8], "longitude_sigma")?;
        self.height_sigma = number(fields[9], "height_sigma")?;
        self.station_id = fields[10].trim_matches('"').to_string();
        self.differential_age = number(fields[11], "differential_age")?;
        self.solution_age = number(fields[12], "solution_age")?;
        self.satellites_tracked = number(fields[13], "satellites_tracked")?;
        self.satellites_used = number(fields[14], "satellites_used")?;
        self.satellites_l1 = number(fields[15], "satellites_l1")?;
        self.satellites_multi = number(fields[16], "satellites_multi")?;
        self.extended_status = hex_field(fields[18], "extended_status")?;
        self.galileo_beidou_mask = hex_field(fields[19], "galileo_beidou_mask")?;
        self.gps_glonass_mask = hex_field(fields[20], "gps_glonass_mask")?;
        Ok(())
    }
}

fn number<T: std::str::FromStr>(s: &str, field: &'static str) -> Result<T, CodecError> {
    s.parse()
        .map_err(|_| CodecError::invalid(field, format!("cannot parse '{s}'")))
}

fn hex_field<T: TryFrom<u32>>(s: &str, field: &'static str) -> Result<T, CodecError> {
    let bad = || CodecError::invalid(field, format!("bad hex '{s}'"));
    let value = u32::from_str_radix(s, 16).map_err(|_| bad())?;
    T::try_from(value).map_err(|_| bad())
}

// ============ Binary ============

/// ComNav binary payload variants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ComNavBinaryPayload {
    /// BESTPOSB
    BestPos(BestPos),
}

/// A ComNav binary log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComNavBinaryMessage {
    /// Log header
    pub header: ComNavHeader,
    /// Decoded body
    pub payload: ComNavBinaryPayload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ComNavBinaryMessage {
    /// Log with a zeroed header
    pub fn new(payload: ComNavBinaryPayload) -> Self {
        Self {
            header: ComNavHeader::default(),
            payload,
            tag: None,
        }
    }

    /// Replace the header
    #[must_use]
    pub fn with_header(mut self, header: ComNavHeader) -> Self {
        self.header = header;
        self
    }
}

impl ProtocolMessage for ComNavBinaryMessage {
    type Id = u16;
    const PROTOCOL: Protocol = Protocol::ComNavBinary;

    fn message_id(&self) -> u16 {
        match self.payload {
            ComNavBinaryPayload::BestPos(_) => BESTPOS,
        }
    }

    fn name(&self) -> &'static str {
        match self.payload {
            ComNavBinaryPayload::BestPos(_) => "BESTPOSB",
        }
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        match self.payload {
            ComNavBinaryPayload::BestPos(_) => BESTPOS_LEN,
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match &self.payload {
            ComNavBinaryPayload::BestPos(p) => p.write(out),
        }
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        CodecError::require(*input, self.byte_size())?;
        let mut r = BitReader::<Bits>::new(*input);
        match &mut self.payload {
            ComNavBinaryPayload::BestPos(p) => p.read(&mut r)?,
        }
        r.commit(input);
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut body = Vec::with_capacity(self.byte_size());
        self.write_payload(&mut body)?;
        encode_frame(&self.header, self.message_id(), &body)
    }
}

/// Build a binary log around `body`
pub fn encode_frame(header: &ComNavHeader, message_id: u16, body: &[u8]) -> Result<Bytes, CodecError> {
    let length = u16::try_from(body.len())
        .ok()
        .filter(|&len| usize::from(len) <= MAX_BODY)
        .ok_or_else(|| CodecError::invalid("length", format!("{} bytes exceeds {MAX_BODY}", body.len())))?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len() + 4);
    frame.put_slice(&SYNC);
    frame.put_u8(HEADER_LEN as u8);
    frame.put_u16_le(message_id);
    frame.put_u8(header.message_type);
    frame.put_u8(header.port);
    frame.put_u16_le(length);
    frame.put_u16_le(header.sequence);
    frame.put_u8(header.idle_time);
    frame.put_u8(header.time_status);
    frame.put_u16_le(header.week);
    frame.put_u32_le(header.milliseconds);
    frame.put_u32_le(header.receiver_status);
    frame.put_u16_le(0);
    frame.put_u16_le(header.receiver_version);
    frame.put_slice(body);
    let crc = crc32_comnav(&frame);
    frame.put_u32_le(crc);
    Ok(frame.freeze())
}

/// Registry with every binary log this crate decodes
pub fn default_registry() -> MessageRegistry<ComNavBinaryMessage> {
    let mut registry = MessageRegistry::new();
    registry.register(|| ComNavBinaryMessage::new(ComNavBinaryPayload::BestPos(BestPos::default())));
    registry
}

fn decode_header(buf: &[u8]) -> Result<ComNavHeader, CodecError> {
    let mut r = BitReader::<Bits>::new(buf);
    r.skip(6 * 8)?;
    let message_type = r.u(8)? as u8;
    let port = r.u(8)? as u8;
    // message length, already consumed by the parser
    r.skip(16)?;
    let sequence = r.u(16)? as u16;
    let idle_time = r.u(8)? as u8;
    let time_status = r.u(8)? as u8;
    let week = r.u(16)? as u16;
    let milliseconds = r.u(32)?;
    let receiver_status = r.u(32)?;
    r.skip(16)?;
    let receiver_version = r.u(16)? as u16;
    Ok(ComNavHeader {
        message_type,
        port,
        sequence,
        idle_time,
        time_status,
        week,
        milliseconds,
        receiver_status,
        receiver_version,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Sync,
    Header,
    Body,
}

/// ComNav binary log parser
pub struct ComNavBinaryParser {
    core: ParserCore<ComNavBinaryMessage>,
    phase: Phase,
    buf: Vec<u8>,
    header_len: usize,
    body_len: usize,
}

impl ComNavBinaryParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<ComNavBinaryMessage>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: Phase::Seeking,
            buf: Vec::with_capacity(HEADER_LEN + BESTPOS_LEN + 4),
            header_len: 0,
            body_len: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let end = self.header_len + self.body_len;
        let computed = crc32_comnav(&self.buf[..end]);
        let received = u32::from_le_bytes([
            self.buf[end],
            self.buf[end + 1],
            self.buf[end + 2],
            self.buf[end + 3],
        ]);
        let id = u16::from_le_bytes([self.buf[4], self.buf[5]]);

        if computed != received {
            self.core.crc_error(Some(id.to_string()), received, computed);
            return self.abandon();
        }
        let published = match decode_header(&self.buf[..self.header_len]) {
            Ok(header) => self.core.dispatch(
                &id,
                &self.buf[self.header_len..end],
                end + 4,
                |m| m.header = header,
            ),
            Err(e) => {
                tracing::debug!("ComNav header for {} undecodable: {}", id, e);
                false
            }
        };
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

impl Default for ComNavBinaryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for ComNavBinaryParser {
    fn protocol(&self) -> Protocol {
        Protocol::ComNavBinary
    }

    fn feed(&mut self, byte: u8) -> bool {
        match self.phase {
            Phase::Seeking => {
                if byte == SYNC[0] {
                    self.buf.push(byte);
                    self.phase = Phase::Sync;
                }
            }
            Phase::Sync => {
                let expected = SYNC[self.buf.len()];
                if byte == expected {
                    self.buf.push(byte);
                    if self.buf.len() == SYNC.len() {
                        self.phase = Phase::Header;
                    }
                } else {
                    self.reset();
                    if byte == SYNC[0] {
                        self.buf.push(byte);
                        self.phase = Phase::Sync;
                    }
                }
            }
            Phase::Header => {
                self.buf.push(byte);
                let len = self.buf.len();
                if len == 4 {
                    self.header_len = usize::from(byte);
                    if self.header_len < HEADER_LEN {
                        return self.abandon();
                    }
                } else if len == 10 {
                    self.body_len = usize::from(u16::from_le_bytes([self.buf[8], self.buf[9]]));
                    if self.body_len > MAX_BODY {
                        return self.abandon();
                    }
                }
                if self.phase == Phase::Header && len == self.header_len {
                    self.phase = Phase::Body;
                }
            }
            Phase::Body => {
                self.buf.push(byte);
                if self.buf.len() == self.header_len + self.body_len + 4 {
                    return self.finish();
                }
            }
        }
        false
    }

    fn reset(&mut self) {
        self.phase = Phase::Seeking;
        self.buf.clear();
        self.header_len = 0;
        self.body_len = 0;
    }

    fn sync_pattern(&self) -> &'static [u8] {
        &SYNC
    }

    delegate_core!();
}

// ============ ASCII ============

/// ComNav ASCII payload variants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ComNavAsciiPayload {
    /// BESTPOSA
    BestPos(BestPos),
}

/// A ComNav ASCII log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComNavAsciiMessage {
    /// Log header
    pub header: ComNavAsciiHeader,
    /// Decoded data fields
    pub payload: ComNavAsciiPayload,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ComNavAsciiMessage {
    /// Log with an empty header
    pub fn new(payload: ComNavAsciiPayload) -> Self {
        Self {
            header: ComNavAsciiHeader::default(),
            payload,
            tag: None,
        }
    }

    fn read_header(&mut self, fields: &[&str]) -> Result<(), CodecError> {
        if fields.len() < 10 {
            return Err(CodecError::invalid(
                "header",
                format!("expected 10 fields, got {}", fields.len()),
            ));
        }
        if fields[0] != self.name() {
            return Err(CodecError::invalid("header", format!("log name '{}'", fields[0])));
        }
        self.header = ComNavAsciiHeader {
            port: fields[1].to_string(),
            sequence: number(fields[2], "sequence")?,
            idle_percent: number(fields[3], "idle")?,
            time_status: fields[4].to_string(),
            week: number(fields[5], "week")?,
            seconds: number(fields[6], "seconds")?,
            receiver_status: hex_field(fields[7], "receiver_status")?,
            receiver_version: number(fields[9], "receiver_version")?,
        };
        Ok(())
    }
}

impl ProtocolMessage for ComNavAsciiMessage {
    type Id = String;
    const PROTOCOL: Protocol = Protocol::ComNavAscii;

    fn message_id(&self) -> String {
        self.name().to_string()
    }

    fn name(&self) -> &'static str {
        match self.payload {
            ComNavAsciiPayload::BestPos(_) => "BESTPOSA",
        }
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        0
    }

    fn write_payload(&self, _out: &mut Vec<u8>) -> Result<(), CodecError> {
        Err(CodecError::Unsupported("ComNav ASCII logs are receive-only"))
    }

    /// Expects the text between `#` and `*`: `NAME,header;data`
    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let text = std::str::from_utf8(input).map_err(|e| CodecError::invalid("log", e.to_string()))?;
        let (header, data) = text
            .split_once(';')
            .ok_or_else(|| CodecError::invalid("log", "missing ';' separator"))?;
        let header_fields: Vec<&str> = header.split(',').collect();
        let data_fields: Vec<&str> = data.split(',').collect();
        self.read_header(&header_fields)?;
        match &mut self.payload {
            ComNavAsciiPayload::BestPos(p) => p.read_ascii(&data_fields)?,
        }
        *input = &input[input.len()..];
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        Err(CodecError::Unsupported("ComNav ASCII logs are receive-only"))
    }
}

/// Wrap `text` (`NAME,header;data`) as `#text*crc\r\n`
pub fn encode_ascii_frame(text: &str) -> Bytes {
    let mut frame = BytesMut::with_capacity(text.len() + 12);
    frame.put_u8(b'#');
    frame.put_slice(text.as_bytes());
    frame.put_slice(format!("*{:08x}\r\n", crc32_comnav(text.as_bytes())).as_bytes());
    frame.freeze()
}

/// Registry with every ASCII log this crate decodes
pub fn default_ascii_registry() -> MessageRegistry<ComNavAsciiMessage> {
    let mut registry = MessageRegistry::new();
    registry.register(|| ComNavAsciiMessage::new(ComNavAsciiPayload::BestPos(BestPos::default())));
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsciiPhase {
    Seeking,
    Body,
    Crc,
    Cr,
    Lf,
}

/// ComNav ASCII log parser
pub struct ComNavAsciiParser {
    core: ParserCore<ComNavAsciiMessage>,
    phase: AsciiPhase,
    body: Vec<u8>,
    crc_digits: usize,
    received: u32,
    frame_len: usize,
}

impl ComNavAsciiParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_ascii_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<ComNavAsciiMessage>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: AsciiPhase::Seeking,
            body: Vec::with_capacity(256),
            crc_digits: 0,
            received: 0,
            frame_len: 0,
        }
    }

    fn finish(&mut self) -> bool {
        let computed = crc32_comnav(&self.body);
        let name_end = self
            .body
            .iter()
            .position(|&b| b == b',' || b == b';')
            .unwrap_or(self.body.len());
        let id = String::from_utf8_lossy(&self.body[..name_end]).into_owned();

        let published = if computed == self.received {
            self.core.dispatch(&id, &self.body, self.frame_len, |_| {})
        } else {
            self.core.crc_error(Some(id), self.received, computed);
            false
        };
        self.reset();
        published
    }
}

impl Default for ComNavAsciiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for ComNavAsciiParser {
    fn protocol(&self) -> Protocol {
        Protocol::ComNavAscii
    }

    fn feed(&mut self, byte: u8) -> bool {
        if byte == b'#' {
            self.reset();
            self.phase = AsciiPhase::Body;
            self.frame_len = 1;
            return false;
        }
        self.frame_len += 1;

        match self.phase {
            AsciiPhase::Seeking => {}
            AsciiPhase::Body => match byte {
                b'*' => self.phase = AsciiPhase::Crc,
                0x20..=0x7E if self.body.len() < MAX_ASCII => self.body.push(byte),
                _ => self.reset(),
            },
            AsciiPhase::Crc => match char::from(byte).to_digit(16) {
                Some(v) => {
                    self.received = (self.received << 4) | v;
                    self.crc_digits += 1;
                    if self.crc_digits == 8 {
                        self.phase = AsciiPhase::Cr;
                    }
                }
                None => self.reset(),
            },
            AsciiPhase::Cr => match byte {
                b'\r' => self.phase = AsciiPhase::Lf,
                b'\n' => return self.finish(),
                _ => self.reset(),
            },
            AsciiPhase::Lf => {
                if byte == b'\n' {
                    return self.finish();
                }
                self.reset();
            }
        }
        false
    }

    fn reset(&mut self) {
        self.phase = AsciiPhase::Seeking;
        self.body.clear();
        self.crc_digits = 0;
        self.received = 0;
        self.frame_len = 0;
    }

    fn sync_pattern(&self) -> &'static [u8] {
        b"#"
    }

    delegate_core!();
}

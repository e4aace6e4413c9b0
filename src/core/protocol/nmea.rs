//! NMEA 0183 Protocol Parser
//!
//! Parses standard NMEA sentences emitted by GNSS receivers.
//!
//! Supported sentences:
//! - GGA: Global Positioning System Fix Data
//! - RMC: Recommended Minimum Navigation Information
//! - GSV: Satellites in View
//! - GSA: GNSS DOP and Active Satellites
//! - VTG: Track Made Good and Ground Speed
//! - GLL: Geographic Position - Latitude/Longitude
//! - ZDA: Time & Date
//!
//! The message id is the sentence formatter (`GGA`), or the whole address
//! for proprietary sentences (`PUBX`). The talker is kept on the message.

use std::fmt::Write as _;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::Serialize;

use super::checksum::xor_checksum;
use super::{delegate_core, ParserCore, ProtocolParser};
use crate::core::error::CodecError;
use crate::core::message::{Protocol, ProtocolMessage};
use crate::core::registry::MessageRegistry;

/// Longest sentence body accepted between `$` and `*`
pub const MAX_BODY: usize = 82;

/// GPS fix quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GpsFixQuality {
    #[default]
    /// No fix
    Invalid = 0,
    /// Autonomous GNSS fix
    GpsFix = 1,
    /// Differential fix
    DgpsFix = 2,
    /// PPS fix
    PpsFix = 3,
    /// RTK fixed
    Rtk = 4,
    /// RTK float
    FloatRtk = 5,
    /// Dead reckoning
    Estimated = 6,
    /// Manual input
    Manual = 7,
    /// Simulator
    Simulation = 8,
}

impl From<u8> for GpsFixQuality {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::GpsFix,
            2 => Self::DgpsFix,
            3 => Self::PpsFix,
            4 => Self::Rtk,
            5 => Self::FloatRtk,
            6 => Self::Estimated,
            7 => Self::Manual,
            8 => Self::Simulation,
            _ => Self::Invalid,
        }
    }
}

/// GSA fix mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GpsFixMode {
    /// No fix
    #[default]
    NotAvailable,
    /// 2D fix
    Fix2D,
    /// 3D fix
    Fix3D,
}

impl GpsFixMode {
    fn code(self) -> u8 {
        match self {
            Self::NotAvailable => 1,
            Self::Fix2D => 2,
            Self::Fix3D => 3,
        }
    }
}

/// Latitude or longitude as transmitted (`DDDMM.MMMM` plus hemisphere)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    /// Degrees * 100 + minutes
    pub raw: f64,
    /// N/S for latitude, E/W for longitude
    pub hemisphere: char,
}

impl Coordinate {
    /// Coordinate from signed decimal degrees
    pub fn from_decimal(degrees: f64, is_latitude: bool) -> Self {
        let hemisphere = match (is_latitude, degrees < 0.0) {
            (true, false) => 'N',
            (true, true) => 'S',
            (false, false) => 'E',
            (false, true) => 'W',
        };
        let abs = degrees.abs();
        let whole = abs.floor();
        Self {
            raw: whole * 100.0 + (abs - whole) * 60.0,
            hemisphere,
        }
    }

    fn parse(value: &str, hemisphere: &str, name: &'static str) -> Result<Option<Self>, CodecError> {
        if value.is_empty() && hemisphere.is_empty() {
            return Ok(None);
        }
        let raw = value
            .parse()
            .map_err(|_| CodecError::invalid(name, format!("bad coordinate '{value}'")))?;
        let hemisphere = hemisphere
            .chars()
            .next()
            .ok_or_else(|| CodecError::invalid(name, "missing hemisphere"))?;
        Ok(Some(Self { raw, hemisphere }))
    }

    /// Signed decimal degrees
    pub fn to_decimal(&self) -> f64 {
        let degrees = (self.raw / 100.0).floor();
        let minutes = self.raw - degrees * 100.0;
        let value = degrees + minutes / 60.0;
        match self.hemisphere {
            'S' | 'W' => -value,
            _ => value,
        }
    }
}

/// Satellite information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SatelliteInfo {
    /// Satellite PRN number
    pub prn: u16,
    /// Elevation in degrees
    pub elevation: Option<u8>,
    /// Azimuth in degrees
    pub azimuth: Option<u16>,
    /// Signal-to-noise ratio
    pub snr: Option<u8>,
}

/// GGA sentence (Fix Data)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GgaData {
    /// UTC time
    pub time: Option<NaiveTime>,
    /// Latitude
    pub latitude: Option<Coordinate>,
    /// Longitude
    pub longitude: Option<Coordinate>,
    /// Fix quality
    pub fix_quality: GpsFixQuality,
    /// Satellites used
    pub satellites_used: Option<u8>,
    /// Horizontal dilution of precision
    pub hdop: Option<f64>,
    /// Altitude above mean sea level, metres
    pub altitude: Option<f64>,
    /// Geoid separation, metres
    pub geoid_separation: Option<f64>,
    /// Age of differential corrections, seconds
    pub dgps_age: Option<f64>,
    /// Differential reference station id
    pub dgps_station_id: Option<u16>,
}

/// RMC sentence (Recommended Minimum)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RmcData {
    /// UTC time
    pub time: Option<NaiveTime>,
    /// A = active, V = void
    pub status: Option<char>,
    /// Latitude
    pub latitude: Option<Coordinate>,
    /// Longitude
    pub longitude: Option<Coordinate>,
    /// Speed over ground, knots
    pub speed_knots: Option<f64>,
    /// Course over ground, degrees true
    pub course: Option<f64>,
    /// UTC date
    pub date: Option<NaiveDate>,
    /// Magnetic variation, degrees
    pub magnetic_variation: Option<f64>,
    /// E/W
    pub magnetic_direction: Option<char>,
    /// Positioning mode indicator (NMEA 2.3+)
    pub mode: Option<char>,
}

/// GSV sentence (Satellites in View)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GsvData {
    /// Number of sentences in this group
    pub total_messages: u8,
    /// Sentence number within the group
    pub message_number: u8,
    /// Satellites in view
    pub satellites_in_view: u8,
    /// Up to four satellites
    pub satellites: Vec<SatelliteInfo>,
    /// Signal id (NMEA 4.10+)
    pub signal_id: Option<String>,
}

/// GSA sentence (DOP and Active Satellites)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GsaData {
    /// M = manual, A = automatic
    pub mode: Option<char>,
    /// Fix mode
    pub fix_mode: GpsFixMode,
    /// PRNs used in the solution (at most 12)
    pub satellite_prns: Vec<u16>,
    /// Position DOP
    pub pdop: Option<f64>,
    /// Horizontal DOP
    pub hdop: Option<f64>,
    /// Vertical DOP
    pub vdop: Option<f64>,
    /// GNSS system id (NMEA 4.10+)
    pub system_id: Option<u8>,
}

/// VTG sentence (Track and Ground Speed)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VtgData {
    /// Track, degrees true
    pub track_true: Option<f64>,
    /// Track, degrees magnetic
    pub track_magnetic: Option<f64>,
    /// Speed, knots
    pub speed_knots: Option<f64>,
    /// Speed, km/h
    pub speed_kmh: Option<f64>,
    /// Mode indicator
    pub mode: Option<char>,
}

/// GLL sentence (Geographic Position)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GllData {
    /// Latitude
    pub latitude: Option<Coordinate>,
    /// Longitude
    pub longitude: Option<Coordinate>,
    /// UTC time
    pub time: Option<NaiveTime>,
    /// A = valid, V = invalid
    pub status: Option<char>,
    /// Mode indicator
    pub mode: Option<char>,
}

/// ZDA sentence (Time and Date)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZdaData {
    /// UTC time
    pub time: Option<NaiveTime>,
    /// Day of month
    pub day: Option<u8>,
    /// Month
    pub month: Option<u8>,
    /// Four-digit year
    pub year: Option<u16>,
    /// Local zone hours offset
    pub local_zone_hours: Option<i8>,
    /// Local zone minutes offset
    pub local_zone_minutes: Option<u8>,
}

impl ZdaData {
    /// Calendar date, when complete and valid
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year?),
            u32::from(self.month?),
            u32::from(self.day?),
        )
    }
}

/// NMEA sentence variants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NmeaSentence {
    /// GGA
    Gga(GgaData),
    /// RMC
    Rmc(RmcData),
    /// GSV
    Gsv(GsvData),
    /// GSA
    Gsa(GsaData),
    /// VTG
    Vtg(VtgData),
    /// GLL
    Gll(GllData),
    /// ZDA
    Zda(ZdaData),
}

/// An NMEA sentence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NmeaMessage {
    /// Two-letter talker id (`GP`, `GN`, ...)
    pub talker: String,
    /// Decoded fields
    pub payload: NmeaSentence,
    /// Routing metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl NmeaMessage {
    /// Sentence with the `GN` talker and no tag
    pub fn new(payload: NmeaSentence) -> Self {
        Self {
            talker: "GN".to_string(),
            payload,
            tag: None,
        }
    }

    /// Set the talker id
    #[must_use]
    pub fn with_talker(mut self, talker: impl Into<String>) -> Self {
        self.talker = talker.into();
        self
    }

    /// Address field (`GPGGA`)
    pub fn address(&self) -> String {
        format!("{}{}", self.talker, self.formatter())
    }

    fn formatter(&self) -> &'static str {
        match self.payload {
            NmeaSentence::Gga(_) => "GGA",
            NmeaSentence::Rmc(_) => "RMC",
            NmeaSentence::Gsv(_) => "GSV",
            NmeaSentence::Gsa(_) => "GSA",
            NmeaSentence::Vtg(_) => "VTG",
            NmeaSentence::Gll(_) => "GLL",
            NmeaSentence::Zda(_) => "ZDA",
        }
    }

    /// Signed decimal latitude/longitude, for sentences that carry a position
    pub fn position(&self) -> Option<(f64, f64)> {
        let (lat, lon) = match &self.payload {
            NmeaSentence::Gga(d) => (d.latitude?, d.longitude?),
            NmeaSentence::Rmc(d) => (d.latitude?, d.longitude?),
            NmeaSentence::Gll(d) => (d.latitude?, d.longitude?),
            _ => return None,
        };
        Some((lat.to_decimal(), lon.to_decimal()))
    }
}

// ============ Field helpers ============

fn field<'a>(fields: &[&'a str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or("")
}

fn opt<T: FromStr>(fields: &[&str], i: usize, name: &'static str) -> Result<Option<T>, CodecError> {
    let s = field(fields, i);
    if s.is_empty() {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|_| CodecError::invalid(name, format!("cannot parse '{s}'")))
}

fn opt_char(fields: &[&str], i: usize) -> Option<char> {
    field(fields, i).chars().next()
}

fn require_fields(fields: &[&str], min: usize, sentence: &'static str) -> Result<(), CodecError> {
    if fields.len() < min {
        return Err(CodecError::invalid(
            sentence,
            format!("expected at least {min} fields, got {}", fields.len()),
        ));
    }
    Ok(())
}

/// Parse time from HHMMSS[.sss] format
fn parse_time(s: &str) -> Result<Option<NaiveTime>, CodecError> {
    if s.is_empty() {
        return Ok(None);
    }
    let bad = || CodecError::invalid("time", format!("bad time '{s}'"));
    if s.len() < 6 || !s.is_char_boundary(6) {
        return Err(bad());
    }
    let hours: u32 = s[0..2].parse().map_err(|_| bad())?;
    let minutes: u32 = s[2..4].parse().map_err(|_| bad())?;
    let seconds: u32 = s[4..6].parse().map_err(|_| bad())?;
    let nanos = match &s[6..] {
        "" => 0,
        frac => {
            let digits = frac.strip_prefix('.').ok_or_else(bad)?;
            if digits.is_empty() || digits.len() > 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let value: u32 = digits.parse().map_err(|_| bad())?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
    };
    NaiveTime::from_hms_nano_opt(hours, minutes, seconds, nanos)
        .map(Some)
        .ok_or_else(bad)
}

fn format_time(time: &NaiveTime) -> String {
    let mut out = format!("{:02}{:02}{:02}", time.hour(), time.minute(), time.second());
    let nanos = time.nanosecond();
    if nanos > 0 {
        let frac = format!("{nanos:09}");
        let _ = write!(out, ".{}", frac.trim_end_matches('0'));
    }
    out
}

/// Parse date from DDMMYY format
fn parse_date(s: &str) -> Result<Option<NaiveDate>, CodecError> {
    if s.is_empty() {
        return Ok(None);
    }
    let bad = || CodecError::invalid("date", format!("bad date '{s}'"));
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let day: u32 = s[0..2].parse().map_err(|_| bad())?;
    let month: u32 = s[2..4].parse().map_err(|_| bad())?;
    let year: i32 = s[4..6].parse().map_err(|_| bad())?;
    let full_year = if year > 80 { 1900 + year } else { 2000 + year };
    NaiveDate::from_ymd_opt(full_year, month, day)
        .map(Some)
        .ok_or_else(bad)
}

struct FieldWriter {
    fields: Vec<String>,
}

impl FieldWriter {
    fn new() -> Self {
        Self { fields: Vec::with_capacity(20) }
    }

    fn push(&mut self, value: impl ToString) {
        self.fields.push(value.to_string());
    }

    fn opt<T: ToString>(&mut self, value: Option<T>) {
        self.fields.push(value.map(|v| v.to_string()).unwrap_or_default());
    }

    fn time(&mut self, value: Option<&NaiveTime>) {
        self.opt(value.map(format_time));
    }

    fn coordinate(&mut self, value: Option<&Coordinate>) {
        self.opt(value.map(|c| c.raw));
        self.opt(value.map(|c| c.hemisphere));
    }

    fn finish(self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.fields.join(",").as_bytes());
    }
}

impl NmeaSentence {
    fn write(&self, w: &mut FieldWriter) {
        match self {
            NmeaSentence::Gga(d) => {
                w.time(d.time.as_ref());
                w.coordinate(d.latitude.as_ref());
                w.coordinate(d.longitude.as_ref());
                w.push(d.fix_quality as u8);
                w.opt(d.satellites_used);
                w.opt(d.hdop);
                w.opt(d.altitude);
                w.push('M');
                w.opt(d.geoid_separation);
                w.push('M');
                w.opt(d.dgps_age);
                w.opt(d.dgps_station_id);
            }
            NmeaSentence::Rmc(d) => {
                w.time(d.time.as_ref());
                w.opt(d.status);
                w.coordinate(d.latitude.as_ref());
                w.coordinate(d.longitude.as_ref());
                w.opt(d.speed_knots);
                w.opt(d.course);
                w.opt(d.date.map(|date| {
                    format!("{:02}{:02}{:02}", date.day(), date.month(), date.year().rem_euclid(100))
                }));
                w.opt(d.magnetic_variation);
                w.opt(d.magnetic_direction);
                if let Some(mode) = d.mode {
                    w.push(mode);
                }
            }
            NmeaSentence::Gsv(d) => {
                w.push(d.total_messages);
                w.push(d.message_number);
                w.push(d.satellites_in_view);
                for sat in &d.satellites {
                    w.push(sat.prn);
                    w.opt(sat.elevation);
                    w.opt(sat.azimuth);
                    w.opt(sat.snr);
                }
                if let Some(signal) = &d.signal_id {
                    w.push(signal);
                }
            }
            NmeaSentence::Gsa(d) => {
                w.opt(d.mode);
                w.push(d.fix_mode.code());
                for slot in 0..12 {
                    w.opt(d.satellite_prns.get(slot));
                }
                w.opt(d.pdop);
                w.opt(d.hdop);
                w.opt(d.vdop);
                if let Some(system) = d.system_id {
                    w.push(system);
                }
            }
            NmeaSentence::Vtg(d) => {
                w.opt(d.track_true);
                w.push('T');
                w.opt(d.track_magnetic);
                w.push('M');
                w.opt(d.speed_knots);
                w.push('N');
                w.opt(d.speed_kmh);
                w.push('K');
                if let Some(mode) = d.mode {
                    w.push(mode);
                }
            }
            NmeaSentence::Gll(d) => {
                w.coordinate(d.latitude.as_ref());
                w.coordinate(d.longitude.as_ref());
                w.time(d.time.as_ref());
                w.opt(d.status);
                if let Some(mode) = d.mode {
                    w.push(mode);
                }
            }
            NmeaSentence::Zda(d) => {
                w.time(d.time.as_ref());
                w.opt(d.day.map(|v| format!("{v:02}")));
                w.opt(d.month.map(|v| format!("{v:02}")));
                w.opt(d.year);
                w.opt(d.local_zone_hours);
                w.opt(d.local_zone_minutes);
            }
        }
    }

    fn read(&mut self, fields: &[&str]) -> Result<(), CodecError> {
        match self {
            NmeaSentence::Gga(d) => {
                require_fields(fields, 14, "GGA")?;
                *d = GgaData {
                    time: parse_time(fields[0])?,
                    latitude: Coordinate::parse(fields[1], fields[2], "latitude")?,
                    longitude: Coordinate::parse(fields[3], fields[4], "longitude")?,
                    fix_quality: opt::<u8>(fields, 5, "fix quality")?.unwrap_or(0).into(),
                    satellites_used: opt(fields, 6, "satellites used")?,
                    hdop: opt(fields, 7, "hdop")?,
                    altitude: opt(fields, 8, "altitude")?,
                    geoid_separation: opt(fields, 10, "geoid separation")?,
                    dgps_age: opt(fields, 12, "dgps age")?,
                    dgps_station_id: opt(fields, 13, "dgps station")?,
                };
            }
            NmeaSentence::Rmc(d) => {
                require_fields(fields, 11, "RMC")?;
                *d = RmcData {
                    time: parse_time(fields[0])?,
                    status: opt_char(fields, 1),
                    latitude: Coordinate::parse(fields[2], fields[3], "latitude")?,
                    longitude: Coordinate::parse(fields[4], fields[5], "longitude")?,
                    speed_knots: opt(fields, 6, "speed")?,
                    course: opt(fields, 7, "course")?,
                    date: parse_date(fields[8])?,
                    magnetic_variation: opt(fields, 9, "magnetic variation")?,
                    magnetic_direction: opt_char(fields, 10),
                    mode: opt_char(fields, 11),
                };
            }
            NmeaSentence::Gsv(d) => {
                require_fields(fields, 3, "GSV")?;
                let rest = &fields[3..];
                let (sats, signal) = if rest.len() % 4 == 1 {
                    (&rest[..rest.len() - 1], rest.last().map(|s| (*s).to_string()))
                } else if rest.len() % 4 == 0 {
                    (rest, None)
                } else {
                    return Err(CodecError::invalid("GSV", "incomplete satellite block"));
                };
                let mut satellites = Vec::with_capacity(sats.len() / 4);
                for block in sats.chunks(4) {
                    satellites.push(SatelliteInfo {
                        prn: opt(block, 0, "prn")?.unwrap_or(0),
                        elevation: opt(block, 1, "elevation")?,
                        azimuth: opt(block, 2, "azimuth")?,
                        snr: opt(block, 3, "snr")?,
                    });
                }
                *d = GsvData {
                    total_messages: opt(fields, 0, "total messages")?.unwrap_or(0),
                    message_number: opt(fields, 1, "message number")?.unwrap_or(0),
                    satellites_in_view: opt(fields, 2, "satellites in view")?.unwrap_or(0),
                    satellites,
                    signal_id: signal,
                };
            }
            NmeaSentence::Gsa(d) => {
                require_fields(fields, 17, "GSA")?;
                let mut satellite_prns = Vec::with_capacity(12);
                for i in 2..14 {
                    if let Some(prn) = opt::<u16>(fields, i, "prn")? {
                        satellite_prns.push(prn);
                    }
                }
                *d = GsaData {
                    mode: opt_char(fields, 0),
                    fix_mode: match opt::<u8>(fields, 1, "fix mode")? {
                        Some(2) => GpsFixMode::Fix2D,
                        Some(3) => GpsFixMode::Fix3D,
                        _ => GpsFixMode::NotAvailable,
                    },
                    satellite_prns,
                    pdop: opt(fields, 14, "pdop")?,
                    hdop: opt(fields, 15, "hdop")?,
                    vdop: opt(fields, 16, "vdop")?,
                    system_id: opt(fields, 17, "system id")?,
                };
            }
            NmeaSentence::Vtg(d) => {
                require_fields(fields, 8, "VTG")?;
                *d = VtgData {
                    track_true: opt(fields, 0, "track true")?,
                    track_magnetic: opt(fields, 2, "track magnetic")?,
                    speed_knots: opt(fields, 4, "speed knots")?,
                    speed_kmh: opt(fields, 6, "speed km/h")?,
                    mode: opt_char(fields, 8),
                };
            }
            NmeaSentence::Gll(d) => {
                require_fields(fields, 6, "GLL")?;
                *d = GllData {
                    latitude: Coordinate::parse(fields[0], fields[1], "latitude")?,
                    longitude: Coordinate::parse(fields[2], fields[3], "longitude")?,
                    time: parse_time(fields[4])?,
                    status: opt_char(fields, 5),
                    mode: opt_char(fields, 6),
                };
            }
            NmeaSentence::Zda(d) => {
                require_fields(fields, 6, "ZDA")?;
                *d = ZdaData {
                    time: parse_time(fields[0])?,
                    day: opt(fields, 1, "day")?,
                    month: opt(fields, 2, "month")?,
                    year: opt(fields, 3, "year")?,
                    local_zone_hours: opt(fields, 4, "zone hours")?,
                    local_zone_minutes: opt(fields, 5, "zone minutes")?,
                };
            }
        }
        Ok(())
    }
}

impl ProtocolMessage for NmeaMessage {
    type Id = String;
    const PROTOCOL: Protocol = Protocol::Nmea;

    fn message_id(&self) -> String {
        self.formatter().to_string()
    }

    fn name(&self) -> &'static str {
        self.formatter()
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    fn byte_size(&self) -> usize {
        let mut out = Vec::with_capacity(MAX_BODY);
        let mut w = FieldWriter::new();
        self.payload.write(&mut w);
        w.finish(&mut out);
        out.len()
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let mut w = FieldWriter::new();
        self.payload.write(&mut w);
        w.finish(out);
        Ok(())
    }

    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError> {
        let text = std::str::from_utf8(input).map_err(|e| CodecError::invalid("sentence", e.to_string()))?;
        let fields: Vec<&str> = text.split(',').collect();
        self.payload.read(&fields)?;
        *input = &input[input.len()..];
        Ok(())
    }

    fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let mut fields = Vec::with_capacity(MAX_BODY);
        self.write_payload(&mut fields)?;
        Ok(encode_frame(&self.address(), &fields))
    }
}

/// Build `$<address>,<fields>*hh\r\n`
pub fn encode_frame(address: &str, fields: &[u8]) -> Bytes {
    let mut body = Vec::with_capacity(address.len() + 1 + fields.len());
    body.extend_from_slice(address.as_bytes());
    body.push(b',');
    body.extend_from_slice(fields);

    let mut frame = BytesMut::with_capacity(body.len() + 6);
    frame.put_u8(b'$');
    frame.put_slice(&body);
    frame.put_slice(format!("*{:02X}\r\n", xor_checksum(&body)).as_bytes());
    frame.freeze()
}

/// Registry with every NMEA sentence this crate decodes
pub fn default_registry() -> MessageRegistry<NmeaMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register(|| NmeaMessage::new(NmeaSentence::Gga(GgaData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Rmc(RmcData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Gsv(GsvData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Gsa(GsaData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Vtg(VtgData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Gll(GllData::default())))
        .register(|| NmeaMessage::new(NmeaSentence::Zda(ZdaData::default())));
    registry
}

fn is_address_start(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit()
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|v| v as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Body,
    Checksum1,
    Checksum2,
    Cr,
    Lf,
}

/// NMEA 0183 sentence parser
pub struct NmeaParser {
    core: ParserCore<NmeaMessage>,
    phase: Phase,
    // bytes between '$' and '*'
    body: Vec<u8>,
    received: u8,
    frame_len: usize,
}

impl NmeaParser {
    /// Parser with the default registry
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    /// Parser with a custom registry
    pub fn with_registry(registry: MessageRegistry<NmeaMessage>) -> Self {
        Self {
            core: ParserCore::new(registry),
            phase: Phase::Seeking,
            body: Vec::with_capacity(MAX_BODY),
            received: 0,
            frame_len: 0,
        }
    }

    /// Calculate NMEA checksum
    pub fn calculate_checksum(data: &str) -> u8 {
        xor_checksum(data.as_bytes())
    }

    fn start(&mut self) {
        self.body.clear();
        self.received = 0;
        self.frame_len = 1;
        self.phase = Phase::Body;
    }

    fn finish(&mut self) -> bool {
        let computed = xor_checksum(&self.body);
        let comma = self.body.iter().position(|&b| b == b',').unwrap_or(self.body.len());
        let address = String::from_utf8_lossy(&self.body[..comma]).into_owned();
        let fields = self.body.get(comma + 1..).unwrap_or(&[]);

        let (talker, id) = split_address(&address);

        let published = if computed == self.received {
            self.core
                .dispatch(&id, fields, self.frame_len, |m| m.talker = talker)
        } else {
            self.core
                .crc_error(Some(id), u32::from(self.received), u32::from(computed));
            false
        };
        self.reset();
        published
    }

    /// Drop a sentence cut short by `byte`; reported once the address is complete
    fn malformed(&mut self, byte: u8) {
        if let Some(comma) = self.body.iter().position(|&b| b == b',') {
            let address = String::from_utf8_lossy(&self.body[..comma]).into_owned();
            let (_, id) = split_address(&address);
            let reason = if self.body.len() >= MAX_BODY {
                format!("longer than {MAX_BODY} characters")
            } else {
                format!("byte {byte:#04x} before the checksum")
            };
            self.core
                .malformed(id, "sentence", CodecError::invalid("sentence", reason));
        }
        self.reset();
    }
}

/// Talker and sentence id; proprietary and short addresses have no talker
fn split_address(address: &str) -> (String, String) {
    if address.starts_with('P') || address.len() < 3 {
        (String::new(), address.to_string())
    } else {
        (address[..2].to_string(), address[2..].to_string())
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolParser for NmeaParser {
    fn protocol(&self) -> Protocol {
        Protocol::Nmea
    }

    fn feed(&mut self, byte: u8) -> bool {
        if byte == b'$' {
            self.start();
            return false;
        }
        self.frame_len += 1;

        match self.phase {
            Phase::Seeking => {}
            Phase::Body => match byte {
                b'*' => self.phase = Phase::Checksum1,
                b if self.body.is_empty() && !is_address_start(b) => self.reset(),
                0x20..=0x7E if self.body.len() < MAX_BODY => self.body.push(byte),
                _ => self.malformed(byte),
            },
            Phase::Checksum1 => match hex_value(byte) {
                Some(v) => {
                    self.received = v << 4;
                    self.phase = Phase::Checksum2;
                }
                None => self.reset(),
            },
            Phase::Checksum2 => match hex_value(byte) {
                Some(v) => {
                    self.received |= v;
                    self.phase = Phase::Cr;
                }
                None => self.reset(),
            },
            Phase::Cr => match byte {
                b'\r' => self.phase = Phase::Lf,
                b'\n' => return self.finish(),
                _ => self.reset(),
            },
            Phase::Lf => {
                if byte == b'\n' {
                    return self.finish();
                }
                self.reset();
            }
        }
        false
    }

    fn reset(&mut self) {
        self.phase = Phase::Seeking;
        self.body.clear();
        self.received = 0;
        self.frame_len = 0;
    }

    fn sync_pattern(&self) -> &'static [u8] {
        b"$"
    }

    fn claims_sync(&self, prefix: &[u8]) -> bool {
        match prefix {
            [b'$'] => true,
            [b'$', second, ..] => is_address_start(*second),
            _ => false,
        }
    }

    delegate_core!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ParseError;
    use crate::core::message::GnssMessage;
    use crate::core::protocol::test_util::{drain, feed_all};

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

    fn parse_one(sentence: &str) -> NmeaMessage {
        let mut parser = NmeaParser::new();
        let mut rx = parser.subscribe_messages();
        let hits = feed_all(&mut parser, sentence.as_bytes());
        assert_eq!(hits, vec![sentence.len() - 1], "{sentence}");
        match drain(&mut rx).remove(0) {
            GnssMessage::Nmea(m) => m,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn round_trip(message: &NmeaMessage) {
        let mut bytes = Vec::new();
        message.write_payload(&mut bytes).unwrap();
        assert_eq!(bytes.len(), message.byte_size());
        let mut decoded = default_registry().create(&message.message_id()).unwrap();
        decoded.talker = message.talker.clone();
        let mut input = bytes.as_slice();
        decoded.deserialize(&mut input).unwrap();
        assert!(input.is_empty());
        assert_eq!(&decoded, message);
    }

    #[test]
    fn test_gga_parse() {
        let msg = parse_one(GGA);
        assert_eq!(msg.talker, "GP");
        assert_eq!(msg.message_id(), "GGA");
        let NmeaSentence::Gga(gga) = &msg.payload else {
            panic!("expected GGA");
        };
        assert_eq!(gga.satellites_used, Some(8));
        assert_eq!(gga.fix_quality, GpsFixQuality::GpsFix);
        assert_eq!(gga.time, NaiveTime::from_hms_opt(12, 35, 19));
        assert_eq!(gga.altitude, Some(545.4));
        assert_eq!(gga.dgps_age, None);
        let (lat, lon) = msg.position().unwrap();
        assert!((lat - 48.1173).abs() < 1e-4);
        assert!((lon - 11.516_666).abs() < 1e-4);
        round_trip(&msg);
    }

    #[test]
    fn test_rmc_parse() {
        let msg = parse_one(RMC);
        let NmeaSentence::Rmc(rmc) = &msg.payload else {
            panic!("expected RMC");
        };
        assert_eq!(rmc.status, Some('A'));
        assert_eq!(rmc.speed_knots, Some(22.4));
        assert_eq!(rmc.date, NaiveDate::from_ymd_opt(1994, 3, 23));
        assert_eq!(rmc.magnetic_direction, Some('W'));
        assert_eq!(rmc.mode, None);
        round_trip(&msg);
    }

    #[test]
    fn test_checksum() {
        let checksum = NmeaParser::calculate_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(checksum, 0x47);
    }

    #[test]
    fn test_fractional_time_round_trip() {
        assert_eq!(
            parse_time("092725.125").unwrap(),
            NaiveTime::from_hms_milli_opt(9, 27, 25, 125)
        );
        let t = NaiveTime::from_hms_nano_opt(23, 59, 58, 50_000_000).unwrap();
        assert_eq!(format_time(&t), "235958.05");
        assert_eq!(parse_time("235958.05").unwrap(), Some(t));
        assert!(parse_time("25").is_err());
    }

    #[test]
    fn test_sentence_round_trips() {
        let time = NaiveTime::from_hms_milli_opt(10, 20, 30, 400);
        let messages = vec![
            NmeaMessage::new(NmeaSentence::Gsv(GsvData {
                total_messages: 3,
                message_number: 1,
                satellites_in_view: 11,
                satellites: vec![
                    SatelliteInfo { prn: 3, elevation: Some(3), azimuth: Some(111), snr: None },
                    SatelliteInfo { prn: 193, elevation: Some(45), azimuth: Some(270), snr: Some(41) },
                ],
                signal_id: Some("1".into()),
            }))
            .with_talker("GP"),
            NmeaMessage::new(NmeaSentence::Gsa(GsaData {
                mode: Some('A'),
                fix_mode: GpsFixMode::Fix3D,
                satellite_prns: vec![4, 5, 9, 12, 24],
                pdop: Some(2.5),
                hdop: Some(1.3),
                vdop: Some(2.1),
                system_id: Some(1),
            })),
            NmeaMessage::new(NmeaSentence::Vtg(VtgData {
                track_true: Some(77.52),
                track_magnetic: None,
                speed_knots: Some(0.004),
                speed_kmh: Some(0.008),
                mode: Some('A'),
            })),
            NmeaMessage::new(NmeaSentence::Gll(GllData {
                latitude: Some(Coordinate::from_decimal(-33.865, true)),
                longitude: Some(Coordinate::from_decimal(151.2094, false)),
                time,
                status: Some('A'),
                mode: None,
            })),
            NmeaMessage::new(NmeaSentence::Zda(ZdaData {
                time,
                day: Some(7),
                month: Some(3),
                year: Some(2024),
                local_zone_hours: Some(-5),
                local_zone_minutes: Some(0),
            })),
            NmeaMessage::new(NmeaSentence::Gga(GgaData::default())),
        ];
        for message in &messages {
            round_trip(message);
        }
    }

    #[test]
    fn test_encode_then_parse() {
        let msg = NmeaMessage::new(NmeaSentence::Zda(ZdaData {
            time: NaiveTime::from_hms_opt(1, 2, 3),
            day: Some(29),
            month: Some(2),
            year: Some(2024),
            local_zone_hours: None,
            local_zone_minutes: None,
        }));
        let frame = msg.encode_frame().unwrap();
        assert_eq!(&frame[..], b"$GNZDA,010203,29,02,2024,,*5B\r\n");
        let parsed = parse_one(std::str::from_utf8(&frame).unwrap());
        assert_eq!(parsed, msg);
        let NmeaSentence::Zda(zda) = &parsed.payload else {
            panic!("expected ZDA");
        };
        assert_eq!(zda.date(), NaiveDate::from_ymd_opt(2024, 2, 29));
    }

    #[test]
    fn test_bad_checksum() {
        let corrupted = GGA.replace("545.4", "545.5");
        let mut parser = NmeaParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, corrupted.as_bytes()).is_empty());
        assert!(drain(&mut rx).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::Crc { message_id: Some(id), .. }] if id == "GGA"));
    }

    #[test]
    fn test_bare_lf_and_restart() {
        let mut stream = b"$GPGGA,1235".to_vec();
        stream.extend_from_slice(GGA.trim_end_matches("\r\n").as_bytes());
        stream.push(b'\n');
        let mut parser = NmeaParser::new();
        assert_eq!(feed_all(&mut parser, &stream), vec![stream.len() - 1]);
    }

    #[test]
    fn test_truncated_then_next() {
        let bytes = GGA.as_bytes();
        for cut in 1..bytes.len() - 1 {
            let mut parser = NmeaParser::new();
            let mut stream = bytes[..cut].to_vec();
            stream.extend_from_slice(RMC.as_bytes());
            let hits = feed_all(&mut parser, &stream);
            assert_eq!(hits, vec![stream.len() - 1], "cut at {cut}");
        }
    }

    #[test]
    fn test_control_byte_is_malformed() {
        let mut stream = GGA.replace("4807.038", "48\x007.038").into_bytes();
        stream.extend_from_slice(RMC.as_bytes());
        let mut parser = NmeaParser::new();
        let mut rx = parser.subscribe_messages();
        let mut errors = parser.subscribe_errors();

        assert_eq!(feed_all(&mut parser, &stream), vec![stream.len() - 1]);
        assert_eq!(drain(&mut rx)[0].name(), "RMC");
        assert!(matches!(
            &drain(&mut errors)[..],
            [ParseError::Deserialize { message_id, name: "sentence", .. }] if message_id == "GGA"
        ));
        let stats = parser.stats();
        assert_eq!(stats.deserialize_errors, 1);
        assert_eq!(stats.messages, 1);
    }

    #[test]
    fn test_noise_after_dollar_is_not_reported() {
        let mut parser = NmeaParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, b"$GP\x00\xFF$\x01").is_empty());
        assert!(drain(&mut errors).is_empty());
        assert_eq!(parser.stats().deserialize_errors, 0);
    }

    #[test]
    fn test_proprietary_and_unknown() {
        let frame = encode_frame("PUBX", b"00,081350.00");
        let mut parser = NmeaParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::UnknownMessage { message_id, .. }] if message_id == "PUBX"));

        let frame = encode_frame("GPTXT", b"01,01,02,ANTSTATUS=OK");
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::UnknownMessage { message_id, .. }] if message_id == "TXT"));
    }

    #[test]
    fn test_too_few_fields() {
        let frame = encode_frame("GPGGA", b"123519,4807.038,N");
        let mut parser = NmeaParser::new();
        let mut errors = parser.subscribe_errors();
        assert!(feed_all(&mut parser, &frame).is_empty());
        assert!(matches!(&drain(&mut errors)[..], [ParseError::Deserialize { name: "GGA", .. }]));
    }

    #[test]
    fn test_claims_sync() {
        let parser = NmeaParser::new();
        assert!(parser.claims_sync(b"$"));
        assert!(parser.claims_sync(b"$G"));
        assert!(!parser.claims_sync(b"$@"));
        assert!(!parser.claims_sync(b"#"));
    }
}

//! Protocol identifiers, the shared message contract and the cross-protocol
//! message union
//!
//! Every protocol module defines one message struct wrapping an enum of
//! payload variants. [`GnssMessage`] is the tagged union the connection
//! broadcasts.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::CodecError;
use super::protocol::{
    asv::{AsvMessage, AsvParser},
    comnav::{ComNavAsciiMessage, ComNavAsciiParser, ComNavBinaryMessage, ComNavBinaryParser},
    nmea::{NmeaMessage, NmeaParser},
    rtcm2::{Rtcm2Message, Rtcm2Parser},
    rtcm3::{Rtcm3Message, Rtcm3Parser},
    sbf::{SbfMessage, SbfParser},
    ubx::{UbxMessage, UbxParser},
    ProtocolParser,
};

/// Wire protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// u-blox binary protocol
    #[serde(rename = "UBX", alias = "ubx")]
    Ubx,
    /// RTCM SC-104 version 3
    #[serde(rename = "RTCMv3", alias = "rtcm3")]
    Rtcm3,
    /// RTCM SC-104 version 2
    #[serde(rename = "RTCMv2", alias = "rtcm2")]
    Rtcm2,
    /// Asv telemetry protocol
    #[serde(rename = "ASV", alias = "asv")]
    Asv,
    /// Septentrio binary format
    #[serde(rename = "SBF", alias = "sbf")]
    Sbf,
    /// NMEA-0183 sentences
    #[serde(rename = "NMEA", alias = "nmea")]
    Nmea,
    /// ComNav binary logs
    #[serde(rename = "ComNavBin", alias = "comnav-bin")]
    ComNavBinary,
    /// ComNav ASCII logs
    #[serde(rename = "ComNavAscii", alias = "comnav-ascii")]
    ComNavAscii,
    /// Not tied to one protocol (connection-level failures)
    #[serde(rename = "COMMON")]
    Common,
}

impl Protocol {
    /// Every concrete wire protocol
    pub fn all() -> &'static [Protocol] {
        &[
            Protocol::Ubx,
            Protocol::Rtcm3,
            Protocol::Rtcm2,
            Protocol::Asv,
            Protocol::Sbf,
            Protocol::Nmea,
            Protocol::ComNavBinary,
            Protocol::ComNavAscii,
        ]
    }

    /// Short identifier used in logs and configuration
    pub fn id(&self) -> &'static str {
        match self {
            Protocol::Ubx => "UBX",
            Protocol::Rtcm3 => "RTCMv3",
            Protocol::Rtcm2 => "RTCMv2",
            Protocol::Asv => "ASV",
            Protocol::Sbf => "SBF",
            Protocol::Nmea => "NMEA",
            Protocol::ComNavBinary => "ComNavBin",
            Protocol::ComNavAscii => "ComNavAscii",
            Protocol::Common => "COMMON",
        }
    }

    /// Build a parser with the default message registry, `None` for [`Protocol::Common`]
    pub fn parser(&self) -> Option<Box<dyn ProtocolParser>> {
        let parser: Box<dyn ProtocolParser> = match self {
            Protocol::Ubx => Box::new(UbxParser::new()),
            Protocol::Rtcm3 => Box::new(Rtcm3Parser::new()),
            Protocol::Rtcm2 => Box::new(Rtcm2Parser::new()),
            Protocol::Asv => Box::new(AsvParser::new()),
            Protocol::Sbf => Box::new(SbfParser::new()),
            Protocol::Nmea => Box::new(NmeaParser::new()),
            Protocol::ComNavBinary => Box::new(ComNavBinaryParser::new()),
            Protocol::ComNavAscii => Box::new(ComNavAsciiParser::new()),
            Protocol::Common => return None,
        };
        Some(parser)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Protocol::all()
            .iter()
            .copied()
            .find(|p| {
                p.id().to_ascii_lowercase() == wanted
                    || match p {
                        Protocol::Rtcm3 => wanted == "rtcm3",
                        Protocol::Rtcm2 => wanted == "rtcm2",
                        Protocol::ComNavBinary => wanted == "comnav-bin",
                        Protocol::ComNavAscii => wanted == "comnav-ascii",
                        _ => false,
                    }
            })
            .ok_or_else(|| format!("unknown protocol: {s}"))
    }
}

/// Contract shared by every protocol's message type
pub trait ProtocolMessage: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identifier used for registry lookup and framing
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Owning protocol
    const PROTOCOL: Protocol;

    /// Owning protocol
    fn protocol(&self) -> Protocol {
        Self::PROTOCOL
    }

    /// Id fixed at construction
    fn message_id(&self) -> Self::Id;

    /// Human-readable message name
    fn name(&self) -> &'static str;

    /// Routing metadata attached out of band
    fn tag(&self) -> Option<&str>;

    /// Replace the routing metadata
    fn set_tag(&mut self, tag: Option<String>);

    /// Payload size in bytes as it appears on the wire
    fn byte_size(&self) -> usize;

    /// Append the payload bytes to `out`
    fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Decode the payload, advancing `input` past the consumed bytes
    fn deserialize(&mut self, input: &mut &[u8]) -> Result<(), CodecError>;

    /// Produce a complete wire frame
    fn encode_frame(&self) -> Result<Bytes, CodecError>;
}

/// Any decoded message, tagged by protocol
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "protocol", content = "message")]
pub enum GnssMessage {
    /// UBX
    #[serde(rename = "UBX")]
    Ubx(UbxMessage),
    /// RTCM v3
    #[serde(rename = "RTCMv3")]
    Rtcm3(Rtcm3Message),
    /// RTCM v2
    #[serde(rename = "RTCMv2")]
    Rtcm2(Rtcm2Message),
    /// Asv
    #[serde(rename = "ASV")]
    Asv(AsvMessage),
    /// SBF
    #[serde(rename = "SBF")]
    Sbf(SbfMessage),
    /// NMEA-0183
    #[serde(rename = "NMEA")]
    Nmea(NmeaMessage),
    /// ComNav binary
    #[serde(rename = "ComNavBin")]
    ComNavBinary(ComNavBinaryMessage),
    /// ComNav ASCII
    #[serde(rename = "ComNavAscii")]
    ComNavAscii(ComNavAsciiMessage),
}

macro_rules! each_variant {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            GnssMessage::Ubx($m) => $body,
            GnssMessage::Rtcm3($m) => $body,
            GnssMessage::Rtcm2($m) => $body,
            GnssMessage::Asv($m) => $body,
            GnssMessage::Sbf($m) => $body,
            GnssMessage::Nmea($m) => $body,
            GnssMessage::ComNavBinary($m) => $body,
            GnssMessage::ComNavAscii($m) => $body,
        }
    };
}

macro_rules! impl_from_message {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for GnssMessage {
                fn from(message: $ty) -> Self {
                    GnssMessage::$variant(message)
                }
            }
        )*
    };
}

impl_from_message! {
    Ubx => UbxMessage,
    Rtcm3 => Rtcm3Message,
    Rtcm2 => Rtcm2Message,
    Asv => AsvMessage,
    Sbf => SbfMessage,
    Nmea => NmeaMessage,
    ComNavBinary => ComNavBinaryMessage,
    ComNavAscii => ComNavAsciiMessage,
}

impl GnssMessage {
    /// Owning protocol
    pub fn protocol(&self) -> Protocol {
        each_variant!(self, m => m.protocol())
    }

    /// Message id rendered as text
    pub fn message_id(&self) -> String {
        each_variant!(self, m => m.message_id().to_string())
    }

    /// Message name
    pub fn name(&self) -> &'static str {
        each_variant!(self, m => m.name())
    }

    /// Routing metadata
    pub fn tag(&self) -> Option<&str> {
        each_variant!(self, m => m.tag())
    }

    /// Replace the routing metadata
    pub fn set_tag(&mut self, tag: Option<String>) {
        each_variant!(self, m => m.set_tag(tag))
    }

    /// Payload size in bytes
    pub fn byte_size(&self) -> usize {
        each_variant!(self, m => m.byte_size())
    }

    /// Append the payload bytes
    pub fn write_payload(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        each_variant!(self, m => m.write_payload(out))
    }

    /// Complete wire frame
    pub fn encode_frame(&self) -> Result<Bytes, CodecError> {
        each_variant!(self, m => m.encode_frame())
    }

    /// Short description used in logs and errors, e.g. `UBX MON-VER (0x0A:0x04)`
    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.protocol(), self.name(), self.message_id())
    }

    /// The UBX message, if this is one
    pub fn as_ubx(&self) -> Option<&UbxMessage> {
        match self {
            GnssMessage::Ubx(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for GnssMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("ubx".parse::<Protocol>().unwrap(), Protocol::Ubx);
        assert_eq!("RTCMv3".parse::<Protocol>().unwrap(), Protocol::Rtcm3);
        assert_eq!("rtcm2".parse::<Protocol>().unwrap(), Protocol::Rtcm2);
        assert_eq!("comnav-ascii".parse::<Protocol>().unwrap(), Protocol::ComNavAscii);
        assert!("common".parse::<Protocol>().is_err());
        assert!("foo".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_payload_bytes_and_json_with_serde_in_scope() {
        use crate::core::protocol::ubx::{CfgRate, UbxPayload};

        let message = UbxMessage::new(UbxPayload::CfgRate(CfgRate {
            meas_rate_ms: 200,
            nav_rate: 1,
            time_ref: 1,
        }));
        let mut payload = Vec::new();
        message.write_payload(&mut payload).unwrap();
        assert_eq!(payload, [0xC8, 0x00, 0x01, 0x00, 0x01, 0x00]);

        let wrapped = GnssMessage::from(message);
        let mut again = Vec::new();
        wrapped.write_payload(&mut again).unwrap();
        assert_eq!(again, payload);

        let json = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(json["protocol"], "UBX");
        assert_eq!(json["message"]["payload"]["CfgRate"]["meas_rate_ms"], 200);
    }

    #[test]
    fn test_parser_factory() {
        for protocol in Protocol::all() {
            let parser = protocol.parser().unwrap();
            assert_eq!(parser.protocol(), *protocol);
        }
        assert!(Protocol::Common.parser().is_none());
    }
}

//! Decoding of inbound WinTest UDP frames.
//!
//! WinTest broadcasts text frames that start with a keyword and the sending
//! station name in quotes, followed by a checksum byte:
//!
//! ```text
//! STATUS: "STN1" "" 0 5 1 0 140751 "0" 0 "1"  143400 "TK5EP"<ck>
//! SENDPKT: "STN1" "" "SH/DX\r"<ck>
//! REMOTE: "STN1" "SNIFFER" "QSY/80" 2<ck>
//! ```
//!
//! Only these three frame types are decoded. Each decoder returns a typed
//! error instead of panicking so a malformed frame only drops itself.

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_till, take_while_m_n, take_while1},
    character::complete::{char, satisfy},
    sequence::delimited,
};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::frame::strip_trailer;

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("Unsupported frame type: {0}")]
    Unsupported(String),

    #[error("Malformed {kind} frame: {text}")]
    Malformed { kind: FrameKind, text: String },

    #[error("Frequency window {start}..{end} outside frame of {len} bytes")]
    WindowOutOfRange { start: usize, end: usize, len: usize },

    #[error("Frequency field is not numeric: {0:?}")]
    NotNumeric(String),

    #[error("Frequency field {0} missing")]
    MissingField(usize),
}

/// Inbound frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Status,
    SendPkt,
    Remote,
}

impl FrameKind {
    pub fn keyword(self) -> &'static str {
        match self {
            FrameKind::Status => "STATUS:",
            FrameKind::SendPkt => "SENDPKT:",
            FrameKind::Remote => "REMOTE:",
        }
    }

    /// Identify a frame from its leading keyword.
    pub fn of(text: &str) -> Option<Self> {
        let text = text.trim_start();
        [FrameKind::Status, FrameKind::SendPkt, FrameKind::Remote]
            .into_iter()
            .find(|k| text.starts_with(k.keyword()))
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Status => write!(f, "STATUS"),
            FrameKind::SendPkt => write!(f, "SENDPKT"),
            FrameKind::Remote => write!(f, "REMOTE"),
        }
    }
}

/// Where the operating frequency sits in a `STATUS` frame.
///
/// The value is in hundreds of Hz: `140751` is 14075.1 kHz.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyField {
    /// Fixed byte window of the frame, trimmed of whitespace.
    ///
    /// WinTest's own layout puts the field at bytes 25..32 when the station
    /// name is four characters long.
    Window { start: usize, end: usize },

    /// Nth whitespace-separated field after the two quoted station fields.
    Token { index: usize },
}

impl Default for FrequencyField {
    fn default() -> Self {
        FrequencyField::Window { start: 25, end: 32 }
    }
}

impl FrequencyField {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            FrequencyField::Window { start, end } if start >= end => Err(format!(
                "STATUS frequency window {}..{} is empty",
                start, end
            )),
            _ => Ok(()),
        }
    }
}

/// Operating frequency reported by a `STATUS` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    /// Digits as sent, last digit is hundreds of Hz.
    pub digits: String,
}

impl StatusFrame {
    /// Frequency truncated to whole kHz. Decoded frames always fit.
    pub fn khz(&self) -> u32 {
        self.digits[..self.digits.len() - 1].parse().unwrap_or(0)
    }

    /// Frequency as `kHz.h`, ready for `SKIMMER/QSY`.
    pub fn khz_text(&self) -> String {
        let (khz, tenth) = self.digits.split_at(self.digits.len() - 1);
        format!("{}.{}", khz, tenth)
    }
}

/// A `REMOTE ... "QSY/<band>"` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQsy {
    pub station: String,
    pub subsystem: String,
    pub band_label: String,
    pub flag: u8,
}

/// A raw command a station asked to be sent to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPacket {
    pub station: String,
    pub command: String,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Status(StatusFrame),
    SendPkt(SendPacket),
    Remote(RemoteQsy),
}

/// Text of a datagram, checksum removed and invalid UTF-8 dropped.
pub fn frame_text(datagram: &[u8]) -> String {
    String::from_utf8_lossy(strip_trailer(datagram))
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect()
}

fn space1(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_whitespace()).parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c| c == '"'), char('"')).parse(input)
}

/// Parse `KEYWORD: "station" "subsystem"`.
fn parse_header<'a>(kind: FrameKind, input: &'a str) -> IResult<&'a str, (&'a str, &'a str)> {
    let (input, _) = tag(kind.keyword()).parse(input.trim_start())?;
    let (input, _) = space1(input)?;
    let (input, station) = quoted(input)?;
    let (input, _) = space1(input)?;
    let (input, subsystem) = quoted(input)?;
    Ok((input, (station, subsystem)))
}

/// Accept a field of hundreds of Hz whose kHz part fits a `u32`.
fn check_digits(field: &str) -> Result<String, DecodeError> {
    let field = field.trim();
    if field.len() < 2
        || !field.bytes().all(|b| b.is_ascii_digit())
        || field[..field.len() - 1].parse::<u32>().is_err()
    {
        return Err(DecodeError::NotNumeric(field.to_string()));
    }
    Ok(field.to_string())
}

/// Decode the operating frequency of a `STATUS` frame.
pub fn decode_status(datagram: &[u8], field: &FrequencyField) -> Result<StatusFrame, DecodeError> {
    let payload = strip_trailer(datagram);
    let digits = match *field {
        FrequencyField::Window { start, end } => {
            let slice = payload
                .get(start..end)
                .ok_or(DecodeError::WindowOutOfRange {
                    start,
                    end,
                    len: payload.len(),
                })?;
            check_digits(&String::from_utf8_lossy(slice))?
        }
        FrequencyField::Token { index } => {
            let text = frame_text(datagram);
            let (rest, _) =
                parse_header(FrameKind::Status, &text).map_err(|_| DecodeError::Malformed {
                    kind: FrameKind::Status,
                    text: text.clone(),
                })?;
            let token = rest
                .split_whitespace()
                .nth(index)
                .ok_or(DecodeError::MissingField(index))?;
            check_digits(token)?
        }
    };
    Ok(StatusFrame { digits })
}

fn parse_remote(input: &str) -> IResult<&str, RemoteQsy> {
    let (input, (station, subsystem)) = parse_header(FrameKind::Remote, input)?;
    let (input, _) = space1(input)?;
    let (input, band) = delimited(
        tag("\"QSY/"),
        take_while_m_n(1, 3, |c: char| c.is_ascii_digit()),
        char('"'),
    )
    .parse(input)?;
    let (input, _) = space1(input)?;
    let (input, flag) = satisfy(|c| c.is_ascii_digit()).parse(input)?;
    Ok((
        input,
        RemoteQsy {
            station: station.to_string(),
            subsystem: subsystem.to_string(),
            band_label: band.to_string(),
            flag: flag as u8 - b'0',
        },
    ))
}

/// Decode a `REMOTE: "STN" "SUBSYSTEM" "QSY/<band>" <flag>` frame.
pub fn decode_remote(text: &str) -> Result<RemoteQsy, DecodeError> {
    parse_remote(text)
        .map(|(_, remote)| remote)
        .map_err(|_| DecodeError::Malformed {
            kind: FrameKind::Remote,
            text: text.trim_end().to_string(),
        })
}

fn parse_sendpkt(input: &str) -> IResult<&str, SendPacket> {
    let (input, (station, _)) = parse_header(FrameKind::SendPkt, input)?;
    let (input, _) = space1(input)?;
    let (input, _) = char('"').parse(input)?;
    let (input, command) = take_till(|c| c == '\r' || c == '"').parse(input)?;
    Ok((
        input,
        SendPacket {
            station: station.to_string(),
            command: command.to_string(),
        },
    ))
}

/// Decode a `SENDPKT: "STN" "" "<command>\r"` frame.
pub fn decode_sendpkt(text: &str) -> Result<SendPacket, DecodeError> {
    parse_sendpkt(text)
        .map(|(_, packet)| packet)
        .map_err(|_| DecodeError::Malformed {
            kind: FrameKind::SendPkt,
            text: text.trim_end().to_string(),
        })
}

/// Decode any supported inbound datagram.
pub fn decode(datagram: &[u8], field: &FrequencyField) -> Result<InboundFrame, DecodeError> {
    let text = frame_text(datagram);
    match FrameKind::of(&text) {
        Some(FrameKind::Status) => decode_status(datagram, field).map(InboundFrame::Status),
        Some(FrameKind::SendPkt) => decode_sendpkt(&text).map(InboundFrame::SendPkt),
        Some(FrameKind::Remote) => decode_remote(&text).map(InboundFrame::Remote),
        None => Err(DecodeError::Unsupported(
            text.split_whitespace().next().unwrap_or_default().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &[u8] =
        b"STATUS: \"STN1\" \"\" 0 5 1 0 140751 \"0\" 0 \"1\"  143400 \"TK5EP\"\xd6\x00";

    #[test]
    fn test_frame_kind() {
        assert_eq!(FrameKind::of("STATUS: \"STN1\""), Some(FrameKind::Status));
        assert_eq!(FrameKind::of("SENDPKT: \"STN1\""), Some(FrameKind::SendPkt));
        assert_eq!(FrameKind::of("REMOTE: \"STN1\""), Some(FrameKind::Remote));
        assert_eq!(FrameKind::of("RCVDPKT: \"TELNET\""), None);
    }

    #[test]
    fn test_decode_status_window() {
        let status = decode_status(STATUS, &FrequencyField::default()).unwrap();
        assert_eq!(status.digits, "140751");
        assert_eq!(status.khz(), 14075);
        assert_eq!(status.khz_text(), "14075.1");
    }

    #[test]
    fn test_decode_status_token() {
        let status = decode_status(STATUS, &FrequencyField::Token { index: 4 }).unwrap();
        assert_eq!(status.digits, "140751");

        // the token form does not depend on the station name length
        let long_name = b"STATUS: \"STATION2\" \"\" 0 5 1 0 70250 \"0\" 0 \"1\"  70250 \"TK5EP\"\x80";
        let status = decode_status(long_name, &FrequencyField::Token { index: 4 }).unwrap();
        assert_eq!(status.khz_text(), "7025.0");
    }

    #[test]
    fn test_decode_status_bad_window() {
        let short = b"STATUS: \"STN1\" \"\" 0";
        assert!(matches!(
            decode_status(short, &FrequencyField::default()),
            Err(DecodeError::WindowOutOfRange { .. })
        ));

        let shifted = b"STATUS: \"STATION2\" \"\" 0 5 1 0 140751 \"0\"";
        assert!(matches!(
            decode_status(shifted, &FrequencyField::default()),
            Err(DecodeError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_decode_status_rejects_oversized_field() {
        let frame = b"STATUS: \"STN1\" \"\" 0 5 1 0 99999999999 \"0\"";
        assert_eq!(
            decode_status(frame, &FrequencyField::Token { index: 4 }),
            Err(DecodeError::NotNumeric("99999999999".to_string()))
        );

        // largest kHz value that still fits
        let frame = b"STATUS: \"STN1\" \"\" 0 5 1 0 42949672950 \"0\"";
        let status = decode_status(frame, &FrequencyField::Token { index: 4 }).unwrap();
        assert_eq!(status.khz(), u32::MAX);
    }

    #[test]
    fn test_decode_status_missing_token() {
        let frame = b"STATUS: \"STN1\" \"\" 0 5";
        assert_eq!(
            decode_status(frame, &FrequencyField::Token { index: 4 }),
            Err(DecodeError::MissingField(4))
        );
    }

    #[test]
    fn test_decode_sendpkt() {
        let packet = decode_sendpkt("SENDPKT: \"STN1\" \"\" \"SH/DX\r\"").unwrap();
        assert_eq!(packet.station, "STN1");
        assert_eq!(packet.command, "SH/DX");

        let packet = decode_sendpkt("SENDPKT: \"STN1\" \"\" \"SH/DX 20\r\"").unwrap();
        assert_eq!(packet.command, "SH/DX 20");
    }

    #[test]
    fn test_decode_remote() {
        let remote = decode_remote("REMOTE: \"STN1\" \"SNIFFER\" \"QSY/80\" 2").unwrap();
        assert_eq!(remote.station, "STN1");
        assert_eq!(remote.subsystem, "SNIFFER");
        assert_eq!(remote.band_label, "80");
        assert_eq!(remote.flag, 2);

        assert!(decode_remote("REMOTE: \"STN1\" \"SNIFFER\" \"QSY/1600\" 2").is_err());
        assert!(decode_remote("REMOTE: \"STN1\" \"SNIFFER\" \"QSY/80\"").is_err());
    }

    #[test]
    fn test_decode_dispatch() {
        assert!(matches!(
            decode(STATUS, &FrequencyField::default()),
            Ok(InboundFrame::Status(_))
        ));
        assert!(matches!(
            decode(b"SENDPKT: \"STN1\" \"\" \"SH/DX\r\"\x98\x00", &FrequencyField::default()),
            Ok(InboundFrame::SendPkt(_))
        ));
        assert_eq!(
            decode(b"RCVDPKT: \"TELNET\" \"\" \"x\n\"\xc1", &FrequencyField::default()),
            Err(DecodeError::Unsupported("RCVDPKT:".to_string()))
        );
    }

    #[test]
    fn test_frame_text_drops_checksum() {
        assert!(frame_text(STATUS).ends_with("\"TK5EP\""));
    }
}

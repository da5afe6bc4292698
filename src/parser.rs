//! Parsers for cluster and skimmer session lines.
//!
//! Two spot grammars are recognized, tried in order:
//!
//! ```text
//! DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z
//!   144174.0 DF5DE        6-Feb-2023 0929Z FT8 +23 dB 1401 Hz           <DG1KDA>
//! ```
//!
//! The first is a live cluster announcement, the second a line of a `SH/DX`
//! answer. The comment field of both is free text, so the time token is
//! located from the right: it is the last `HHMMZ` token preceded by
//! whitespace, as a greedy regex would find it.
//!
//! Skimmer replies are also parsed here: `SETT:` band limits and the
//! frequency of a `To ALL de SKIMMER` broadcast.

use nom::{
    IResult, Parser,
    bytes::complete::{tag, tag_no_case, take_while_m_n, take_while1},
    character::complete::{char, satisfy},
    combinator::recognize,
    number::complete::double,
    sequence::{preceded, separated_pair, terminated},
};
use thiserror::Error;

use crate::spot::{Spot, SpotSource};

/// Errors that can occur during parsing.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Line does not match the {0} grammar")]
    NoMatch(&'static str),

    #[error("Missing time token")]
    MissingTime,

    #[error("Missing skimmer identifier")]
    MissingSkimmerId,

    #[error("Invalid skimmer limits: {0}")]
    InvalidLimits(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Marker the skimmer puts on lines sent when the operator clicks a signal.
pub const SKIMMER_BROADCAST: &str = "To ALL de SKIMMER";

/// Band limits reported by the skimmer in answer to `SKIMMER/SETT`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkimmerLimits {
    /// Skimmer profile label, e.g. `vlNormal`.
    pub label: String,
    /// Lowest decoded frequency in kHz.
    pub low_khz: f64,
    /// Highest decoded frequency in kHz.
    pub high_khz: f64,
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | '\x0b' | '\x0c')
}

/// Spotter callsigns may carry skimmer suffixes like `-#`.
fn is_spotter_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '|' | '/' | '#' | '-')
}

fn is_dx_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '|' | '/')
}

fn space1(input: &str) -> IResult<&str, &str> {
    take_while1(is_space).parse(input)
}

/// Parse a frequency token: 3 to 8 digits, a dot, one decimal.
fn parse_frequency(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(3, 8, |c: char| c.is_ascii_digit()),
        char('.'),
        satisfy(|c| c.is_ascii_digit()),
    ))
    .parse(input)
}

fn parse_dx_call(input: &str) -> IResult<&str, &str> {
    take_while1(is_dx_char).parse(input)
}

/// Parse `DX de CALL:` followed by frequency and DX callsign.
fn parse_announcement_head(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, spotter) = preceded(
        tag_no_case("DX de "),
        terminated(take_while1(is_spotter_char), char(':')),
    )
    .parse(input)?;
    let (input, _) = space1(input)?;
    let (input, frequency) = parse_frequency(input)?;
    let (input, _) = space1(input)?;
    let (input, dx_call) = parse_dx_call(input)?;
    Ok((input, (spotter, frequency, dx_call)))
}

/// Parse the indented frequency and DX callsign of a `SH/DX` answer line.
fn parse_show_dx_head(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = space1(input)?;
    let (input, frequency) = parse_frequency(input)?;
    let (input, _) = space1(input)?;
    let (input, dx_call) = parse_dx_call(input)?;
    Ok((input, (frequency, dx_call)))
}

fn is_time_at(bytes: &[u8], i: usize) -> bool {
    bytes.len() >= i + 5
        && bytes[i..i + 4].iter().all(u8::is_ascii_digit)
        && bytes[i + 4].eq_ignore_ascii_case(&b'Z')
}

fn is_space_byte(b: u8) -> bool {
    is_space(char::from(b))
}

/// Find the last `HHMMZ` token in `rest` that is preceded by whitespace and
/// leaves at least one other whitespace character in front of it.
///
/// `rest` starts right after the DX callsign. Returns the token start.
fn find_time_token(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    if !rest.starts_with(is_space) {
        return None;
    }
    (2..=bytes.len().saturating_sub(5))
        .rev()
        .find(|&i| is_space_byte(bytes[i - 1]) && is_time_at(bytes, i))
}

/// Parse a live cluster announcement.
///
/// # Example
///
/// ```
/// use wintest_bridge::parser::parse_announcement;
///
/// let line = "DX de EA5WU-#:    7018.3  RW1M           CW    19 dB  18 WPM  CQ      2259Z";
/// let spot = parse_announcement(line).unwrap();
/// assert_eq!(spot.spotter, "EA5WU-#");
/// assert_eq!(spot.frequency, "7018.3");
/// assert_eq!(spot.dx_call, "RW1M");
/// assert_eq!(spot.time, "2259Z");
/// ```
pub fn parse_announcement(line: &str) -> ParseResult<Spot> {
    let (rest, (spotter, frequency, dx_call)) =
        parse_announcement_head(line).map_err(|_| ParseError::NoMatch("announcement"))?;

    let t = find_time_token(rest).ok_or(ParseError::MissingTime)?;

    Ok(Spot {
        source: SpotSource::Announcement,
        frequency: frequency.to_string(),
        dx_call: dx_call.to_string(),
        spotter: spotter.to_string(),
        comment: rest[..t].trim().to_string(),
        time: rest[t..t + 5].to_string(),
        raw: line.to_string(),
    })
}

/// Parse one line of a `SH/DX` answer.
///
/// The line must be indented and end with the spotting skimmer in angle
/// brackets; the comment is the text between the time token and the
/// skimmer identifier.
///
/// ```
/// use wintest_bridge::parser::parse_show_dx;
///
/// let line = "  7018.3 RW1M        6-Feb-2023 0929Z CW 19 dB 18 WPM CQ      <EA5WU-#>";
/// let spot = parse_show_dx(line).unwrap();
/// assert_eq!(spot.spotter, "EA5WU-#");
/// assert_eq!(spot.comment, "CW 19 dB 18 WPM CQ");
/// ```
pub fn parse_show_dx(line: &str) -> ParseResult<Spot> {
    let (rest, (frequency, dx_call)) =
        parse_show_dx_head(line).map_err(|_| ParseError::NoMatch("sh/dx"))?;
    if !rest.starts_with(is_space) {
        return Err(ParseError::NoMatch("sh/dx"));
    }

    let bytes = rest.as_bytes();
    let open = (0..bytes.len())
        .rev()
        .find(|&p| {
            bytes[p] == b'<'
                && p > 0
                && is_space_byte(bytes[p - 1])
                && bytes[p + 1..].contains(&b'>')
        })
        .ok_or(ParseError::MissingSkimmerId)?;
    let close = open
        + rest[open..]
            .rfind('>')
            .ok_or(ParseError::MissingSkimmerId)?;

    // time token, then whitespace, then (possibly empty) comment, then whitespace
    let t = (2..open.saturating_sub(6))
        .rev()
        .find(|&i| {
            is_space_byte(bytes[i - 1]) && is_time_at(bytes, i) && is_space_byte(bytes[i + 5])
        })
        .ok_or(ParseError::MissingTime)?;

    Ok(Spot {
        source: SpotSource::ShowDx,
        frequency: frequency.to_string(),
        dx_call: dx_call.to_string(),
        spotter: rest[open + 1..close].to_string(),
        comment: rest[t + 5..open].trim().to_string(),
        time: rest[t..t + 5].to_string(),
        raw: line.to_string(),
    })
}

/// Try both spot grammars in order.
pub fn parse_spot(line: &str) -> Option<Spot> {
    parse_announcement(line)
        .or_else(|_| parse_show_dx(line))
        .ok()
}

/// Shortest line either grammar can match (`" 123.4 K  1200Z  <>"`).
const MIN_SPOT_LEN: usize = 19;

/// Check if a line could be a spot (quick pre-filter).
///
/// Never rejects a line that [`parse_spot`] would accept.
#[inline]
pub fn looks_like_spot(line: &str) -> bool {
    line.len() >= MIN_SPOT_LEN
        && (line
            .get(..6)
            .is_some_and(|p| p.eq_ignore_ascii_case("DX de "))
            || (line.starts_with(is_space) && line.contains('<')))
}

/// Whether the line is a skimmer click broadcast.
#[inline]
pub fn is_skimmer_broadcast(line: &str) -> bool {
    line.contains(SKIMMER_BROADCAST)
}

fn parse_click_frequency(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while_m_n(4, 5, |c: char| c.is_ascii_digit()),
        char('.'),
        take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
    ))
    .parse(input)
}

/// Find the first `NNNN.NN` / `NNNNN.NN` frequency anywhere in the line.
///
/// ```
/// use wintest_bridge::parser::find_click_frequency;
///
/// let line = "To ALL de SKIMMER <7024.06> : QSY to 7024.06";
/// assert_eq!(find_click_frequency(line), Some("7024.06"));
/// ```
pub fn find_click_frequency(line: &str) -> Option<&str> {
    line.char_indices()
        .filter(|(_, c)| c.is_ascii_digit())
        .find_map(|(i, _)| parse_click_frequency(&line[i..]).ok().map(|(_, f)| f))
}

fn parse_sett_body(input: &str) -> IResult<&str, (&str, (f64, f64))> {
    let (input, _) = tag("SETT:").parse(input)?;
    let (input, _) = space1(input)?;
    let (input, label) = take_while1(|c: char| !is_space(c)).parse(input)?;
    let (input, _) = space1(input)?;
    let (input, range) = separated_pair(double, char('-'), double).parse(input)?;
    Ok((input, (label, range)))
}

/// Parse a skimmer `SETT:` reply such as `SETT: vlNormal 7072.5-7120.3`.
pub fn parse_skimmer_limits(line: &str) -> ParseResult<SkimmerLimits> {
    let start = line
        .find("SETT:")
        .ok_or(ParseError::NoMatch("SETT reply"))?;
    let (_, (label, (low_khz, high_khz))) = parse_sett_body(&line[start..])
        .map_err(|_| ParseError::InvalidLimits(line.trim().to_string()))?;

    if low_khz > high_khz {
        return Err(ParseError::InvalidLimits(line.trim().to_string()));
    }

    Ok(SkimmerLimits {
        label: label.to_string(),
        low_khz,
        high_khz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DIGI_SPOT: &str =
        "DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z";

    #[test]
    fn test_parse_announcement_digi() {
        let spot = parse_announcement(DIGI_SPOT).expect("Should parse successfully");

        assert_eq!(spot.source, SpotSource::Announcement);
        assert_eq!(spot.spotter, "DG1KDA");
        assert_eq!(spot.frequency, "144174.0");
        assert_eq!(spot.dx_call, "DO5HMK");
        assert_eq!(spot.comment, "FT8 +3 dB 1435 Hz");
        assert_eq!(spot.time, "0930Z");
        assert_eq!(spot.raw, DIGI_SPOT);
    }

    #[test]
    fn test_parse_announcement_rbn_style() {
        let line = "DX de KM3T-2-#:  14100.0  CS3B           CW    24 dB  22 WPM  NCDXF B 2259Z";
        let spot = parse_announcement(line).expect("Should parse successfully");

        assert_eq!(spot.spotter, "KM3T-2-#");
        assert_eq!(spot.frequency, "14100.0");
        assert_eq!(spot.dx_call, "CS3B");
        assert_eq!(spot.comment, "CW    24 dB  22 WPM  NCDXF B");
    }

    #[test]
    fn test_parse_announcement_trailing_text_after_time() {
        // a bell and locator after the time still match; the last time token wins
        let line = "DX de F5XYZ:     7005.0  UA9ABC       599 1200Z      2210Z JN18\x07";
        let spot = parse_announcement(line).expect("Should parse successfully");
        assert_eq!(spot.time, "2210Z");
        assert_eq!(spot.comment, "599 1200Z");
    }

    #[test]
    fn test_parse_announcement_case_insensitive() {
        let line = "dx DE ea5wu-#:    7018.3  rw1m           cw    19 db  18 wpm  cq      2259z";
        let spot = parse_announcement(line).expect("Should parse case-insensitively");
        assert_eq!(spot.dx_call, "rw1m");
        assert_eq!(spot.time, "2259z");
    }

    #[test]
    fn test_parse_announcement_rejects() {
        // frequency with two decimals
        assert!(parse_announcement("DX de K1ABC:  7018.35  W1AW   CQ   1200Z").is_err());
        // callsign with a dash is not a DX call
        assert!(parse_announcement("DX de K1ABC:  7018.3  W1AW-1   CQ   1200Z").is_err());
        // no time
        assert_eq!(
            parse_announcement("DX de K1ABC:  7018.3  W1AW   CQ CQ"),
            Err(ParseError::MissingTime)
        );
        // only one space between call and time
        assert_eq!(
            parse_announcement("DX de K1ABC:  7018.3  W1AW 1200Z"),
            Err(ParseError::MissingTime)
        );
        assert!(parse_announcement("Hello world").is_err());
    }

    #[test]
    fn test_parse_show_dx() {
        let line = "  144174.0 DF5DE        6-Feb-2023 0929Z FT8 +23 dB 1401 Hz           <DG1KDA>";
        let spot = parse_show_dx(line).expect("Should parse successfully");

        assert_eq!(spot.source, SpotSource::ShowDx);
        assert_eq!(spot.frequency, "144174.0");
        assert_eq!(spot.dx_call, "DF5DE");
        assert_eq!(spot.time, "0929Z");
        assert_eq!(spot.comment, "FT8 +23 dB 1401 Hz");
        assert_eq!(spot.spotter, "DG1KDA");
    }

    #[test]
    fn test_parse_show_dx_requires_indent_and_id() {
        let unindented = "144174.0 DF5DE        6-Feb-2023 0929Z FT8 +23 dB 1401 Hz           <DG1KDA>";
        assert!(parse_show_dx(unindented).is_err());

        let no_id = "  144174.0 DF5DE        6-Feb-2023 0929Z FT8 +23 dB 1401 Hz";
        assert_eq!(parse_show_dx(no_id), Err(ParseError::MissingSkimmerId));
    }

    #[test]
    fn test_parse_spot_tries_both() {
        assert_eq!(
            parse_spot(DIGI_SPOT).map(|s| s.source),
            Some(SpotSource::Announcement)
        );
        let shdx = "   7018.3 RW1M        6-Feb-2023 2259Z CW 19 dB          <EA5WU-#>";
        assert_eq!(parse_spot(shdx).map(|s| s.source), Some(SpotSource::ShowDx));
        assert!(parse_spot("N0CALL de SKIMMER >").is_none());
    }

    #[test]
    fn test_looks_like_spot() {
        assert!(looks_like_spot(DIGI_SPOT));
        assert!(looks_like_spot(
            "  144174.0 DF5DE        6-Feb-2023 0929Z FT8 +23 dB 1401 Hz           <DG1KDA>"
        ));
        assert!(!looks_like_spot("Hello world"));
        assert!(!looks_like_spot(""));
        assert!(!looks_like_spot("DX de "));
        // text after the skimmer identifier still matches
        let trailing = "   7018.3 RW1M        6-Feb-2023 2259Z CW 19 dB   <EA5WU-#>\x07";
        assert!(parse_show_dx(trailing).is_ok());
        assert!(looks_like_spot(trailing));
        assert!(looks_like_spot(" 123.4 K  1200Z  <>"));
        assert!(parse_show_dx(" 123.4 K  1200Z  <>").is_ok());
    }

    #[test]
    fn test_find_click_frequency() {
        assert_eq!(
            find_click_frequency("To ALL de SKIMMER <14025.12>: click"),
            Some("14025.12")
        );
        assert_eq!(find_click_frequency("123456.78"), Some("23456.78"));
        assert_eq!(find_click_frequency("To ALL de SKIMMER: 7024.1"), None);
        assert!(is_skimmer_broadcast("To ALL de SKIMMER <7024.06>"));
    }

    #[test]
    fn test_parse_skimmer_limits() {
        let limits = parse_skimmer_limits("SETT: vlNormal 7072.5-7120.3").unwrap();
        assert_eq!(limits.label, "vlNormal");
        assert!((limits.low_khz - 7072.5).abs() < 1e-9);
        assert!((limits.high_khz - 7120.3).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skimmer_limits_errors() {
        assert_eq!(
            parse_skimmer_limits("N0CALL de SKIMMER >"),
            Err(ParseError::NoMatch("SETT reply"))
        );
        // echo of our own command
        assert!(parse_skimmer_limits("SKIMMER/SETT").is_err());
        assert!(parse_skimmer_limits("SETT: vlNormal 7120.3-7072.5").is_err());
        assert!(parse_skimmer_limits("SETT: vlNormal").is_err());
    }

    // comments avoid 'Z' so the only time token is the one placed on purpose
    proptest! {
        #[test]
        fn prop_announcement_fields(
            spotter in "[A-Z0-9]{1,6}(-#)?",
            frequency in "[0-9]{3,6}\\.[0-9]",
            dx_call in "[A-Z0-9/]{1,8}",
            comment in "[A-Y0-9 +]{0,24}",
            time in "([01][0-9]|2[0-3])[0-5][0-9]Z",
        ) {
            let line = format!("DX de {}: {} {} {} {}", spotter, frequency, dx_call, comment, time);
            prop_assert!(looks_like_spot(&line));
            let spot = parse_announcement(&line).unwrap();
            prop_assert_eq!(spot.spotter, spotter);
            prop_assert_eq!(spot.frequency, frequency);
            prop_assert_eq!(spot.dx_call, dx_call);
            prop_assert_eq!(spot.time, time);
            prop_assert_eq!(spot.comment, comment.trim());
        }

        #[test]
        fn prop_show_dx_fields(
            indent in " {1,4}",
            frequency in "[0-9]{3,6}\\.[0-9]",
            dx_call in "[A-Z0-9/]{1,8}",
            time in "([01][0-9]|2[0-3])[0-5][0-9]Z",
            comment in "[A-Y0-9 +]{0,24}",
            skimmer in "[A-Z0-9]{1,6}(-#)?",
        ) {
            let line = format!(
                "{}{} {}  6-Feb-2023 {} {}  <{}>",
                indent, frequency, dx_call, time, comment, skimmer
            );
            prop_assert!(looks_like_spot(&line));
            let spot = parse_show_dx(&line).unwrap();
            prop_assert_eq!(spot.frequency, frequency);
            prop_assert_eq!(spot.dx_call, dx_call);
            prop_assert_eq!(spot.time, time);
            prop_assert_eq!(spot.spotter, skimmer);
            prop_assert_eq!(spot.comment, comment.trim());
        }
    }
}

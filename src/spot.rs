//! Data structures representing relayed spots.
//!
//! A spot is never stored: it is matched out of a session line, filtered, and
//! framed for WinTest in one pass.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which grammar a spot was recognized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotSource {
    /// Live cluster announcement: `DX de CALL: FREQ DX ... HHMMZ`.
    Announcement,
    /// Tabular `SH/DX` answer ending with a bracketed skimmer identifier.
    ShowDx,
}

impl fmt::Display for SpotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpotSource::Announcement => write!(f, "announcement"),
            SpotSource::ShowDx => write!(f, "sh/dx"),
        }
    }
}

/// A spot recognized in a cluster or skimmer session line.
///
/// Text fields hold the literal tokens from the line so the relayed frame is
/// byte-identical to what the cluster sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Grammar the line matched.
    pub source: SpotSource,

    /// Frequency token as sent, in kHz with one decimal (e.g. `"7018.3"`).
    pub frequency: String,

    /// Callsign of the spotted station.
    pub dx_call: String,

    /// Spotter callsign, or the skimmer identifier without its angle brackets.
    pub spotter: String,

    /// Free text between the callsign and the time token.
    pub comment: String,

    /// Time-of-day token, `HHMMZ`.
    pub time: String,

    /// The full line the spot came from.
    pub raw: String,
}

impl Spot {
    /// Time of day parsed from the `HHMMZ` token.
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        let digits = self.time.get(0..4)?;
        let hour: u32 = digits.get(0..2)?.parse().ok()?;
        let min: u32 = digits.get(2..4)?.parse().ok()?;
        NaiveTime::from_hms_opt(hour, min, 0)
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} de {} {} ({})",
            self.frequency, self.dx_call, self.spotter, self.time, self.comment
        )
    }
}

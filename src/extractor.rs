//! Turns session lines into WinTest spot frames.

use serde::Deserialize;
use tracing::debug;

use crate::frame::{TELNET_TAG, build_frame};
use crate::parser::{looks_like_spot, parse_spot};
use crate::spot::Spot;

/// ASCII bell some clusters append to spots.
const BELL: char = '\x07';

/// How the digital-mode filter combines its switch with the mode check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigiPolicy {
    /// Suppress FT8 and FT4 spots only when the filter is enabled.
    #[default]
    Gated,
    /// `enabled && FT8 || FT4`: FT8 spots follow the switch, FT4 spots are
    /// always dropped. Kept for installations relying on that behaviour.
    Legacy,
}

/// Content filters applied to matched spots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpotFilters {
    pub remove_digi: bool,
    pub remove_bell: bool,
    pub digi_policy: DigiPolicy,
}

impl SpotFilters {
    /// Whether a spot with this comment is dropped by the digi filter.
    pub fn suppresses(&self, comment: &str) -> bool {
        let upper = comment.to_ascii_uppercase();
        let ft8 = upper.contains("FT8");
        let ft4 = upper.contains("FT4");
        match self.digi_policy {
            DigiPolicy::Gated => self.remove_digi && (ft8 || ft4),
            DigiPolicy::Legacy => (self.remove_digi && ft8) || ft4,
        }
    }
}

/// Result of looking at one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Not a spot.
    NoMatch,
    /// A spot, dropped by the digi filter.
    Suppressed(Spot),
    /// A spot and the frame to broadcast for it.
    Relay { spot: Spot, frame: Vec<u8> },
}

/// Matches spot lines and frames them for WinTest.
#[derive(Debug, Clone)]
pub struct SpotExtractor {
    filters: SpotFilters,
    station_tag: String,
    station_label: String,
}

impl SpotExtractor {
    pub fn new(filters: SpotFilters) -> Self {
        Self {
            filters,
            station_tag: TELNET_TAG.to_string(),
            station_label: String::new(),
        }
    }

    pub fn filters(&self) -> &SpotFilters {
        &self.filters
    }

    /// Match, filter and frame one line.
    pub fn extract(&self, line: &str) -> Extraction {
        if !looks_like_spot(line) {
            return Extraction::NoMatch;
        }
        let Some(spot) = parse_spot(line) else {
            return Extraction::NoMatch;
        };

        if self.filters.suppresses(&spot.comment) {
            debug!("Suppressed digital spot: {}", spot);
            return Extraction::Suppressed(spot);
        }

        let frame = if self.filters.remove_bell {
            let clean: String = line.chars().filter(|&c| c != BELL).collect();
            build_frame(&self.station_tag, &self.station_label, &clean)
        } else {
            build_frame(&self.station_tag, &self.station_label, line)
        };

        Extraction::Relay { spot, frame }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{frame_text, verify_frame};

    const DIGI_SPOT: &str =
        "DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z";

    fn extractor(remove_digi: bool, remove_bell: bool, digi_policy: DigiPolicy) -> SpotExtractor {
        SpotExtractor::new(SpotFilters {
            remove_digi,
            remove_bell,
            digi_policy,
        })
    }

    #[test]
    fn test_digi_spot_suppressed_when_enabled() {
        let result = extractor(true, false, DigiPolicy::Gated).extract(DIGI_SPOT);
        assert!(matches!(result, Extraction::Suppressed(_)));
    }

    #[test]
    fn test_digi_spot_relayed_when_disabled() {
        let Extraction::Relay { spot, frame } =
            extractor(false, false, DigiPolicy::Gated).extract(DIGI_SPOT)
        else {
            panic!("expected a relayed spot");
        };

        assert_eq!(spot.dx_call, "DO5HMK");
        let text = "RCVDPKT: \"TELNET\" \"\" \"DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z\n\"";
        assert_eq!(&frame[..frame.len() - 1], text.as_bytes());
        assert!(verify_frame(&frame));
    }

    #[test]
    fn test_legacy_policy_always_drops_ft4() {
        let ft4 = "DX de DG1KDA:    7047.5  DO5HMK       FT4 -8 dB 1200 Hz              0930Z";
        assert!(matches!(
            extractor(false, false, DigiPolicy::Legacy).extract(ft4),
            Extraction::Suppressed(_)
        ));
        assert!(matches!(
            extractor(false, false, DigiPolicy::Gated).extract(ft4),
            Extraction::Relay { .. }
        ));
        // FT8 still follows the switch
        assert!(matches!(
            extractor(false, false, DigiPolicy::Legacy).extract(DIGI_SPOT),
            Extraction::Relay { .. }
        ));
    }

    #[test]
    fn test_bell_removed_before_framing() {
        let line = "DX de F5XYZ:     7005.0  UA9ABC       599 TNX QSO      2210Z\x07\x07";
        let Extraction::Relay { frame, .. } = extractor(false, true, DigiPolicy::Gated).extract(line)
        else {
            panic!("expected a relayed spot");
        };
        let expected = frame_text(
            TELNET_TAG,
            "",
            "DX de F5XYZ:     7005.0  UA9ABC       599 TNX QSO      2210Z",
        );
        assert_eq!(&frame[..frame.len() - 1], expected.as_bytes());

        let Extraction::Relay { frame, .. } =
            extractor(false, false, DigiPolicy::Gated).extract(line)
        else {
            panic!("expected a relayed spot");
        };
        assert!(frame.contains(&0x07));
    }

    #[test]
    fn test_non_spot_line() {
        let result = extractor(true, true, DigiPolicy::Gated).extract("N0CALL de GB7DXC >");
        assert_eq!(result, Extraction::NoMatch);
    }

    #[test]
    fn test_show_dx_with_trailing_bell_relayed() {
        let line = "   7018.3 RW1M        6-Feb-2023 2259Z CW 19 dB   <EA5WU-#>\x07";
        let Extraction::Relay { spot, frame } =
            extractor(false, true, DigiPolicy::Gated).extract(line)
        else {
            panic!("expected a relayed spot");
        };
        assert_eq!(spot.spotter, "EA5WU-#");
        assert!(!frame.contains(&0x07));
    }

    #[test]
    fn test_suppresses_matrix() {
        let gated = SpotFilters {
            remove_digi: true,
            ..Default::default()
        };
        assert!(gated.suppresses("ft8"));
        assert!(gated.suppresses("FT4"));
        assert!(!gated.suppresses("CW 22 WPM"));
        assert!(!SpotFilters::default().suppresses("FT8"));
    }
}

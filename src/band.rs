//! Band table and skimmer band-follow state.
//!
//! The skimmer only needs to be retuned when the operator changes band, so
//! the logger's frequency is reduced to a band first and a QSY is sent only
//! when that band differs from the last one commanded.

use serde::Deserialize;
use std::fmt;

/// One amateur band: inclusive kHz range plus the frequency the skimmer is
/// tuned to when following onto it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Band {
    /// Band label as WinTest uses it in `QSY/<label>` (`"40"`, `"50"`, ...).
    pub label: String,
    /// Lowest frequency in kHz, inclusive.
    pub low_khz: u32,
    /// Highest frequency in kHz, inclusive.
    pub high_khz: u32,
    /// Skimmer tuning frequency in kHz.
    pub center_khz: f64,
}

impl Band {
    fn new(label: &str, low_khz: u32, high_khz: u32, center_khz: f64) -> Self {
        Self {
            label: label.to_string(),
            low_khz,
            high_khz,
            center_khz,
        }
    }

    /// Whether `khz` lies within this band, edges included.
    pub fn contains(&self, khz: u32) -> bool {
        (self.low_khz..=self.high_khz).contains(&khz)
    }

    /// Center frequency formatted for `SKIMMER/QSY`.
    pub fn center_text(&self) -> String {
        format_khz(self.center_khz)
    }
}

/// Format a kHz value with one decimal, as the skimmer expects.
pub fn format_khz(khz: f64) -> String {
    format!("{:.1}", khz)
}

/// Ordered set of bands from 160m to 6m.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    bands: Vec<Band>,
}

impl Default for BandTable {
    fn default() -> Self {
        Self {
            bands: vec![
                Band::new("160", 1810, 2000, 1820.0),
                Band::new("80", 3500, 4000, 3550.0),
                Band::new("60", 5350, 5370, 5360.0),
                Band::new("40", 7000, 7200, 7025.0),
                Band::new("30", 10100, 10150, 10125.0),
                Band::new("20", 14000, 14350, 14050.0),
                Band::new("17", 18000, 18200, 18150.0),
                Band::new("15", 21000, 21450, 21050.0),
                Band::new("12", 24890, 24990, 24940.0),
                Band::new("10", 28000, 29000, 28050.0),
                Band::new("50", 50000, 51000, 50100.0),
            ],
        }
    }
}

impl BandTable {
    /// Build a table from explicit bands, kept in the given order.
    pub fn new(bands: Vec<Band>) -> Self {
        Self { bands }
    }

    /// All bands in lookup order.
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// First band containing `khz`.
    pub fn by_frequency(&self, khz: u32) -> Option<&Band> {
        self.bands.iter().find(|b| b.contains(khz))
    }

    /// Band with the given WinTest label.
    pub fn by_label(&self, label: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.label == label)
    }

    /// Check that every range is well formed.
    pub fn validate(&self) -> Result<(), String> {
        for band in &self.bands {
            if band.low_khz > band.high_khz {
                return Err(format!(
                    "Band '{}' has low edge {} above high edge {}",
                    band.label, band.low_khz, band.high_khz
                ));
            }
            if band.label.is_empty() {
                return Err(format!("Band at {} kHz has an empty label", band.low_khz));
            }
        }
        Ok(())
    }
}

/// How the skimmer follows the logging program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowMode {
    /// Never retune the skimmer.
    #[default]
    Off,
    /// Follow the frequency reported in `STATUS` frames.
    Status,
    /// Follow explicit `REMOTE ... "QSY/<band>"` frames.
    Remote,
}

impl fmt::Display for FollowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowMode::Off => write!(f, "off"),
            FollowMode::Status => write!(f, "status"),
            FollowMode::Remote => write!(f, "remote"),
        }
    }
}

/// Last band the skimmer was commanded onto.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandFollowState {
    last_band: Option<String>,
}

impl BandFollowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label of the band last commanded, if any.
    pub fn last_band(&self) -> Option<&str> {
        self.last_band.as_deref()
    }

    /// Whether moving to `band` would be a change.
    pub fn is_change(&self, band: &Band) -> bool {
        self.last_band.as_deref() != Some(band.label.as_str())
    }

    /// Record `band` as the current one. Returns `false` if it already was.
    pub fn update(&mut self, band: &Band) -> bool {
        if !self.is_change(band) {
            return false;
        }
        self.last_band = Some(band.label.clone());
        true
    }

    /// Forget the last band so the next frame always retunes.
    pub fn reset(&mut self) {
        self.last_band = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_band_edges_inclusive() {
        let table = BandTable::default();
        assert_eq!(table.by_frequency(7000).map(|b| b.label.as_str()), Some("40"));
        assert_eq!(table.by_frequency(7200).map(|b| b.label.as_str()), Some("40"));
        assert_eq!(table.by_frequency(6999), None);
        assert_eq!(table.by_frequency(7201), None);
    }

    #[test]
    fn test_by_label() {
        let table = BandTable::default();
        assert_eq!(table.by_label("80").map(Band::center_text), Some("3550.0".to_string()));
        assert_eq!(table.by_label("50").map(Band::center_text), Some("50100.0".to_string()));
        assert!(table.by_label("2").is_none());
    }

    #[test]
    fn test_follow_state_suppresses_repeats() {
        let table = BandTable::default();
        let forty = table.by_frequency(7025).unwrap();
        let twenty = table.by_frequency(14025).unwrap();

        let mut state = BandFollowState::new();
        assert!(state.update(forty));
        assert!(!state.update(forty));
        assert!(state.update(twenty));
        assert_eq!(state.last_band(), Some("20"));

        state.reset();
        assert!(state.is_change(twenty));
    }

    #[test]
    fn test_validate() {
        assert!(BandTable::default().validate().is_ok());
        let bad = BandTable::new(vec![Band::new("40", 7200, 7000, 7025.0)]);
        assert!(bad.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_band_edges_classified(index in 0usize..11) {
            let table = BandTable::default();
            let band = &table.bands()[index];
            prop_assert_eq!(table.by_frequency(band.low_khz), Some(band));
            prop_assert_eq!(table.by_frequency(band.high_khz), Some(band));
        }
    }
}

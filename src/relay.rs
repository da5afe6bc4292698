//! Command relay between WinTest, the skimmer, the cluster and the radio.
//!
//! Inbound UDP frames drive skimmer band-following and cluster queries;
//! skimmer session lines carry band limits and click-to-tune broadcasts that
//! end up as CAT commands.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::band::{Band, BandFollowState, BandTable, FollowMode};
use crate::cat::{CatControl, vfo_b_command};
use crate::parser::{
    ParseError, SkimmerLimits, find_click_frequency, is_skimmer_broadcast, parse_skimmer_limits,
};
use crate::session::LineSink;
use crate::wintest::{
    DecodeError, FrameKind, FrequencyField, InboundFrame, RemoteQsy, SendPacket, StatusFrame,
    decode, frame_text,
};

/// Cluster command prefix a station may forward through `SENDPKT`.
pub const FORWARDED_PREFIX: &str = "SH/DX";

/// Frequency sent to the skimmer on a STATUS band change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QsyTarget {
    /// The station's operating frequency.
    #[default]
    Operating,
    /// The band table's representative frequency.
    BandCenter,
}

/// Static settings for the relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub follow_mode: FollowMode,
    pub qsy_target: QsyTarget,
    /// Subsystem name `REMOTE` frames must be addressed to.
    pub remote_subsystem: String,
    pub status_frequency: FrequencyField,
    pub radio_follow: bool,
    /// Pause between `SKIMMER/QSY` and `SKIMMER/SETT`.
    pub qsy_settle: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            follow_mode: FollowMode::Off,
            qsy_target: QsyTarget::Operating,
            remote_subsystem: "SNIFFER".to_string(),
            status_frequency: FrequencyField::default(),
            radio_follow: false,
            qsy_settle: Duration::from_millis(200),
        }
    }
}

/// What an inbound frame led to.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Skimmer retuned to `frequency` on `band`.
    Qsy { band: String, frequency: String },
    /// Still on the band last commanded.
    SameBand(String),
    /// STATUS frequency outside every band.
    OutOfBand(u32),
    /// REMOTE band label not in the band table.
    UnknownBand(String),
    /// Band changed but the skimmer is not logged in.
    SkimmerOffline,
    /// Command passed on to the cluster.
    Forwarded(String),
    /// Frame not acted on in the current configuration.
    Ignored(&'static str),
}

/// What a session line led to.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    None,
    Limits(SkimmerLimits),
    /// CAT command sent to the radio.
    Tuned(String),
}

/// Owns band-follow state and the radio.
pub struct CommandRelay {
    settings: RelaySettings,
    bands: BandTable,
    follow: BandFollowState,
    skimmer_limits: Option<SkimmerLimits>,
    cat: Option<Box<dyn CatControl>>,
}

impl CommandRelay {
    pub fn new(settings: RelaySettings, bands: BandTable) -> Self {
        Self {
            settings,
            bands,
            follow: BandFollowState::new(),
            skimmer_limits: None,
            cat: None,
        }
    }

    /// Attach an opened radio.
    pub fn with_cat(mut self, cat: Box<dyn CatControl>) -> Self {
        self.cat = Some(cat);
        self
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn follow_state(&self) -> &BandFollowState {
        &self.follow
    }

    /// Limits from the most recent `SETT:` reply.
    pub fn skimmer_limits(&self) -> Option<&SkimmerLimits> {
        self.skimmer_limits.as_ref()
    }

    /// Forget the last band so the next frame retunes the skimmer. Called
    /// whenever the skimmer logs in, since a restarted skimmer comes up on
    /// its own default band.
    pub fn reset_follow(&mut self) {
        if let Some(band) = self.follow.last_band() {
            debug!("Forgetting skimmer band {}", band);
        }
        self.follow.reset();
    }

    /// Frame types the follow mode makes irrelevant. These are dropped
    /// before their fields are decoded.
    fn ignored(&self, kind: FrameKind) -> Option<&'static str> {
        match kind {
            FrameKind::Status if self.settings.follow_mode != FollowMode::Status => {
                Some("STATUS follow disabled")
            }
            FrameKind::Remote if self.settings.follow_mode != FollowMode::Remote => {
                Some("REMOTE follow disabled")
            }
            _ => None,
        }
    }

    /// Decode one datagram and act on it.
    pub async fn handle_frame<S, C>(
        &mut self,
        datagram: &[u8],
        skimmer: &mut S,
        cluster: &mut C,
    ) -> Result<FrameOutcome, DecodeError>
    where
        S: LineSink,
        C: LineSink,
    {
        if let Some(reason) = FrameKind::of(&frame_text(datagram)).and_then(|k| self.ignored(k)) {
            return Ok(FrameOutcome::Ignored(reason));
        }

        match decode(datagram, &self.settings.status_frequency)? {
            InboundFrame::Status(status) => self.on_status(status, skimmer).await,
            InboundFrame::Remote(remote) => self.on_remote(remote, skimmer).await,
            InboundFrame::SendPkt(packet) => Ok(Self::on_sendpkt(packet, cluster).await),
        }
    }

    async fn on_status<S: LineSink>(
        &mut self,
        status: StatusFrame,
        skimmer: &mut S,
    ) -> Result<FrameOutcome, DecodeError> {
        let khz = status.khz();
        let Some(band) = self.bands.by_frequency(khz).cloned() else {
            debug!("STATUS frequency {} kHz is outside all bands", khz);
            return Ok(FrameOutcome::OutOfBand(khz));
        };

        let frequency = match self.settings.qsy_target {
            QsyTarget::Operating => status.khz_text(),
            QsyTarget::BandCenter => band.center_text(),
        };
        Ok(self.retune(&band, frequency, skimmer).await)
    }

    async fn on_remote<S: LineSink>(
        &mut self,
        remote: RemoteQsy,
        skimmer: &mut S,
    ) -> Result<FrameOutcome, DecodeError> {
        if remote.subsystem != self.settings.remote_subsystem {
            debug!(
                "REMOTE from {} for {}, not {}",
                remote.station, remote.subsystem, self.settings.remote_subsystem
            );
            return Ok(FrameOutcome::Ignored("REMOTE for another subsystem"));
        }

        let Some(band) = self.bands.by_label(&remote.band_label).cloned() else {
            warn!("REMOTE QSY to unknown band {}", remote.band_label);
            return Ok(FrameOutcome::UnknownBand(remote.band_label));
        };

        let frequency = band.center_text();
        Ok(self.retune(&band, frequency, skimmer).await)
    }

    async fn on_sendpkt<C: LineSink>(packet: SendPacket, cluster: &mut C) -> FrameOutcome {
        if !packet.command.starts_with(FORWARDED_PREFIX) {
            debug!("Not forwarding '{}' from {}", packet.command, packet.station);
            return FrameOutcome::Ignored("SENDPKT command not forwarded");
        }

        info!("Forwarding '{}' from {} to cluster", packet.command, packet.station);
        cluster.send_line(&packet.command).await;
        FrameOutcome::Forwarded(packet.command)
    }

    /// Send the QSY/SETT pair if `band` is new and record it.
    async fn retune<S: LineSink>(
        &mut self,
        band: &Band,
        frequency: String,
        skimmer: &mut S,
    ) -> FrameOutcome {
        if !self.follow.is_change(band) {
            return FrameOutcome::SameBand(band.label.clone());
        }
        if !skimmer.is_ready() {
            debug!("Band {} but skimmer is not logged in", band.label);
            return FrameOutcome::SkimmerOffline;
        }

        info!("Skimmer QSY to {} ({}m)", frequency, band.label);
        skimmer.send_line(&format!("SKIMMER/QSY {}", frequency)).await;
        tokio::time::sleep(self.settings.qsy_settle).await;
        skimmer.send_line("SKIMMER/SETT").await;

        // a failed send drops the session; the QSY never arrived
        if !skimmer.is_ready() {
            warn!("Skimmer lost while tuning to {}m", band.label);
            return FrameOutcome::SkimmerOffline;
        }

        self.follow.update(band);
        FrameOutcome::Qsy {
            band: band.label.clone(),
            frequency,
        }
    }

    /// Look at one line from a session for skimmer replies.
    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        match parse_skimmer_limits(line) {
            Ok(limits) => {
                info!(
                    "Skimmer {} covers {:.1}-{:.1} kHz",
                    limits.label, limits.low_khz, limits.high_khz
                );
                self.skimmer_limits = Some(limits.clone());
                return LineOutcome::Limits(limits);
            }
            Err(ParseError::NoMatch(_)) => {}
            Err(e) => debug!("{}", e),
        }

        if self.settings.radio_follow && is_skimmer_broadcast(line) {
            return self.tune_radio(line);
        }
        LineOutcome::None
    }

    fn tune_radio(&mut self, line: &str) -> LineOutcome {
        let Some(click) = find_click_frequency(line) else {
            debug!("No frequency in skimmer broadcast: {}", line.trim());
            return LineOutcome::None;
        };
        let Some(cat) = self.cat.as_mut() else {
            return LineOutcome::None;
        };

        let command = vfo_b_command(click);
        match cat.send_command(&command) {
            Ok(()) => {
                info!("Radio VFO B to {} kHz", click);
                LineOutcome::Tuned(command)
            }
            Err(e) => {
                warn!("CAT command {} failed: {}", command, e);
                LineOutcome::None
            }
        }
    }

    /// Release the radio. Safe to call more than once.
    pub fn close_cat(&mut self) {
        if let Some(mut cat) = self.cat.take() {
            cat.close();
        }
    }
}

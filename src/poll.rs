//! The bridge's scheduler.
//!
//! One cooperative loop visits the skimmer, the cluster and the UDP socket
//! in that order. Every visit is bounded by the endpoint's receive timeout,
//! so a quiet endpoint delays the others by at most that long, and at most
//! one read per endpoint is handled per cycle. Logins run in the background
//! and are only checked on, never waited for.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::extractor::{Extraction, SpotExtractor};
use crate::relay::{CommandRelay, FrameOutcome, LineOutcome};
use crate::session::{SessionEndpoint, SessionState};
use crate::stats::BridgeStats;
use crate::udp::UdpChannel;
use crate::wintest::DecodeError;

/// Idle cycles before a disconnected session is retried.
pub const DEFAULT_RECONNECT_THRESHOLD: u32 = 100;

/// Upper bound on each shutdown step.
const SHUTDOWN_STEP: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
enum Feed {
    Skimmer,
    Cluster,
}

/// Owns every endpoint and drives them in turn.
pub struct PollLoop {
    skimmer: Option<SessionEndpoint>,
    cluster: Option<SessionEndpoint>,
    udp: Option<UdpChannel>,
    extractor: SpotExtractor,
    relay: CommandRelay,
    stats: Arc<BridgeStats>,
    reconnect_threshold: u32,
    skimmer_idle: u32,
    cluster_idle: u32,
}

impl PollLoop {
    /// A feed left as `None` is disabled and never polled.
    pub fn new(
        skimmer: Option<SessionEndpoint>,
        cluster: Option<SessionEndpoint>,
        udp: UdpChannel,
        extractor: SpotExtractor,
        relay: CommandRelay,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            skimmer,
            cluster,
            udp: Some(udp),
            extractor,
            relay,
            stats,
            reconnect_threshold: DEFAULT_RECONNECT_THRESHOLD,
            skimmer_idle: 0,
            cluster_idle: 0,
        }
    }

    pub fn with_reconnect_threshold(mut self, threshold: u32) -> Self {
        self.reconnect_threshold = threshold.max(1);
        self
    }

    pub fn skimmer(&self) -> Option<&SessionEndpoint> {
        self.skimmer.as_ref()
    }

    pub fn cluster(&self) -> Option<&SessionEndpoint> {
        self.cluster.as_ref()
    }

    pub fn relay(&self) -> &CommandRelay {
        &self.relay
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Run until `shutdown` turns true, then shut down.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Bridge running");
        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.poll_once() => {}
            }
        }
        self.shutdown().await;
    }

    /// One cycle: skimmer, then cluster, then UDP.
    pub async fn poll_once(&mut self) {
        self.poll_feed(Feed::Skimmer).await;
        self.poll_feed(Feed::Cluster).await;
        self.poll_udp().await;
    }

    async fn poll_feed(&mut self, feed: Feed) {
        let (slot, idle) = match feed {
            Feed::Skimmer => (&mut self.skimmer, &mut self.skimmer_idle),
            Feed::Cluster => (&mut self.cluster, &mut self.cluster_idle),
        };
        let Some(session) = slot.as_mut() else {
            return;
        };

        if session.is_connecting() {
            if session.poll_login().await == Some(true) {
                *idle = 0;
                // a freshly logged-in skimmer is on its own default band
                if let Feed::Skimmer = feed {
                    self.relay.reset_follow();
                }
            }
            return;
        }

        if session.state() == SessionState::Disconnected {
            *idle += 1;
            if *idle >= self.reconnect_threshold {
                *idle = 0;
                self.stats.record_reconnect();
                info!("Reconnecting to {}", session.name());
                session.start_connect();
            }
            return;
        }

        *idle = 0;
        if let Some(text) = session.receive().await {
            self.process_text(&text).await;
        }
    }

    async fn process_text(&mut self, text: &str) {
        self.stats.record_bytes(text.len() as u64);

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }

            match self.extractor.extract(line) {
                Extraction::Relay { spot, frame } => {
                    info!("{}", line.trim_end());
                    let Some(udp) = self.udp.as_ref() else {
                        continue;
                    };
                    match udp.send(&frame).await {
                        Ok(()) => self.stats.record_relayed(&spot, frame.len()),
                        Err(e) => {
                            warn!("{}", e);
                            self.stats.record_send_failure();
                        }
                    }
                }
                Extraction::Suppressed(_) => self.stats.record_suppressed(),
                Extraction::NoMatch => {
                    trace!("{}", line);
                    self.stats.record_non_spot();
                }
            }

            if let LineOutcome::Tuned(_) = self.relay.handle_line(line) {
                self.stats.record_cat_command();
            }
        }
    }

    async fn poll_udp(&mut self) {
        let Some(udp) = self.udp.as_ref() else {
            return;
        };
        let Some(datagram) = udp.receive().await else {
            return;
        };

        self.stats.record_frame_received();
        match self
            .relay
            .handle_frame(&datagram, &mut self.skimmer, &mut self.cluster)
            .await
        {
            Ok(FrameOutcome::Qsy { .. }) => self.stats.record_qsy(),
            Ok(FrameOutcome::Forwarded(_)) => self.stats.record_forwarded(),
            Ok(outcome) => trace!("{:?}", outcome),
            // our own broadcasts and other WinTest traffic
            Err(DecodeError::Unsupported(keyword)) => trace!("Ignoring {} frame", keyword),
            Err(e) => {
                debug!("{}", e);
                self.stats.record_decode_failure();
            }
        }
    }

    /// Log out of every logged-in session, close the socket and release the
    /// radio. Each step is bounded so one stuck endpoint cannot hold up the
    /// rest. Logins still in progress are abandoned.
    pub async fn shutdown(&mut self) {
        info!("Shutting down");
        for session in [self.skimmer.as_mut(), self.cluster.as_mut()]
            .into_iter()
            .flatten()
        {
            if !session.is_logged_in() {
                session.disconnect().await;
                continue;
            }
            let name = session.name().to_string();
            if timeout(SHUTDOWN_STEP, session.disconnect()).await.is_err() {
                warn!("Logout from {} timed out", name);
            }
        }

        if self.udp.take().is_some() {
            debug!("UDP channel closed");
        }
        self.relay.close_cat();
    }
}

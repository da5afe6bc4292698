//! WinTest Bridge - relays DX cluster and CW skimmer spots to WinTest over UDP.
//!
//! This crate provides:
//! - nom-based matching of cluster announcements and `SH/DX` answers
//! - WinTest's checksum-framed UDP format, both directions
//! - Skimmer band-following driven by WinTest `STATUS` or `REMOTE` frames
//! - Kenwood CAT tuning from skimmer click broadcasts
//! - A single cooperative poll loop over both telnet feeds and the UDP socket
//!
//! # Example
//!
//! ```rust
//! use wintest_bridge::extractor::{Extraction, SpotExtractor, SpotFilters};
//! use wintest_bridge::frame::verify_frame;
//!
//! let extractor = SpotExtractor::new(SpotFilters::default());
//! let line = "DX de F5XYZ:     7005.0  UA9ABC       599 TNX QSO      2210Z";
//!
//! match extractor.extract(line) {
//!     Extraction::Relay { spot, frame } => {
//!         assert_eq!(spot.dx_call, "UA9ABC");
//!         assert!(verify_frame(&frame));
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod band;
pub mod cat;
pub mod config;
pub mod extractor;
pub mod frame;
pub mod metrics;
pub mod parser;
pub mod poll;
pub mod relay;
pub mod session;
pub mod spot;
pub mod stats;
pub mod udp;
pub mod wintest;

pub use band::{Band, BandFollowState, BandTable, FollowMode};
pub use cat::{CatControl, CatError, KenwoodCat, RadioConfig};
pub use config::Config;
pub use extractor::{DigiPolicy, Extraction, SpotExtractor, SpotFilters};
pub use frame::{build_frame, checksum, verify_frame};
pub use parser::{ParseError, looks_like_spot, parse_spot};
pub use poll::PollLoop;
pub use relay::{CommandRelay, FrameOutcome, LineOutcome, QsyTarget, RelaySettings};
pub use session::{LineSink, SessionConfig, SessionEndpoint, SessionState};
pub use spot::{Spot, SpotSource};
pub use stats::{BridgeStats, StatsSummary};
pub use udp::{UdpChannel, UdpError};
pub use wintest::{DecodeError, FrequencyField, InboundFrame};

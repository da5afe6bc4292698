//! WinTest UDP frame encoding.
//!
//! Every datagram WinTest accepts is ASCII text followed by a single checksum
//! byte. The checksum is the sum of all payload bytes modulo 128, with the
//! high bit forced on so it can never be mistaken for payload text.
//!
//! ```text
//! RCVDPKT: "TELNET" "" "DX de DG1KDA:   144174.0  DO5HMK ...  0930Z\n"<checksum>
//! ```

/// Envelope keyword for packets received from a telnet feed.
pub const RCVDPKT: &str = "RCVDPKT";

/// Station tag WinTest expects on relayed cluster traffic.
pub const TELNET_TAG: &str = "TELNET";

/// Compute the WinTest checksum byte over `payload`.
///
/// ```
/// use wintest_bridge::frame::checksum;
///
/// // 'A' = 65, 65 % 128 + 128
/// assert_eq!(checksum(b"A"), 193);
/// ```
pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
    (sum % 128) as u8 + 128
}

/// Build the text part of an outbound frame, without checksum.
pub fn frame_text(station_tag: &str, station_label: &str, line: &str) -> String {
    format!(
        "{}: \"{}\" \"{}\" \"{}\n\"",
        RCVDPKT, station_tag, station_label, line
    )
}

/// Build a complete outbound frame: payload text plus trailing checksum byte.
pub fn build_frame(station_tag: &str, station_label: &str, line: &str) -> Vec<u8> {
    let text = frame_text(station_tag, station_label, line);
    let mut frame = Vec::with_capacity(text.len() + 1);
    frame.extend_from_slice(text.as_bytes());
    frame.push(checksum(text.as_bytes()));
    frame
}

/// Check that the last byte of `frame` is the checksum of everything before it.
pub fn verify_frame(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&sum, payload)) => checksum(payload) == sum,
        None => false,
    }
}

/// Strip the checksum (and any NUL padding) from an inbound datagram.
///
/// WinTest pads some frames with a trailing NUL after the checksum byte.
pub fn strip_trailer(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && frame[end - 1] == 0 {
        end -= 1;
    }
    if end > 0 && frame[end - 1] >= 0x80 {
        end -= 1;
    }
    &frame[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SPOT: &str =
        "DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z";

    #[test]
    fn test_frame_text_layout() {
        let text = frame_text(TELNET_TAG, "", SPOT);
        assert_eq!(
            text,
            "RCVDPKT: \"TELNET\" \"\" \"DX de DG1KDA:   144174.0  DO5HMK       FT8 +3 dB 1435 Hz              0930Z\n\""
        );
    }

    #[test]
    fn test_build_frame_appends_checksum() {
        let frame = build_frame(TELNET_TAG, "", SPOT);
        let text = frame_text(TELNET_TAG, "", SPOT);
        let expected: u32 = text.bytes().map(u32::from).sum();

        assert_eq!(frame.len(), text.len() + 1);
        assert_eq!(&frame[..text.len()], text.as_bytes());
        assert_eq!(frame[text.len()], (expected % 128) as u8 + 128);
        assert!(verify_frame(&frame));
    }

    #[test]
    fn test_checksum_high_bit_always_set() {
        assert_eq!(checksum(b""), 128);
        assert_eq!(checksum(&[127]), 255);
        assert_eq!(checksum(&[128]), 128);
    }

    #[test]
    fn test_verify_frame_rejects_corruption() {
        let mut frame = build_frame(TELNET_TAG, "", "DX de K1ABC:  7018.3  W1AW  CQ  1200Z");
        frame[10] ^= 0x01;
        assert!(!verify_frame(&frame));
        assert!(!verify_frame(&[]));
    }

    #[test]
    fn test_strip_trailer() {
        let frame = b"SENDPKT: \"STN1\" \"\" \"SH/DX\r\"\x98\x00";
        assert_eq!(strip_trailer(frame), b"SENDPKT: \"STN1\" \"\" \"SH/DX\r\"");
        assert_eq!(strip_trailer(b"STATUS"), b"STATUS");
        assert_eq!(strip_trailer(b""), b"");
    }

    proptest! {
        #[test]
        fn prop_checksum_round_trip(line in "[ -~]{0,200}") {
            let frame = build_frame(TELNET_TAG, "", &line);
            let (last, payload) = frame.split_last().unwrap();
            let sum: u32 = payload.iter().map(|&b| u32::from(b)).sum();
            prop_assert_eq!(*last, (sum % 128) as u8 + 128);
            prop_assert!(verify_frame(&frame));
        }
    }
}

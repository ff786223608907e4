//! OBD2 response frame cleaning and decoding.
//!
//! The adapter is configured with echo, headers and linefeeds off, so a
//! complete response looks like `41 0C 1F 40\r\r>`. Cleaning strips the
//! spaces and the prompt, decoding looks for the mode 01 response tags.

use smallvec::SmallVec;

/// Prompt character the adapter sends when it is ready for the next command
pub const END_MARKER: u8 = b'>';

/// Inline capacity for raw and cleaned frames
pub const FRAME_CAPACITY: usize = 64;

/// Response tag for PID 0C (engine RPM)
const RPM_TAG: &str = "410C";
/// Response tag for PID 05 (engine coolant temperature)
const COOLANT_TAG: &str = "4105";

/// `NO DATA` as it reads once cleaning has removed the space
const NO_DATA_MARKER: &str = "NODATA";
const ERROR_MARKER: &str = "ERROR";

/// Offset applied to the PID 05 byte to get degrees Celsius
const COOLANT_OFFSET: i32 = 40;

/// Type alias for fixed-capacity frame buffers
pub type FrameBuffer = SmallVec<[u8; FRAME_CAPACITY]>;

/// A complete response with spaces, the prompt and surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanedFrame {
    bytes: FrameBuffer,
}

impl CleanedFrame {
    /// Clean a raw accumulated response.
    ///
    /// Removes every space and every `>` and then trims leading and trailing
    /// ASCII whitespace (`\r`, `\n`, tab).
    pub fn clean(raw: &[u8]) -> Self {
        let mut bytes: FrameBuffer = raw
            .iter()
            .copied()
            .filter(|&b| b != b' ' && b != END_MARKER)
            .collect();

        let end = bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |pos| pos + 1);
        bytes.truncate(end);

        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        bytes.drain(..start);

        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame contents as text (lossy for non-ASCII garbage)
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl From<&str> for CleanedFrame {
    fn from(raw: &str) -> Self {
        Self::clean(raw.as_bytes())
    }
}

/// Decoded value of a single response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryReading {
    /// Engine speed in revolutions per minute
    Rpm(u32),
    /// Coolant temperature in degrees Celsius
    CoolantTemp(i32),
    /// Adapter answered `NO DATA` (ECU not responding)
    NoData,
    /// Adapter reported an error (`ERROR`, `CAN ERROR`, `BUS ERROR`, ...)
    Error,
    /// Frame present but not one we know how to decode
    Unrecognized,
}

impl TelemetryReading {
    /// Whether the reading proves the ECU answered on the bus.
    ///
    /// Anything except `NoData`/`Error` counts, including payloads we
    /// don't decode (e.g. the `4100...` supported-PIDs bitmap).
    pub const fn is_ecu_response(&self) -> bool {
        !matches!(self, Self::NoData | Self::Error)
    }
}

/// Decode a cleaned response frame.
///
/// `NO DATA`/`ERROR` win over anything else in the frame. Otherwise the first
/// `410C` tag is decoded as RPM, falling back to the first `4105` tag as
/// coolant temperature. Short or non-hex payloads yield `Unrecognized`.
pub fn decode(frame: &CleanedFrame) -> TelemetryReading {
    let Ok(text) = std::str::from_utf8(frame.as_bytes()) else {
        return TelemetryReading::Unrecognized;
    };

    if text.contains(NO_DATA_MARKER) {
        return TelemetryReading::NoData;
    }
    if text.contains(ERROR_MARKER) {
        return TelemetryReading::Error;
    }

    if let Some(pos) = text.find(RPM_TAG) {
        return payload::<2>(text, pos + RPM_TAG.len()).map_or(
            TelemetryReading::Unrecognized,
            |[a, b]| TelemetryReading::Rpm((u32::from(a) * 256 + u32::from(b)) / 4),
        );
    }

    if let Some(pos) = text.find(COOLANT_TAG) {
        return payload::<1>(text, pos + COOLANT_TAG.len()).map_or(
            TelemetryReading::Unrecognized,
            |[t]| TelemetryReading::CoolantTemp(i32::from(t) - COOLANT_OFFSET),
        );
    }

    TelemetryReading::Unrecognized
}

/// Parse `N` hex-encoded bytes starting at `start`, bounds-checked.
fn payload<const N: usize>(text: &str, start: usize) -> Option<[u8; N]> {
    let hex_chars = text.as_bytes().get(start..start + N * 2)?;
    let mut out = [0u8; N];
    hex::decode_to_slice(hex_chars, &mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(raw: &str) -> TelemetryReading {
        decode(&CleanedFrame::from(raw))
    }

    #[test]
    fn test_clean_strips_spaces_prompt_and_whitespace() {
        let frame = CleanedFrame::clean(b"\r41 0C 1F 40\r\r>");
        assert_eq!(frame.as_bytes(), b"410C1F40");

        let frame = CleanedFrame::clean(b"  >  ");
        assert!(frame.is_empty());
    }

    #[test]
    fn test_clean_keeps_inner_line_breaks() {
        // Multi-line responses keep their separators, only the ends are trimmed
        let frame = CleanedFrame::clean(b"SEARCHING...\r41 05 5A\r\r>");
        assert_eq!(frame.as_bytes(), b"SEARCHING...\r41055A");
    }

    #[test]
    fn test_decode_rpm() {
        assert_eq!(decode_str("410C1F40"), TelemetryReading::Rpm(2000));
        assert_eq!(decode_str("41 0C 1A F8\r\r>"), TelemetryReading::Rpm(1726));
        assert_eq!(decode_str("410C0000"), TelemetryReading::Rpm(0));
        assert_eq!(decode_str("410CFFFF"), TelemetryReading::Rpm(16383));
        // Lowercase hex is still hex
        assert_eq!(decode_str("410C1f40"), TelemetryReading::Rpm(2000));
    }

    #[test]
    fn test_decode_coolant_temp() {
        assert_eq!(decode_str("41055A"), TelemetryReading::CoolantTemp(50));
        assert_eq!(decode_str("410500"), TelemetryReading::CoolantTemp(-40));
        assert_eq!(decode_str("4105FF"), TelemetryReading::CoolantTemp(215));
    }

    #[test]
    fn test_decode_tag_found_anywhere() {
        assert_eq!(decode_str("SEARCHING...\r410C1F40"), TelemetryReading::Rpm(2000));
        assert_eq!(decode_str("7E8034105 5A"), TelemetryReading::CoolantTemp(50));
    }

    #[test]
    fn test_no_data_and_error_win() {
        assert_eq!(decode_str("NO DATA"), TelemetryReading::NoData);
        assert_eq!(decode_str("410C1F40NO DATA"), TelemetryReading::NoData);
        assert_eq!(decode_str("CAN ERROR"), TelemetryReading::Error);
        assert_eq!(decode_str("41055AERROR"), TelemetryReading::Error);
        // Markers are case-sensitive
        assert_eq!(decode_str("no data"), TelemetryReading::Unrecognized);
    }

    #[test]
    fn test_sleeping_ecu_reply_is_not_ecu_response() {
        let frame = CleanedFrame::clean(b"NO DATA\r\r>");
        assert_eq!(frame.as_bytes(), b"NODATA");
        let reading = decode(&frame);
        assert_eq!(reading, TelemetryReading::NoData);
        assert!(!reading.is_ecu_response());

        let reading = decode(&CleanedFrame::clean(b"SEARCHING...\rUNABLE TO CONNECT\rBUS ERROR\r\r>"));
        assert_eq!(reading, TelemetryReading::Error);
    }

    #[test]
    fn test_short_payload_is_unrecognized() {
        assert_eq!(decode_str("410C"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str("410C1F4"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str("4105"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str("41055"), TelemetryReading::Unrecognized);
    }

    #[test]
    fn test_malformed_payload_is_unrecognized() {
        assert_eq!(decode_str("410CZZ40"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str("4105G1"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str("OK"), TelemetryReading::Unrecognized);
        assert_eq!(decode_str(""), TelemetryReading::Unrecognized);
        assert_eq!(
            decode(&CleanedFrame::clean(&[0x34, 0xFF, 0xFE])),
            TelemetryReading::Unrecognized
        );
    }

    #[test]
    fn test_rpm_tag_preferred_over_coolant() {
        assert_eq!(decode_str("41055A410C1F40"), TelemetryReading::Rpm(2000));
    }

    #[test]
    fn test_ecu_response() {
        assert!(TelemetryReading::Rpm(800).is_ecu_response());
        assert!(TelemetryReading::Unrecognized.is_ecu_response());
        assert!(!TelemetryReading::NoData.is_ecu_response());
        assert!(!TelemetryReading::Error.is_ecu_response());
    }
}

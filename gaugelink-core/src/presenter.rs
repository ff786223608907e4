//! Text layout for the character display.
//!
//! Readings map to fixed rows: RPM on row 0, coolant temperature on row 1.
//! Status screens cover the phases where there is nothing to show yet.

use crate::response::TelemetryReading;

/// HD44780 ROM code for the degree sign (`°`)
pub const DEGREE_GLYPH: u8 = 0xDF;

/// Display row used for engine RPM
pub const RPM_ROW: u8 = 0;
/// Display row used for coolant temperature
pub const TEMP_ROW: u8 = 1;

/// Characters per display row
pub const LINE_WIDTH: usize = 16;

/// Character display consumed by the controller.
///
/// Implementations handle their own bus errors; the controller treats the
/// display as a write-only sink.
pub trait TextSurface {
    fn set_cursor(&mut self, col: u8, row: u8);
    fn print(&mut self, text: &str);
    /// Write a character code straight from the display's character ROM
    fn write_raw_glyph(&mut self, code: u8);
    fn clear(&mut self);
}

/// One line of text anchored at column 0 of a display row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub row: u8,
    pub text: String,
}

impl DisplayLine {
    pub fn new(row: u8, text: impl Into<String>) -> Self {
        Self {
            row,
            text: text.into(),
        }
    }

    /// Write the line to the surface, mapping `°` to [`DEGREE_GLYPH`].
    pub fn render<S: TextSurface + ?Sized>(&self, surface: &mut S) {
        surface.set_cursor(0, self.row);
        let mut parts = self.text.split('°');
        if let Some(first) = parts.next() {
            if !first.is_empty() {
                surface.print(first);
            }
        }
        for part in parts {
            surface.write_raw_glyph(DEGREE_GLYPH);
            if !part.is_empty() {
                surface.print(part);
            }
        }
    }
}

/// Format a reading for the display.
///
/// Returns `None` for readings with nothing to show; the caller picks the
/// fallback screen.
pub fn format(reading: &TelemetryReading) -> Option<DisplayLine> {
    match *reading {
        // Lines are padded to the full row so a shorter value wipes the
        // leftovers of a longer one
        TelemetryReading::Rpm(rpm) => {
            let text = format!("RPM: {rpm:>4}");
            Some(DisplayLine::new(RPM_ROW, format!("{text:<LINE_WIDTH$}")))
        }
        TelemetryReading::CoolantTemp(temp) => {
            let text = format!("TEMP: {temp}°C");
            Some(DisplayLine::new(TEMP_ROW, format!("{text:<LINE_WIDTH$}")))
        }
        TelemetryReading::NoData | TelemetryReading::Error | TelemetryReading::Unrecognized => {
            None
        }
    }
}

/// Fixed screens shown while there are no live readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusScreen {
    Boot,
    Connecting,
    WaitingForEcu,
    EcuAwake,
}

impl StatusScreen {
    pub fn lines(self) -> &'static [(u8, &'static str)] {
        match self {
            Self::Boot => &[(0, "-System Started-")],
            Self::Connecting => &[(0, "Connecting OBD...")],
            Self::WaitingForEcu => &[(0, "Connect with OBD"), (1, " Wait ECU...   ")],
            Self::EcuAwake => &[(1, "   ECU Awake!   ")],
        }
    }

    /// Draw the screen over whatever is currently displayed
    pub fn render<S: TextSurface + ?Sized>(self, surface: &mut S) {
        for &(row, text) in self.lines() {
            surface.set_cursor(0, row);
            surface.print(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every call so tests can assert on exact output
    #[derive(Default)]
    struct RecordingSurface {
        ops: Vec<String>,
    }

    impl TextSurface for RecordingSurface {
        fn set_cursor(&mut self, col: u8, row: u8) {
            self.ops.push(format!("cursor {col},{row}"));
        }
        fn print(&mut self, text: &str) {
            self.ops.push(format!("print {text:?}"));
        }
        fn write_raw_glyph(&mut self, code: u8) {
            self.ops.push(format!("glyph {code:#04X}"));
        }
        fn clear(&mut self) {
            self.ops.push("clear".to_string());
        }
    }

    #[test]
    fn test_format_rpm() {
        assert_eq!(
            format(&TelemetryReading::Rpm(2004)),
            Some(DisplayLine::new(0, "RPM: 2004       "))
        );
        assert_eq!(
            format(&TelemetryReading::Rpm(850)),
            Some(DisplayLine::new(0, "RPM:  850       "))
        );
        assert_eq!(
            format(&TelemetryReading::Rpm(1000)),
            Some(DisplayLine::new(0, "RPM: 1000       "))
        );
    }

    #[test]
    fn test_format_coolant_temp() {
        assert_eq!(
            format(&TelemetryReading::CoolantTemp(50)),
            Some(DisplayLine::new(1, "TEMP: 50°C      "))
        );
        assert_eq!(
            format(&TelemetryReading::CoolantTemp(-40)),
            Some(DisplayLine::new(1, "TEMP: -40°C     "))
        );
    }

    #[test]
    fn test_shorter_value_overwrites_longer() {
        let mut surface = RecordingSurface::default();
        for reading in [TelemetryReading::Rpm(10000), TelemetryReading::Rpm(0)] {
            let line = format(&reading).unwrap();
            assert_eq!(line.text.chars().count(), LINE_WIDTH);
            line.render(&mut surface);
        }
        assert_eq!(surface.ops[1], "print \"RPM: 10000      \"");
        assert_eq!(surface.ops[3], "print \"RPM:    0       \"");

        let line = format(&TelemetryReading::CoolantTemp(105)).unwrap();
        assert_eq!(line.text.chars().count(), LINE_WIDTH);
    }

    #[test]
    fn test_format_nothing_to_show() {
        assert_eq!(format(&TelemetryReading::NoData), None);
        assert_eq!(format(&TelemetryReading::Error), None);
        assert_eq!(format(&TelemetryReading::Unrecognized), None);
    }

    #[test]
    fn test_format_is_pure() {
        let reading = TelemetryReading::Rpm(3120);
        assert_eq!(format(&reading), format(&reading));
        let reading = TelemetryReading::CoolantTemp(88);
        assert_eq!(format(&reading), format(&reading));
    }

    #[test]
    fn test_render_maps_degree_sign() {
        let mut surface = RecordingSurface::default();
        DisplayLine::new(1, "TEMP: 50°C   ").render(&mut surface);
        assert_eq!(
            surface.ops,
            vec![
                "cursor 0,1".to_string(),
                "print \"TEMP: 50\"".to_string(),
                "glyph 0xDF".to_string(),
                "print \"C   \"".to_string(),
            ]
        );
    }

    #[test]
    fn test_render_status_screen() {
        let mut surface = RecordingSurface::default();
        StatusScreen::WaitingForEcu.render(&mut surface);
        assert_eq!(
            surface.ops,
            vec![
                "cursor 0,0".to_string(),
                "print \"Connect with OBD\"".to_string(),
                "cursor 0,1".to_string(),
                "print \" Wait ECU...   \"".to_string(),
            ]
        );
    }
}

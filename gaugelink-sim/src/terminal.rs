//! 16x2 character display rendered to stdout

use gaugelink_core::presenter::DEGREE_GLYPH;
use gaugelink_core::TextSurface;

pub const COLUMNS: usize = 16;
pub const ROWS: usize = 2;

/// Display memory of an HD44780, holding character ROM codes
pub struct TerminalSurface {
    cells: [[u8; COLUMNS]; ROWS],
    col: usize,
    row: usize,
    dirty: bool,
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self {
            cells: [[b' '; COLUMNS]; ROWS],
            col: 0,
            row: 0,
            dirty: true,
        }
    }
}

impl TerminalSurface {
    pub fn line(&self, row: usize) -> String {
        self.cells[row]
            .iter()
            .map(|&code| match code {
                DEGREE_GLYPH => '°',
                c if c.is_ascii_graphic() || c == b' ' => char::from(c),
                _ => '?',
            })
            .collect()
    }

    /// The boxed display contents, if anything changed since the last call
    pub fn take_frame(&mut self) -> Option<String> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let border = "-".repeat(COLUMNS);
        Some(format!(
            "+{border}+\n|{}|\n|{}|\n+{border}+",
            self.line(0),
            self.line(1)
        ))
    }

    fn put(&mut self, code: u8) {
        // Writes past the last column are lost, like on the real panel
        if self.col < COLUMNS && self.row < ROWS && self.cells[self.row][self.col] != code {
            self.cells[self.row][self.col] = code;
            self.dirty = true;
        }
        self.col += 1;
    }
}

impl TextSurface for TerminalSurface {
    fn set_cursor(&mut self, col: u8, row: u8) {
        self.col = usize::from(col);
        self.row = usize::from(row);
    }

    fn print(&mut self, text: &str) {
        for ch in text.chars() {
            self.put(if ch.is_ascii() { ch as u8 } else { b'?' });
        }
    }

    fn write_raw_glyph(&mut self, code: u8) {
        self.put(code);
    }

    fn clear(&mut self) {
        self.cells = [[b' '; COLUMNS]; ROWS];
        self.col = 0;
        self.row = 0;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaugelink_core::{presenter, StatusScreen, TelemetryReading};

    #[test]
    fn test_reading_rendered_with_degree_sign() {
        let mut surface = TerminalSurface::default();
        presenter::format(&TelemetryReading::CoolantTemp(88))
            .unwrap()
            .render(&mut surface);
        assert_eq!(surface.line(1), "TEMP: 88°C      ");
    }

    #[test]
    fn test_long_text_clipped() {
        let mut surface = TerminalSurface::default();
        StatusScreen::Connecting.render(&mut surface);
        assert_eq!(surface.line(0), "Connecting OBD..");
    }

    #[test]
    fn test_frame_only_on_change() {
        let mut surface = TerminalSurface::default();
        assert!(surface.take_frame().is_some());
        assert!(surface.take_frame().is_none());

        let line = presenter::format(&TelemetryReading::Rpm(800)).unwrap();
        line.render(&mut surface);
        let frame = surface.take_frame().unwrap();
        assert!(frame.contains("|RPM:  800       |"));

        // Same reading again changes nothing
        line.render(&mut surface);
        assert!(surface.take_frame().is_none());
    }
}

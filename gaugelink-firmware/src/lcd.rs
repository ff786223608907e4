//! HD44780 character LCD driver over a PCF8574 I2C backpack.
//!
//! The backpack drives the controller in 4-bit mode; each I2C byte carries
//! one nibble on P4-P7 plus the RS/EN/backlight control lines.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use gaugelink_core::TextSurface;
use log::warn;

/// PCF8574 pin assignments
mod pin {
    pub const RS: u8 = 0x01;
    pub const EN: u8 = 0x04;
    pub const BACKLIGHT: u8 = 0x08;
}

/// HD44780 instructions
mod cmd {
    pub const CLEAR: u8 = 0x01;
    /// Increment cursor, no display shift
    pub const ENTRY_MODE: u8 = 0x06;
    /// Display on, cursor off, blink off
    pub const DISPLAY_ON: u8 = 0x0C;
    /// 4-bit bus, 2 lines, 5x8 font
    pub const FUNCTION_SET: u8 = 0x28;
    pub const SET_DDRAM_ADDR: u8 = 0x80;
}

/// DDRAM address of the first column of each row
const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

pub const COLUMNS: u8 = 16;

/// 16x2 HD44780 display
pub struct Lcd<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    backlight: u8,
}

impl<I2C, D> Lcd<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            backlight: pin::BACKLIGHT,
        }
    }

    /// Power-on reset into 4-bit mode, then clear the display
    pub fn init(&mut self) -> Result<(), I2C::Error> {
        self.delay.delay_ms(50);
        self.expander_write(self.backlight)?;
        self.delay.delay_ms(1);

        // Three times 8-bit mode, whatever state the controller was left in
        for wait_us in [4500, 4500, 150] {
            self.write_nibble(0x30, 0)?;
            self.delay.delay_us(wait_us);
        }
        self.write_nibble(0x20, 0)?;

        self.command(cmd::FUNCTION_SET)?;
        self.command(cmd::DISPLAY_ON)?;
        self.command(cmd::CLEAR)?;
        self.delay.delay_ms(2);
        self.command(cmd::ENTRY_MODE)?;
        Ok(())
    }

    pub fn try_clear(&mut self) -> Result<(), I2C::Error> {
        self.command(cmd::CLEAR)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    pub fn try_set_cursor(&mut self, col: u8, row: u8) -> Result<(), I2C::Error> {
        let offset = ROW_OFFSETS[usize::from(row).min(ROW_OFFSETS.len() - 1)];
        self.command(cmd::SET_DDRAM_ADDR | (offset + col.min(COLUMNS - 1)))
    }

    /// Write ASCII text; anything outside the ROM's ASCII range becomes `?`
    pub fn try_print(&mut self, text: &str) -> Result<(), I2C::Error> {
        for ch in text.chars() {
            let code = if ch.is_ascii() && !ch.is_ascii_control() {
                ch as u8
            } else {
                b'?'
            };
            self.data(code)?;
        }
        Ok(())
    }

    fn command(&mut self, value: u8) -> Result<(), I2C::Error> {
        self.send(value, 0)
    }

    fn data(&mut self, value: u8) -> Result<(), I2C::Error> {
        self.send(value, pin::RS)
    }

    fn send(&mut self, value: u8, mode: u8) -> Result<(), I2C::Error> {
        self.write_nibble(value & 0xF0, mode)?;
        self.write_nibble((value << 4) & 0xF0, mode)
    }

    /// Latch the high nibble of `nibble` with an EN pulse
    fn write_nibble(&mut self, nibble: u8, mode: u8) -> Result<(), I2C::Error> {
        let bits = nibble | mode | self.backlight;
        self.expander_write(bits | pin::EN)?;
        self.delay.delay_us(1);
        self.expander_write(bits)?;
        self.delay.delay_us(50);
        Ok(())
    }

    fn expander_write(&mut self, bits: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[bits])
    }
}

/// Bus errors are logged and dropped; a glitch on the display must not
/// take the link down.
impl<I2C, D> TextSurface for Lcd<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    fn set_cursor(&mut self, col: u8, row: u8) {
        if let Err(e) = self.try_set_cursor(col, row) {
            warn!("LCD set_cursor failed: {e:?}");
        }
    }

    fn print(&mut self, text: &str) {
        if let Err(e) = self.try_print(text) {
            warn!("LCD print failed: {e:?}");
        }
    }

    fn write_raw_glyph(&mut self, code: u8) {
        if let Err(e) = self.data(code) {
            warn!("LCD glyph write failed: {e:?}");
        }
    }

    fn clear(&mut self) {
        if let Err(e) = self.try_clear() {
            warn!("LCD clear failed: {e:?}");
        }
    }
}

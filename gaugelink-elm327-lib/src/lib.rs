//! ELM327 adapter emulation
//!
//! This library emulates an ELM327-compatible OBD2 adapter sitting in front
//! of an ECU that only knows a handful of mode 01 PIDs. It is used by the
//! GaugeLink simulator and by end-to-end tests of the link controller.

/// Per-connection adapter settings changed by AT commands
///
/// Header display (ATH0/ATH1) is acknowledged but responses never carry
/// header bytes.
#[derive(Debug, Clone)]
pub struct ClientState {
    /// Echo received characters back (ATE0/ATE1)
    pub echo_enabled: bool,
    /// Add linefeeds after carriage returns (ATL0/ATL1)
    pub linefeeds_enabled: bool,
    /// Print spaces between response bytes (ATS0/ATS1)
    pub spaces_enabled: bool,
    /// Protocol selected with ATSPn (0 = automatic)
    pub protocol: char,
    /// Response timeout set with ATSTxx, in units of 4 ms
    pub response_timeout: u8,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            echo_enabled: true,
            linefeeds_enabled: true,
            spaces_enabled: true,
            protocol: '0',
            response_timeout: 0x32,
        }
    }
}

impl ClientState {
    /// Create a new client state with power-on settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Format a line ending based on current settings
    pub fn line_ending(&self) -> &'static str {
        if self.linefeeds_enabled {
            "\r\n"
        } else {
            "\r"
        }
    }

    /// Insert spaces between hex byte pairs when ATS1 is active
    pub fn format_response(&self, response: &str) -> String {
        if !self.spaces_enabled {
            return response.to_string();
        }

        let mut result = String::with_capacity(response.len() * 3 / 2);
        let mut hex_count = 0;

        for ch in response.chars() {
            if ch.is_ascii_hexdigit() {
                // Space before every pair of hex digits except the first
                if hex_count > 0 && hex_count % 2 == 0 {
                    result.push(' ');
                }
                hex_count += 1;
            } else {
                // Line endings, prompt etc. start a new run
                hex_count = 0;
            }
            result.push(ch);
        }

        result
    }

    /// Handle an AT command and return the response (without echo).
    /// Mutates the state if the command changes settings
    pub fn handle_at_command(&mut self, command: &str) -> String {
        let cmd = command.trim().to_uppercase();
        let le = self.line_ending();

        let response_text = match cmd.as_str() {
            "ATZ" | "ATD" => {
                *self = ClientState::default();
                let le = self.line_ending();
                return format!("{le}ELM327 v1.5{le}>");
            }
            "ATE0" => {
                self.echo_enabled = false;
                "OK"
            }
            "ATE1" => {
                self.echo_enabled = true;
                "OK"
            }
            "ATL0" => {
                self.linefeeds_enabled = false;
                "OK"
            }
            "ATL1" => {
                self.linefeeds_enabled = true;
                "OK"
            }
            "ATS0" => {
                self.spaces_enabled = false;
                "OK"
            }
            "ATS1" => {
                self.spaces_enabled = true;
                "OK"
            }
            "ATH0" | "ATH1" | "ATAT0" | "ATAT1" | "ATAT2" => "OK",
            "ATI" => "ELM327 v1.5",
            _ if cmd.starts_with("ATSP") => match cmd[4..].chars().next() {
                Some(p) if cmd.len() == 5 && (p.is_ascii_digit() || ('A'..='C').contains(&p)) => {
                    self.protocol = p;
                    "OK"
                }
                _ => "?",
            },
            _ if cmd.starts_with("ATST") => match u8::from_str_radix(&cmd[4..], 16) {
                Ok(value) => {
                    self.response_timeout = value;
                    "OK"
                }
                Err(_) => "?",
            },
            _ => "?",
        };

        // Note: for ATL0/ATL1 the response still uses the OLD setting,
        // since le was captured before the match
        format!("{le}{response_text}{le}>")
    }
}

/// Encode engine speed as the two data bytes of PID 0C
pub fn encode_rpm(rpm: u32) -> [u8; 2] {
    let raw = (rpm.saturating_mul(4)).min(u32::from(u16::MAX));
    #[allow(clippy::cast_possible_truncation)] // Clamped to u16 above
    let raw = raw as u16;
    raw.to_be_bytes()
}

/// Encode coolant temperature as the data byte of PID 05
pub fn encode_coolant(celsius: i32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..=255
    let raw = (celsius + 40).clamp(0, 255) as u8;
    raw
}

/// The vehicle side of the emulation
#[derive(Debug, Clone)]
pub struct EmulatedEcu {
    /// Ignition on: when false every OBD request answers `NO DATA`
    pub awake: bool,
    pub rpm: u32,
    pub coolant_c: i32,
}

impl Default for EmulatedEcu {
    fn default() -> Self {
        Self {
            awake: true,
            rpm: 800,
            coolant_c: 20,
        }
    }
}

impl EmulatedEcu {
    /// Data bytes for a mode 01 PID, as hex
    fn pid_data(&self, pid: &str) -> Option<String> {
        match pid {
            "00" => Some("BE3FA813".to_string()), // PIDs supported 01-20
            "05" => Some(format!("{:02X}", encode_coolant(self.coolant_c))),
            "0C" => {
                let [a, b] = encode_rpm(self.rpm);
                Some(format!("{a:02X}{b:02X}"))
            }
            _ => None,
        }
    }
}

/// An ELM327 adapter connected to an [`EmulatedEcu`]
#[derive(Debug, Clone, Default)]
pub struct Elm327Emulator {
    pub state: ClientState,
    pub ecu: EmulatedEcu,
}

impl Elm327Emulator {
    pub fn new(ecu: EmulatedEcu) -> Self {
        Self {
            state: ClientState::default(),
            ecu,
        }
    }

    /// Process one complete command (terminator optional) and return
    /// everything the adapter would send back, up to and including `>`.
    pub fn process_command(&mut self, raw: &str) -> String {
        let command = raw.trim().to_uppercase();
        let echo = if self.state.echo_enabled {
            format!("{command}\r")
        } else {
            String::new()
        };

        if command.starts_with("AT") {
            return echo + &self.state.handle_at_command(&command);
        }

        let le = self.state.line_ending();
        let body = self.obd_response(&command);
        format!("{echo}{}{le}{le}>", self.state.format_response(&body))
    }

    fn obd_response(&self, command: &str) -> String {
        if command.is_empty() {
            return "?".to_string();
        }
        if !command.chars().all(|c| c.is_ascii_hexdigit()) {
            return "?".to_string();
        }

        match command {
            // Mode 01 - current data, single PID
            c if c.starts_with("01") && c.len() == 4 => {
                if !self.ecu.awake {
                    return "NO DATA".to_string();
                }
                let pid = &c[2..];
                self.ecu
                    .pid_data(pid)
                    .map_or_else(|| "NO DATA".to_string(), |data| format!("41{pid}{data}"))
            }
            _ => "?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = ClientState::default();
        assert!(state.echo_enabled);
        assert!(state.linefeeds_enabled);
        assert!(state.spaces_enabled);
        assert_eq!(state.protocol, '0');
    }

    #[test]
    fn test_line_ending() {
        let mut state = ClientState::default();
        assert_eq!(state.line_ending(), "\r\n");

        state.linefeeds_enabled = false;
        assert_eq!(state.line_ending(), "\r");
    }

    #[test]
    fn test_at_commands() {
        let mut state = ClientState::default();

        let resp = state.handle_at_command("ATE0");
        assert!(resp.contains("OK"));
        assert!(!state.echo_enabled);

        let resp = state.handle_at_command("ATSP1");
        assert!(resp.contains("OK"));
        assert_eq!(state.protocol, '1');

        let resp = state.handle_at_command("ATST32");
        assert!(resp.contains("OK"));
        assert_eq!(state.response_timeout, 0x32);

        let resp = state.handle_at_command("ATSTZZ");
        assert!(resp.contains('?'));

        // Reset
        let resp = state.handle_at_command("ATZ");
        assert!(resp.contains("ELM327"));
        assert!(state.echo_enabled);
        assert_eq!(state.protocol, '0');
    }

    #[test]
    fn test_format_response_with_spaces() {
        let state = ClientState::default();
        assert_eq!(state.format_response("410C1AF8"), "41 0C 1A F8");
    }

    #[test]
    fn test_format_response_without_spaces() {
        let mut state = ClientState::default();
        state.spaces_enabled = false;
        assert_eq!(state.format_response("410C1AF8"), "410C1AF8");
    }

    #[test]
    fn test_encode_values() {
        assert_eq!(encode_rpm(2004), [0x1F, 0x50]);
        assert_eq!(encode_rpm(100_000), [0xFF, 0xFF]);
        assert_eq!(encode_coolant(50), 0x5A);
        assert_eq!(encode_coolant(-60), 0x00);
    }

    #[test]
    fn test_emulator_after_init() {
        let mut elm = Elm327Emulator::new(EmulatedEcu {
            awake: true,
            rpm: 2004,
            coolant_c: 50,
        });

        // Echo is on until ATE0
        assert_eq!(elm.process_command("ATE0\r"), "ATE0\r\r\nOK\r\n>");
        assert_eq!(elm.process_command("ATL0"), "\r\nOK\r\n>");

        assert_eq!(elm.process_command("010C\r"), "41 0C 1F 50\r\r>");
        assert_eq!(elm.process_command("0105"), "41 05 5A\r\r>");
        assert_eq!(elm.process_command("0100"), "41 00 BE 3F A8 13\r\r>");
        assert_eq!(elm.process_command("0142"), "NO DATA\r\r>");
        assert_eq!(elm.process_command("HELLO"), "?\r\r>");
    }

    #[test]
    fn test_headers_acknowledged_but_never_shown() {
        let mut elm = Elm327Emulator::default();
        elm.state.echo_enabled = false;
        elm.state.linefeeds_enabled = false;

        assert_eq!(elm.process_command("ATH1"), "\rOK\r>");
        assert_eq!(elm.process_command("010C"), "41 0C 0C 80\r\r>");
        assert_eq!(elm.process_command("ATH0"), "\rOK\r>");
    }

    #[test]
    fn test_only_gauge_pids_supported() {
        let mut elm = Elm327Emulator::default();
        elm.state.echo_enabled = false;
        elm.state.linefeeds_enabled = false;

        assert_eq!(elm.process_command("010D"), "NO DATA\r\r>");
        // Mode 03 (trouble codes) is not emulated
        assert_eq!(elm.process_command("03"), "?\r\r>");
    }

    #[test]
    fn test_sleeping_ecu_answers_no_data() {
        let mut elm = Elm327Emulator::new(EmulatedEcu {
            awake: false,
            ..EmulatedEcu::default()
        });
        elm.state.echo_enabled = false;
        elm.state.linefeeds_enabled = false;

        assert_eq!(elm.process_command("0100"), "NO DATA\r\r>");
        // AT commands are answered by the adapter itself
        assert_eq!(elm.process_command("ATI"), "\rELM327 v1.5\r>");
    }
}

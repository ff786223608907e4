//! Link state machine: adapter connection, ECU wake detection and the
//! RPM/coolant polling cadence.
//!
//! ```text
//!  Disconnected --connect+init ok--> ConnectedEcuAsleep --probe answered--> ConnectedEcuAwake
//!       ^                                 |      ^                                |
//!       +------ transport lost -----------+      +--- NO DATA / ERROR / timeout --+
//! ```

use std::thread::sleep;
use std::time::Duration;

use log::{debug, info, warn};
use smallvec::SmallVec;

use crate::presenter::{self, StatusScreen, TextSurface};
use crate::radio::{LinkTarget, RadioLink, TransportError};
use crate::response::{decode, TelemetryReading};
use crate::session::{CommandSession, SessionError, DEFAULT_COMMAND_TIMEOUT};

/// Mode 01 PID 00, answered by any ECU that is awake
pub const ECU_PROBE_COMMAND: &str = "0100";
pub const RPM_COMMAND: &str = "010C";
pub const COOLANT_COMMAND: &str = "0105";

/// Default number of RPM polls per coolant poll
pub const DEFAULT_TEMP_POLL_RATIO: u32 = 20;

/// Shortest pause between polling cycles; anything faster floods the adapter
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Shortest wait between ECU probes
pub const MIN_ECU_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Connection and ECU liveness as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    ConnectedEcuAsleep,
    ConnectedEcuAwake,
}

/// Waits and deadlines used by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTiming {
    /// Deadline for the `>` prompt on polling commands
    pub command_timeout: Duration,
    /// Deadline for the `>` prompt on adapter init commands
    pub init_timeout: Duration,
    /// Pause after each init command
    pub init_command_delay: Duration,
    /// Wait before retrying a failed connect
    pub reconnect_delay: Duration,
    /// Wait before each ECU probe while asleep
    pub ecu_probe_interval: Duration,
    /// How long the "ECU Awake!" banner stays up
    pub ecu_awake_banner: Duration,
    /// Pause after each polling cycle
    pub poll_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            init_timeout: Duration::from_millis(1500),
            init_command_delay: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(1),
            ecu_probe_interval: Duration::from_millis(500),
            ecu_awake_banner: Duration::from_secs(1),
            poll_interval: Duration::from_millis(300),
        }
    }
}

impl LinkTiming {
    /// Raise the polling and probing waits to their floors
    #[must_use]
    pub fn enforce_pacing(mut self) -> Self {
        if self.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} too short, using {MIN_POLL_INTERVAL:?}",
                self.poll_interval
            );
            self.poll_interval = MIN_POLL_INTERVAL;
        }
        if self.ecu_probe_interval < MIN_ECU_PROBE_INTERVAL {
            warn!(
                "ECU probe interval {:?} too short, using {MIN_ECU_PROBE_INTERVAL:?}",
                self.ecu_probe_interval
            );
            self.ecu_probe_interval = MIN_ECU_PROBE_INTERVAL;
        }
        self
    }
}

/// Everything the controller needs to know about the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub target: LinkTarget,
    pub timing: LinkTiming,
    /// OBD protocol number for `ATSPn` (`0` = automatic)
    pub protocol: String,
    /// Adapter response timeout for `ATSTxx`, in units of 4 ms
    pub adapter_timeout: u8,
    /// RPM polls per coolant poll
    pub temp_poll_ratio: u32,
    /// Consecutive unanswered ECU probes before the link is presumed lost
    /// (0 = never give up on the link)
    pub max_probe_timeouts: u32,
}

impl LinkConfig {
    /// Adapter init sequence sent after every connect
    pub fn init_commands(&self) -> SmallVec<[String; 8]> {
        smallvec::smallvec![
            "ATZ".to_string(),  // Reset the chip
            "ATE0".to_string(), // Echo off
            "ATH0".to_string(), // Headers off
            format!("ATSP{}", self.protocol),
            "ATAT1".to_string(), // Adaptive timing
            "ATL0".to_string(),  // Linefeeds off
            format!("ATST{:02X}", self.adapter_timeout),
        ]
    }
}

/// Top-level controller owning the radio link, the display and the session
pub struct LinkController<L, S> {
    link: L,
    surface: S,
    session: CommandSession,
    config: LinkConfig,
    state: LinkState,
    /// RPM polls since the last coolant poll
    poll_counter: u32,
    /// Consecutive ECU probes that timed out
    probe_timeouts: u32,
}

impl<L: RadioLink, S: TextSurface> LinkController<L, S> {
    pub fn new(link: L, surface: S, config: LinkConfig) -> Self {
        Self {
            link,
            surface,
            session: CommandSession::new(),
            config,
            state: LinkState::Disconnected,
            poll_counter: 0,
            probe_timeouts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn poll_counter(&self) -> u32 {
        self.poll_counter
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Show the boot banner
    pub fn boot(&mut self) {
        info!("GaugeLink controller started");
        self.surface.clear();
        StatusScreen::Boot.render(&mut self.surface);
    }

    /// Run forever, calling `on_iteration` after every step
    pub fn run(&mut self, mut on_iteration: impl FnMut(LinkState)) -> ! {
        loop {
            let state = self.step();
            on_iteration(state);
        }
    }

    /// Perform one iteration of the current state and return the new state
    pub fn step(&mut self) -> LinkState {
        match self.state {
            LinkState::Disconnected => self.step_disconnected(),
            LinkState::ConnectedEcuAsleep => self.step_asleep(),
            LinkState::ConnectedEcuAwake => self.step_awake(),
        }
        self.state
    }

    fn enter(&mut self, next: LinkState) {
        if next == self.state {
            return;
        }
        info!("Link state: {:?} -> {:?}", self.state, next);

        match next {
            LinkState::Disconnected => {
                self.link.disconnect();
                self.surface.clear();
            }
            LinkState::ConnectedEcuAsleep => {
                self.probe_timeouts = 0;
                // Stale readings must not stay on screen
                self.surface.clear();
                StatusScreen::WaitingForEcu.render(&mut self.surface);
            }
            LinkState::ConnectedEcuAwake => {
                self.poll_counter = 0;
            }
        }

        self.state = next;
    }

    fn step_disconnected(&mut self) {
        StatusScreen::Connecting.render(&mut self.surface);

        match self.connect_and_init() {
            Ok(()) => {
                info!("Connected to OBD2 adapter");
                self.enter(LinkState::ConnectedEcuAsleep);
            }
            Err(e) => {
                warn!("Adapter connection failed: {e}");
                self.link.disconnect();
                sleep(self.config.timing.reconnect_delay);
            }
        }
    }

    /// Connect, discover, subscribe and initialize the adapter
    fn connect_and_init(&mut self) -> Result<(), TransportError> {
        let target = &self.config.target;
        info!("Connecting to OBD2 adapter at {}", target.address);

        self.link.connect(&target.address)?;
        debug!("BLE connection successful");
        self.link
            .discover(&target.service_uuid, &target.tx_uuid, &target.rx_uuid)?;
        debug!("Service and characteristics found");
        self.link.subscribe(self.session.sink())?;

        for command in self.config.init_commands() {
            match self
                .session
                .send(&mut self.link, &command, self.config.timing.init_timeout)
            {
                Ok(frame) => debug!("Init {command}: {:?}", frame.as_str()),
                // The adapter may still be busy resetting, carry on
                Err(SessionError::TimedOut) => warn!("No response to init command {command}"),
                Err(SessionError::Transport(e)) => return Err(e),
            }
            sleep(self.config.timing.init_command_delay);
        }

        Ok(())
    }

    fn step_asleep(&mut self) {
        sleep(self.config.timing.ecu_probe_interval);
        debug!("Checking ECU status...");

        match self.session.send(
            &mut self.link,
            ECU_PROBE_COMMAND,
            self.config.timing.command_timeout,
        ) {
            Ok(frame) => {
                self.probe_timeouts = 0;
                let reading = decode(&frame);
                if reading.is_ecu_response() {
                    info!("ECU is awake");
                    StatusScreen::EcuAwake.render(&mut self.surface);
                    sleep(self.config.timing.ecu_awake_banner);
                    self.surface.clear();
                    self.enter(LinkState::ConnectedEcuAwake);
                } else {
                    debug!("ECU still asleep ({reading:?})");
                }
            }
            Err(SessionError::TimedOut) => {
                self.probe_timeouts += 1;
                debug!("ECU probe timed out ({} in a row)", self.probe_timeouts);
                let max = self.config.max_probe_timeouts;
                if max > 0 && self.probe_timeouts >= max {
                    warn!("Adapter silent for {max} probes, presuming link lost");
                    self.enter(LinkState::Disconnected);
                }
            }
            Err(SessionError::Transport(e)) => {
                warn!("Transport failure while probing ECU: {e}");
                self.enter(LinkState::Disconnected);
            }
        }
    }

    fn step_awake(&mut self) {
        if !self.poll(RPM_COMMAND) {
            return;
        }

        self.poll_counter += 1;
        if self.poll_counter >= self.config.temp_poll_ratio {
            self.poll_counter = 0;
            if !self.poll(COOLANT_COMMAND) {
                return;
            }
        }

        sleep(self.config.timing.poll_interval);
    }

    /// Send one telemetry command and show the result.
    ///
    /// Returns false when the ECU or the link went away.
    fn poll(&mut self, command: &str) -> bool {
        let frame = match self
            .session
            .send(&mut self.link, command, self.config.timing.command_timeout)
        {
            Ok(frame) => frame,
            Err(SessionError::TimedOut) => {
                warn!("Timeout waiting for {command}, ECU presumed asleep");
                self.enter(LinkState::ConnectedEcuAsleep);
                return false;
            }
            Err(SessionError::Transport(e)) => {
                warn!("Transport failure on {command}: {e}");
                self.enter(LinkState::Disconnected);
                return false;
            }
        };

        let reading = decode(&frame);
        match reading {
            TelemetryReading::NoData | TelemetryReading::Error => {
                info!("ECU connection is off ({reading:?})");
                self.enter(LinkState::ConnectedEcuAsleep);
                false
            }
            _ if answers(command, &reading) => {
                if let Some(line) = presenter::format(&reading) {
                    debug!("Displaying {reading:?}");
                    line.render(&mut self.surface);
                }
                true
            }
            _ => {
                debug!("Discarding response {:?} to {command}", frame.as_str());
                true
            }
        }
    }
}

/// Whether `reading` is the reply a polling command asks for
fn answers(command: &str, reading: &TelemetryReading) -> bool {
    matches!(
        (command, reading),
        (RPM_COMMAND, TelemetryReading::Rpm(_))
            | (COOLANT_COMMAND, TelemetryReading::CoolantTemp(_))
    )
}

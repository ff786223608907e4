//! In-process stand-in for the BLE adapter: an emulated ELM327 whose
//! responses come back as MTU-sized notification fragments from a
//! separate thread, like NimBLE's host task.

use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use gaugelink_core::{FragmentSink, RadioLink, TransportError};
use gaugelink_elm327_lib::{EmulatedEcu, Elm327Emulator};
use log::{debug, info, warn};

/// Ignition timeline and engine behaviour of the simulated car
#[derive(Debug, Clone)]
pub struct Vehicle {
    start: Instant,
    /// Ignition turns on this long after start
    pub wake_after: Duration,
    /// Ignition turns off again this long after start
    pub sleep_after: Option<Duration>,
}

impl Vehicle {
    pub fn new(wake_after: Duration, sleep_after: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            wake_after,
            sleep_after,
        }
    }

    fn ignition_on(&self, elapsed: Duration) -> bool {
        elapsed >= self.wake_after && self.sleep_after.map_or(true, |off| elapsed < off)
    }

    /// Idle, rev up, hold, rev down, idle; repeating
    pub fn rpm_at(running_secs: f32) -> u32 {
        const MIN_RPM: f32 = 800.0;
        const MAX_RPM: f32 = 3500.0;
        const RAMP_TIME: f32 = 4.0;
        const HOLD_TIME: f32 = 3.0;
        const CYCLE_TIME: f32 = 2.0 * (RAMP_TIME + HOLD_TIME);

        let phase = running_secs % CYCLE_TIME;
        let rpm = if phase < RAMP_TIME {
            MIN_RPM + (MAX_RPM - MIN_RPM) * (phase / RAMP_TIME)
        } else if phase < RAMP_TIME + HOLD_TIME {
            MAX_RPM
        } else if phase < 2.0 * RAMP_TIME + HOLD_TIME {
            let ramp_phase = phase - RAMP_TIME - HOLD_TIME;
            MAX_RPM - (MAX_RPM - MIN_RPM) * (ramp_phase / RAMP_TIME)
        } else {
            MIN_RPM
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // 800..=3500
        let rpm = rpm as u32;
        rpm
    }

    /// Warms from ambient to operating temperature over two minutes
    pub fn coolant_at(running_secs: f32) -> i32 {
        const AMBIENT: f32 = 20.0;
        const OPERATING: f32 = 90.0;
        const WARMUP_TIME: f32 = 120.0;

        let progress = (running_secs / WARMUP_TIME).clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation)] // 20..=90
        let temp = (AMBIENT + (OPERATING - AMBIENT) * progress) as i32;
        temp
    }

    fn update(&self, ecu: &mut EmulatedEcu) {
        let elapsed = self.start.elapsed();
        let awake = self.ignition_on(elapsed);
        if awake != ecu.awake {
            info!("Ignition {}", if awake { "on" } else { "off" });
            ecu.awake = awake;
        }
        if awake {
            let running = elapsed.saturating_sub(self.wake_after).as_secs_f32();
            ecu.rpm = Self::rpm_at(running);
            ecu.coolant_c = Self::coolant_at(running);
        }
    }
}

/// Faults to inject into the link
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Number of initial connect attempts that fail
    pub connect_failures: u32,
    /// The link drops once, on the first write after this point
    pub drop_link_after: Option<Duration>,
}

pub struct EmulatedRadio {
    elm: Elm327Emulator,
    vehicle: Vehicle,
    faults: Faults,
    fragment_size: usize,
    latency: Duration,
    connected: bool,
    /// Responses waiting to be notified, consumed by the delivery thread
    outbox: Option<Sender<Vec<u8>>>,
}

impl EmulatedRadio {
    pub fn new(vehicle: Vehicle, faults: Faults, fragment_size: usize, latency: Duration) -> Self {
        Self {
            elm: Elm327Emulator::new(EmulatedEcu {
                awake: false,
                ..EmulatedEcu::default()
            }),
            vehicle,
            faults,
            fragment_size: fragment_size.max(1),
            latency,
            connected: false,
            outbox: None,
        }
    }

    fn link_dropped(&mut self) -> bool {
        match self.faults.drop_link_after {
            Some(at) if self.vehicle.start.elapsed() >= at => {
                self.faults.drop_link_after = None;
                true
            }
            _ => false,
        }
    }
}

impl RadioLink for EmulatedRadio {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        if self.faults.connect_failures > 0 {
            self.faults.connect_failures -= 1;
            return Err(TransportError::ConnectFailed(format!("{address} not advertising")));
        }
        info!("Adapter {address} connected");
        // Fresh BLE connection, adapter keeps its settings until ATZ
        self.connected = true;
        Ok(())
    }

    fn discover(&mut self, service: &str, tx: &str, rx: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        debug!("Service {service}: TX {tx}, RX {rx}");
        Ok(())
    }

    fn subscribe(&mut self, sink: FragmentSink) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let fragment_size = self.fragment_size;
        let latency = self.latency;

        thread::Builder::new()
            .name("adapter_notify".to_string())
            .spawn(move || {
                for response in rx {
                    for fragment in response.chunks(fragment_size) {
                        thread::sleep(latency);
                        sink.deliver(fragment);
                    }
                }
                debug!("Notification thread exiting");
            })
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        self.outbox = Some(tx);
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.link_dropped() {
            warn!("Simulating adapter link loss");
            self.disconnect();
            return Err(TransportError::NotConnected);
        }

        self.vehicle.update(&mut self.elm.ecu);
        let command = String::from_utf8_lossy(payload);
        let response = self.elm.process_command(&command);
        debug!("Adapter RX {:?} TX {:?}", command.trim_end(), response);

        let outbox = self.outbox.as_ref().ok_or(TransportError::NotConnected)?;
        outbox
            .send(response.into_bytes())
            .map_err(|_| TransportError::WriteFailed("notification thread gone".to_string()))
    }

    fn disconnect(&mut self) {
        if self.connected {
            info!("Adapter disconnected");
        }
        self.connected = false;
        // Dropping the sender ends the notification thread
        self.outbox = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_ramp() {
        assert_eq!(Vehicle::rpm_at(0.0), 800);
        assert_eq!(Vehicle::rpm_at(2.0), 2150);
        assert_eq!(Vehicle::rpm_at(5.0), 3500);
        assert_eq!(Vehicle::rpm_at(13.5), 800);
        // Next cycle
        assert_eq!(Vehicle::rpm_at(14.0), 800);
    }

    #[test]
    fn test_coolant_warmup() {
        assert_eq!(Vehicle::coolant_at(0.0), 20);
        assert_eq!(Vehicle::coolant_at(60.0), 55);
        assert_eq!(Vehicle::coolant_at(600.0), 90);
    }

    #[test]
    fn test_ignition_window() {
        let vehicle = Vehicle::new(Duration::from_secs(2), Some(Duration::from_secs(10)));
        assert!(!vehicle.ignition_on(Duration::from_secs(1)));
        assert!(vehicle.ignition_on(Duration::from_secs(2)));
        assert!(!vehicle.ignition_on(Duration::from_secs(10)));
    }

    #[test]
    fn test_connect_failures_then_success() {
        let faults = Faults {
            connect_failures: 1,
            drop_link_after: None,
        };
        let mut radio = EmulatedRadio::new(Vehicle::new(Duration::ZERO, None), faults, 20, Duration::ZERO);
        assert!(matches!(
            radio.connect("66:1e:32:7a:35:0e"),
            Err(TransportError::ConnectFailed(_))
        ));
        assert!(radio.connect("66:1e:32:7a:35:0e").is_ok());
    }

    #[test]
    fn test_write_requires_connection() {
        let mut radio = EmulatedRadio::new(
            Vehicle::new(Duration::ZERO, None),
            Faults::default(),
            20,
            Duration::ZERO,
        );
        assert_eq!(radio.write(b"0100\r"), Err(TransportError::NotConnected));
    }
}

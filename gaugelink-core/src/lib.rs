//! OBD2 telemetry link logic for GaugeLink
//!
//! This library holds everything between the BLE radio and the character
//! display: response framing and decoding, display formatting, command
//! correlation and the link state machine. It is hardware-agnostic and
//! can be tested without embedded hardware; the firmware supplies
//! [`RadioLink`] and [`TextSurface`] implementations.

pub mod controller;
pub mod presenter;
pub mod radio;
pub mod response;
pub mod session;

pub use controller::{LinkConfig, LinkController, LinkState, LinkTiming};
pub use presenter::{DisplayLine, StatusScreen, TextSurface};
pub use radio::{LinkTarget, RadioLink, TransportError};
pub use response::{decode, CleanedFrame, TelemetryReading};
pub use session::{CommandSession, FragmentSink, SessionError};

//! Command/response correlation over the notify channel.
//!
//! Architecture:
//! - The radio link's notify callback runs on the BLE host task and only
//!   pushes fragments into a bounded channel via [`FragmentSink`]
//! - [`CommandSession::send`] runs on the controller task: it drains stale
//!   fragments, writes the command, then blocks on the channel until the
//!   `>` prompt arrives or the deadline passes
//! - One command in flight at a time: `send` takes `&mut self`
//! - After a timeout the adapter may still answer the abandoned command,
//!   so the next `send` first waits for that reply's prompt, or for the
//!   channel to stay quiet for [`STALE_QUIET_PERIOD`]

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use derive_more::{Display, Error};
use log::{debug, warn};
use smallvec::SmallVec;

use crate::radio::{RadioLink, TransportError};
use crate::response::{CleanedFrame, FrameBuffer, END_MARKER, FRAME_CAPACITY};

/// Fragments queued between the BLE context and the controller
pub const FRAGMENT_QUEUE_DEPTH: usize = 32;

/// Default time to wait for the `>` prompt
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(800);

/// Silence after a timed-out command that marks its reply as abandoned
pub const STALE_QUIET_PERIOD: Duration = Duration::from_millis(100);

/// One notification payload (BLE default MTU leaves 20 bytes)
pub type Fragment = SmallVec<[u8; 20]>;

/// Errors from [`CommandSession::send`]
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SessionError {
    #[display("Timed out waiting for prompt")]
    TimedOut,
    #[display("{_0}")]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Producer half of the notification channel, handed to the radio link.
#[derive(Debug, Clone)]
pub struct FragmentSink {
    tx: SyncSender<Fragment>,
}

impl FragmentSink {
    /// Queue a notification payload. Never blocks; drops the fragment if
    /// the controller has fallen `FRAGMENT_QUEUE_DEPTH` fragments behind.
    pub fn deliver(&self, data: &[u8]) {
        match self.tx.try_send(Fragment::from_slice(data)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Notification queue full, dropping {} bytes", data.len());
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Notification after session closed, dropping");
            }
        }
    }
}

/// Accumulates fragments until the prompt is seen
#[derive(Debug, Default)]
struct RawFrame {
    bytes: FrameBuffer,
    complete: bool,
    overflowed: usize,
}

impl RawFrame {
    fn reset(&mut self) {
        self.bytes.clear();
        self.complete = false;
        self.overflowed = 0;
    }

    fn append(&mut self, fragment: &[u8]) {
        if fragment.contains(&END_MARKER) {
            self.complete = true;
        }
        let room = FRAME_CAPACITY.saturating_sub(self.bytes.len());
        let take = fragment.len().min(room);
        self.bytes.extend_from_slice(&fragment[..take]);
        self.overflowed += fragment.len() - take;
    }
}

/// Request/response session over a [`RadioLink`]
pub struct CommandSession {
    rx: Receiver<Fragment>,
    /// Kept so `sink()` can hand out fresh producers after a reconnect
    tx: SyncSender<Fragment>,
    frame: RawFrame,
    /// The last command timed out and its reply may still be on the way
    reply_outstanding: bool,
}

impl Default for CommandSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSession {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel(FRAGMENT_QUEUE_DEPTH);
        Self {
            rx,
            tx,
            frame: RawFrame::default(),
            reply_outstanding: false,
        }
    }

    /// A producer to register with the radio link's notifications
    pub fn sink(&self) -> FragmentSink {
        FragmentSink {
            tx: self.tx.clone(),
        }
    }

    /// Send `command` and wait for the complete response.
    ///
    /// A `\r` terminator is appended when missing. Late fragments of an
    /// earlier, timed-out command are discarded before writing, so a reply
    /// is never attributed to the wrong command.
    pub fn send<L: RadioLink + ?Sized>(
        &mut self,
        link: &mut L,
        command: &str,
        timeout: Duration,
    ) -> Result<CleanedFrame, SessionError> {
        let mut payload: SmallVec<[u8; 16]> = SmallVec::from_slice(command.as_bytes());
        if !payload.ends_with(b"\r") {
            payload.push(b'\r');
        }

        let stale = self.discard_stale();
        if stale > 0 {
            debug!("Discarded {stale} stale fragments");
        }
        self.frame.reset();

        debug!("Sending: {:?}", String::from_utf8_lossy(&payload));
        link.write(&payload)?;

        let deadline = Instant::now() + timeout;
        while !self.frame.complete {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(fragment) => {
                    self.frame.append(&fragment);
                    debug!(
                        "Read {} bytes from adapter, total: {}",
                        fragment.len(),
                        self.frame.bytes.len()
                    );
                }
                // The session holds a sender itself, so the channel only
                // ever runs dry, it never disconnects
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    debug!(
                        "Timeout for {:?} with partial response {:?}",
                        command.trim_end(),
                        String::from_utf8_lossy(&self.frame.bytes)
                    );
                    self.frame.reset();
                    self.reply_outstanding = true;
                    return Err(SessionError::TimedOut);
                }
            }
        }

        if self.frame.overflowed > 0 {
            warn!(
                "Response exceeded {FRAME_CAPACITY} bytes, {} bytes dropped",
                self.frame.overflowed
            );
        }

        let cleaned = CleanedFrame::clean(&self.frame.bytes);
        debug!("Complete response: {:?}", cleaned.as_str());
        self.frame.reset();
        Ok(cleaned)
    }

    fn discard_stale(&mut self) -> usize {
        let mut discarded = 0;
        if std::mem::take(&mut self.reply_outstanding) {
            while let Ok(fragment) = self.rx.recv_timeout(STALE_QUIET_PERIOD) {
                discarded += 1;
                if fragment.contains(&END_MARKER) {
                    break;
                }
            }
        }
        discarded + self.rx.try_iter().count()
    }
}

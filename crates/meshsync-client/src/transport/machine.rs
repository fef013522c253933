//! Connection state machine.
//!
//! Pure and synchronous: every input returns the [`Action`]s the driver must
//! carry out. Cancelling a reconnect is dropping its [`ReconnectToken`]; a
//! timer that fires with a token the machine no longer holds is ignored.
//!
//! ```text
//! Idle --connect--> Connecting --opened--> Open --lost--> Idle (+ timer)
//!                   Connecting --dial_failed--> Idle (+ timer)
//! any  --close--> Closed
//! ```

use std::time::Duration;

use tracing::{debug, info, warn};

use meshsync_core::InboundFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Identifies one scheduled reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReconnectToken(u64);

/// What the transport reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Frame(InboundFrame),
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a new channel and report back with `opened` or `dial_failed`.
    Dial,
    /// Tear down the current channel, if any.
    Hangup,
    /// Arm the reconnect timer. Replaces any armed timer.
    Schedule {
        token: ReconnectToken,
        delay: Duration,
    },
    /// Disarm the reconnect timer.
    CancelTimer,
    Emit(TransportEvent),
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect_delay: Duration,
    armed: Option<ReconnectToken>,
    issued: u64,
}

impl ConnectionMachine {
    pub fn new(reconnect_delay: Duration) -> Self {
        ConnectionMachine {
            state: ConnectionState::Idle,
            reconnect_delay,
            armed: None,
            issued: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Starts a connection attempt. No-op while one is pending or open.
    pub fn connect(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => Vec::new(),
            ConnectionState::Idle | ConnectionState::Closed => {
                let mut actions = Vec::new();
                if self.armed.take().is_some() {
                    actions.push(Action::CancelTimer);
                }
                self.state = ConnectionState::Connecting;
                actions.push(Action::Dial);
                actions
            }
        }
    }

    /// The dial started by `connect` succeeded.
    pub fn opened(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting => {
                info!("realtime channel open");
                self.state = ConnectionState::Open;
                vec![Action::Emit(TransportEvent::Connected)]
            }
            // Closed while dialing: discard the late channel.
            _ => vec![Action::Hangup],
        }
    }

    /// The dial started by `connect` failed.
    pub fn dial_failed(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Idle;
        vec![self.schedule()]
    }

    /// The open channel went away.
    pub fn lost(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        info!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "realtime channel lost; reconnecting"
        );
        self.state = ConnectionState::Idle;
        vec![Action::Emit(TransportEvent::Disconnected), self.schedule()]
    }

    /// One inbound text frame. Undecodable frames are logged and dropped.
    pub fn frame(&mut self, text: &str) -> Vec<Action> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        match InboundFrame::parse(text) {
            Ok(frame) => vec![Action::Emit(TransportEvent::Frame(frame))],
            Err(e) => {
                warn!(error = %e, "dropping inbound frame");
                Vec::new()
            }
        }
    }

    pub fn timer_fired(&mut self, token: ReconnectToken) -> Vec<Action> {
        if self.armed != Some(token) {
            debug!(?token, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.armed = None;
        self.connect()
    }

    /// Tears everything down. Idempotent.
    pub fn close(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.armed.take().is_some() {
            actions.push(Action::CancelTimer);
        }
        match self.state {
            ConnectionState::Open => {
                actions.push(Action::Hangup);
                actions.push(Action::Emit(TransportEvent::Disconnected));
            }
            ConnectionState::Connecting => actions.push(Action::Hangup),
            ConnectionState::Idle | ConnectionState::Closed => {}
        }
        self.state = ConnectionState::Closed;
        actions
    }

    fn schedule(&mut self) -> Action {
        self.issued += 1;
        let token = ReconnectToken(self.issued);
        self.armed = Some(token);
        Action::Schedule {
            token,
            delay: self.reconnect_delay,
        }
    }
}

//! Session lifecycle state and the legal transitions between states.

use crate::link::{LinkEvent, Setpoint};

/// Link lifecycle of one vehicle session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Mutable session fields shared between the watchdog task and external
/// service calls.
///
/// Kept behind a single mutex and always locked as a unit: the emergency
/// check and the setpoint write must be atomic with respect to each other,
/// otherwise a command racing an emergency could slip a live setpoint in
/// after the latch.
#[derive(Debug)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub setpoint: Setpoint,
    /// Terminal once set; never cleared.
    pub emergency: bool,
    /// Cooperative stop requested from outside (process shutdown).
    pub shutdown: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            setpoint: Setpoint::zero(),
            emergency: false,
            shutdown: false,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a link event to the lifecycle, as a pure function.
///
/// Returns the next state, or `None` when the event does not move the
/// lifecycle from the current state. The Disconnected → Connecting edge is
/// not here: only the watchdog initiates connection attempts.
pub fn transition(current: ConnectionState, event: &LinkEvent) -> Option<ConnectionState> {
    match (current, event) {
        (ConnectionState::Connecting, LinkEvent::Connected { .. }) => {
            Some(ConnectionState::Connected)
        }
        (ConnectionState::Connecting, LinkEvent::ConnectionFailed { .. }) => {
            Some(ConnectionState::Disconnected)
        }
        (ConnectionState::Connected, LinkEvent::ConnectionLost { .. }) => {
            Some(ConnectionState::Disconnected)
        }
        (ConnectionState::Connected, LinkEvent::Disconnected { .. }) => {
            Some(ConnectionState::Disconnected)
        }
        _ => None,
    }
}

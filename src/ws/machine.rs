//! Connection lifecycle state machine.
//!
//! [`Machine`] is pure: it consumes [`Input`]s and returns the [`Action`]s the driver in
//! [`super::connection`] must perform, in order. It owns the reconnect bookkeeping and the
//! "closed by caller" flag; it never touches a socket or a timer itself.

use std::time::Duration;

use backoff::backoff::{Backoff as _, Constant};

use super::config::ReconnectConfig;
use super::error::ConnectionFailure;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected. Initial state and the state after `disconnect()`.
    #[default]
    Disconnected,
    /// Reading a token and opening the transport
    Connecting,
    /// The transport is open
    Connected,
    /// The last attempt failed
    Errored {
        /// No automatic retry follows; only an explicit `connect()` resumes
        terminal: bool,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `Connecting` or `Connected`: an explicit `connect()` is a no-op.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Errored with no retry pending.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Errored { terminal: true })
    }
}

/// Events fed into the machine by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Input {
    /// Caller requested a connection
    Connect,
    /// Reconnect delay elapsed
    RetryDue,
    /// The token provider had nothing for this attempt
    TokenMissing,
    /// Transport open event
    Opened,
    /// Transport error before open (including connect timeout)
    OpenFailed(String),
    /// Transport closed or errored after open
    Closed,
    /// Caller requested a disconnect
    Disconnect,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// Publish a new state
    Enter(ConnectionState),
    /// Read a fresh token and start opening the transport
    Open,
    /// Drop an in-flight open
    AbortOpen,
    StartHeartbeat,
    StopHeartbeat,
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    /// Close the transport with a normal-closure code
    CloseTransport,
    Fail(ConnectionFailure),
    ClearFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReconnectState {
    attempts: u32,
    scheduled: bool,
}

#[derive(Debug)]
pub(crate) struct Machine {
    state: ConnectionState,
    reconnect: ReconnectState,
    closed_by_caller: bool,
    max_attempts: u32,
    backoff: Constant,
}

impl Machine {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect: ReconnectState::default(),
            closed_by_caller: false,
            max_attempts: config.max_attempts,
            backoff: config.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self) -> u32 {
        self.reconnect.attempts
    }

    #[cfg(test)]
    pub(crate) fn is_reconnect_scheduled(&self) -> bool {
        self.reconnect.scheduled
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Action> {
        use ConnectionState::{Connected, Connecting, Disconnected, Errored};

        let mut actions = Vec::new();

        match (self.state, input) {
            (Connecting | Connected, Input::Connect) => {}
            (Disconnected | Errored { .. }, Input::Connect) => {
                self.closed_by_caller = false;
                if self.reconnect.scheduled {
                    // Mid-episode: connect now but keep counting against the same budget.
                    self.reconnect.scheduled = false;
                    actions.push(Action::CancelReconnect);
                } else {
                    self.reconnect.attempts = 0;
                }
                self.enter(Connecting, &mut actions);
                actions.push(Action::Open);
            }
            (Disconnected | Errored { terminal: false }, Input::RetryDue)
                if self.reconnect.scheduled =>
            {
                self.reconnect.scheduled = false;
                self.enter(Connecting, &mut actions);
                actions.push(Action::Open);
            }
            (Connecting, Input::TokenMissing) => {
                self.enter(Errored { terminal: true }, &mut actions);
                actions.push(Action::Fail(ConnectionFailure::MissingToken));
            }
            (Connecting, Input::Opened) => {
                self.reconnect.attempts = 0;
                self.backoff.reset();
                self.enter(Connected, &mut actions);
                actions.push(Action::ClearFailure);
                actions.push(Action::StartHeartbeat);
            }
            (Connecting, Input::OpenFailed(reason)) => {
                actions.push(Action::Fail(ConnectionFailure::Transport(reason)));
                self.retry_or_give_up(Errored { terminal: false }, &mut actions);
            }
            (Connected, Input::Closed) => {
                actions.push(Action::StopHeartbeat);
                self.enter(Disconnected, &mut actions);
                if !self.closed_by_caller {
                    self.retry_or_give_up(Disconnected, &mut actions);
                }
            }
            (_, Input::Disconnect) => {
                self.closed_by_caller = true;
                self.reconnect.scheduled = false;
                actions.extend([
                    Action::CancelReconnect,
                    Action::AbortOpen,
                    Action::StopHeartbeat,
                    Action::CloseTransport,
                ]);
                self.enter(Disconnected, &mut actions);
            }
            // Stale events: a retry that was cancelled, or transport events that no longer
            // match the state (e.g. a close racing a disconnect).
            (
                _,
                Input::RetryDue
                | Input::TokenMissing
                | Input::Opened
                | Input::OpenFailed(_)
                | Input::Closed,
            ) => {}
        }

        actions
    }

    fn retry_or_give_up(&mut self, waiting: ConnectionState, actions: &mut Vec<Action>) {
        if self.reconnect.attempts < self.max_attempts {
            self.reconnect.attempts += 1;
            self.reconnect.scheduled = true;
            self.enter(waiting, actions);
            if let Some(delay) = self.backoff.next_backoff() {
                actions.push(Action::ScheduleReconnect {
                    attempt: self.reconnect.attempts,
                    delay,
                });
            }
        } else {
            self.enter(ConnectionState::Errored { terminal: true }, actions);
            actions.push(Action::Fail(ConnectionFailure::ReconnectExhausted {
                attempts: self.reconnect.attempts,
            }));
        }
    }

    fn enter(&mut self, state: ConnectionState, actions: &mut Vec<Action>) {
        if self.state != state {
            self.state = state;
            actions.push(Action::Enter(state));
        }
    }
}

//! Per-connection protocol state.
//!
//! A [`Session`] belongs to exactly one connection handler. It remembers
//! whether that connection is inside the calculator and routes each line
//! either to the calculator or to the command dispatcher.

use crate::{
    calculator::{OhmState, Step},
    command::{Command, dispatch},
    registry::{ConnectionHandle, ConnectionId, Registry},
};

pub struct Session {
    handle: ConnectionHandle,
    calculator: Option<OhmState>,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            calculator: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn in_calculator(&self) -> bool {
        self.calculator.is_some()
    }

    /// Starts a fresh calculator, discarding any previous one.
    pub fn enter_calculator(&mut self) {
        self.calculator = Some(OhmState::new());
    }

    /// Handles one framed line and returns the reply for this connection, if
    /// any. Blank lines are ignored.
    pub async fn handle_line(&mut self, registry: &Registry, line: &str) -> Option<String> {
        if line.is_empty() {
            return None;
        }

        if let Some(state) = self.calculator.take() {
            let reply = match state.step(line) {
                Step::Continue { state, reply } => {
                    self.calculator = Some(state);
                    reply
                }
                Step::Exit { reply } => reply,
            };
            return Some(reply);
        }

        dispatch(registry, self, Command::parse(line)).await
    }
}

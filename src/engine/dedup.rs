use super::models::{InstrumentKey, SignalStatus};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Emit,
    Suppress,
}

/// Last alerted status per instrument.
///
/// Starts empty with the process and is never persisted. Only `buy`/`sell`
/// ever enter the map; `wait`, `neutral` and `hold_*` leave it untouched.
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    last_emitted: HashMap<InstrumentKey, SignalStatus>,
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_if_changed(&mut self, key: &InstrumentKey, status: SignalStatus) -> Decision {
        if !status.is_actionable() {
            return Decision::Suppress;
        }
        if self.last_emitted.get(key) == Some(&status) {
            debug!(instrument = %key, %status, "repeat alert suppressed");
            return Decision::Suppress;
        }
        self.last_emitted.insert(key.clone(), status);
        Decision::Emit
    }

    /// Undo an emission whose delivery failed.
    pub fn restore(&mut self, key: &InstrumentKey, previous: Option<SignalStatus>) {
        match previous {
            Some(status) => {
                self.last_emitted.insert(key.clone(), status);
            }
            None => {
                self.last_emitted.remove(key);
            }
        }
    }

    pub fn last_emitted(&self, key: &InstrumentKey) -> Option<SignalStatus> {
        self.last_emitted.get(key).copied()
    }

    pub fn tracked(&self) -> usize {
        self.last_emitted.len()
    }
}

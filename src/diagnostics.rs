// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel and server diagnostic counters.
//!
//! Both managers guard their counters with a short-lived lock that is
//! never held across an await point; every public method is one step.

use std::sync::{Arc, Mutex};

use crate::frame::Pdu;

/// Counters describing the state of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusDiagnostics {
    /// Valid messages received on this channel.
    pub messages: u32,
    /// Failed receptions (invalid CRC, bad protocol id, ...).
    pub comm_errors: u32,
    /// Exception responses this channel has sent to remote clients.
    pub exceptions: u32,
    /// Incoming frames that exceeded the maximum frame size.
    pub overruns: u32,
}

/// Counters describing the state of a single server unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerDiagnostics {
    pub messages: u32,
    pub no_response: u32,
    pub server_naks: u32,
    pub server_busy: u32,
    pub register: u32,
    pub event_counter: u32,
}

const EVENT_LOG_LEN: usize = 64;

// Event log bitmasks. The 0x40 and lower bits are context dependent:
// an incoming entry (0x80 set) uses them differently than an outgoing one.
const EVENT_INCOMING: u8 = 0x80;
const EVENT_BROADCAST: u8 = 0x40;
const EVENT_OUTGOING: u8 = 0x40;
const EVENT_CHAR_OVERRUN: u8 = 0x10;
const EVENT_COMM_ERROR: u8 = 0x02;
const EVENT_READ_EXCEPTION: u8 = 0x01;
const EVENT_ABORT_EXCEPTION: u8 = 0x02;
const EVENT_BUSY_EXCEPTION: u8 = 0x04;
const EVENT_NAK_EXCEPTION: u8 = 0x08;

#[derive(Debug)]
struct BusDiagState {
    diagnostics: BusDiagnostics,
    log_count: usize,
    log_entries: [u8; EVENT_LOG_LEN],
}

impl Default for BusDiagState {
    fn default() -> Self {
        Self {
            diagnostics: BusDiagnostics::default(),
            log_count: 0,
            log_entries: [0; EVENT_LOG_LEN],
        }
    }
}

impl BusDiagState {
    fn push_log(&mut self, value: u8) {
        self.log_entries[self.log_count % EVENT_LOG_LEN] = value;
        self.log_count += 1;
    }
}

/// Owner of the per-channel counters and the 64-entry event ring.
#[derive(Debug, Clone, Default)]
pub(crate) struct BusDiagManager {
    state: Arc<Mutex<BusDiagState>>,
}

impl BusDiagManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> BusDiagnostics {
        self.state.lock().unwrap().diagnostics
    }

    /// Logged events, newest first.
    pub(crate) fn event_log(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let count = state.log_count.min(EVENT_LOG_LEN);
        (0..count)
            .map(|i| state.log_entries[(state.log_count - i - 1) % EVENT_LOG_LEN])
            .collect()
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.diagnostics = BusDiagnostics::default();
        state.log_count = 0;
    }

    pub(crate) fn clear_overrun(&self) {
        self.state.lock().unwrap().diagnostics.overruns = 0;
    }

    /// Records a valid incoming message.
    pub(crate) fn message(&self, broadcast: bool) {
        let mut state = self.state.lock().unwrap();
        state.diagnostics.messages += 1;
        let bc = if broadcast { EVENT_BROADCAST } else { 0 };
        state.push_log(EVENT_INCOMING | bc);
    }

    /// Records an outgoing response, classifying exception responses.
    pub(crate) fn response(&self, pdu: &Pdu) {
        let mut state = self.state.lock().unwrap();
        let mut log = EVENT_OUTGOING;
        if pdu.is_exception() {
            state.diagnostics.exceptions += 1;
            let code = pdu.data.first().copied().unwrap_or(0);
            log |= match code {
                0..=3 => EVENT_READ_EXCEPTION,
                4 => EVENT_ABORT_EXCEPTION,
                5 | 6 => EVENT_BUSY_EXCEPTION,
                7 => EVENT_NAK_EXCEPTION,
                _ => 0,
            };
        }
        state.push_log(log);
    }

    /// Records an unparseable reception.
    pub(crate) fn comm_error(&self) {
        let mut state = self.state.lock().unwrap();
        state.diagnostics.comm_errors += 1;
        state.push_log(EVENT_INCOMING | EVENT_COMM_ERROR);
    }

    /// Records a reception that exceeded the maximum frame size.
    pub(crate) fn overrun(&self) {
        let mut state = self.state.lock().unwrap();
        state.diagnostics.exceptions += 1;
        state.diagnostics.overruns += 1;
        state.push_log(EVENT_INCOMING | EVENT_CHAR_OVERRUN);
    }
}

#[derive(Debug, Default)]
struct ServerDiagState {
    diagnostics: ServerDiagnostics,
    queue: u32,
}

/// Owner of the per-server counters and the busy queue depth.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServerDiagManager {
    state: Arc<Mutex<ServerDiagState>>,
}

impl ServerDiagManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> ServerDiagnostics {
        self.state.lock().unwrap().diagnostics
    }

    pub(crate) fn message(&self) {
        self.state.lock().unwrap().diagnostics.messages += 1;
    }

    /// An event-generating function entered processing.
    pub(crate) fn event_queued(&self) {
        self.state.lock().unwrap().queue += 1;
    }

    /// An event-generating function finished processing.
    pub(crate) fn event_complete(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.queue > 0);
        state.queue = state.queue.saturating_sub(1);
    }

    /// A successful event-generating function.
    pub(crate) fn event_counter(&self) {
        self.state.lock().unwrap().diagnostics.event_counter += 1;
    }

    pub(crate) fn busy(&self) -> bool {
        self.state.lock().unwrap().queue > 0
    }

    pub(crate) fn clear(&self) {
        self.state.lock().unwrap().diagnostics = ServerDiagnostics::default();
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The channel façade and its transaction multiplexer.
//!
//! A [`Channel`] is a full-duplex Modbus endpoint: clients for any number
//! of remote units and any number of locally hosted [`Server`] units share
//! one transport. The multiplexer task correlates inbound responses with
//! outstanding requests by transaction id and dispatches unsolicited
//! inbound requests to the registered server units.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, RwLock,
    },
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    client::Client,
    diagnostics::{BusDiagManager, BusDiagnostics},
    frame::{Adu, Pdu, TransactionId, UnitId, WILDCARD_UNIT},
    server::Server,
};

/// Bound of the in-process queues feeding the multiplexer.
pub(crate) const QUEUE_DEPTH: usize = 8;

/// A request on its way from a client to the transport, together with
/// the slot its response is delivered to.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) adu: Adu,
    pub(crate) respond: oneshot::Sender<Pdu>,
}

#[derive(Debug)]
pub(crate) struct ChannelCore {
    outbound: mpsc::Sender<Outbound>,
    transaction_id: AtomicU16,
    servers: RwLock<HashMap<UnitId, Server>>,
    diag: BusDiagManager,
    cancel: CancellationToken,
}

impl ChannelCore {
    pub(crate) fn new(
        outbound: mpsc::Sender<Outbound>,
        diag: BusDiagManager,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            transaction_id: AtomicU16::new(0),
            servers: RwLock::new(HashMap::new()),
            diag,
            cancel,
        }
    }

    /// Allocates the next transaction id.
    ///
    /// Wrap-around is fine: collisions are avoided by the pending table,
    /// not by the allocator.
    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.transaction_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Outbound> {
        &self.outbound
    }

    fn server_for(&self, unit_id: UnitId) -> Option<Server> {
        let servers = self.servers.read().unwrap();
        servers
            .get(&unit_id)
            .or_else(|| servers.get(&WILDCARD_UNIT))
            .cloned()
    }
}

/// A full-duplex Modbus endpoint over one transport.
///
/// Created by [`tcp::connect`](crate::tcp::connect),
/// [`tcp::attach`](crate::tcp::attach) or
/// [`rtu::connect`](crate::rtu::connect). Dropping the channel closes it.
#[derive(Debug)]
pub struct Channel {
    core: Arc<ChannelCore>,
    clients: Mutex<HashMap<UnitId, Client>>,
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Self {
        Self {
            core,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the client handle for a remote unit, creating it on
    /// first use.
    ///
    /// All handles for one unit share a single request slot: only one
    /// request per unit is in flight at a time and concurrent callers
    /// serialize.
    pub fn client(&self, unit_id: UnitId) -> Client {
        let mut clients = self.clients.lock().unwrap();
        clients
            .entry(unit_id)
            .or_insert_with(|| Client::new(unit_id, Arc::clone(&self.core)))
            .clone()
    }

    /// Registers a server unit on this channel.
    ///
    /// Inbound requests for `unit_id` (or for any unit if `unit_id` is
    /// [`WILDCARD_UNIT`]) are handled by `server` from now on.
    pub fn set_server(&self, unit_id: UnitId, server: Server) {
        self.core.servers.write().unwrap().insert(unit_id, server);
    }

    /// Snapshots the channel diagnostic counters.
    pub fn diagnostics(&self) -> BusDiagnostics {
        self.core.diag.snapshot()
    }

    /// The channel event log, newest entry first.
    pub fn event_log(&self) -> Vec<u8> {
        self.core.diag.event_log()
    }

    /// Resets the diagnostic counters and the event log.
    pub fn clear_diagnostics(&self) {
        self.core.diag.clear();
    }

    /// Resets the overrun counter.
    pub fn clear_overrun_counter(&self) {
        self.core.diag.clear_overrun();
    }

    /// Closes the channel.
    ///
    /// All pending operations abort with [`Error::ChannelClosed`](crate::Error::ChannelClosed).
    pub fn close(&self) {
        self.core.cancel.cancel();
    }

    /// Whether the channel has been closed, either explicitly or by a
    /// transport failure.
    pub fn is_closed(&self) -> bool {
        self.core.cancel.is_cancelled()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Starts the multiplexer task for one channel.
///
/// Owns the pending table. Outbound requests are recorded as pending and
/// forwarded to the transport writer. Inbound responses consume their
/// pending entry; anything else is offered to the registered servers or
/// dropped.
pub(crate) fn spawn_mux(
    core: Arc<ChannelCore>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    transport_tx: mpsc::UnboundedSender<Adu>,
    mut inbound_rx: mpsc::Receiver<Adu>,
) {
    tokio::spawn(async move {
        let mut pending: HashMap<TransactionId, oneshot::Sender<Pdu>> = HashMap::new();
        let cancel = core.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outbound = outbound_rx.recv() => {
                    let Some(Outbound { adu, respond }) = outbound else {
                        break;
                    };
                    debug_assert!(adu.request);
                    pending.insert(adu.transaction_id, respond);
                    if transport_tx.send(adu).is_err() {
                        break;
                    }
                }
                inbound = inbound_rx.recv() => {
                    let Some(adu) = inbound else {
                        break;
                    };
                    route_inbound(&core, &mut pending, &transport_tx, adu);
                }
            }
        }
        // dropping the pending table aborts all outstanding requests
    });
}

fn route_inbound(
    core: &Arc<ChannelCore>,
    pending: &mut HashMap<TransactionId, oneshot::Sender<Pdu>>,
    transport_tx: &mpsc::UnboundedSender<Adu>,
    adu: Adu,
) {
    if !adu.request {
        if let Some(respond) = pending.remove(&adu.transaction_id) {
            if respond.send(adu.pdu).is_err() {
                // the caller timed out in the meantime
                log::debug!(
                    "late response for transaction {} silently dropped",
                    adu.transaction_id
                );
            }
            return;
        }
    }

    if let Some(server) = core.server_for(adu.unit_id) {
        let core = Arc::clone(core);
        let transport_tx = transport_tx.clone();
        tokio::spawn(async move {
            let Adu {
                transaction_id,
                unit_id,
                pdu,
                ..
            } = adu;
            let reply = match server
                .handle_request(&core.diag, pdu.function, pdu.data)
                .await
            {
                Ok(data) => {
                    log::debug!("handled unit 0x{unit_id:02X} function 0x{:02X}", pdu.function);
                    Pdu::new(pdu.function, data)
                }
                Err(err) => {
                    log::warn!(
                        "request failed unit 0x{unit_id:02X} function 0x{:02X}: {err}",
                        pdu.function
                    );
                    Pdu::exception(pdu.function, err.wire_code())
                }
            };
            let _ = transport_tx.send(Adu {
                request: false,
                transaction_id,
                unit_id,
                pdu: reply,
            });
        });
        return;
    }

    log::debug!(
        "received a frame for unit 0x{:02X} but nothing is serving that address",
        adu.unit_id
    );
}

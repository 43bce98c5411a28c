// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP: MBAP framing over a stream transport, plus a listener
//! that hosts server units for inbound connections.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use futures_util::SinkExt as _;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc,
};
use tokio_util::{
    codec::{Decoder as _, FramedWrite},
    sync::CancellationToken,
};

use crate::{
    channel::{spawn_mux, Channel, ChannelCore, QUEUE_DEPTH},
    codec::tcp::{AduCodec, FrameFault, HEADER_LEN},
    diagnostics::BusDiagManager,
    frame::{Adu, UnitId, WILDCARD_UNIT},
    server::Server,
    Result,
};

const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Budget for completing a partially received frame.
const PARTIAL_READ_DEADLINE: Duration = Duration::from_secs(1);

/// Dials a Modbus TCP endpoint and opens a channel on the connection.
///
/// The connection is tuned with a 60 s keepalive and no-delay.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<Channel> {
    let stream = TcpStream::connect(addr).await?;
    configure(&stream)?;
    Ok(attach(stream))
}

/// Opens a channel on an already established transport.
///
/// The transport is usually a [`TcpStream`], but anything that streams
/// MBAP frames will do.
pub fn attach<T>(transport: T) -> Channel
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let diag = BusDiagManager::new();
    let cancel = CancellationToken::new();

    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);

    let core = Arc::new(ChannelCore::new(outbound_tx, diag.clone(), cancel.clone()));

    let (read_half, write_half) = tokio::io::split(transport);
    tokio::spawn(read_task(read_half, inbound_tx, diag.clone(), cancel.clone()));
    tokio::spawn(write_task(write_half, transport_rx, diag, cancel));
    spawn_mux(Arc::clone(&core), outbound_rx, transport_tx, inbound_rx);

    Channel::new(core)
}

fn configure(stream: &TcpStream) -> Result<()> {
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)?;
    Ok(())
}

async fn read_task<R>(
    mut reader: R,
    inbound: mpsc::Sender<Adu>,
    diag: BusDiagManager,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut codec = AduCodec;
    let mut buf = BytesMut::with_capacity(2 * HEADER_LEN + 253);

    loop {
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(adu)) => {
                    diag.message(adu.unit_id == 0);
                    if inbound.send(adu).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(FrameFault::Oversize { pdu_len }) => {
                    log::warn!("dropping oversize frame: PDU of {pdu_len} bytes");
                    diag.overrun();
                }
                Err(fault @ (FrameFault::BadProtocolId { .. } | FrameFault::BadLength)) => {
                    log::warn!("dropping frame: {fault}");
                    diag.comm_error();
                }
                Err(FrameFault::Io(_)) => unreachable!("decoding performs no I/O"),
            }
        }

        let n = if buf.is_empty() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                n = reader.read_buf(&mut buf) => n,
            }
        } else {
            // a frame is underway: finish it within the deadline
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                read = tokio::time::timeout(PARTIAL_READ_DEADLINE, reader.read_buf(&mut buf)) => {
                    match read {
                        Ok(n) => n,
                        Err(_) => {
                            log::warn!("dropping a stalled partial frame of {} byte(s)", buf.len());
                            diag.comm_error();
                            buf.clear();
                            continue;
                        }
                    }
                }
            }
        };
        match n {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::error!("shutting down reading: {err}");
                break;
            }
        }
    }
    cancel.cancel();
}

async fn write_task<W>(
    writer: W,
    mut transport_rx: mpsc::UnboundedReceiver<Adu>,
    diag: BusDiagManager,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin,
{
    let mut framed = FramedWrite::new(writer, AduCodec);
    loop {
        let adu = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            adu = transport_rx.recv() => match adu {
                Some(adu) => adu,
                None => break,
            },
        };
        if !adu.request {
            diag.response(&adu.pdu);
        }
        if let Err(fault) = framed.send(adu).await {
            log::error!("shutting down writing: {fault}");
            break;
        }
    }
    cancel.cancel();
}

/// Maps one server to the wildcard unit so that it serves every
/// inbound unit id, the common deployment for Modbus TCP.
#[must_use]
pub fn serve_all_units(server: Server) -> HashMap<UnitId, Server> {
    let mut servers = HashMap::new();
    servers.insert(WILDCARD_UNIT, server);
    servers
}

/// A TCP listener hosting server units.
///
/// Every accepted connection becomes a fresh [`Channel`] with the
/// configured unit map registered on it.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    servers: HashMap<UnitId, Server>,
}

impl Listener {
    /// Binds the listening socket.
    ///
    /// Use a `":502"` style address to bind all interfaces.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        servers: HashMap<UnitId, Server>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, servers })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the socket fails.
    pub async fn serve(self) -> Result<()> {
        let mut channels: Vec<Channel> = Vec::new();
        loop {
            let (stream, peer) = self.listener.accept().await?;
            log::debug!("accepted a Modbus TCP connection from {peer}");
            if let Err(err) = configure(&stream) {
                log::warn!("failed to configure the connection from {peer}: {err}");
            }
            let channel = attach(stream);
            for (unit_id, server) in &self.servers {
                channel.set_server(*unit_id, server.clone());
            }
            // dead channels are cleaned up lazily on the next accept
            channels.retain(|c| !c.is_closed());
            channels.push(channel);
        }
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU: CRC-framed, timing-delimited transmission over a serial
//! line.
//!
//! Frames have no length field; the end of a frame is the line going
//! quiet for 1.5 character times, and a transmission may only start
//! after 3.5 character times of silence. One framer task owns that
//! state machine, advanced by byte arrival and timer expiry.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use smallvec::SmallVec;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    sync::{mpsc, Semaphore},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{spawn_mux, Channel, ChannelCore, QUEUE_DEPTH},
    codec::rtu::{decode_frame, encode_frame, FrameFault, MAX_FRAME_LEN},
    diagnostics::BusDiagManager,
    frame::{Adu, Pdu, TransactionId, UnitId},
    Result,
};

// A little above the maximum frame size: oversize is detected at frame
// end, runaway receptions are bit-bucketed beyond this.
const ACCUMULATION_LIMIT: usize = MAX_FRAME_LEN + 4;

/// Opens a serial device and starts a Modbus RTU channel on it.
///
/// `parity` is one of `'N'`, `'O'`, `'E'` and `stop_bits` 1 or 2.
/// `min_frame` raises the frame-end detection pause for devices that
/// send with larger inter-byte gaps; pass [`Duration::ZERO`] for strict
/// Modbus timing. With `dtr` the DTR line is asserted once at open.
pub async fn connect(
    device: &str,
    baud: u32,
    parity: char,
    stop_bits: u8,
    min_frame: Duration,
    dtr: bool,
) -> Result<Channel> {
    use tokio_serial::SerialPort as _;

    let builder = tokio_serial::new(device, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(match parity {
            'N' => tokio_serial::Parity::None,
            'O' => tokio_serial::Parity::Odd,
            'E' => tokio_serial::Parity::Even,
            _ => return Err(illegal_config(format!("illegal parity {parity:?}"))),
        })
        .stop_bits(match stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            _ => return Err(illegal_config(format!("illegal stop bits {stop_bits}"))),
        });
    let mut port = tokio_serial::SerialStream::open(&builder)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    if dtr {
        port.write_data_terminal_ready(true)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    }

    log::debug!("opened Modbus RTU on {device} at {baud}-{parity}-{stop_bits}");
    attach(port, baud, parity, stop_bits, min_frame)
}

/// Starts a Modbus RTU channel on an already opened transport.
///
/// The baud rate, parity and stop bits only parameterize the frame
/// timing; the transport is expected to be configured accordingly.
pub fn attach<T>(
    transport: T,
    baud: u32,
    parity: char,
    stop_bits: u8,
    min_frame: Duration,
) -> Result<Channel>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (pause, idle) = frame_timing(baud, parity, stop_bits, min_frame)?;

    let diag = BusDiagManager::new();
    let cancel = CancellationToken::new();

    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel(QUEUE_DEPTH * 8);

    let core = Arc::new(ChannelCore::new(outbound_tx, diag.clone(), cancel.clone()));

    // pending request txids per unit: RTU responses carry no txid, the
    // one recorded at transmission time is re-attached on reception
    let pending: Arc<Mutex<HashMap<UnitId, TransactionId>>> = Arc::default();
    // the single bus-idle token gating transmissions
    let tx_ready = Arc::new(Semaphore::new(0));

    let (read_half, write_half) = tokio::io::split(transport);
    tokio::spawn(read_task(read_half, event_tx.clone(), cancel.clone()));
    tokio::spawn(write_task(
        write_half,
        transport_rx,
        Arc::clone(&pending),
        Arc::clone(&tx_ready),
        event_tx,
        diag.clone(),
        cancel.clone(),
    ));
    tokio::spawn(framer_task(
        event_rx,
        inbound_tx,
        pending,
        tx_ready,
        diag,
        pause,
        idle,
        cancel,
    ));
    spawn_mux(Arc::clone(&core), outbound_rx, transport_tx, inbound_rx);

    Ok(Channel::new(core))
}

fn illegal_config(message: String) -> crate::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message).into()
}

/// Derives the frame-end pause and the bus-idle period from the line
/// parameters.
///
/// With `bc` bits per character, half a character lasts `bc / (2 baud)`
/// seconds. A frame ends after 1.5 characters of silence (3 half
/// characters) and the bus counts as idle for transmission another 2
/// characters later, 3.5 characters of total silence.
fn frame_timing(
    baud: u32,
    parity: char,
    stop_bits: u8,
    min_frame: Duration,
) -> Result<(Duration, Duration)> {
    if !matches!(parity, 'N' | 'O' | 'E') {
        return Err(illegal_config(format!("illegal parity {parity:?}")));
    }
    if !matches!(stop_bits, 1 | 2) {
        return Err(illegal_config(format!("illegal stop bits {stop_bits}")));
    }
    if baud == 0 {
        return Err(illegal_config("illegal baud rate 0".to_owned()));
    }

    let bits_per_char = 8 + u32::from(stop_bits) + u32::from(parity != 'N');
    let half_char = Duration::from_micros(
        (f64::from(bits_per_char) / (2.0 * f64::from(baud)) * 1_000_000.0) as u64,
    );

    let pause = (3 * half_char).max(Duration::from_millis(1)).max(min_frame);
    let idle = (4 * half_char).max(Duration::from_millis(2));
    Ok((pause, idle))
}

#[derive(Debug)]
enum FramerEvent {
    /// Bytes arrived on the line.
    Rx(Bytes),
    /// Our own transmission finished; the bus was busy with it.
    TxDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    /// Bytes are being received; the frame ends when the line pauses.
    WaitFrame,
    /// A frame just ended; transmission is held off a while longer.
    WaitIdle,
    /// The line is quiet and the transmission token has been granted.
    Idle,
}

async fn read_task<R>(mut reader: R, events: mpsc::Sender<FramerEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = [0u8; MAX_FRAME_LEN];
    loop {
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            n = reader.read(&mut buf) => n,
        };
        match n {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if events.send(FramerEvent::Rx(chunk)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                log::error!("shutting down the serial reader: {err}");
                break;
            }
        }
    }
    cancel.cancel();
}

async fn write_task<W>(
    mut writer: W,
    mut transport_rx: mpsc::UnboundedReceiver<Adu>,
    pending: Arc<Mutex<HashMap<UnitId, TransactionId>>>,
    tx_ready: Arc<Semaphore>,
    events: mpsc::Sender<FramerEvent>,
    diag: BusDiagManager,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let adu = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            adu = transport_rx.recv() => match adu {
                Some(adu) => adu,
                None => break,
            },
        };

        if adu.request {
            pending
                .lock()
                .unwrap()
                .insert(adu.unit_id, adu.transaction_id);
        }

        // hold the frame until the bus has been idle long enough
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = tx_ready.acquire() => permit,
        };
        match permit {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        if !adu.request {
            diag.response(&adu.pdu);
        }

        let frame = encode_frame(&adu);
        if let Err(err) = writer.write_all(&frame).await {
            log::error!("shutting down the serial writer: {err}");
            break;
        }
        if let Err(err) = writer.flush().await {
            log::error!("shutting down the serial writer: {err}");
            break;
        }
        let _ = events.send(FramerEvent::TxDone).await;
    }
    cancel.cancel();
}

#[allow(clippy::too_many_arguments)]
async fn framer_task(
    mut events: mpsc::Receiver<FramerEvent>,
    inbound: mpsc::Sender<Adu>,
    pending: Arc<Mutex<HashMap<UnitId, TransactionId>>>,
    tx_ready: Arc<Semaphore>,
    diag: BusDiagManager,
    pause: Duration,
    idle: Duration,
    cancel: CancellationToken,
) {
    // grant the first transmission token after an initial idle period
    let mut state = BusState::WaitIdle;
    let mut frame: SmallVec<[u8; MAX_FRAME_LEN]> = SmallVec::new();
    // local ids for inbound frames that answer no recorded request
    let mut synthetic_txid: TransactionId = 0;

    let sleep = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(sleep);

    loop {
        match state {
            BusState::WaitFrame => sleep.as_mut().reset(Instant::now() + pause),
            BusState::WaitIdle => sleep.as_mut().reset(Instant::now() + idle),
            // nothing to wait for; any arriving byte re-arms the timer
            BusState::Idle => sleep.as_mut().reset(far_future()),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            event = events.recv() => match event {
                None => return,
                Some(FramerEvent::Rx(chunk)) => {
                    // an active line revokes an unclaimed transmission token
                    if let Ok(permit) = tx_ready.try_acquire() {
                        permit.forget();
                    }
                    for byte in chunk.iter() {
                        if frame.len() < ACCUMULATION_LIMIT {
                            frame.push(*byte);
                        }
                    }
                    state = BusState::WaitFrame;
                }
                Some(FramerEvent::TxDone) => {
                    state = BusState::WaitIdle;
                }
            },
            () = &mut sleep => match state {
                BusState::WaitFrame => {
                    let completed = std::mem::take(&mut frame);
                    if let Some(adu) = handle_frame(
                        &completed,
                        &pending,
                        &mut synthetic_txid,
                        &diag,
                    ) {
                        if inbound.send(adu).await.is_err() {
                            return;
                        }
                    }
                    state = BusState::WaitIdle;
                }
                BusState::WaitIdle => {
                    if tx_ready.available_permits() == 0 {
                        tx_ready.add_permits(1);
                    }
                    state = BusState::Idle;
                }
                BusState::Idle => {}
            },
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

/// Validates a completed frame and turns it into an ADU.
///
/// A pending txid recorded for the unit at transmission time is
/// consumed; otherwise a fresh local txid marks the frame as an
/// unsolicited request for the multiplexer.
fn handle_frame(
    frame: &[u8],
    pending: &Mutex<HashMap<UnitId, TransactionId>>,
    synthetic_txid: &mut TransactionId,
    diag: &BusDiagManager,
) -> Option<Adu> {
    if frame.is_empty() {
        return None;
    }
    match decode_frame(frame) {
        Err(FrameFault::TooShort { len }) => {
            log::warn!("dropping a frame of just {len} byte(s)");
            diag.comm_error();
            None
        }
        Err(FrameFault::Oversize { len }) => {
            log::warn!("dropping a frame of {len} bytes, exceeds {MAX_FRAME_LEN}");
            diag.overrun();
            None
        }
        Err(FrameFault::CrcMismatch { expected, actual }) => {
            log::warn!(
                "dropping a frame with CRC mismatch: expected 0x{expected:04X} but got 0x{actual:04X}"
            );
            diag.comm_error();
            None
        }
        Ok((unit_id, function, data)) => {
            diag.message(unit_id == 0);
            let recorded = pending.lock().unwrap().remove(&unit_id);
            let (transaction_id, request) = match recorded {
                Some(txid) => (txid, false),
                None => {
                    *synthetic_txid = synthetic_txid.wrapping_add(1);
                    (*synthetic_txid, true)
                }
            };
            Some(Adu {
                request,
                transaction_id,
                unit_id,
                pdu: Pdu::new(function, data),
            })
        }
    }
}

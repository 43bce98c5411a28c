// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the RTU transport: two channels wired through an
//! in-memory pipe, with the frame boundaries detected purely by timing.

use std::time::Duration;

use modbus_mux::{prelude::*, rtu};
use tokio::io::AsyncWriteExt as _;

const TIMEOUT: Duration = Duration::from_secs(5);

const UNIT: UnitId = 0x11;

/// A generous frame pause keeps the timing-based framer robust on a
/// loaded test machine.
const MIN_FRAME: Duration = Duration::from_millis(20);

async fn server_unit() -> anyhow::Result<Server> {
    let server = Server::new(
        *b"rtu unit",
        vec![
            "RTU Vendor".to_owned(),
            "RV-1".to_owned(),
            "0.9".to_owned(),
        ],
    )?;
    server
        .register_holdings(16, |_atomic, _address, values, _current| Ok(values.to_vec()))
        .await;
    server
        .register_coils(8, |_atomic, _address, values, _current| Ok(values.to_vec()))
        .await;
    Ok(server)
}

/// Two RTU channels talking to each other through an in-memory duplex
/// pipe; the right-hand side hosts the server.
async fn pipe_pair() -> anyhow::Result<(Channel, Channel)> {
    let (left, right) = tokio::io::duplex(1024);
    let client_side = rtu::attach(left, 19_200, 'E', 1, MIN_FRAME)?;
    let server_side = rtu::attach(right, 19_200, 'E', 1, MIN_FRAME)?;
    server_side.set_server(UNIT, server_unit().await?);
    Ok((client_side, server_side))
}

#[tokio::test]
async fn holding_round_trip_over_the_wire() -> anyhow::Result<()> {
    let (client_side, _server_side) = pipe_pair().await?;
    let client = client_side.client(UNIT);

    client
        .write_multiple_holdings(2, &[7, 8, 9], TIMEOUT)
        .await?;
    assert_eq!(client.read_holdings(3, 2, TIMEOUT).await?, vec![8, 9]);
    Ok(())
}

#[tokio::test]
async fn sequential_requests_share_the_line() -> anyhow::Result<()> {
    let (client_side, _server_side) = pipe_pair().await?;
    let client = client_side.client(UNIT);

    for i in 0..5u16 {
        client.write_single_holding(0, i, TIMEOUT).await?;
        assert_eq!(client.read_holdings(0, 1, TIMEOUT).await?, vec![i]);
    }
    Ok(())
}

#[tokio::test]
async fn coils_over_the_wire() -> anyhow::Result<()> {
    let (client_side, _server_side) = pipe_pair().await?;
    let client = client_side.client(UNIT);

    client
        .write_multiple_coils(0, &[true, false, true], TIMEOUT)
        .await?;
    assert_eq!(
        client.read_coils(0, 3, TIMEOUT).await?,
        vec![true, false, true]
    );
    Ok(())
}

#[tokio::test]
async fn exceptions_travel_back() -> anyhow::Result<()> {
    let (client_side, _server_side) = pipe_pair().await?;
    let client = client_side.client(UNIT);

    let err = client.read_holdings(100, 1, TIMEOUT).await.unwrap_err();
    assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
    Ok(())
}

#[tokio::test]
async fn wildcard_server_on_a_serial_line() -> anyhow::Result<()> {
    let (left, right) = tokio::io::duplex(1024);
    let client_side = rtu::attach(left, 19_200, 'N', 1, MIN_FRAME)?;
    let server_side = rtu::attach(right, 19_200, 'N', 1, MIN_FRAME)?;
    let server = server_unit().await?;
    server.write_holdings_atomic(0, &[0xAB01]).await?;
    server_side.set_server(WILDCARD_UNIT, server);

    let client = client_side.client(0x2A);
    assert_eq!(client.read_holdings(0, 1, TIMEOUT).await?, vec![0xAB01]);
    Ok(())
}

#[tokio::test]
async fn garbage_between_frames_is_dropped() -> anyhow::Result<()> {
    let (mut noise, right) = tokio::io::duplex(1024);
    let server_side = rtu::attach(right, 19_200, 'N', 1, MIN_FRAME)?;
    server_side.set_server(UNIT, server_unit().await?);

    // a burst that cannot carry a valid CRC
    noise.write_all(&[0x00, 0x01, 0x02, 0x03, 0x04]).await?;
    tokio::time::sleep(3 * MIN_FRAME).await;

    assert_eq!(server_side.diagnostics().comm_errors, 1);
    assert_eq!(server_side.diagnostics().messages, 0);
    Ok(())
}

#[tokio::test]
async fn a_dead_line_times_out() -> anyhow::Result<()> {
    let (left, right) = tokio::io::duplex(1024);
    let client_side = rtu::attach(left, 19_200, 'N', 1, MIN_FRAME)?;
    // the far end never answers but keeps the pipe open
    let _far_end = right;

    let client = client_side.client(UNIT);
    let err = client
        .read_holdings(0, 1, Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecvTimeout(_)));
    Ok(())
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pure [Rust](https://www.rust-lang.org)
//! [Modbus](https://en.wikipedia.org/wiki/Modbus) library
//! based on [tokio](https://tokio.rs).
//!
//! Both roles share one connection: a [`Channel`] hands out [`Client`]
//! handles for any number of remote units and hosts any number of local
//! [`Server`] units at the same time, over Modbus TCP (MBAP framing) or
//! Modbus RTU (CRC-framed, timing-delimited serial).
//!
//! ## Features
//!
//! - client & server multiplexed over a single channel
//! - Modbus TCP and Modbus RTU
//! - the full function surface: bits, registers, file records, FIFO,
//!   diagnostics, device identification
//! - transactional access to the server memory model
//! - async (non-blocking)
//!
//! # Examples
//!
//! ## TCP client
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> modbus_mux::Result<()> {
//!     let channel = modbus_mux::tcp::connect("192.168.0.222:502").await?;
//!     let client = channel.client(5);
//!     let data = client
//!         .read_holdings(0x1000, 7, Duration::from_secs(2))
//!         .await?;
//!     println!("Response is '{data:?}'");
//!     Ok(())
//! }
//! ```
//!
//! ## TCP server
//!
//! ```rust,no_run
//! use modbus_mux::{tcp, Server};
//!
//! #[tokio::main]
//! async fn main() -> modbus_mux::Result<()> {
//!     let server = Server::new(
//!         *b"my server",
//!         vec![
//!             "My Vendor".to_owned(),
//!             "PRODUCT-1".to_owned(),
//!             "1.0".to_owned(),
//!         ],
//!     )?;
//!     server
//!         .register_holdings(100, |_atomic, _address, values, _current| {
//!             Ok(values.to_vec())
//!         })
//!         .await;
//!     let listener = tcp::Listener::bind("0.0.0.0:502", tcp::serve_all_units(server)).await?;
//!     listener.serve().await
//! }
//! ```
//!
//! # Protocol-Specification
//!
//! - [MODBUS Application Protocol Specification v1.1b3 (PDF)](http://modbus.org/docs/Modbus_Application_Protocol_V1_1b3.pdf)
//! - [MODBUS over serial line specification and implementation guide v1.02 (PDF)](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf)
//! - [MODBUS Messaging on TCP/IP Implementation Guide v1.0b (PDF)](http://modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf)

pub mod prelude;

pub mod client;
pub mod server;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

mod channel;
mod codec;
mod diagnostics;
mod error;
mod frame;

pub use self::{
    channel::Channel,
    client::Client,
    diagnostics::{BusDiagnostics, ServerDiagnostics},
    error::{Error, Exception, Result},
    frame::{Address, Coil, FunctionCode, Quantity, TransactionId, UnitId, Word, WILDCARD_UNIT},
    server::{Atomic, Server},
};

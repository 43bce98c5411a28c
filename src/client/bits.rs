// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client operations on coils and discrete inputs.

use std::time::Duration;

use super::{check_echo, Client};
use crate::{
    codec::DataBuilder,
    frame::{Address, Coil, Pdu, Quantity},
    Result,
};

impl Client {
    /// Reads `count` coils starting at `address` (0x01).
    pub async fn read_coils(
        &self,
        address: Address,
        count: Quantity,
        timeout: Duration,
    ) -> Result<Vec<Coil>> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(count);
        self.query(timeout, Pdu::new(0x01, p.payload()), |r| {
            r.bits(count.into())
        })
        .await
    }

    /// Reads `count` discrete inputs starting at `address` (0x02).
    pub async fn read_discretes(
        &self,
        address: Address,
        count: Quantity,
        timeout: Duration,
    ) -> Result<Vec<Coil>> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(count);
        self.query(timeout, Pdu::new(0x02, p.payload()), |r| {
            r.bits(count.into())
        })
        .await
    }

    /// Writes a single coil (0x05).
    ///
    /// Returns the value that was actually stored, which a server-side
    /// update callback may have replaced.
    pub async fn write_single_coil(
        &self,
        address: Address,
        value: Coil,
        timeout: Duration,
    ) -> Result<Coil> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(if value { 0xFF00 } else { 0x0000 });
        self.query(timeout, Pdu::new(0x05, p.payload()), |r| {
            check_echo("address", address, r.word()?)?;
            Ok(r.word()? == 0xFF00)
        })
        .await
    }

    /// Writes multiple coils (0x0F) and returns the echoed count.
    pub async fn write_multiple_coils(
        &self,
        address: Address,
        values: &[Coil],
        timeout: Duration,
    ) -> Result<Quantity> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.nbits(values);
        self.query(timeout, Pdu::new(0x0F, p.payload()), |r| {
            check_echo("address", address, r.word()?)?;
            r.word()
        })
        .await
    }
}

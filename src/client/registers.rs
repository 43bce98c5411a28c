// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client operations on input and holding registers.

use std::time::Duration;

use super::{check_echo, Client};
use crate::{
    codec::DataBuilder,
    frame::{Address, Pdu, Quantity, Word},
    Error, Result,
};

impl Client {
    /// Reads `count` input registers starting at `address` (0x04).
    pub async fn read_inputs(
        &self,
        address: Address,
        count: Quantity,
        timeout: Duration,
    ) -> Result<Vec<Word>> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(count);
        self.query(timeout, Pdu::new(0x04, p.payload()), |r| {
            let byte_count = r.byte()?;
            check_echo("byte count", usize::from(count) * 2, byte_count.into())?;
            r.words(count.into())
        })
        .await
    }

    /// Reads `count` holding registers starting at `address` (0x03).
    pub async fn read_holdings(
        &self,
        address: Address,
        count: Quantity,
        timeout: Duration,
    ) -> Result<Vec<Word>> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(count);
        self.query(timeout, Pdu::new(0x03, p.payload()), |r| {
            let byte_count = r.byte()?;
            check_echo("byte count", usize::from(count) * 2, byte_count.into())?;
            r.words(count.into())
        })
        .await
    }

    /// Writes a single holding register (0x06).
    pub async fn write_single_holding(
        &self,
        address: Address,
        value: Word,
        timeout: Duration,
    ) -> Result<()> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(value);
        self.query(timeout, Pdu::new(0x06, p.payload()), |r| {
            check_echo("address", address, r.word()?)?;
            check_echo("value", value, r.word()?)?;
            Ok(())
        })
        .await
    }

    /// Writes multiple holding registers (0x10).
    pub async fn write_multiple_holdings(
        &self,
        address: Address,
        values: &[Word],
        timeout: Duration,
    ) -> Result<()> {
        let count = values.len() as Quantity;
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(count);
        p.byte(2 * count as u8);
        p.words(values);
        self.query(timeout, Pdu::new(0x10, p.payload()), |r| {
            check_echo("address", address, r.word()?)?;
            check_echo("count", count, r.word()?)?;
            Ok(())
        })
        .await
    }

    /// Writes one register window, then reads another (0x17).
    ///
    /// The write happens first on the server; the address ranges may
    /// overlap.
    pub async fn write_read_multiple_holdings(
        &self,
        read_address: Address,
        read_count: Quantity,
        write_address: Address,
        values: &[Word],
        timeout: Duration,
    ) -> Result<Vec<Word>> {
        let write_count = values.len() as Quantity;
        let mut p = DataBuilder::new();
        p.word(read_address);
        p.word(read_count);
        p.word(write_address);
        p.word(write_count);
        p.byte(2 * write_count as u8);
        p.words(values);
        self.query(timeout, Pdu::new(0x17, p.payload()), |r| {
            let byte_count = r.byte()?;
            check_echo("byte count", usize::from(read_count) * 2, byte_count.into())?;
            r.words(read_count.into())
        })
        .await
    }

    /// Applies an AND and an OR mask to a holding register (0x16).
    ///
    /// `result = (current AND and_mask) OR (or_mask AND NOT and_mask)`
    pub async fn mask_write_holding(
        &self,
        address: Address,
        and_mask: Word,
        or_mask: Word,
        timeout: Duration,
    ) -> Result<()> {
        let mut p = DataBuilder::new();
        p.word(address);
        p.word(and_mask);
        p.word(or_mask);
        self.query(timeout, Pdu::new(0x16, p.payload()), |r| {
            check_echo("address", address, r.word()?)?;
            check_echo("AND mask", and_mask, r.word()?)?;
            check_echo("OR mask", or_mask, r.word()?)?;
            Ok(())
        })
        .await
    }

    /// Reads the FIFO queue whose depth register lives at `address` (0x18).
    ///
    /// The depth is stored at `address` itself, the values in the
    /// registers that follow it. At most 31 values are returned.
    pub async fn read_fifo_queue(
        &self,
        address: Address,
        timeout: Duration,
    ) -> Result<Vec<Word>> {
        let mut p = DataBuilder::new();
        p.word(address);
        self.query(timeout, Pdu::new(0x18, p.payload()), |r| {
            let byte_count = r.word()?;
            let count = r.word()?;
            if count * 2 + 2 != byte_count {
                return Err(Error::Protocol(format!(
                    "FIFO response count {count} does not corroborate its byte count {byte_count}"
                )));
            }
            r.words(count.into())
        })
        .await
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handlers for the register functions: inputs, holdings, mask write,
//! combined write/read and the FIFO queue.

use super::Server;
use crate::{
    codec::{DataBuilder, DataReader},
    Error, Result,
};

const MAX_FIFO_COUNT: u16 = 31;

// Response byte counts are a single byte, which limits one read to
// 125 registers on the wire.
const MAX_READ_REGISTERS: u16 = 125;

fn check_read_count(count: u16) -> Result<()> {
    if count > MAX_READ_REGISTERS {
        return Err(Error::illegal_data_value(format!(
            "at most {MAX_READ_REGISTERS} registers can be read at once, not {count}"
        )));
    }
    Ok(())
}

impl Server {
    /// 0x03 Read Holding Registers
    pub(super) async fn handle_read_holdings(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        check_read_count(count)?;

        let atomic = self.start_atomic().await;
        let registers = atomic.read_holdings(address, count)?;

        response.byte(2 * registers.len() as u8);
        response.words(&registers);
        Ok(())
    }

    /// 0x04 Read Input Registers
    pub(super) async fn handle_read_inputs(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        check_read_count(count)?;

        let atomic = self.start_atomic().await;
        let inputs = atomic.read_inputs(address, count)?;

        response.byte(2 * inputs.len() as u8);
        response.words(&inputs);
        Ok(())
    }

    /// 0x06 Write Single Holding Register
    pub(super) async fn handle_write_single_holding(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let value = request.word()?;

        let mut atomic = self.start_atomic().await;
        self.holding_write_through(&mut atomic, address, &[value])?;

        response.word(address);
        response.word(value);
        Ok(())
    }

    /// 0x10 Write Multiple Holding Registers
    pub(super) async fn handle_write_multiple_holdings(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        let byte_count = request.byte()?;
        if usize::from(byte_count) != usize::from(count) * 2 {
            return Err(Error::illegal_data_value(format!(
                "expected {} bytes for {count} registers, but got {byte_count}",
                usize::from(count) * 2
            )));
        }
        let words = request.words(count.into())?;

        let mut atomic = self.start_atomic().await;
        self.holding_write_through(&mut atomic, address, &words)?;

        response.word(address);
        response.word(count);
        Ok(())
    }

    /// 0x16 Mask Write Holding Register
    ///
    /// `result = (current AND and_mask) OR (or_mask AND NOT and_mask)`
    pub(super) async fn handle_mask_write_holding(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let and_mask = request.word()?;
        let or_mask = request.word()?;

        let mut atomic = self.start_atomic().await;
        let current = atomic.read_holdings(address, 1)?[0];
        let result = (current & and_mask) | (or_mask & !and_mask);
        self.holding_write_through(&mut atomic, address, &[result])?;

        response.word(address);
        response.word(and_mask);
        response.word(or_mask);
        Ok(())
    }

    /// 0x17 Read/Write Multiple Holding Registers
    ///
    /// The write happens first; the address ranges may overlap.
    pub(super) async fn handle_write_read_holdings(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let read_address = request.word()?;
        let read_count = request.word()?;
        check_read_count(read_count)?;
        let write_address = request.word()?;
        let write_count = request.word()?;
        let byte_count = request.byte()?;
        if usize::from(byte_count) != usize::from(write_count) * 2 {
            return Err(Error::illegal_data_value(format!(
                "expected {} bytes for {write_count} registers, but got {byte_count}",
                usize::from(write_count) * 2
            )));
        }
        let words = request.words(write_count.into())?;

        let mut atomic = self.start_atomic().await;
        self.holding_write_through(&mut atomic, write_address, &words)?;
        let registers = atomic.read_holdings(read_address, read_count)?;

        response.byte(2 * registers.len() as u8);
        response.words(&registers);
        Ok(())
    }

    /// 0x18 Read FIFO Queue
    ///
    /// The register at `address` holds the queue depth, the values live
    /// in the registers that follow it.
    pub(super) async fn handle_read_fifo(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;

        let atomic = self.start_atomic().await;
        let count = atomic.read_holdings(address, 1)?[0];
        if count > MAX_FIFO_COUNT {
            return Err(Error::illegal_data_value(format!(
                "FIFO can have at most {MAX_FIFO_COUNT} values, not {count}"
            )));
        }
        let values = atomic.read_holdings(address + 1, count)?;

        response.word(count * 2 + 2);
        response.word(count);
        response.words(&values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{diagnostics::BusDiagManager, server::Server, Exception};

    async fn register_server() -> Server {
        let server = Server::new(
            *b"registers",
            vec!["v".to_owned(), "p".to_owned(), "1".to_owned()],
        )
        .unwrap();
        server
            .register_holdings(16, |_atomic, _address, values, _current| Ok(values.to_vec()))
            .await;
        server.register_inputs(4).await;
        server
    }

    #[tokio::test]
    async fn write_multiple_validates_the_byte_count() {
        let server = register_server().await;
        let bus = BusDiagManager::new();

        let err = server
            .handle_request(
                &bus,
                0x10,
                Bytes::from_static(&[0x00, 0x00, 0x00, 0x02, 0x05, 0xAB, 0xCD, 0xEF, 0x12, 0x00]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataValue));
    }

    #[tokio::test]
    async fn mask_write_applies_the_masks() {
        let server = register_server().await;
        let bus = BusDiagManager::new();

        let rsp = server
            .handle_request(
                &bus,
                0x16,
                Bytes::from_static(&[0x00, 0x00, 0xF2, 0xF2, 0x25, 0x25]),
            )
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[0x00, 0x00, 0xF2, 0xF2, 0x25, 0x25]);
        // (0x0000 & 0xF2F2) | (0x2525 & !0xF2F2)
        assert_eq!(
            server.read_holdings_atomic(0, 1).await.unwrap(),
            vec![0x0505]
        );
    }

    #[tokio::test]
    async fn mask_write_out_of_range_is_an_address_error() {
        let server = register_server().await;
        let bus = BusDiagManager::new();

        let err = server
            .handle_request(
                &bus,
                0x16,
                Bytes::from_static(&[0x00, 0x20, 0xFF, 0xFF, 0x00, 0x00]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
    }

    #[tokio::test]
    async fn write_read_overlapping_ranges() {
        let server = register_server().await;
        let bus = BusDiagManager::new();

        // write [0x1212] * 1 at address 0, read 4 from address 0
        let rsp = server
            .handle_request(
                &bus,
                0x17,
                Bytes::from_static(&[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x12, 0x12]),
            )
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[8, 0x12, 0x12, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn fifo_depth_is_limited() {
        let server = register_server().await;
        server.write_holdings_atomic(5, &[32]).await.unwrap();
        let bus = BusDiagManager::new();

        let err = server
            .handle_request(&bus, 0x18, Bytes::from_static(&[0x00, 0x05]))
            .await
            .unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataValue));
    }

    #[tokio::test]
    async fn fifo_returns_the_queued_values() {
        let server = register_server().await;
        server.write_holdings_atomic(5, &[2, 100, 200]).await.unwrap();
        let bus = BusDiagManager::new();

        let rsp = server
            .handle_request(&bus, 0x18, Bytes::from_static(&[0x00, 0x05]))
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[0x00, 6, 0x00, 2, 0x00, 100, 0x00, 200]);
    }
}

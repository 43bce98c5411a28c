// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handlers for the bit-addressed functions: coils and discrete inputs.

use super::Server;
use crate::{
    codec::{DataBuilder, DataReader},
    Error, Result,
};

// A packed read must fit the one-byte count of the response.
const MAX_READ_BITS: u16 = 2000;

fn check_bit_count(count: u16) -> Result<()> {
    if count > MAX_READ_BITS {
        return Err(Error::illegal_data_value(format!(
            "at most {MAX_READ_BITS} bits can be read at once, not {count}"
        )));
    }
    Ok(())
}

impl Server {
    /// 0x01 Read Coils
    pub(super) async fn handle_read_coils(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        check_bit_count(count)?;

        let atomic = self.start_atomic().await;
        let coils = atomic.read_coils(address, count)?;

        response.bits(&coils);
        Ok(())
    }

    /// 0x02 Read Discrete Inputs
    pub(super) async fn handle_read_discretes(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        check_bit_count(count)?;

        let atomic = self.start_atomic().await;
        let discretes = atomic.read_discretes(address, count)?;

        response.bits(&discretes);
        Ok(())
    }

    /// 0x05 Write Single Coil
    pub(super) async fn handle_write_single_coil(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let value = request.word()?;

        let mut atomic = self.start_atomic().await;
        let replacement = self.coil_write_through(&mut atomic, address, &[value != 0])?;

        response.word(address);
        response.word(if replacement[0] { 0xFF00 } else { 0x0000 });
        Ok(())
    }

    /// 0x0F Write Multiple Coils
    pub(super) async fn handle_write_multiple_coils(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let address = request.word()?;
        let count = request.word()?;
        let coils = request.bits(count.into())?;

        let mut atomic = self.start_atomic().await;
        let replacement = self.coil_write_through(&mut atomic, address, &coils)?;

        response.word(address);
        response.word(replacement.len() as u16);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{diagnostics::BusDiagManager, server::Server, Exception};

    async fn coil_server() -> Server {
        let server = Server::new(
            *b"coils",
            vec!["v".to_owned(), "p".to_owned(), "1".to_owned()],
        )
        .unwrap();
        server
            .register_coils(16, |_atomic, _address, values, _current| Ok(values.to_vec()))
            .await;
        server.register_discretes(8).await;
        server
    }

    #[tokio::test]
    async fn write_single_coil_echoes_the_stored_bit() {
        let server = coil_server().await;
        let bus = BusDiagManager::new();

        let rsp = server
            .handle_request(&bus, 0x05, Bytes::from_static(&[0x00, 0x03, 0xFF, 0x00]))
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[0x00, 0x03, 0xFF, 0x00]);

        assert_eq!(
            server.read_coils_atomic(2, 3).await.unwrap(),
            vec![false, true, false]
        );
    }

    #[tokio::test]
    async fn write_then_read_coils() {
        let server = coil_server().await;
        let bus = BusDiagManager::new();

        // write 4 coils at address 8: 1101
        let rsp = server
            .handle_request(
                &bus,
                0x0F,
                Bytes::from_static(&[0x00, 0x08, 0x00, 0x04, 0x01, 0b1101]),
            )
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[0x00, 0x08, 0x00, 0x04]);

        let rsp = server
            .handle_request(&bus, 0x01, Bytes::from_static(&[0x00, 0x08, 0x00, 0x04]))
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[0x01, 0b1101]);
    }

    #[tokio::test]
    async fn callback_replacement_wins() {
        let server = Server::new(
            *b"coils",
            vec!["v".to_owned(), "p".to_owned(), "1".to_owned()],
        )
        .unwrap();
        // the callback inverts every proposed value
        server
            .register_coils(8, |_atomic, _address, values, _current| {
                Ok(values.iter().map(|v| !v).collect())
            })
            .await;
        let bus = BusDiagManager::new();

        let rsp = server
            .handle_request(&bus, 0x05, Bytes::from_static(&[0x00, 0x00, 0xFF, 0x00]))
            .await
            .unwrap();
        // the echo reflects what was actually stored
        assert_eq!(&rsp[..], &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(server.read_coils_atomic(0, 1).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn reads_beyond_the_provisioned_range_fail() {
        let server = coil_server().await;
        let bus = BusDiagManager::new();

        let err = server
            .handle_request(&bus, 0x02, Bytes::from_static(&[0x00, 0x06, 0x00, 0x04]))
            .await
            .unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handlers for the file record functions.

use super::Server;
use crate::{
    codec::{DataBuilder, DataReader},
    frame::MAX_PDU_DATA_LEN,
    Error, Result,
};

// The only reference type the Modbus specification defines.
const REFERENCE_TYPE: u8 = 0x06;

struct FileReadRequest {
    file: u16,
    record: u16,
    count: u16,
}

struct FileWriteRequest {
    file: u16,
    record: u16,
    values: Vec<u16>,
}

impl Server {
    /// 0x14 Read File Record
    pub(super) async fn handle_read_file_record(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let size = request.byte()?;
        request.can_read(size.into())?;
        if size % 7 != 0 {
            return Err(Error::illegal_data_value(format!(
                "expected subrequest size to be a multiple of 7, not {size}"
            )));
        }

        let mut anticipated = 1;
        let mut requests = Vec::with_capacity(usize::from(size) / 7);
        for _ in 0..size / 7 {
            let reference = request.byte()?;
            if reference != REFERENCE_TYPE {
                return Err(Error::illegal_data_value(format!(
                    "expected subrequest reference 0x06 but got 0x{reference:02X}"
                )));
            }
            let file = request.word()?;
            let record = request.word()?;
            let count = request.word()?;
            anticipated += 2 + usize::from(count) * 2;
            requests.push(FileReadRequest {
                file,
                record,
                count,
            });
        }

        if anticipated > MAX_PDU_DATA_LEN {
            return Err(Error::illegal_data_value(format!(
                "file record responses would exceed the payload limit of {MAX_PDU_DATA_LEN}, requested {anticipated}"
            )));
        }

        let atomic = self.start_atomic().await;

        response.beacon();
        for req in &requests {
            let records = atomic.read_file_records(req.file, req.record, req.count)?;
            response.byte(1 + 2 * records.len() as u8);
            response.byte(REFERENCE_TYPE);
            response.words(&records);
        }

        Ok(())
    }

    /// 0x15 Write File Record
    pub(super) async fn handle_write_file_record(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let size = request.byte()?;
        request.can_read(size.into())?;

        let mut requests = Vec::new();
        while request.cursor() <= usize::from(size) {
            request.can_read(7)?;
            let reference = request.byte()?;
            if reference != REFERENCE_TYPE {
                return Err(Error::illegal_data_value(format!(
                    "expected subrequest reference 0x06 but got 0x{reference:02X}"
                )));
            }
            let file = request.word()?;
            let record = request.word()?;
            let count = request.word()?;
            let values = request.words(count.into())?;
            requests.push(FileWriteRequest {
                file,
                record,
                values,
            });
        }

        let mut atomic = self.start_atomic().await;

        response.byte(size);
        for req in &requests {
            let current =
                atomic.read_file_records(req.file, req.record, req.values.len() as u16)?;
            let replacement =
                (self.update_files())(&mut atomic, req.file, req.record, &req.values, &current)?;
            atomic.write_file_records(req.file, req.record, &replacement)?;

            response.byte(REFERENCE_TYPE);
            response.word(req.file);
            response.word(req.record);
            response.word(replacement.len() as u16);
            response.words(&replacement);
        }

        Ok(())
    }
}

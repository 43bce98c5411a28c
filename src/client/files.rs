// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client operations on file records.

use std::time::Duration;

use super::{check_echo, Client};
use crate::{
    codec::DataBuilder,
    frame::{Address, Pdu, MAX_PDU_DATA_LEN},
    Error, Result,
};

const REFERENCE_TYPE: u8 = 0x06;

/// One window of records to read from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReadRequest {
    pub file: u16,
    pub record: Address,
    pub length: u16,
}

/// One window of records to write to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWriteRequest {
    pub file: u16,
    pub record: Address,
    pub values: Vec<u16>,
}

/// A window of records returned from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecords {
    pub file: u16,
    pub record: Address,
    pub values: Vec<u16>,
}

impl Client {
    /// Reads multiple windows of file records in one request (0x14).
    ///
    /// A file holding fewer records than requested yields a short (or
    /// empty) window.
    pub async fn read_multi_file_records(
        &self,
        requests: &[FileReadRequest],
        timeout: Duration,
    ) -> Result<Vec<FileRecords>> {
        let request_size = 1 + 7 * requests.len();
        if request_size > MAX_PDU_DATA_LEN {
            return Err(Error::Protocol(format!(
                "too many record requests: {request_size} bytes exceeds the payload limit of {MAX_PDU_DATA_LEN}"
            )));
        }
        let anticipated: usize = 1 + requests
            .iter()
            .map(|r| 2 + usize::from(r.length) * 2)
            .sum::<usize>();
        if anticipated > MAX_PDU_DATA_LEN {
            return Err(Error::Protocol(format!(
                "request would result in a response of {anticipated} bytes which exceeds the limit of {MAX_PDU_DATA_LEN}"
            )));
        }

        let mut p = DataBuilder::new();
        p.beacon();
        for req in requests {
            p.byte(REFERENCE_TYPE);
            p.word(req.file);
            p.word(req.record);
            p.word(req.length);
        }

        self.query(timeout, Pdu::new(0x14, p.payload()), |r| {
            // The total length byte cannot be anticipated: files shorter
            // than the requested window return fewer records.
            let _ = r.byte()?;
            let mut records = Vec::with_capacity(requests.len());
            for req in requests {
                let record_len = r.byte()?;
                let count = u16::from(record_len) / 2;
                if count > req.length {
                    return Err(Error::Protocol(format!(
                        "expected a record payload of at most {} bytes, but got {record_len}",
                        req.length * 2 + 1
                    )));
                }
                let reference = r.byte()?;
                check_echo("reference type", REFERENCE_TYPE, reference)?;
                let values = r.words(count.into())?;
                records.push(FileRecords {
                    file: req.file,
                    record: req.record,
                    values,
                });
            }
            Ok(records)
        })
        .await
    }

    /// Reads up to `length` records from one file (0x14).
    pub async fn read_file_records(
        &self,
        file: u16,
        record: Address,
        length: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>> {
        let requests = [FileReadRequest {
            file,
            record,
            length,
        }];
        let mut records = self.read_multi_file_records(&requests, timeout).await?;
        debug_assert_eq!(records.len(), 1);
        Ok(records.remove(0).values)
    }

    /// Writes multiple windows of file records in one request (0x15).
    ///
    /// The server responds with a byte-exact echo of the request body;
    /// anything else fails the call.
    pub async fn write_multi_file_records(
        &self,
        requests: &[FileWriteRequest],
        timeout: Duration,
    ) -> Result<()> {
        let size: usize = 1 + requests
            .iter()
            .map(|r| 7 + r.values.len() * 2)
            .sum::<usize>();
        if size > MAX_PDU_DATA_LEN {
            return Err(Error::Protocol(format!(
                "request would result in a payload of {size} bytes which exceeds the limit of {MAX_PDU_DATA_LEN}"
            )));
        }

        let mut p = DataBuilder::new();
        p.beacon();
        for req in requests {
            p.byte(REFERENCE_TYPE);
            p.word(req.file);
            p.word(req.record);
            p.word(req.values.len() as u16);
            p.words(&req.values);
        }
        let payload = p.payload();
        let echo = payload.clone();

        self.query(timeout, Pdu::new(0x15, payload), move |r| {
            let response = r.bytes(r.len())?;
            if response != echo {
                return Err(Error::Protocol(
                    "expected the write file record response to echo the request".into(),
                ));
            }
            Ok(())
        })
        .await
    }

    /// Writes a window of records to one file (0x15).
    pub async fn write_file_records(
        &self,
        file: u16,
        record: Address,
        values: &[u16],
        timeout: Duration,
    ) -> Result<()> {
        let requests = [FileWriteRequest {
            file,
            record,
            values: values.to_vec(),
        }];
        self.write_multi_file_records(&requests, timeout).await
    }
}

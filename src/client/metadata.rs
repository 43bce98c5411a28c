// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client operations for metadata and diagnostics: server id, device
//! identification, diagnostic subfunctions and the comm event log.

use std::{collections::BTreeMap, time::Duration};

use super::{check_echo, Client};
use crate::{
    codec::DataBuilder,
    frame::Pdu,
    Error, Result,
};

const MEI_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// Response to Report Server ID (0x11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerId {
    /// The opaque id bytes of the server unit.
    pub id: Vec<u8>,
    /// Whether the unit reports itself as running.
    pub run_indicator: bool,
}

/// Response to Comm Event Counter (0x0B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommEventCounter {
    /// Whether the unit is currently processing a command.
    pub busy: bool,
    /// Completed event-generating operations.
    pub event_count: u16,
}

/// Response to Comm Event Log (0x0C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommEventLog {
    pub busy: bool,
    pub event_count: u16,
    pub message_count: u16,
    /// Event bytes, newest first.
    pub events: Vec<u8>,
}

/// The device identification objects of a remote unit (0x2B / MEI 0x0E).
///
/// The seven standard objects are unpacked into named fields; extended
/// objects (ids `0x80+`) are collected in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub vendor_name: String,
    pub product_code: String,
    pub major_minor_version: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
    pub user_application_name: String,
    pub additional: Vec<String>,
}

/// Counters that can be queried with a diagnostic counter report (0x08).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Diagnostic {
    BusMessages = 0x0B,
    BusCommErrors = 0x0C,
    BusExceptions = 0x0D,
    ServerMessages = 0x0E,
    ServerNoResponses = 0x0F,
    ServerNaks = 0x10,
    ServerBusies = 0x11,
    BusCharacterOverruns = 0x12,
}

#[derive(Debug, Default)]
struct DeviceInfoAccumulator {
    conformity: u8,
    objects: BTreeMap<u8, String>,
}

impl Client {
    /// Reads the exception status byte (0x07).
    ///
    /// The meaning of the bits is device specific.
    pub async fn read_exception_status(&self, timeout: Duration) -> Result<u8> {
        self.query(timeout, Pdu::new(0x07, DataBuilder::new().payload()), |r| {
            r.byte()
        })
        .await
    }

    /// Retrieves the id of the remote unit (0x11).
    pub async fn report_server_id(&self, timeout: Duration) -> Result<ServerId> {
        self.query(timeout, Pdu::new(0x11, DataBuilder::new().payload()), |r| {
            let data = r.nbytes()?;
            if data.is_empty() {
                return Err(Error::Protocol(
                    "expected the server id to carry at least the run indicator".into(),
                ));
            }
            Ok(ServerId {
                id: data[..data.len() - 1].to_vec(),
                run_indicator: data[data.len() - 1] > 0,
            })
        })
        .await
    }

    /// Echoes query data through the remote unit (0x08/0x00).
    pub async fn diagnostic_echo(&self, data: &[u16], timeout: Duration) -> Result<Vec<u16>> {
        let mut p = DataBuilder::new();
        p.word(0x00);
        p.words(data);
        let expected = data.to_vec();
        self.query(timeout, Pdu::new(0x08, p.payload()), move |r| {
            let subfunction = r.word()?;
            check_echo("subfunction", 0x00u16, subfunction)?;
            let words = r.words(expected.len())?;
            if words != expected {
                return Err(Error::Protocol(
                    "expected the diagnostic echo to return the query data unchanged".into(),
                ));
            }
            Ok(words)
        })
        .await
    }

    /// Reads the diagnostic register of the remote unit (0x08/0x02).
    pub async fn diagnostic_register(&self, timeout: Duration) -> Result<u16> {
        let mut p = DataBuilder::new();
        p.word(0x02);
        p.word(0x00);
        self.query(timeout, Pdu::new(0x08, p.payload()), |r| {
            let subfunction = r.word()?;
            check_echo("subfunction", 0x02u16, subfunction)?;
            r.word()
        })
        .await
    }

    /// Clears all counters and the event log on the remote unit (0x08/0x0A).
    pub async fn diagnostic_clear(&self, timeout: Duration) -> Result<()> {
        let mut p = DataBuilder::new();
        p.word(0x0A);
        p.word(0x00);
        self.query(timeout, Pdu::new(0x08, p.payload()), |r| {
            let subfunction = r.word()?;
            check_echo("subfunction", 0x0Au16, subfunction)?;
            let echo = r.word()?;
            check_echo("data field", 0x0000u16, echo)?;
            Ok(())
        })
        .await
    }

    /// Queries one diagnostic counter (0x08/0x0B..0x12).
    pub async fn diagnostic_count(
        &self,
        counter: Diagnostic,
        timeout: Duration,
    ) -> Result<u16> {
        let subfunction = counter as u16;
        let mut p = DataBuilder::new();
        p.word(subfunction);
        p.word(0x00);
        self.query(timeout, Pdu::new(0x08, p.payload()), move |r| {
            check_echo("subfunction", subfunction, r.word()?)?;
            r.word()
        })
        .await
    }

    /// Clears the character overrun counter (0x08/0x14).
    pub async fn diagnostic_overrun_clear(&self, timeout: Duration) -> Result<()> {
        let mut p = DataBuilder::new();
        p.word(0x14);
        p.word(0x00);
        self.query(timeout, Pdu::new(0x08, p.payload()), |r| {
            let subfunction = r.word()?;
            check_echo("subfunction", 0x14u16, subfunction)?;
            let echo = r.word()?;
            check_echo("data field", 0x0000u16, echo)?;
            Ok(())
        })
        .await
    }

    /// Reads the comm event counter (0x0B).
    pub async fn comm_event_counter(&self, timeout: Duration) -> Result<CommEventCounter> {
        self.query(timeout, Pdu::new(0x0B, DataBuilder::new().payload()), |r| {
            let busy = r.word()?;
            let event_count = r.word()?;
            Ok(CommEventCounter {
                busy: busy == 0xFFFF,
                event_count,
            })
        })
        .await
    }

    /// Reads the comm event log (0x0C).
    pub async fn comm_event_log(&self, timeout: Duration) -> Result<CommEventLog> {
        self.query(timeout, Pdu::new(0x0C, DataBuilder::new().payload()), |r| {
            let length = r.byte()?;
            if length < 6 {
                return Err(Error::Protocol(format!(
                    "expected the comm event log to hold at least 6 bytes, not {length}"
                )));
            }
            let busy = r.word()?;
            let event_count = r.word()?;
            let message_count = r.word()?;
            let events = r.bytes(usize::from(length) - 6)?;
            Ok(CommEventLog {
                busy: busy == 0xFFFF,
                event_count,
                message_count,
                events: events.to_vec(),
            })
        })
        .await
    }

    /// Retrieves all device identification objects of the remote unit
    /// (0x2B / MEI 0x0E).
    ///
    /// Fragmented responses are re-requested with the announced `next`
    /// object id until the full basic, regular and extended sections
    /// (as far as the conformity level promises them) are assembled.
    pub async fn device_identification(
        &self,
        timeout: Duration,
    ) -> Result<DeviceIdentification> {
        let mut fill = DeviceInfoAccumulator {
            conformity: 0x01,
            ..Default::default()
        };
        self.device_info_section(1, &mut fill, timeout).await?;
        if fill.conformity & 0x7F >= 2 {
            self.device_info_section(2, &mut fill, timeout).await?;
        }
        if fill.conformity & 0x7F >= 3 {
            self.device_info_section(3, &mut fill, timeout).await?;
        }

        let mut objects = fill.objects;
        let mut take = |id: u8| objects.remove(&id).unwrap_or_default();
        let vendor_name = take(0);
        let product_code = take(1);
        let major_minor_version = take(2);
        let vendor_url = take(3);
        let product_name = take(4);
        let model_name = take(5);
        let user_application_name = take(6);
        // BTreeMap iteration yields the extended ids in ascending order
        let additional = objects
            .into_iter()
            .filter(|(id, _)| *id >= 0x80)
            .map(|(_, value)| value)
            .collect();
        Ok(DeviceIdentification {
            vendor_name,
            product_code,
            major_minor_version,
            vendor_url,
            product_name,
            model_name,
            user_application_name,
            additional,
        })
    }

    /// Retrieves a single device identification object (0x2B / MEI 0x0E,
    /// read device id code 4).
    pub async fn device_identification_object(
        &self,
        object_id: u8,
        timeout: Duration,
    ) -> Result<String> {
        let mut p = DataBuilder::new();
        p.byte(MEI_DEVICE_IDENTIFICATION);
        p.byte(4);
        p.byte(object_id);
        self.query(timeout, Pdu::new(0x2B, p.payload()), move |r| {
            r.can_read(6)?;
            let mei = r.byte()?;
            check_echo("MEI type", MEI_DEVICE_IDENTIFICATION, mei)?;
            let code = r.byte()?;
            check_echo("read device id code", 4, code)?;
            let _conformity = r.byte()?;
            let more = r.byte()?;
            let next = r.byte()?;
            let count = r.byte()?;
            if more != 0 || next != 0 || count != 1 {
                return Err(Error::Protocol(format!(
                    "expected a single unfragmented object, got count {count}, more 0x{more:02X}, next 0x{next:02X}"
                )));
            }
            let id = r.byte()?;
            check_echo("object id", object_id, id)?;
            let value = r.nbytes()?;
            Ok(String::from_utf8_lossy(&value).into_owned())
        })
        .await
    }

    async fn device_info_section(
        &self,
        code: u8,
        fill: &mut DeviceInfoAccumulator,
        timeout: Duration,
    ) -> Result<()> {
        let mut next = match code {
            1 => 0x00,
            2 => 0x03,
            _ => 0x80,
        };
        let mut initialized = false;
        loop {
            let (conformity, more, announced_next, objects) =
                self.device_info_fragment(code, next, timeout).await?;
            if !initialized {
                initialized = true;
                fill.conformity = conformity;
            }
            for (id, value) in objects {
                fill.objects.insert(id, value);
            }
            if more == 0 {
                return Ok(());
            }
            next = announced_next;
        }
    }

    async fn device_info_fragment(
        &self,
        code: u8,
        from: u8,
        timeout: Duration,
    ) -> Result<(u8, u8, u8, Vec<(u8, String)>)> {
        let mut p = DataBuilder::new();
        p.byte(MEI_DEVICE_IDENTIFICATION);
        p.byte(code);
        p.byte(from);
        self.query(timeout, Pdu::new(0x2B, p.payload()), move |r| {
            r.can_read(6)?;
            let mei = r.byte()?;
            check_echo("MEI type", MEI_DEVICE_IDENTIFICATION, mei)?;
            let echoed_code = r.byte()?;
            check_echo("read device id code", code, echoed_code)?;
            let conformity = r.byte()?;
            let more = r.byte()?;
            let next = r.byte()?;
            let count = r.byte()?;
            let mut objects = Vec::with_capacity(count.into());
            for _ in 0..count {
                let id = r.byte()?;
                let value = r.nbytes()?;
                objects.push((id, String::from_utf8_lossy(&value).into_owned()));
            }
            Ok((conformity, more, next, objects))
        })
        .await
    }
}

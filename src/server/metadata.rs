// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handlers for the metadata and diagnostic functions.

use super::Server;
use crate::{
    codec::{DataBuilder, DataReader},
    diagnostics::BusDiagManager,
    Error, Result,
};

// MEI type for Device Identification under function 0x2B.
const MEI_DEVICE_IDENTIFICATION: u8 = 0x0E;

// Payload budget for one device identification fragment.
const FRAGMENT_BUDGET: usize = 252;

fn clamp_counter(value: u32) -> u16 {
    value.min(u32::from(u16::MAX)) as u16
}

impl Server {
    /// 0x07 Read Exception Status
    ///
    /// The meaning of the status bits is device specific; this server
    /// has none to report.
    pub(super) fn handle_read_exception_status(
        &self,
        _request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        response.byte(0);
        Ok(())
    }

    /// 0x11 Report Server ID
    pub(super) fn handle_report_server_id(
        &self,
        _request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let mut to_send = self.id().to_vec();
        // trailing run indicator: on
        to_send.push(0xFF);
        response.nbytes(&to_send);
        Ok(())
    }

    /// 0x2B Encapsulated Interface, MEI 0x0E Device Identification
    ///
    /// Objects are appended while the fragment budget lasts; the
    /// `more`/`next` fields let the client continue where a fragment
    /// stopped.
    pub(super) fn handle_device_identification(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let mei = request.byte()?;
        if mei != MEI_DEVICE_IDENTIFICATION {
            return Err(Error::illegal_data_value(format!(
                "unsupported MEI type 0x{mei:02X}, only Device Identification 0x0E"
            )));
        }
        request.can_read(2)?;
        let code = request.byte()?;
        let object_id = request.byte()?;

        if !(1..=4).contains(&code) {
            return Err(Error::illegal_data_value(format!(
                "no such read device id code {code}"
            )));
        }
        if (0x07..0x80).contains(&object_id) {
            return Err(Error::illegal_data_value(format!(
                "illegal object id 0x{object_id:02X} for device identification"
            )));
        }

        let device_info = self.device_info();
        let requested_id = object_id;
        // extended objects 0x80.. live at indices 7.. of the info list
        let index = if object_id >= 0x80 {
            usize::from(object_id) - 0x80 + 7
        } else {
            usize::from(object_id)
        };

        if index >= device_info.len() {
            return Err(Error::illegal_data_value(format!(
                "no such object id 0x{requested_id:02X} for device identification"
            )));
        }
        let incompatible = match code {
            1 => index > 2,
            2 => index <= 2 || index > 7,
            3 => index < 7,
            _ => false,
        };
        if incompatible {
            return Err(Error::illegal_data_value(format!(
                "cannot get object id 0x{requested_id:02X} with read device id code {code}"
            )));
        }

        // per category: basic ends at 3, regular at 7, extended streams to
        // the end of the object list, the specific code targets one object
        let limits = [0, 3, 7, device_info.len(), index + 1];
        let max = limits[usize::from(code)].min(device_info.len());

        let mut conformity = 1;
        if device_info.len() > 3 {
            conformity = 2;
        }
        if device_info.len() > 7 {
            conformity = 3;
        }
        conformity |= 0x80;

        let to_send = &device_info[index..max];
        let mut budget = FRAGMENT_BUDGET;
        let mut sent = 0;
        for info in to_send {
            let needed = info.len() + 1;
            if budget < needed {
                break;
            }
            budget -= needed;
            sent += 1;
        }

        let (more, next) = if to_send.len() > sent {
            (0xFF, requested_id + sent as u8)
        } else {
            (0x00, 0x00)
        };

        response.byte(MEI_DEVICE_IDENTIFICATION);
        response.byte(code);
        response.byte(conformity);
        response.byte(more);
        response.byte(next);
        response.byte(sent as u8);
        for (i, info) in to_send[..sent].iter().enumerate() {
            response.byte(requested_id + i as u8);
            response.nbytes(info.as_bytes());
        }
        Ok(())
    }

    /// 0x08 Diagnostic
    pub(super) fn handle_diagnostic(
        &self,
        bus: &BusDiagManager,
        request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let subfunction = request.word()?;
        response.word(subfunction);
        match subfunction {
            // return query data
            0x00 => {
                let count = (request.len() - request.cursor()) / 2;
                let words = request.words(count)?;
                response.words(&words);
                Ok(())
            }
            // restart communications option: accepted, no effect
            0x01 => {
                let code = request.word()?;
                response.word(code);
                Ok(())
            }
            0x02 => {
                self.check_diagnostic_data(request, "diagnostic register")?;
                response.word(0);
                Ok(())
            }
            // clear counters and the event log
            0x0A => {
                self.check_diagnostic_data(request, "clear counters")?;
                self.diag().clear();
                bus.clear();
                response.word(0);
                Ok(())
            }
            0x0B => self.diagnostic_count(request, response, bus.snapshot().messages),
            0x0C => self.diagnostic_count(request, response, bus.snapshot().comm_errors),
            0x0D => self.diagnostic_count(request, response, bus.snapshot().exceptions),
            0x0E => self.diagnostic_count(request, response, self.diagnostics().messages),
            0x0F => self.diagnostic_count(request, response, self.diagnostics().no_response),
            0x10 => self.diagnostic_count(request, response, self.diagnostics().server_naks),
            0x11 => self.diagnostic_count(request, response, self.diagnostics().server_busy),
            0x12 => self.diagnostic_count(request, response, bus.snapshot().overruns),
            // clear the overrun counter
            0x14 => {
                self.check_diagnostic_data(request, "clear overrun counter")?;
                bus.clear_overrun();
                response.word(0);
                Ok(())
            }
            _ => Err(Error::illegal_data_value(format!(
                "unsupported diagnostic sub function 0x{subfunction:04X}"
            ))),
        }
    }

    fn check_diagnostic_data(&self, request: &mut DataReader, name: &str) -> Result<()> {
        let check = request.word()?;
        if check != 0 {
            return Err(Error::illegal_data_value(format!(
                "{name} requires a 0x0000 data field, not 0x{check:04X}"
            )));
        }
        Ok(())
    }

    fn diagnostic_count(
        &self,
        request: &mut DataReader,
        response: &mut DataBuilder,
        value: u32,
    ) -> Result<()> {
        self.check_diagnostic_data(request, "counter report")?;
        response.word(clamp_counter(value));
        Ok(())
    }

    /// 0x0B Comm Event Counter
    pub(super) fn handle_comm_event_counter(
        &self,
        _request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        response.word(if self.busy() { 0xFFFF } else { 0x0000 });
        response.word(clamp_counter(self.diagnostics().event_counter));
        Ok(())
    }

    /// 0x0C Comm Event Log
    pub(super) fn handle_comm_event_log(
        &self,
        bus: &BusDiagManager,
        _request: &mut DataReader,
        response: &mut DataBuilder,
    ) -> Result<()> {
        let diag = self.diagnostics();
        let events = bus.event_log();
        response.byte(events.len() as u8 + 6);
        response.word(if self.busy() { 0xFFFF } else { 0x0000 });
        response.word(clamp_counter(diag.event_counter));
        response.word(clamp_counter(diag.messages));
        response.bytes(&events);
        Ok(())
    }
}

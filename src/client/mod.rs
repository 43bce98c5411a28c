// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clients driving remote server units.
//!
//! A [`Client`] is obtained from [`Channel::client`](crate::Channel::client)
//! and issues requests against one remote unit. Every operation takes an
//! explicit timeout budget that applies independently to the send and the
//! receive step.

use std::{sync::Arc, time::Duration};

use tokio::sync::oneshot;

use crate::{
    channel::{ChannelCore, Outbound},
    codec::DataReader,
    frame::{Adu, Pdu, UnitId},
    Error, Result,
};

mod bits;
mod files;
mod metadata;
mod registers;

pub use self::files::{FileReadRequest, FileRecords, FileWriteRequest};
pub use self::metadata::{
    CommEventCounter, CommEventLog, DeviceIdentification, Diagnostic, ServerId,
};

/// A client handle for a single remote unit.
///
/// Cloning is cheap; all clones of one unit's client share the single
/// in-flight request slot.
#[derive(Debug, Clone)]
pub struct Client {
    unit_id: UnitId,
    core: Arc<ChannelCore>,
    // serializes callers: one request per unit in flight
    call_guard: Arc<tokio::sync::Mutex<()>>,
}

impl Client {
    pub(crate) fn new(unit_id: UnitId, core: Arc<ChannelCore>) -> Self {
        Self {
            unit_id,
            core,
            call_guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The remote unit id this client is bound to.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Sends one request and decodes the matching response.
    ///
    /// The timeout budget is applied to the send step and again to the
    /// receive step. On a receive timeout the pending entry remains and
    /// a late response is silently dropped by the multiplexer.
    pub(crate) async fn query<T>(
        &self,
        timeout: Duration,
        pdu: Pdu,
        decode: impl FnOnce(&mut DataReader) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.call_guard.lock().await;

        let (respond, response) = oneshot::channel();
        let adu = Adu {
            request: true,
            transaction_id: self.core.next_transaction_id(),
            unit_id: self.unit_id,
            pdu,
        };

        match tokio::time::timeout(timeout, self.core.outbound().send(Outbound { adu, respond }))
            .await
        {
            Err(_) => return Err(Error::SendTimeout(timeout)),
            Ok(Err(_)) => return Err(Error::ChannelClosed),
            Ok(Ok(())) => {}
        }

        let pdu = match tokio::time::timeout(timeout, response).await {
            Err(_) => return Err(Error::RecvTimeout(timeout)),
            Ok(Err(_)) => return Err(Error::ChannelClosed),
            Ok(Ok(pdu)) => pdu,
        };

        if pdu.is_exception() {
            let code = pdu.data.first().copied().unwrap_or(0);
            return Err(Error::from_exception_code(code));
        }

        let mut reader = DataReader::new(pdu.data);
        let value = decode(&mut reader)?;
        reader.remaining()?;
        Ok(value)
    }
}

pub(crate) fn check_echo<T: PartialEq + std::fmt::Display>(
    what: &str,
    expected: T,
    actual: T,
) -> Result<()> {
    if expected != actual {
        return Err(Error::Protocol(format!(
            "expected the response to echo the request {what} {expected}, not {actual}"
        )));
    }
    Ok(())
}

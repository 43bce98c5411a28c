// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{io, time::Duration};

use thiserror::Error;

/// A _Modbus_ exception code as transmitted in an exception response PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    ServerBusy = 0x06,
}

impl Exception {
    pub(crate) const fn description(self) -> &'static str {
        use Exception::*;

        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            ServerBusy => "Server busy",
        }
    }
}

impl From<Exception> for u8 {
    fn from(from: Exception) -> Self {
        from as u8
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type for all fallible operations of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was answered (or refused locally) with a _Modbus_ exception.
    #[error("{exception}: {message}")]
    Exception {
        exception: Exception,
        message: String,
    },

    /// A response failed structural validation, e.g. a mismatched echo
    /// field, an inconsistent length prefix or leftover payload bytes.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request could not be handed to the transport within the budget.
    #[error("timeout exceeded waiting to send: {0:?}")]
    SendTimeout(Duration),

    /// No matching response arrived within the budget.
    #[error("timeout exceeded waiting to receive: {0:?}")]
    RecvTimeout(Duration),

    /// The channel has been closed and no further requests are possible.
    #[error("channel closed")]
    ChannelClosed,

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] io::Error),
}

impl Error {
    pub(crate) fn illegal_function(message: impl Into<String>) -> Self {
        Self::Exception {
            exception: Exception::IllegalFunction,
            message: message.into(),
        }
    }

    pub(crate) fn illegal_data_address(message: impl Into<String>) -> Self {
        Self::Exception {
            exception: Exception::IllegalDataAddress,
            message: message.into(),
        }
    }

    pub(crate) fn illegal_data_value(message: impl Into<String>) -> Self {
        Self::Exception {
            exception: Exception::IllegalDataValue,
            message: message.into(),
        }
    }

    /// The exception code a server puts on the wire for this error.
    ///
    /// Everything that is not already part of the taxonomy is reported
    /// as a server device failure.
    pub(crate) fn wire_code(&self) -> u8 {
        match self {
            Self::Exception { exception, .. } => (*exception).into(),
            _ => Exception::ServerDeviceFailure.into(),
        }
    }

    /// Turns the code byte of a received exception PDU into an error.
    pub(crate) fn from_exception_code(code: u8) -> Self {
        let exception = match code {
            0x01 => Exception::IllegalFunction,
            0x02 => Exception::IllegalDataAddress,
            0x03 => Exception::IllegalDataValue,
            0x04 => Exception::ServerDeviceFailure,
            0x06 => Exception::ServerBusy,
            _ => {
                return Self::Protocol(format!("unknown exception code 0x{code:02X}"));
            }
        };
        Self::Exception {
            exception,
            message: format!("Modbus {}", exception.description()),
        }
    }

    /// Returns the exception of an [`Error::Exception`], if any.
    #[must_use]
    pub fn exception(&self) -> Option<Exception> {
        match self {
            Self::Exception { exception, .. } => Some(*exception),
            _ => None,
        }
    }
}

/// Result type alias with the crate-level [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

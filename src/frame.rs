// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// A single byte for addressing Modbus devices on a shared channel.
pub type UnitId = u8;

/// Identifier correlating a request with its response.
///
/// Carried in the MBAP header on TCP and synthesized locally on RTU
/// where the wire format has no room for it.
pub type TransactionId = u16;

/// The reserved unit id that matches any inbound unit if no exact
/// server registration exists.
pub const WILDCARD_UNIT: UnitId = 0xFF;

/// Maximum number of payload bytes in a PDU, excluding the function code.
pub(crate) const MAX_PDU_DATA_LEN: usize = 253;

/// A Modbus protocol data unit: the function code and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pdu {
    pub(crate) function: FunctionCode,
    pub(crate) data: Bytes,
}

impl Pdu {
    pub(crate) fn new(function: FunctionCode, data: Bytes) -> Self {
        Self { function, data }
    }

    /// Builds the exception response for a failed request.
    pub(crate) fn exception(function: FunctionCode, code: u8) -> Self {
        Self {
            function: function | 0x80,
            data: Bytes::copy_from_slice(&[code]),
        }
    }

    pub(crate) fn is_exception(&self) -> bool {
        self.function >= 0x80
    }
}

/// A Modbus application data unit: a PDU plus the channel envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Adu {
    /// Whether this ADU travels from a client to a server.
    pub(crate) request: bool,
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
    pub(crate) pdu: Pdu,
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports, re-exported for convenience.
//!
//! ```
//! use modbus_mux::prelude::*;
//! ```

pub use crate::{
    client::{
        Client, CommEventCounter, CommEventLog, DeviceIdentification, Diagnostic,
        FileReadRequest, FileRecords, FileWriteRequest, ServerId,
    },
    server::{Atomic, Server},
    Address, BusDiagnostics, Channel, Coil, Error, Exception, Quantity, Result,
    ServerDiagnostics, UnitId, Word, WILDCARD_UNIT,
};

#[cfg(feature = "rtu")]
pub use crate::rtu;

#[cfg(feature = "tcp")]
pub use crate::tcp;

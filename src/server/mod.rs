// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locally hosted server units.
//!
//! A [`Server`] owns the memory model for one unit: discretes, coils,
//! inputs, holding registers and file records. It is bound to a channel
//! with [`Channel::set_server`](crate::Channel::set_server) and from then
//! on answers matching inbound requests. Local code accesses the same
//! memory through [atomics](Atomic).

use std::sync::{Arc, RwLock};

use bytes::Bytes;

use crate::{
    codec::{DataBuilder, DataReader},
    diagnostics::{BusDiagManager, ServerDiagManager, ServerDiagnostics},
    frame::{Address, FunctionCode},
    Error, Result,
};

mod bits;
mod cache;
mod files;
mod metadata;
mod registers;

pub use self::cache::Atomic;
use self::cache::CacheState;

/// Callback invoked when a remote client writes coils.
///
/// Receives the atomic of the triggering request, the write address, the
/// proposed values and the current value window. The returned values are
/// what actually gets stored. The callback may perform further cache
/// operations through the atomic but cannot complete it.
pub type UpdateCoils =
    dyn Fn(&mut Atomic, Address, &[bool], &[bool]) -> Result<Vec<bool>> + Send + Sync;

/// Callback invoked when a remote client writes holding registers.
pub type UpdateHoldings =
    dyn Fn(&mut Atomic, Address, &[u16], &[u16]) -> Result<Vec<u16>> + Send + Sync;

/// Callback invoked when a remote client writes file records.
///
/// The additional leading parameter is the file number.
pub type UpdateFiles =
    dyn Fn(&mut Atomic, u16, Address, &[u16], &[u16]) -> Result<Vec<u16>> + Send + Sync;

/// A server unit hosting the Modbus memory model for one unit id.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    id: Vec<u8>,
    device_info: Vec<String>,
    cache: Arc<tokio::sync::Mutex<CacheState>>,
    diag: ServerDiagManager,
    update_coils: RwLock<Option<Arc<UpdateCoils>>>,
    update_holdings: RwLock<Option<Arc<UpdateHoldings>>>,
    update_files: RwLock<Option<Arc<UpdateFiles>>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.inner.id)
            .field("device_info", &self.inner.device_info)
            .finish_non_exhaustive()
    }
}

struct HandlerMeta {
    min_size: usize,
    event: bool,
}

fn handler_meta(function: FunctionCode) -> Option<HandlerMeta> {
    let (min_size, event) = match function {
        0x01..=0x06 => (4, true),
        0x07 => (0, false),
        0x08 => (2, false),
        0x0B | 0x0C => (0, false),
        0x0F | 0x10 => (4, true),
        0x11 => (0, false),
        0x14 => (1, false),
        0x15 => (8, false),
        0x16 => (6, true),
        0x17 => (9, true),
        0x18 => (2, true),
        0x2B => (1, false),
        _ => return None,
    };
    Some(HandlerMeta { min_size, event })
}

impl Server {
    /// Creates a server unit.
    ///
    /// `id` is the opaque byte string returned by Report Server ID.
    /// `device_info` must hold at least the three mandatory device
    /// identification objects (vendor name, product code, version);
    /// entries beyond index 6 are served as extended objects `0x80+`.
    pub fn new(id: impl Into<Vec<u8>>, device_info: Vec<String>) -> Result<Self> {
        if device_info.len() < 3 {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "device info requires at least 3 entries, not {}",
                    device_info.len()
                ),
            )));
        }
        Ok(Self {
            inner: Arc::new(ServerInner {
                id: id.into(),
                device_info,
                cache: Arc::new(tokio::sync::Mutex::new(CacheState::default())),
                diag: ServerDiagManager::new(),
                update_coils: RwLock::new(None),
                update_holdings: RwLock::new(None),
                update_files: RwLock::new(None),
            }),
        })
    }

    /// Current diagnostic counters of this server unit.
    pub fn diagnostics(&self) -> ServerDiagnostics {
        self.inner.diag.snapshot()
    }

    /// Whether a command is actively being handled.
    pub fn busy(&self) -> bool {
        self.inner.diag.busy()
    }

    /// Acquires exclusive access to the memory model.
    ///
    /// Only one atomic is active at a time; waiters are admitted in
    /// acquisition order once the current one is dropped.
    pub async fn start_atomic(&self) -> Atomic {
        Atomic::new(Arc::clone(&self.inner.cache).lock_owned().await)
    }

    /// Provisions `count` discretes, keeping existing values.
    pub async fn register_discretes(&self, count: usize) {
        self.start_atomic().await.ensure_discretes(count);
    }

    /// Provisions `count` coils and installs the write-through callback.
    pub async fn register_coils<F>(&self, count: usize, update: F)
    where
        F: Fn(&mut Atomic, Address, &[bool], &[bool]) -> Result<Vec<bool>> + Send + Sync + 'static,
    {
        self.start_atomic().await.ensure_coils(count);
        *self.inner.update_coils.write().unwrap() = Some(Arc::new(update));
    }

    /// Provisions `count` input registers, keeping existing values.
    pub async fn register_inputs(&self, count: usize) {
        self.start_atomic().await.ensure_inputs(count);
    }

    /// Provisions `count` holding registers and installs the write-through callback.
    pub async fn register_holdings<F>(&self, count: usize, update: F)
    where
        F: Fn(&mut Atomic, Address, &[u16], &[u16]) -> Result<Vec<u16>> + Send + Sync + 'static,
    {
        self.start_atomic().await.ensure_holdings(count);
        *self.inner.update_holdings.write().unwrap() = Some(Arc::new(update));
    }

    /// Provisions `count` files and installs the write-through callback.
    pub async fn register_files<F>(&self, count: usize, update: F)
    where
        F: Fn(&mut Atomic, u16, Address, &[u16], &[u16]) -> Result<Vec<u16>> + Send + Sync + 'static,
    {
        self.start_atomic().await.ensure_files(count);
        *self.inner.update_files.write().unwrap() = Some(Arc::new(update));
    }

    /// Reads discretes in a single-operation atomic.
    pub async fn read_discretes_atomic(&self, address: Address, count: u16) -> Result<Vec<bool>> {
        self.start_atomic().await.read_discretes(address, count)
    }

    /// Writes discretes in a single-operation atomic.
    pub async fn write_discretes_atomic(&self, address: Address, values: &[bool]) -> Result<()> {
        self.start_atomic().await.write_discretes(address, values)
    }

    /// Reads coils in a single-operation atomic.
    pub async fn read_coils_atomic(&self, address: Address, count: u16) -> Result<Vec<bool>> {
        self.start_atomic().await.read_coils(address, count)
    }

    /// Writes coils in a single-operation atomic.
    pub async fn write_coils_atomic(&self, address: Address, values: &[bool]) -> Result<()> {
        self.start_atomic().await.write_coils(address, values)
    }

    /// Reads input registers in a single-operation atomic.
    pub async fn read_inputs_atomic(&self, address: Address, count: u16) -> Result<Vec<u16>> {
        self.start_atomic().await.read_inputs(address, count)
    }

    /// Writes input registers in a single-operation atomic.
    pub async fn write_inputs_atomic(&self, address: Address, values: &[u16]) -> Result<()> {
        self.start_atomic().await.write_inputs(address, values)
    }

    /// Reads holding registers in a single-operation atomic.
    pub async fn read_holdings_atomic(&self, address: Address, count: u16) -> Result<Vec<u16>> {
        self.start_atomic().await.read_holdings(address, count)
    }

    /// Writes holding registers in a single-operation atomic.
    pub async fn write_holdings_atomic(&self, address: Address, values: &[u16]) -> Result<()> {
        self.start_atomic().await.write_holdings(address, values)
    }

    /// Reads file records in a single-operation atomic.
    pub async fn read_file_records_atomic(
        &self,
        file: u16,
        record: Address,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.start_atomic().await.read_file_records(file, record, count)
    }

    /// Writes file records in a single-operation atomic.
    pub async fn write_file_records_atomic(
        &self,
        file: u16,
        record: Address,
        values: &[u16],
    ) -> Result<()> {
        self.start_atomic().await.write_file_records(file, record, values)
    }

    pub(crate) fn diag(&self) -> &ServerDiagManager {
        &self.inner.diag
    }

    fn id(&self) -> &[u8] {
        &self.inner.id
    }

    fn device_info(&self) -> &[String] {
        &self.inner.device_info
    }

    fn update_coils(&self) -> Arc<UpdateCoils> {
        self.inner
            .update_coils
            .read()
            .unwrap()
            .clone()
            .expect("coil update handler not registered")
    }

    fn update_holdings(&self) -> Arc<UpdateHoldings> {
        self.inner
            .update_holdings
            .read()
            .unwrap()
            .clone()
            .expect("holding update handler not registered")
    }

    fn update_files(&self) -> Arc<UpdateFiles> {
        self.inner
            .update_files
            .read()
            .unwrap()
            .clone()
            .expect("file update handler not registered")
    }

    /// Runs one inbound request against this unit and produces the
    /// response payload. Called from the channel multiplexer.
    pub(crate) async fn handle_request(
        &self,
        bus: &BusDiagManager,
        function: FunctionCode,
        data: Bytes,
    ) -> Result<Bytes> {
        let Some(meta) = handler_meta(function) else {
            return Err(Error::illegal_function(format!(
                "function code 0x{function:02X} not implemented"
            )));
        };

        self.inner.diag.message();
        if meta.event {
            self.inner.diag.event_queued();
        }

        let result = self.dispatch(bus, function, data, meta.min_size).await;

        if meta.event {
            self.inner.diag.event_complete();
            if result.is_ok() {
                self.inner.diag.event_counter();
            }
        }

        result
    }

    async fn dispatch(
        &self,
        bus: &BusDiagManager,
        function: FunctionCode,
        data: Bytes,
        min_size: usize,
    ) -> Result<Bytes> {
        let mut request = DataReader::new(data);
        request.can_read(min_size)?;
        let mut response = DataBuilder::new();

        match function {
            0x01 => self.handle_read_coils(&mut request, &mut response).await?,
            0x02 => self.handle_read_discretes(&mut request, &mut response).await?,
            0x03 => self.handle_read_holdings(&mut request, &mut response).await?,
            0x04 => self.handle_read_inputs(&mut request, &mut response).await?,
            0x05 => self.handle_write_single_coil(&mut request, &mut response).await?,
            0x06 => {
                self.handle_write_single_holding(&mut request, &mut response)
                    .await?;
            }
            0x07 => self.handle_read_exception_status(&mut request, &mut response)?,
            0x08 => self.handle_diagnostic(bus, &mut request, &mut response)?,
            0x0B => self.handle_comm_event_counter(&mut request, &mut response)?,
            0x0C => self.handle_comm_event_log(bus, &mut request, &mut response)?,
            0x0F => {
                self.handle_write_multiple_coils(&mut request, &mut response)
                    .await?;
            }
            0x10 => {
                self.handle_write_multiple_holdings(&mut request, &mut response)
                    .await?;
            }
            0x11 => self.handle_report_server_id(&mut request, &mut response)?,
            0x14 => self.handle_read_file_record(&mut request, &mut response).await?,
            0x15 => self.handle_write_file_record(&mut request, &mut response).await?,
            0x16 => {
                self.handle_mask_write_holding(&mut request, &mut response)
                    .await?;
            }
            0x17 => {
                self.handle_write_read_holdings(&mut request, &mut response)
                    .await?;
            }
            0x18 => self.handle_read_fifo(&mut request, &mut response).await?,
            0x2B => self.handle_device_identification(&mut request, &mut response)?,
            _ => unreachable!("dispatch table covers all registered functions"),
        }

        request.remaining()?;
        Ok(response.payload())
    }

    /// Common write-through for coils: read the current value, let the
    /// registered callback decide, then store the replacement.
    fn coil_write_through(
        &self,
        atomic: &mut Atomic,
        address: Address,
        values: &[bool],
    ) -> Result<Vec<bool>> {
        let current = atomic.read_coils(address, 1)?;
        let replacement = (self.update_coils())(atomic, address, values, &current)?;
        atomic.write_coils(address, &replacement)?;
        Ok(replacement)
    }

    /// Common write-through for holding registers.
    fn holding_write_through(
        &self,
        atomic: &mut Atomic,
        address: Address,
        values: &[u16],
    ) -> Result<()> {
        let current = atomic.read_holdings(address, 1)?;
        let replacement = (self.update_holdings())(atomic, address, values, &current)?;
        atomic.write_holdings(address, &replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Server {
        Server::new(
            *b"unit under test",
            vec![
                "Test Vendor".to_owned(),
                "TV-1".to_owned(),
                "1.0".to_owned(),
            ],
        )
        .unwrap()
    }

    fn echo_holdings(
        _atomic: &mut Atomic,
        _address: Address,
        values: &[u16],
        _current: &[u16],
    ) -> Result<Vec<u16>> {
        Ok(values.to_vec())
    }

    #[test]
    fn requires_three_device_info_entries() {
        assert!(Server::new(*b"x", vec!["a".to_owned(), "b".to_owned()]).is_err());
    }

    #[tokio::test]
    async fn unknown_function_is_rejected() {
        let server = test_server();
        let bus = BusDiagManager::new();
        let err = server
            .handle_request(&bus, 0x65, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), 0x01);
        // only accepted functions count as messages
        assert_eq!(server.diagnostics().messages, 0);
    }

    #[tokio::test]
    async fn short_request_is_rejected() {
        let server = test_server();
        let bus = BusDiagManager::new();
        let err = server
            .handle_request(&bus, 0x03, Bytes::from_static(&[0x00, 0x00]))
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), 0x03);
    }

    #[tokio::test]
    async fn event_counter_tracks_successful_events_only() {
        let server = test_server();
        server.register_holdings(8, echo_holdings).await;
        let bus = BusDiagManager::new();

        // read holdings: event generating, succeeds
        let rsp = server
            .handle_request(&bus, 0x03, Bytes::from_static(&[0, 0, 0, 2]))
            .await
            .unwrap();
        assert_eq!(&rsp[..], &[4, 0, 0, 0, 0]);

        // read out of range: event generating, fails
        let err = server
            .handle_request(&bus, 0x03, Bytes::from_static(&[0, 7, 0, 2]))
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), 0x02);

        // report server id: not event generating
        server.handle_request(&bus, 0x11, Bytes::new()).await.unwrap();

        let diag = server.diagnostics();
        assert_eq!(diag.messages, 3);
        assert_eq!(diag.event_counter, 1);
        assert!(!server.busy());
    }

    #[tokio::test]
    async fn leftover_request_bytes_are_rejected() {
        let server = test_server();
        server.register_holdings(8, echo_holdings).await;
        let bus = BusDiagManager::new();
        let err = server
            .handle_request(&bus, 0x03, Bytes::from_static(&[0, 0, 0, 2, 0xAA]))
            .await
            .unwrap_err();
        assert_eq!(err.wire_code(), 0x04);
    }

    #[tokio::test]
    async fn atomics_do_not_interleave() {
        let server = test_server();
        server.register_holdings(4, echo_holdings).await;

        let writer = {
            let server = server.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    server.write_holdings_atomic(0, &[0xBEEF]).await.unwrap();
                }
            })
        };

        for _ in 0..100 {
            let mut atomic = server.start_atomic().await;
            atomic.write_holdings(0, &[0x1234]).unwrap();
            tokio::task::yield_now().await;
            // no write from the other task may land mid-batch
            assert_eq!(atomic.read_holdings(0, 1).unwrap()[0], 0x1234);
            drop(atomic);
            tokio::task::yield_now().await;
        }

        writer.await.unwrap();
    }
}

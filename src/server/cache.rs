// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server memory model and its serialized access discipline.

use tokio::sync::OwnedMutexGuard;

use crate::{frame::Address, Error, Result};

/// Highest record address a file may grow to.
const MAX_FILE_RECORDS: usize = 10_000;

/// The typed sequences a server unit exposes to remote clients.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) discretes: Vec<bool>,
    pub(crate) coils: Vec<bool>,
    pub(crate) inputs: Vec<u16>,
    pub(crate) holdings: Vec<u16>,
    pub(crate) files: Vec<Vec<u16>>,
}

/// Exclusive access to a server's cache for a batch of reads and writes.
///
/// An `Atomic` is obtained from [`Server::start_atomic`](super::Server::start_atomic).
/// It grants linearized access: no other atomic can observe or modify the
/// cache until this one is dropped. Dropping the guard completes the
/// atomic and admits the next waiter, so batches cannot leak the lock on
/// any exit path.
///
/// ```no_run
/// # async fn demo(server: modbus_mux::Server) -> modbus_mux::Result<()> {
/// let mut atomic = server.start_atomic().await;
/// let level = atomic.read_holdings(0, 1)?[0];
/// atomic.write_holdings(1, &[level.wrapping_add(1)])?;
/// // dropping `atomic` completes the batch
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Atomic {
    state: OwnedMutexGuard<CacheState>,
}

fn check_address(name: &str, address: usize, count: usize, limit: usize) -> Result<()> {
    if address + count <= limit {
        return Ok(());
    }
    Err(Error::illegal_data_address(format!(
        "{name}: unable to access {count} item(s) from {address} with limit of {limit}"
    )))
}

impl Atomic {
    pub(crate) fn new(state: OwnedMutexGuard<CacheState>) -> Self {
        Self { state }
    }

    /// Reads `count` discretes starting at `address`.
    pub fn read_discretes(&self, address: Address, count: u16) -> Result<Vec<bool>> {
        let (address, count) = (usize::from(address), usize::from(count));
        check_address("discrete", address, count, self.state.discretes.len())?;
        Ok(self.state.discretes[address..address + count].to_vec())
    }

    /// Writes discretes starting at `address`.
    pub fn write_discretes(&mut self, address: Address, values: &[bool]) -> Result<()> {
        let address = usize::from(address);
        check_address("discrete", address, values.len(), self.state.discretes.len())?;
        self.state.discretes[address..address + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Reads `count` coils starting at `address`.
    pub fn read_coils(&self, address: Address, count: u16) -> Result<Vec<bool>> {
        let (address, count) = (usize::from(address), usize::from(count));
        check_address("coil", address, count, self.state.coils.len())?;
        Ok(self.state.coils[address..address + count].to_vec())
    }

    /// Writes coils starting at `address`.
    pub fn write_coils(&mut self, address: Address, values: &[bool]) -> Result<()> {
        let address = usize::from(address);
        check_address("coil", address, values.len(), self.state.coils.len())?;
        self.state.coils[address..address + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Reads `count` input registers starting at `address`.
    pub fn read_inputs(&self, address: Address, count: u16) -> Result<Vec<u16>> {
        let (address, count) = (usize::from(address), usize::from(count));
        check_address("input", address, count, self.state.inputs.len())?;
        Ok(self.state.inputs[address..address + count].to_vec())
    }

    /// Writes input registers starting at `address`.
    pub fn write_inputs(&mut self, address: Address, values: &[u16]) -> Result<()> {
        let address = usize::from(address);
        check_address("input", address, values.len(), self.state.inputs.len())?;
        self.state.inputs[address..address + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Reads `count` holding registers starting at `address`.
    pub fn read_holdings(&self, address: Address, count: u16) -> Result<Vec<u16>> {
        let (address, count) = (usize::from(address), usize::from(count));
        check_address("holding", address, count, self.state.holdings.len())?;
        Ok(self.state.holdings[address..address + count].to_vec())
    }

    /// Writes holding registers starting at `address`.
    pub fn write_holdings(&mut self, address: Address, values: &[u16]) -> Result<()> {
        let address = usize::from(address);
        check_address("holding", address, values.len(), self.state.holdings.len())?;
        self.state.holdings[address..address + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Reads up to `count` records from a file.
    ///
    /// Requests past the end of the file return the records that exist,
    /// which may be none. Only the file index itself is bounds checked.
    pub fn read_file_records(&self, file: u16, record: Address, count: u16) -> Result<Vec<u16>> {
        check_address("file", usize::from(file), 1, self.state.files.len())?;
        let f = &self.state.files[usize::from(file)];
        let record = usize::from(record);
        if f.len() <= record {
            return Ok(Vec::new());
        }
        let count = usize::from(count).min(f.len() - record);
        Ok(f[record..record + count].to_vec())
    }

    /// Writes records to a file, growing it on demand.
    ///
    /// A file shorter than `record` is padded with zeros up to the write
    /// window; records beyond the window are preserved.
    pub fn write_file_records(&mut self, file: u16, record: Address, values: &[u16]) -> Result<()> {
        check_address("file", usize::from(file), 1, self.state.files.len())?;
        check_address("file record", usize::from(record), values.len(), MAX_FILE_RECORDS)?;
        let f = &mut self.state.files[usize::from(file)];
        let record = usize::from(record);
        let end = record + values.len();
        if f.len() < end {
            f.resize(end, 0);
        }
        f[record..end].copy_from_slice(values);
        Ok(())
    }

    pub(crate) fn ensure_discretes(&mut self, count: usize) {
        if self.state.discretes.len() < count {
            self.state.discretes.resize(count, false);
        }
    }

    pub(crate) fn ensure_coils(&mut self, count: usize) {
        if self.state.coils.len() < count {
            self.state.coils.resize(count, false);
        }
    }

    pub(crate) fn ensure_inputs(&mut self, count: usize) {
        if self.state.inputs.len() < count {
            self.state.inputs.resize(count, 0);
        }
    }

    pub(crate) fn ensure_holdings(&mut self, count: usize) {
        if self.state.holdings.len() < count {
            self.state.holdings.resize(count, 0);
        }
    }

    pub(crate) fn ensure_files(&mut self, count: usize) {
        if self.state.files.len() < count {
            self.state.files.resize(count, Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;
    use crate::Exception;

    fn atomic_with(state: CacheState) -> Atomic {
        let cache = Arc::new(Mutex::new(state));
        Atomic::new(cache.try_lock_owned().unwrap())
    }

    #[test]
    fn bounds_violations_yield_illegal_data_address() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_holdings(10);
        assert_eq!(atomic.read_holdings(0, 10).unwrap(), vec![0; 10]);
        let err = atomic.read_holdings(5, 6).unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
        let err = atomic.write_holdings(9, &[1, 2]).unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
    }

    #[test]
    fn writes_are_read_back() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_coils(4);
        atomic.write_coils(1, &[true, true]).unwrap();
        assert_eq!(
            atomic.read_coils(0, 4).unwrap(),
            vec![false, true, true, false]
        );
    }

    #[test]
    fn ensure_never_shrinks() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_inputs(8);
        atomic.write_inputs(7, &[42]).unwrap();
        atomic.ensure_inputs(4);
        assert_eq!(atomic.read_inputs(7, 1).unwrap(), vec![42]);
    }

    #[test]
    fn file_write_grows_with_zero_padding() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_files(1);
        atomic.write_file_records(0, 4, &[7, 8]).unwrap();
        assert_eq!(
            atomic.read_file_records(0, 0, 100).unwrap(),
            vec![0, 0, 0, 0, 7, 8]
        );
    }

    #[test]
    fn file_write_preserves_post_records() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_files(2);
        atomic.write_file_records(1, 0, &[1, 2, 3, 4, 5]).unwrap();
        atomic.write_file_records(1, 1, &[9]).unwrap();
        assert_eq!(
            atomic.read_file_records(1, 0, 5).unwrap(),
            vec![1, 9, 3, 4, 5]
        );
    }

    #[test]
    fn file_read_is_capped_to_the_file_length() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_files(1);
        atomic.write_file_records(0, 0, &[1, 2, 3]).unwrap();
        assert_eq!(atomic.read_file_records(0, 2, 10).unwrap(), vec![3]);
        assert_eq!(atomic.read_file_records(0, 3, 10).unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn file_record_address_limit() {
        let mut atomic = atomic_with(CacheState::default());
        atomic.ensure_files(1);
        let err = atomic.write_file_records(0, 9_999, &[1, 2]).unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
        assert!(atomic.write_file_records(0, 9_999, &[1]).is_ok());
    }

    #[test]
    fn unknown_file_index() {
        let atomic = atomic_with(CacheState::default());
        let err = atomic.read_file_records(3, 0, 1).unwrap_err();
        assert_eq!(err.exception(), Some(Exception::IllegalDataAddress));
    }
}

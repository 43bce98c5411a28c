// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU payload cursors.
//!
//! [`DataBuilder`] accumulates the payload of an outgoing PDU and
//! [`DataReader`] walks the payload of a received one. Both speak the
//! big-endian wire representation; only the RTU CRC trailer deviates
//! (little-endian, see [`rtu`]).

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

pub(crate) fn packed_bits_len(count: usize) -> usize {
    (count + 7) / 8
}

/// Packs bits into bytes, least significant bit first.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut packed = vec![0; packed_bits_len(bits.len())];
    for (i, bit) in bits.iter().enumerate() {
        packed[i / 8] |= u8::from(*bit) << (i % 8);
    }
    packed
}

/// Unpacks `count` bits from their packed representation.
pub(crate) fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(count);
    for i in 0..count {
        bits.push((bytes[i / 8] >> (i % 8)) & 0b1 != 0);
    }
    bits
}

/// Accumulates the payload of an outgoing PDU.
#[derive(Debug, Default)]
pub(crate) struct DataBuilder {
    data: BytesMut,
    beacons: Vec<usize>,
}

impl DataBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn byte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub(crate) fn word(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    pub(crate) fn bytes(&mut self, values: &[u8]) {
        self.data.put_slice(values);
    }

    /// Appends a count-prefixed byte run.
    pub(crate) fn nbytes(&mut self, values: &[u8]) {
        debug_assert!(values.len() <= u8::MAX.into());
        self.byte(values.len() as u8);
        self.bytes(values);
    }

    pub(crate) fn words(&mut self, values: &[u16]) {
        for value in values {
            self.word(*value);
        }
    }

    /// Appends a count-prefixed word run.
    #[allow(dead_code)]
    pub(crate) fn nwords(&mut self, values: &[u16]) {
        debug_assert!(values.len() <= u8::MAX.into());
        self.byte(values.len() as u8);
        self.words(values);
    }

    /// Appends packed bits as a count-prefixed byte run.
    pub(crate) fn bits(&mut self, bits: &[bool]) {
        self.nbytes(&pack_bits(bits));
    }

    /// Appends a 16-bit bit count followed by the packed bits.
    pub(crate) fn nbits(&mut self, bits: &[bool]) {
        debug_assert!(bits.len() <= u16::MAX.into());
        self.word(bits.len() as u16);
        self.bits(bits);
    }

    /// Reserves a deferred length byte at the current position.
    ///
    /// On [`payload()`](Self::payload) each beaconed position receives the
    /// number of bytes appended after it.
    pub(crate) fn beacon(&mut self) {
        self.beacons.push(self.data.len());
        self.byte(0);
    }

    /// Finalizes all beacons and yields the payload.
    pub(crate) fn payload(mut self) -> Bytes {
        let len = self.data.len();
        for pos in self.beacons.drain(..) {
            debug_assert!(len - pos - 1 <= u8::MAX.into());
            self.data[pos] = (len - pos - 1) as u8;
        }
        self.data.freeze()
    }
}

/// Cursor over the payload of a received PDU.
///
/// All read failures map to Illegal Data Value with cursor/size
/// diagnostics; a structurally broken payload is indistinguishable
/// from a malformed request on the server side.
#[derive(Debug)]
pub(crate) struct DataReader {
    cursor: usize,
    data: Bytes,
}

impl DataReader {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { cursor: 0, data }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn can_read(&self, count: usize) -> Result<()> {
        let wanted = self.cursor + count;
        if wanted > self.data.len() {
            return Err(Error::illegal_data_value(format!(
                "unable to read {} byte(s) beyond end of data: requested {count} byte(s) from {} in {} byte slice",
                wanted - self.data.len(),
                self.cursor,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn byte(&mut self) -> Result<u8> {
        self.can_read(1)?;
        let value = self.data[self.cursor];
        self.cursor += 1;
        Ok(value)
    }

    pub(crate) fn bytes(&mut self, count: usize) -> Result<Bytes> {
        self.can_read(count)?;
        let values = self.data.slice(self.cursor..self.cursor + count);
        self.cursor += count;
        Ok(values)
    }

    pub(crate) fn nbytes(&mut self) -> Result<Bytes> {
        let count = self.byte()?;
        self.bytes(count.into())
    }

    pub(crate) fn word(&mut self) -> Result<u16> {
        self.can_read(2)?;
        let value =
            u16::from(self.data[self.cursor]) << 8 | u16::from(self.data[self.cursor + 1]);
        self.cursor += 2;
        Ok(value)
    }

    pub(crate) fn words(&mut self, count: usize) -> Result<Vec<u16>> {
        self.can_read(count * 2)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.word()?);
        }
        Ok(values)
    }

    #[allow(dead_code)]
    pub(crate) fn nwords(&mut self) -> Result<Vec<u16>> {
        let count = self.byte()?;
        self.words(count.into())
    }

    /// Reads `count` bits from a count-prefixed packed byte run.
    pub(crate) fn bits(&mut self, count: usize) -> Result<Vec<bool>> {
        let packed = self.nbytes()?;
        let expected = packed_bits_len(count);
        if packed.len() != expected {
            return Err(Error::illegal_data_value(format!(
                "expected {count} bit(s) to be packed into {expected} byte(s), but got {}",
                packed.len()
            )));
        }
        Ok(unpack_bits(&packed, count))
    }

    /// Fails unless the payload has been consumed completely.
    pub(crate) fn remaining(&self) -> Result<()> {
        let left = self.data.len() - self.cursor;
        if left != 0 {
            return Err(Error::Protocol(format!(
                "expected to read all the payload data, but {left} byte(s) remain"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_bits_into_bytes() {
        assert_eq!(pack_bits(&[]), &[] as &[u8]);
        assert_eq!(pack_bits(&[true]), &[0b1]);
        assert_eq!(pack_bits(&[false]), &[0b0]);
        assert_eq!(pack_bits(&[true, false]), &[0b01]);
        assert_eq!(pack_bits(&[false, true]), &[0b10]);
        assert_eq!(pack_bits(&[true; 8]), &[0b1111_1111]);
        assert_eq!(pack_bits(&[true; 9]), &[255, 1]);
        assert_eq!(pack_bits(&[false; 9]), &[0, 0]);
    }

    #[test]
    fn unpack_bits_from_bytes() {
        assert_eq!(unpack_bits(&[], 0), &[] as &[bool]);
        assert_eq!(unpack_bits(&[0b1], 1), &[true]);
        assert_eq!(unpack_bits(&[0b01], 2), &[true, false]);
        assert_eq!(unpack_bits(&[0b10], 2), &[false, true]);
        assert_eq!(unpack_bits(&[0b101], 3), &[true, false, true]);
        assert_eq!(unpack_bits(&[0xff, 0b11], 10), &[true; 10]);
    }

    #[test]
    fn bit_packing_roundtrip() {
        let bits = [
            true, false, false, true, true, true, false, true, false, true, true,
        ];
        for len in 0..bits.len() {
            let packed = pack_bits(&bits[..len]);
            assert_eq!(packed.len(), packed_bits_len(len));
            assert_eq!(unpack_bits(&packed, len), &bits[..len]);
        }
    }

    #[test]
    fn builder_words_and_bytes() {
        let mut b = DataBuilder::new();
        b.byte(0x12);
        b.word(0xABCD);
        b.nbytes(&[1, 2, 3]);
        b.nwords(&[0x0102, 0x0304]);
        let payload = b.payload();
        assert_eq!(
            &payload[..],
            &[0x12, 0xAB, 0xCD, 3, 1, 2, 3, 2, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn builder_bits() {
        let mut b = DataBuilder::new();
        b.bits(&[true, false, true, true]);
        assert_eq!(&b.payload()[..], &[1, 0b1101]);

        let mut b = DataBuilder::new();
        b.nbits(&[true, false, true, true]);
        assert_eq!(&b.payload()[..], &[0, 4, 1, 0b1101]);
    }

    #[test]
    fn beacon_finalization() {
        let mut b = DataBuilder::new();
        b.beacon();
        b.byte(6);
        b.word(0x0001);
        b.word(0x0002);
        b.word(0x0003);
        let payload = b.payload();
        assert_eq!(payload[0], 7);
        assert_eq!(payload.len(), 8);
    }

    #[test]
    fn reader_mirrors_builder() {
        let mut b = DataBuilder::new();
        b.byte(0x42);
        b.word(0x1234);
        b.nwords(&[7, 8, 9]);
        b.bits(&[true, true, false]);

        let mut r = DataReader::new(b.payload());
        assert_eq!(r.byte().unwrap(), 0x42);
        assert_eq!(r.word().unwrap(), 0x1234);
        assert_eq!(r.nwords().unwrap(), vec![7, 8, 9]);
        assert_eq!(r.bits(3).unwrap(), vec![true, true, false]);
        assert!(r.remaining().is_ok());
    }

    #[test]
    fn reader_out_of_bounds() {
        let mut r = DataReader::new(Bytes::from_static(&[0x01]));
        assert!(r.word().is_err());
        assert_eq!(r.byte().unwrap(), 0x01);
        assert!(r.byte().is_err());
    }

    #[test]
    fn reader_leftover_bytes() {
        let mut r = DataReader::new(Bytes::from_static(&[0x01, 0x02]));
        assert_eq!(r.byte().unwrap(), 0x01);
        assert!(r.remaining().is_err());
        assert_eq!(r.byte().unwrap(), 0x02);
        assert!(r.remaining().is_ok());
    }

    #[test]
    fn reader_bits_with_bad_byte_count() {
        // 3 bits must arrive in exactly one packed byte
        let mut r = DataReader::new(Bytes::from_static(&[2, 0b101, 0]));
        assert!(r.bits(3).is_err());
    }
}

// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, ErrorKind};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Adu, Pdu, MAX_PDU_DATA_LEN};

pub(crate) const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// Why an MBAP frame was rejected.
///
/// A rejected frame discards the read buffer: the stream offset of the
/// next frame is unknown once a header lies.
#[derive(Debug)]
pub(crate) enum FrameFault {
    /// The protocol identifier field was not zero.
    BadProtocolId { protocol_id: u16 },
    /// The length field describes a PDU above 253 bytes.
    Oversize { pdu_len: usize },
    /// The length field cannot even cover the unit identifier.
    BadLength,
    /// The underlying transport failed.
    Io(Error),
}

impl From<Error> for FrameFault {
    fn from(err: Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for FrameFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadProtocolId { protocol_id } => {
                write!(f, "invalid protocol identifier: expected = 0, actual = {protocol_id}")
            }
            Self::Oversize { pdu_len } => {
                write!(f, "PDU of {pdu_len} bytes exceeds the limit of {MAX_PDU_DATA_LEN}")
            }
            Self::BadLength => f.write_str("invalid data length: 0"),
            Self::Io(err) => err.fmt(f),
        }
    }
}

impl From<FrameFault> for Error {
    fn from(fault: FrameFault) -> Self {
        match fault {
            FrameFault::Io(err) => err,
            fault => Error::new(ErrorKind::InvalidData, fault.to_string()),
        }
    }
}

/// MBAP framing: txid, protocol id, length, unit id, function, payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduCodec;

impl Decoder for AduCodec {
    type Item = Adu;
    type Error = FrameFault;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Adu>, FrameFault> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len == 0 {
            buf.clear();
            return Err(FrameFault::BadLength);
        }
        // len = one byte (unit id) + the PDU (function byte and payload)
        let pdu_len = len - 1;
        if pdu_len > MAX_PDU_DATA_LEN {
            buf.clear();
            return Err(FrameFault::Oversize { pdu_len });
        }
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            buf.clear();
            return Err(FrameFault::BadProtocolId { protocol_id });
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        let mut pdu_data = buf.split_to(pdu_len);
        let function = pdu_data.split_to(1)[0];

        Ok(Some(Adu {
            request: false,
            transaction_id,
            unit_id,
            pdu: Pdu::new(function, pdu_data.freeze()),
        }))
    }
}

impl Encoder<Adu> for AduCodec {
    type Error = FrameFault;

    fn encode(&mut self, adu: Adu, buf: &mut BytesMut) -> Result<(), FrameFault> {
        let Adu {
            unit_id,
            transaction_id,
            pdu,
            ..
        } = adu;
        debug_assert!(pdu.data.len() + 1 <= MAX_PDU_DATA_LEN);
        buf.reserve(pdu.data.len() + HEADER_LEN + 1);
        buf.put_u16(transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(pdu.data.len() as u16 + 2);
        buf.put_u8(unit_id);
        buf.put_u8(pdu.function);
        buf.put_slice(&pdu.data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const TRANSACTION_ID_HI: u8 = 0x10;
    const TRANSACTION_ID_LO: u8 = 0x01;
    const UNIT_ID: u8 = 0xFE;

    #[test]
    fn decode_header_fragment() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::from(
            &[
                TRANSACTION_ID_HI,
                TRANSACTION_ID_LO,
                0x00,
                0x00,
                0x00, // length HI
                0x03, // length LO
                UNIT_ID,
                0x02, // function code
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_exception_message() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::from(
            &[
                TRANSACTION_ID_HI,
                TRANSACTION_ID_LO,
                0x00,
                0x00,
                0x00, // length HI
                0x03, // length LO
                UNIT_ID,
                0x82, // exception = 0x80 + 0x02
                0x03,
                0x00,
            ][..],
        );

        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.transaction_id, 0x1001);
        assert_eq!(adu.unit_id, UNIT_ID);
        assert!(adu.pdu.is_exception());
        assert_eq!(&adu.pdu.data[..], &[0x03]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_with_invalid_protocol_id() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::from(
            &[
                TRANSACTION_ID_HI,
                TRANSACTION_ID_LO,
                0x33, // protocol id HI
                0x12, // protocol id LO
                0x00, // length HI
                0x03, // length LO
                UNIT_ID,
            ][..],
        );
        buf.extend_from_slice(&[0x00, 0x02, 0x66, 0x82, 0x03, 0x00]);
        let err = codec.decode(&mut buf).err().unwrap();
        assert!(matches!(
            err,
            FrameFault::BadProtocolId { protocol_id: 0x3312 }
        ));
        // The buffer is discarded entirely.
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_oversize_length() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x01, 0x00, 0x00, //
                0x01, 0x00, // length = 256 > 253 + 2
                UNIT_ID,
            ][..],
        );
        let err = codec.decode(&mut buf).err().unwrap();
        assert!(matches!(err, FrameFault::Oversize { pdu_len: 255 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_then_decode_roundtrip() {
        let mut codec = AduCodec;
        let adu = Adu {
            request: true,
            transaction_id: 0x1001,
            unit_id: UNIT_ID,
            pdu: Pdu::new(0x04, Bytes::from_static(&[0x00, 0x23, 0x00, 0x05])),
        };
        let mut buf = BytesMut::new();
        codec.encode(adu.clone(), &mut buf).unwrap();

        // header
        assert_eq!(buf[0], TRANSACTION_ID_HI);
        assert_eq!(buf[1], TRANSACTION_ID_LO);
        assert_eq!(buf[2], 0x00);
        assert_eq!(buf[3], 0x00);
        assert_eq!(buf[4], 0x00);
        assert_eq!(buf[5], 0x06);
        assert_eq!(buf[6], UNIT_ID);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded.transaction_id, adu.transaction_id);
        assert_eq!(decoded.unit_id, adu.unit_id);
        assert_eq!(decoded.pdu, adu.pdu);
    }

    #[test]
    fn decode_two_frames_from_one_buffer() {
        let mut codec = AduCodec;
        let mut buf = BytesMut::new();
        for txid in [1u16, 2] {
            codec
                .encode(
                    Adu {
                        request: true,
                        transaction_id: txid,
                        unit_id: 0x01,
                        pdu: Pdu::new(0x03, Bytes::from_static(&[0x00, 0x00, 0x00, 0x01])),
                    },
                    &mut buf,
                )
                .unwrap();
        }
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.transaction_id, 1);
        assert_eq!(second.transaction_id, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}

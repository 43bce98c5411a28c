// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{Adu, FunctionCode, UnitId};

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
pub(crate) const MAX_FRAME_LEN: usize = 256;

// Unit + function + CRC, with an empty payload.
const MIN_FRAME_LEN: usize = 4;

/// Why a timing-delimited frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameFault {
    /// Fewer than the 4 bytes every frame must carry.
    TooShort { len: usize },
    /// More than the 256 bytes a frame may carry.
    Oversize { len: usize },
    /// The trailing CRC does not match the frame body.
    CrcMismatch { expected: u16, actual: u16 },
}

pub(crate) fn calc_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let crc_odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if crc_odd {
                crc ^= 0xA001;
            }
        }
    }
    crc
}

/// Validates a complete frame and splits it into unit, function and payload.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<(UnitId, FunctionCode, Bytes), FrameFault> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameFault::TooShort { len: frame.len() });
    }
    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameFault::Oversize { len: frame.len() });
    }

    let body = &frame[..frame.len() - 2];
    let expected = calc_crc(body);
    let actual =
        u16::from(frame[frame.len() - 2]) | u16::from(frame[frame.len() - 1]) << 8;
    if expected != actual {
        return Err(FrameFault::CrcMismatch { expected, actual });
    }

    let unit_id = frame[0];
    let function = frame[1];
    let data = Bytes::copy_from_slice(&frame[2..frame.len() - 2]);
    Ok((unit_id, function, data))
}

/// Serializes an ADU into a wire frame: unit, function, payload, CRC-LE.
pub(crate) fn encode_frame(adu: &Adu) -> Bytes {
    let mut buf = BytesMut::with_capacity(adu.pdu.data.len() + 4);
    buf.put_u8(adu.unit_id);
    buf.put_u8(adu.pdu.function);
    buf.put_slice(&adu.pdu.data);
    let crc = calc_crc(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Pdu;

    #[test]
    fn crc_known_vectors() {
        // Wire order is little-endian: 0x63B6 is sent as B6 63.
        let msg = [0x01, 0x03, 0x08, 0x2B, 0x00, 0x02];
        assert_eq!(calc_crc(&msg), 0x63B6);

        let msg = [0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00];
        assert_eq!(calc_crc(&msg), 0xF9FB);
    }

    #[test]
    fn crc_of_frame_including_trailer_is_zero() {
        let body = [0x11, 0x22, 0x33, 0x44, 0x55];
        let crc = calc_crc(&body);
        let mut framed = body.to_vec();
        framed.push((crc & 0xFF) as u8);
        framed.push((crc >> 8) as u8);
        assert_eq!(calc_crc(&framed), 0);
    }

    #[test]
    fn encode_read_request_frame() {
        let adu = Adu {
            request: true,
            transaction_id: 0,
            unit_id: 0x01,
            pdu: Pdu::new(0x03, Bytes::from_static(&[0x08, 0x2B, 0x00, 0x02])),
        };
        let frame = encode_frame(&adu);
        assert_eq!(
            &frame[..],
            &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63]
        );
    }

    #[test]
    fn frame_roundtrip() {
        let adu = Adu {
            request: false,
            transaction_id: 0,
            unit_id: 0x11,
            pdu: Pdu::new(0x04, Bytes::from_static(&[0x02, 0xAA, 0xBB])),
        };
        let frame = encode_frame(&adu);
        let (unit_id, function, data) = decode_frame(&frame).unwrap();
        assert_eq!(unit_id, 0x11);
        assert_eq!(function, 0x04);
        assert_eq!(&data[..], &[0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn reject_short_frame() {
        assert_eq!(
            decode_frame(&[0x01, 0x03, 0xFF]),
            Err(FrameFault::TooShort { len: 3 })
        );
    }

    #[test]
    fn reject_oversize_frame() {
        let frame = vec![0; MAX_FRAME_LEN + 1];
        assert_eq!(
            decode_frame(&frame),
            Err(FrameFault::Oversize {
                len: MAX_FRAME_LEN + 1
            })
        );
    }

    #[test]
    fn reject_corrupted_frame() {
        let adu = Adu {
            request: true,
            transaction_id: 0,
            unit_id: 0x01,
            pdu: Pdu::new(0x03, Bytes::from_static(&[0x00, 0x00, 0x00, 0x01])),
        };
        let mut frame = encode_frame(&adu).to_vec();
        frame[3] ^= 0xFF;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameFault::CrcMismatch { .. })
        ));
    }
}

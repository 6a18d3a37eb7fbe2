//! Modbus ADU framing
//!
//! RTU: `station | PDU | CRC-16/MODBUS (low byte first)`.
//! TCP: `transaction | protocol (0) | length | unit | PDU`.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};

use super::constants::{
    MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MBAP_PREFIX_LEN, MODBUS_PROTOCOL_ID, RTU_CRC_LEN,
    RTU_MIN_FRAME_LEN,
};
use super::pdu::ModbusPdu;
use crate::error::{ComlinkError, Result};

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS of `data`
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Framing used on the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusFraming {
    Rtu,
    #[default]
    Tcp,
}

/// Decoded application data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    /// MBAP transaction id, `None` for RTU
    pub transaction: Option<u16>,
    pub station: u8,
    pub pdu: ModbusPdu,
}

impl ModbusFraming {
    pub fn encode(&self, transaction: u16, station: u8, pdu: &ModbusPdu) -> Bytes {
        match self {
            Self::Rtu => encode_rtu(station, pdu),
            Self::Tcp => encode_tcp(transaction, station, pdu),
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Adu> {
        match self {
            Self::Rtu => decode_rtu(frame),
            Self::Tcp => decode_tcp(frame),
        }
    }

    /// Length of the response frame at the start of `buf`, `Ok(None)` while more
    /// bytes are needed.
    pub fn response_len(&self, buf: &[u8]) -> Result<Option<usize>> {
        match self {
            Self::Rtu => rtu_response_len(buf),
            Self::Tcp => tcp_frame_len(buf),
        }
    }
}

pub fn encode_rtu(station: u8, pdu: &ModbusPdu) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + pdu.len() + RTU_CRC_LEN);
    buf.put_u8(station);
    buf.put_slice(pdu.as_slice());
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf.freeze()
}

pub fn encode_tcp(transaction: u16, station: u8, pdu: &ModbusPdu) -> Bytes {
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    buf.put_u16(transaction);
    buf.put_u16(MODBUS_PROTOCOL_ID);
    buf.put_u16((pdu.len() + 1) as u16);
    buf.put_u8(station);
    buf.put_slice(pdu.as_slice());
    buf.freeze()
}

pub fn decode_rtu(frame: &[u8]) -> Result<Adu> {
    if frame.len() < RTU_MIN_FRAME_LEN {
        return Err(ComlinkError::malformed(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    let (body, trailer) = frame.split_at(frame.len() - RTU_CRC_LEN);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(ComlinkError::malformed(format!(
            "CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}"
        )));
    }
    Ok(Adu {
        transaction: None,
        station: body[0],
        pdu: ModbusPdu::from_slice(&body[1..])?,
    })
}

pub fn decode_tcp(frame: &[u8]) -> Result<Adu> {
    if frame.len() <= MBAP_HEADER_LEN {
        return Err(ComlinkError::malformed(format!(
            "MBAP frame too short: {} bytes",
            frame.len()
        )));
    }
    let transaction = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol = u16::from_be_bytes([frame[2], frame[3]]);
    if protocol != MODBUS_PROTOCOL_ID {
        return Err(ComlinkError::malformed(format!(
            "MBAP protocol id {protocol} is not Modbus"
        )));
    }
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if length != frame.len() - MBAP_PREFIX_LEN {
        return Err(ComlinkError::malformed(format!(
            "MBAP length {length} does not match frame ({} bytes after header)",
            frame.len() - MBAP_PREFIX_LEN
        )));
    }
    Ok(Adu {
        transaction: Some(transaction),
        station: frame[6],
        pdu: ModbusPdu::from_slice(&frame[MBAP_HEADER_LEN..])?,
    })
}

fn tcp_frame_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < MBAP_PREFIX_LEN {
        return Ok(None);
    }
    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if length < 2 || length > MAX_MBAP_LENGTH {
        return Err(ComlinkError::malformed(format!(
            "MBAP length {length} out of range"
        )));
    }
    Ok(Some(MBAP_PREFIX_LEN + length))
}

/// RTU has no length field; derive it from the function code of a response.
fn rtu_response_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(&fc) = buf.get(1) else {
        return Ok(None);
    };
    if fc & 0x80 != 0 {
        return Ok(Some(1 + 2 + RTU_CRC_LEN));
    }
    match fc {
        0x01..=0x04 => Ok(buf
            .get(2)
            .map(|byte_count| 1 + 2 + *byte_count as usize + RTU_CRC_LEN)),
        0x05 | 0x06 | 0x0F | 0x10 => Ok(Some(1 + 5 + RTU_CRC_LEN)),
        other => Err(ComlinkError::unsupported(format!(
            "Modbus function code 0x{other:02X}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_crc_reference_frames() {
        let frame = encode_rtu(1, &ModbusPdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap());
        assert_eq!(&frame[..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);

        let frame = encode_rtu(1, &ModbusPdu::from_slice(&[0x01, 0x00, 0x00, 0x00, 0x01]).unwrap());
        assert_eq!(&frame[..], &[0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFD, 0xCA]);
    }

    #[test]
    fn test_rtu_crc_mismatch() {
        let err = decode_rtu(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0B]).unwrap_err();
        assert!(matches!(err, ComlinkError::MalformedInput(_)));
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_mbap_header() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x00, 0x10, 0x00, 0x02]).unwrap();
        let frame = encode_tcp(0x0102, 9, &pdu);
        assert_eq!(
            &frame[..],
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x09, 0x03, 0x00, 0x10, 0x00, 0x02]
        );
        let adu = decode_tcp(&frame).unwrap();
        assert_eq!(adu.transaction, Some(0x0102));
        assert_eq!(adu.station, 9);
        assert_eq!(adu.pdu, pdu);
    }

    #[test]
    fn test_mbap_length_mismatch() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x00];
        assert!(matches!(
            decode_tcp(&frame),
            Err(ComlinkError::MalformedInput(_))
        ));
        let frame = [0x00, 0x01, 0x00, 0x07, 0x00, 0x03, 0x01, 0x03, 0x00];
        assert!(decode_tcp(&frame).is_err());
    }

    #[test]
    fn test_response_len() {
        let rtu = ModbusFraming::Rtu;
        assert_eq!(rtu.response_len(&[0x01]).unwrap(), None);
        assert_eq!(rtu.response_len(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(rtu.response_len(&[0x01, 0x03, 0x04]).unwrap(), Some(9));
        assert_eq!(rtu.response_len(&[0x01, 0x83]).unwrap(), Some(5));
        assert_eq!(rtu.response_len(&[0x01, 0x0F]).unwrap(), Some(8));
        assert!(rtu.response_len(&[0x01, 0x2B]).is_err());

        let tcp = ModbusFraming::Tcp;
        assert_eq!(tcp.response_len(&[0x00, 0x01, 0x00]).unwrap(), None);
        assert_eq!(
            tcp.response_len(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x05]).unwrap(),
            Some(11)
        );
        assert!(tcp.response_len(&[0x00, 0x01, 0x00, 0x00, 0x10, 0x00]).is_err());
    }
}

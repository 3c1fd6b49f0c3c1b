//! Modbus-TCP (MBAP) framing for the gateway side.
//!
//! Only the read functions are served. Everything the TCP side answers comes
//! from the register mirror.

use anyhow::{anyhow, Result};

use super::rtu::MAX_READ_COUNT;
use crate::core::mirror::RegisterMirror;

pub const MBAP_HEADER_LEN: usize = 7;

/// Largest PDU allowed by the Modbus application protocol.
const MAX_PDU_LEN: usize = 253;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(buf: [u8; MBAP_HEADER_LEN]) -> Result<Self> {
        let header = Self {
            transaction_id: u16::from_be_bytes([buf[0], buf[1]]),
            protocol_id: u16::from_be_bytes([buf[2], buf[3]]),
            length: u16::from_be_bytes([buf[4], buf[5]]),
            unit_id: buf[6],
        };
        if header.protocol_id != 0 {
            return Err(anyhow!("Unknown protocol id {}", header.protocol_id));
        }
        let pdu_len = header.pdu_len();
        if pdu_len == 0 || pdu_len > MAX_PDU_LEN {
            return Err(anyhow!("Invalid MBAP length {}", header.length));
        }
        Ok(header)
    }

    /// Bytes following the header; the length field also counts the unit id.
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    fn frame(&self, pdu: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        out.push(self.unit_id);
        out.extend_from_slice(pdu);
        out
    }
}

pub fn build_exception(header: &MbapHeader, function: u8, code: u8) -> Vec<u8> {
    header.frame(&[function | 0x80, code])
}

pub fn build_read_response(header: &MbapHeader, function: u8, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(2 + values.len() * 2);
    pdu.push(function);
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    header.frame(&pdu)
}

/// Answers one request PDU from the mirror and returns the full response frame.
pub fn respond(header: &MbapHeader, pdu: &[u8], mirror: &RegisterMirror) -> Vec<u8> {
    let Some(&function) = pdu.first() else {
        return build_exception(header, 0, EXCEPTION_ILLEGAL_FUNCTION);
    };

    match function {
        READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
            if pdu.len() != 5 {
                return build_exception(header, function, EXCEPTION_ILLEGAL_DATA_VALUE);
            }
            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
            let count = u16::from_be_bytes([pdu[3], pdu[4]]);
            if count == 0 || count > MAX_READ_COUNT {
                return build_exception(header, function, EXCEPTION_ILLEGAL_DATA_VALUE);
            }
            match mirror.read(address, count) {
                Some(values) => build_read_response(header, function, &values),
                None => build_exception(header, function, EXCEPTION_ILLEGAL_DATA_ADDRESS),
            }
        }
        other => {
            log::debug!("Unsupported Modbus-TCP function 0x{other:02X}");
            build_exception(header, other, EXCEPTION_ILLEGAL_FUNCTION)
        }
    }
}

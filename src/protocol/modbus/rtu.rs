use anyhow::{anyhow, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Largest register count a single read-holding request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

const READ_HOLDINGS: u8 = 0x03;

pub fn generate_read_holdings_request(
    slave_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    if count == 0 || count > MAX_READ_COUNT {
        return Err(anyhow!(
            "Register count {count} outside 1..={MAX_READ_COUNT}"
        ));
    }
    let mut request = ModbusRequest::new(slave_id, ModbusProto::Rtu);
    let mut raw = Vec::new();
    request.generate_get_holdings(start_address, count, &mut raw)?;
    Ok((request, raw))
}

/// Total frame length of a response, given its first three bytes
/// (station, function, byte count or exception code).
pub fn expected_response_len(head: [u8; 3]) -> usize {
    if head[1] & 0x80 != 0 {
        // station + function + exception code + CRC
        5
    } else {
        3 + head[2] as usize + 2
    }
}

pub fn parse_read_holdings_response(
    request: &mut ModbusRequest,
    response: &[u8],
    count: u16,
) -> Result<Vec<u16>> {
    if response.len() < 5 {
        return Err(anyhow!("Response too short: {} bytes", response.len()));
    }
    request
        .parse_ok(response)
        .map_err(|err| anyhow!("Slave {} rejected read: {err:?}", response[0]))?;

    if response[1] != READ_HOLDINGS {
        return Err(anyhow!(
            "Function code mismatch: expected 0x{READ_HOLDINGS:02X}, got 0x{:02X}",
            response[1]
        ));
    }
    let byte_count = response[2] as usize;
    if byte_count != count as usize * 2 || response.len() != 3 + byte_count + 2 {
        return Err(anyhow!(
            "Byte count mismatch: expected {}, got {byte_count}",
            count as usize * 2
        ));
    }

    Ok(response[3..3 + byte_count]
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Splits `count` registers starting at `start` into request-sized pieces.
pub fn chunk_reads(start: u16, count: u16) -> impl Iterator<Item = (u16, u16)> {
    let start = start as u32;
    let end = (start + count as u32).min(u16::MAX as u32 + 1);
    (start..end)
        .step_by(MAX_READ_COUNT as usize)
        .map(move |offset| {
            let len = (end - offset).min(MAX_READ_COUNT as u32);
            (offset as u16, len as u16)
        })
}

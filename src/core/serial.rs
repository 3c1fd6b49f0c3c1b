use anyhow::{anyhow, Result};
use std::{
    io::{Read, Write},
    time::Duration,
};

use serialport::{ClearBuffer, SerialPort};

use crate::{
    core::engine::RegisterBus,
    protocol::modbus::{
        expected_response_len, generate_read_holdings_request, parse_read_holdings_response,
    },
};

const SERIAL_PORT_OPEN_RETRIES: usize = 3;

pub fn open_serial_port(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(port, baud_rate).timeout(timeout);

    #[cfg(unix)]
    {
        let mut handle = builder
            .open_native()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))?;
        handle
            .set_exclusive(true)
            .map_err(|err| anyhow!("Failed to acquire exclusive access to {port}: {err}"))?;
        Ok(Box::new(handle))
    }

    #[cfg(not(unix))]
    {
        builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))
    }
}

pub fn open_serial_port_with_retry(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>> {
    let mut last_error = String::new();
    for attempt in 1..=SERIAL_PORT_OPEN_RETRIES {
        log::info!(
            "Attempting to open serial port {port} (attempt {attempt}/{SERIAL_PORT_OPEN_RETRIES})"
        );
        match open_serial_port(port, baud_rate, timeout) {
            Ok(handle) => {
                if attempt > 1 {
                    log::info!("Opened serial port {port} after {attempt} attempts");
                }
                return Ok(handle);
            }
            Err(err) => {
                last_error = err.to_string();
                if attempt < SERIAL_PORT_OPEN_RETRIES {
                    log::warn!(
                        "Failed to open serial port {port} (attempt {attempt}/{SERIAL_PORT_OPEN_RETRIES}): {last_error}"
                    );
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    Err(anyhow!(
        "Failed to open port {port} after {SERIAL_PORT_OPEN_RETRIES} attempts: {last_error}"
    ))
}

/// RS485 master over a real serial port. One request, one response; the
/// port timeout bounds how long a silent slave can stall the cycle.
///
/// If the device is missing the bus stays detached and every transaction
/// tries to reopen it, so the rest of the gateway keeps running.
pub struct SerialBus {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialBus {
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Self {
        let port = match open_serial_port_with_retry(name, baud_rate, timeout) {
            Ok(port) => Some(port),
            Err(err) => {
                log::error!("{err}; polling will keep retrying");
                None
            }
        };
        Self {
            port,
            name: name.to_string(),
            baud_rate,
            timeout,
        }
    }

    fn attached_port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        if self.port.is_none() {
            let port = open_serial_port(&self.name, self.baud_rate, self.timeout)?;
            log::info!("Reopened serial port {}", self.name);
            self.port = Some(port);
        }
        self.port
            .as_mut()
            .ok_or_else(|| anyhow!("Serial port {} is not open", self.name))
    }
}

fn send_request(port: &mut Box<dyn SerialPort>, raw: &[u8]) -> Result<()> {
    // Drop late bytes from a previous timed-out exchange.
    port.clear(ClearBuffer::Input)?;
    port.write_all(raw)?;
    port.flush()?;
    Ok(())
}

fn read_response(port: &mut Box<dyn SerialPort>) -> std::io::Result<Vec<u8>> {
    let mut head = [0u8; 3];
    port.read_exact(&mut head)?;

    let mut response = head.to_vec();
    response.resize(expected_response_len(head), 0);
    port.read_exact(&mut response[3..])?;
    Ok(response)
}

impl RegisterBus for SerialBus {
    fn read_holding_registers(&mut self, slave_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        let (mut request, raw) = generate_read_holdings_request(slave_id, address, count)?;

        let port = self.attached_port()?;
        if let Err(err) = send_request(port, &raw) {
            // Writes only fail when the device went away; reopen next time.
            self.port = None;
            return Err(anyhow!("Serial port {} failed: {err}", self.name));
        }

        let response = read_response(port)
            .map_err(|err| anyhow!("No valid response from slave {slave_id}: {err}"))?;
        log::trace!(
            "RTU slave {slave_id} <- {} bytes, -> {} bytes",
            raw.len(),
            response.len()
        );
        parse_read_holdings_response(&mut request, &response, count)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.baud_rate = baud;
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baud)?;
        }
        Ok(())
    }
}

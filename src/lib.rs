//! rtu2tcp: Modbus RTU (RS485) to Modbus TCP gateway
//!
//! The gateway polls RS485 slaves according to an operator-edited mapping
//! table and republishes their holding registers as a single Modbus-TCP
//! register space. The table and the device settings are edited through a
//! small HTTP endpoint and survive restarts.
//!
//! `protocol` holds the data model and wire formats, `core` the running
//! gateway (configuration store, poll engine, TCP server) and `api` the HTTP
//! endpoint. The boot helpers wiring them together are kept out of the
//! generated documentation.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

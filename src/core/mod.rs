//! Gateway runtime
//!
//! Everything that holds state while the gateway runs: the configuration
//! store and its persistence, the register mirror, the poll engine driving
//! the RS485 bus and the Modbus-TCP server reading from the mirror.

pub mod clients;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod persistence;
pub mod serial;
pub mod store;
pub mod tcp_server;

pub use clients::{ClientGuard, ClientRegistry, ClientSnapshot};
pub use engine::{CycleStats, PollEngine, RegisterBus};
pub use error::{GatewayError, GatewayResult, ValidationError};
pub use mirror::RegisterMirror;
pub use persistence::{ConfigPersistence, JsonFilePersistence};
pub use store::ConfigStore;

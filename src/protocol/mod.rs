pub mod mapping;
pub mod modbus;
pub mod settings;
pub mod wire;

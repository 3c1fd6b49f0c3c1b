//! Error taxonomy of the configuration write path
//!
//! Every variant is recoverable: a rejected write leaves the running
//! configuration untouched and the gateway keeps serving it.

use thiserror::Error;

/// Why a candidate configuration was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "entries {first} and {second} overlap on the TCP side \
         ({first_start}..={first_end} and {second_start}..={second_end})"
    )]
    Overlap {
        first: usize,
        second: usize,
        first_start: u16,
        first_end: u32,
        second_start: u16,
        second_end: u32,
    },
    #[error("entry {index} has length 0")]
    ZeroLength { index: usize },
    #[error("entry {index} uses slave id {slave_id}, expected 1..=247")]
    SlaveIdOutOfRange { index: usize, slave_id: u8 },
    #[error("entry {index} ends at {end}, past the end of the {space} register space")]
    RangeOverflow {
        index: usize,
        space: &'static str,
        end: u32,
    },
    #[error("field '{field}' has malformed value '{value}'")]
    MalformedField { field: String, value: String },
    #[error("field '{field}' is missing")]
    MissingField { field: String },
    #[error("{count} entries submitted, at most {max} are supported")]
    TooManyEntries { count: usize, max: usize },
}

/// Errors surfaced by the configuration store and sync endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("authentication failed")]
    Authentication,
    #[error("persistence failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
